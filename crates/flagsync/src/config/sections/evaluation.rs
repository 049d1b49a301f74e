// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationConfigLayer {
	pub default_on_missing: Option<bool>,
}

impl EvaluationConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.default_on_missing.is_some() {
			self.default_on_missing = other.default_on_missing;
		}
	}

	pub fn finalize(self) -> EvaluationConfig {
		EvaluationConfig {
			default_on_missing: self.default_on_missing.unwrap_or(false),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationConfig {
	/// Result of `is_enabled` for flags that are absent or are not gates.
	pub default_on_missing: bool,
}
