// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backend selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const DEFAULT_ETCD_NAMESPACE: &str = "flagsync";
const DEFAULT_DATABASE_URL: &str = "sqlite:./flags.db";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
	Etcd,
	#[default]
	Relational,
}

impl BackendKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			BackendKind::Etcd => "etcd",
			BackendKind::Relational => "relational",
		}
	}
}

impl fmt::Display for BackendKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for BackendKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"etcd" => Ok(BackendKind::Etcd),
			"relational" | "sql" | "sqlite" => Ok(BackendKind::Relational),
			other => Err(format!("unknown backend '{other}'")),
		}
	}
}

/// Backend configuration (runtime, fully resolved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
	pub kind: BackendKind,
	/// Preamble of the etcd key layout `{namespace}_feature_flag/{key}`.
	pub etcd_namespace: String,
	pub database_url: String,
}

impl Default for BackendConfig {
	fn default() -> Self {
		BackendConfigLayer::default().finalize()
	}
}

/// Backend configuration layer (partial, for merging).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfigLayer {
	#[serde(default)]
	pub kind: Option<BackendKind>,
	#[serde(default)]
	pub etcd_namespace: Option<String>,
	#[serde(default)]
	pub database_url: Option<String>,
}

impl BackendConfigLayer {
	pub fn merge(&mut self, other: BackendConfigLayer) {
		if other.kind.is_some() {
			self.kind = other.kind;
		}
		if other.etcd_namespace.is_some() {
			self.etcd_namespace = other.etcd_namespace;
		}
		if other.database_url.is_some() {
			self.database_url = other.database_url;
		}
	}

	pub fn finalize(self) -> BackendConfig {
		BackendConfig {
			kind: self.kind.unwrap_or_default(),
			etcd_namespace: self
				.etcd_namespace
				.unwrap_or_else(|| DEFAULT_ETCD_NAMESPACE.to_string()),
			database_url: self
				.database_url
				.unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = BackendConfigLayer::default().finalize();
		assert_eq!(config.kind, BackendKind::Relational);
		assert_eq!(config.etcd_namespace, "flagsync");
		assert_eq!(config.database_url, "sqlite:./flags.db");
	}

	#[test]
	fn test_merge_overrides_only_set_fields() {
		let mut base = BackendConfigLayer {
			kind: Some(BackendKind::Relational),
			etcd_namespace: Some("base".to_string()),
			database_url: None,
		};
		base.merge(BackendConfigLayer {
			kind: Some(BackendKind::Etcd),
			..Default::default()
		});

		let config = base.finalize();
		assert_eq!(config.kind, BackendKind::Etcd);
		assert_eq!(config.etcd_namespace, "base");
	}

	#[test]
	fn test_parse_kind() {
		assert_eq!("ETCD".parse::<BackendKind>().unwrap(), BackendKind::Etcd);
		assert_eq!(
			"sqlite".parse::<BackendKind>().unwrap(),
			BackendKind::Relational
		);
		assert!("redis".parse::<BackendKind>().is_err());
	}
}
