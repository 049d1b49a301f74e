// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::io::Cursor;

use murmur3::murmur3_32;
use serde::{Deserialize, Serialize};

use crate::record::{FlagRecord, FlagValue, Version};

/// Number of rollout buckets. A fraction of `0.5` enables buckets `0..5_000`.
pub const ROLLOUT_BUCKETS: u32 = 10_000;

/// Caller-supplied context for a flag check.
///
/// The identifier (user id, account id, request id...) is the discriminator
/// hashed for percentage rollouts, so the same identifier always lands in the
/// same bucket for a given flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationContext {
	pub identifier: Option<String>,
}

impl EvaluationContext {
	pub fn new(identifier: impl Into<String>) -> Self {
		Self {
			identifier: Some(identifier.into()),
		}
	}

	/// A context with no identifier; only fully rolled-out flags are enabled for it.
	pub fn anonymous() -> Self {
		Self::default()
	}
}

/// Why an evaluation produced its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluationReason {
	/// Boolean flag, returned as stored.
	Boolean,
	/// Percentage rollout. `bucket` is `None` for anonymous contexts.
	Rollout { bucket: Option<u32>, threshold: u32 },
	/// Flag not present locally; the configured default was used.
	DefaultApplied,
	/// Flag present but its payload is not a gate; the configured default was used.
	NotAGate,
}

/// Result of a flag check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
	pub key: String,
	pub enabled: bool,
	/// Version of the record that was evaluated, if any.
	pub version: Option<Version>,
	pub reason: EvaluationReason,
}

impl Evaluation {
	pub fn is_default(&self) -> bool {
		matches!(
			self.reason,
			EvaluationReason::DefaultApplied | EvaluationReason::NotAGate
		)
	}
}

/// Evaluates a flag for a context.
///
/// The evaluation order is:
/// 1. Missing record resolves to `default_on_missing`
/// 2. Boolean payloads are returned as stored
/// 3. Rollout payloads hash the context identifier into a bucket
/// 4. Any other payload resolves to `default_on_missing`
pub fn evaluate(
	key: &str,
	record: Option<&FlagRecord>,
	context: &EvaluationContext,
	default_on_missing: bool,
) -> Evaluation {
	let Some(record) = record else {
		return Evaluation {
			key: key.to_string(),
			enabled: default_on_missing,
			version: None,
			reason: EvaluationReason::DefaultApplied,
		};
	};

	let (enabled, reason) = match record.value() {
		FlagValue::Boolean(enabled) => (*enabled, EvaluationReason::Boolean),
		FlagValue::Rollout(fraction) => {
			let threshold = rollout_threshold(*fraction);
			match context.identifier.as_deref() {
				Some(identifier) => {
					let bucket = rollout_bucket(key, identifier);
					(
						bucket < threshold,
						EvaluationReason::Rollout {
							bucket: Some(bucket),
							threshold,
						},
					)
				}
				None => (
					threshold >= ROLLOUT_BUCKETS,
					EvaluationReason::Rollout {
						bucket: None,
						threshold,
					},
				),
			}
		}
		FlagValue::Text(_) | FlagValue::Structured(_) => {
			(default_on_missing, EvaluationReason::NotAGate)
		}
	};

	Evaluation {
		key: key.to_string(),
		enabled,
		version: Some(record.version()),
		reason,
	}
}

/// Deterministic bucket in `0..ROLLOUT_BUCKETS` for an identifier on a flag.
///
/// Salting with the flag key keeps bucket assignment independent across flags.
pub fn rollout_bucket(flag_key: &str, identifier: &str) -> u32 {
	let input = format!("{}.{}", flag_key, identifier);
	let hash = murmur3_32(&mut Cursor::new(input.as_bytes()), 0).unwrap_or(0);
	hash % ROLLOUT_BUCKETS
}

fn rollout_threshold(fraction: f64) -> u32 {
	(fraction.clamp(0.0, 1.0) * f64::from(ROLLOUT_BUCKETS)).round() as u32
}
