// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FlagsError, Result};

/// Maximum length of a flag key in bytes.
pub const MAX_KEY_LEN: usize = 256;

/// Comparable version token assigned by the backend.
///
/// etcd uses the key's `mod_revision`; the relational store uses a store-wide
/// revision counter. Either way a newer write always carries a larger token.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Version(pub u64);

impl Version {
	/// Converts a signed backend revision into a version token.
	pub fn from_revision(revision: i64) -> Result<Self> {
		u64::try_from(revision)
			.map(Version)
			.map_err(|_| FlagsError::InvalidVersion(revision))
	}

	/// Returns the signed revision form used by etcd and SQL columns.
	pub fn as_revision(self) -> i64 {
		i64::try_from(self.0).unwrap_or(i64::MAX)
	}

	/// The token immediately after this one.
	pub fn next(self) -> Self {
		Version(self.0.saturating_add(1))
	}
}

impl fmt::Display for Version {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "v{}", self.0)
	}
}

/// Payload carried by a flag.
///
/// Serialized untagged, so a bare `true` is a boolean flag and a bare `0.5` is a
/// 50% rollout. A bare number outside `0.0..=1.0` is not a rollout and is kept
/// as structured JSON, like any other value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "serde_json::Value")]
pub enum FlagValue {
	Boolean(bool),
	/// Fraction of identifiers that see the flag enabled, in `0.0..=1.0`.
	Rollout(f64),
	Text(String),
	Structured(serde_json::Value),
}

impl FlagValue {
	/// Builds a rollout payload, rejecting fractions outside `0.0..=1.0`.
	pub fn rollout(fraction: f64) -> Result<Self> {
		let value = FlagValue::Rollout(fraction);
		value.validate()?;
		Ok(value)
	}

	pub fn validate(&self) -> Result<()> {
		match self {
			FlagValue::Rollout(fraction) if !(0.0..=1.0).contains(fraction) => {
				Err(FlagsError::InvalidRollout(*fraction))
			}
			_ => Ok(()),
		}
	}

	/// Returns true if this payload gates a feature (boolean or rollout).
	pub fn is_gate(&self) -> bool {
		matches!(self, FlagValue::Boolean(_) | FlagValue::Rollout(_))
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			FlagValue::Boolean(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			FlagValue::Text(s) => Some(s),
			_ => None,
		}
	}
}

impl From<serde_json::Value> for FlagValue {
	fn from(value: serde_json::Value) -> Self {
		match value {
			serde_json::Value::Bool(b) => FlagValue::Boolean(b),
			serde_json::Value::String(s) => FlagValue::Text(s),
			serde_json::Value::Number(ref n) => match n.as_f64() {
				Some(fraction) if (0.0..=1.0).contains(&fraction) => FlagValue::Rollout(fraction),
				_ => FlagValue::Structured(value),
			},
			other => FlagValue::Structured(other),
		}
	}
}

/// One flag as last observed at the backend.
///
/// Records are immutable: a change at the backend produces a new record with a
/// newer version rather than a mutation of this one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagRecord {
	key: String,
	value: FlagValue,
	version: Version,
}

impl FlagRecord {
	pub fn new(key: impl Into<String>, value: FlagValue, version: Version) -> Result<Self> {
		let key = key.into();
		if !validate_key(&key) {
			return Err(FlagsError::InvalidKey(key));
		}
		value.validate()?;
		Ok(Self {
			key,
			value,
			version,
		})
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	pub fn value(&self) -> &FlagValue {
		&self.value
	}

	pub fn version(&self) -> Version {
		self.version
	}
}

/// Validates a flag key.
///
/// Valid keys are non-empty, at most [`MAX_KEY_LEN`] bytes, and contain no `/`,
/// whitespace or control characters, since etcd keys are built by joining a
/// namespace prefix and the flag key with `/`.
pub fn validate_key(key: &str) -> bool {
	if key.is_empty() || key.len() > MAX_KEY_LEN {
		return false;
	}

	key
		.chars()
		.all(|c| c != '/' && !c.is_whitespace() && !c.is_control())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_validate_key() {
		assert!(validate_key("new-ui"));
		assert!(validate_key("feature.new_flow"));
		assert!(validate_key("3f9c2a7e-0d4b-4a51-9f0e-8c1d2b3a4e5f"));

		assert!(!validate_key(""));
		assert!(!validate_key("with/slash"));
		assert!(!validate_key("with space"));
		assert!(!validate_key("tab\there"));
		assert!(!validate_key(&"k".repeat(MAX_KEY_LEN + 1)));
	}

	#[test]
	fn test_record_rejects_empty_key() {
		let err = FlagRecord::new("", FlagValue::Boolean(true), Version(1)).unwrap_err();
		assert_eq!(err, FlagsError::InvalidKey(String::new()));
	}

	#[test]
	fn test_record_rejects_out_of_range_rollout() {
		let err = FlagRecord::new("rollout", FlagValue::Rollout(1.5), Version(1)).unwrap_err();
		assert_eq!(err, FlagsError::InvalidRollout(1.5));
		assert!(FlagValue::rollout(f64::NAN).is_err());
	}

	#[test]
	fn test_version_ordering_and_revision_conversion() {
		assert!(Version(2) > Version(1));
		assert_eq!(Version(7).next(), Version(8));
		assert_eq!(Version::from_revision(42).unwrap(), Version(42));
		assert_eq!(
			Version::from_revision(-1).unwrap_err(),
			FlagsError::InvalidVersion(-1)
		);
		assert_eq!(Version(42).as_revision(), 42);
	}

	#[test]
	fn test_is_gate() {
		assert!(FlagValue::Boolean(false).is_gate());
		assert!(FlagValue::Rollout(0.25).is_gate());
		assert!(!FlagValue::Text("dark".to_string()).is_gate());
		assert!(!FlagValue::Structured(serde_json::json!({"limit": 10})).is_gate());
	}
}
