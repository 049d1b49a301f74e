// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for flag records and payload decoding.

use thiserror::Error;

/// Errors raised while building or decoding flag records.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlagsError {
	/// Flag key is empty or contains characters that cannot be used as a store key.
	#[error("invalid flag key {0:?}")]
	InvalidKey(String),

	/// Rollout fraction is outside `0.0..=1.0` or not a finite number.
	#[error("rollout fraction {0} is outside 0.0..=1.0")]
	InvalidRollout(f64),

	/// Stored payload could not be decoded into a flag value.
	#[error("malformed flag payload: {0}")]
	MalformedPayload(String),

	/// Backend reported a revision that does not fit a version token.
	#[error("invalid version token {0}")]
	InvalidVersion(i64),
}

/// Result type alias for core flag operations.
pub type Result<T> = std::result::Result<T, FlagsError>;
