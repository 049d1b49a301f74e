// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Byte encoding of flag payloads as stored in a backend.
//!
//! Payloads are stored as JSON. Because [`FlagValue`] is untagged, values written
//! by older writers as a bare percentage string such as `0.5` decode as a
//! rollout without any special casing.

use crate::error::{FlagsError, Result};
use crate::record::FlagValue;

/// Encodes a flag value for storage.
pub fn encode(value: &FlagValue) -> Vec<u8> {
	// Serializing an untagged enum of plain JSON types cannot fail.
	serde_json::to_vec(value).unwrap_or_default()
}

/// Encodes a flag value as a string, for text columns.
pub fn encode_str(value: &FlagValue) -> String {
	serde_json::to_string(value).unwrap_or_default()
}

/// Decodes a stored payload.
pub fn decode(bytes: &[u8]) -> Result<FlagValue> {
	let value: FlagValue = serde_json::from_slice(bytes)
		.map_err(|e| FlagsError::MalformedPayload(e.to_string()))?;
	value.validate()?;
	Ok(value)
}
