// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use flagsync_core::{FlagsError, Version};

use crate::etcd::KvError;

/// Errors raised by flag store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	/// A stored flag could not be decoded, or a caller passed an invalid key or value.
	#[error("Codec error: {0}")]
	Codec(#[from] FlagsError),

	/// The backend could not be reached or dropped the connection.
	#[error("Store unavailable: {0}")]
	Unavailable(String),

	/// The requested watch start is older than the retained change history.
	#[error("Watch start {requested} is older than compacted revision {compacted}")]
	Compacted { requested: Version, compacted: Version },

	#[error("{operation} timed out after {after:?}")]
	Timeout {
		operation: &'static str,
		after: Duration,
	},

	#[error("Backend {0} does not support change notification")]
	WatchUnsupported(&'static str),
}

impl StoreError {
	/// Returns true if the error means the watch history was compacted away.
	pub fn is_compacted(&self) -> bool {
		matches!(self, StoreError::Compacted { .. })
	}
}

impl From<KvError> for StoreError {
	fn from(err: KvError) -> Self {
		match err {
			KvError::Compacted {
				requested,
				compacted,
			} => StoreError::Compacted {
				requested: Version(u64::try_from(requested).unwrap_or_default()),
				compacted: Version(u64::try_from(compacted).unwrap_or_default()),
			},
			KvError::Unavailable(message) => StoreError::Unavailable(message),
		}
	}
}

pub type Result<T> = std::result::Result<T, StoreError>;
