// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the flags client.

use std::path::PathBuf;

use flagsync_store::StoreError;
use thiserror::Error;

/// Fatal errors returned from [`FlagsClientBuilder::start`](crate::FlagsClientBuilder::start).
///
/// No client exists until the first full load and the change feed both succeed.
#[derive(Debug, Error)]
pub enum InitializationError {
	#[error("Invalid configuration: {0}")]
	Config(#[from] ConfigError),

	/// The selected backend needs a store or KV client that was not provided.
	#[error("No flag store provided for the {0} backend")]
	MissingStore(&'static str),

	#[error("Failed to open flag store: {0}")]
	Connect(#[source] StoreError),

	#[error("Initial flag load failed: {0}")]
	Bootstrap(#[source] StoreError),

	#[error("Failed to open change feed: {0}")]
	Feed(#[source] FeedError),
}

/// Recoverable change feed failure. Moves the synchronizer to degraded mode.
#[derive(Debug, Error)]
pub enum FeedError {
	#[error("Change feed closed by the backend")]
	Closed,

	#[error("Change feed failed: {0}")]
	Store(#[from] StoreError),
}

impl FeedError {
	/// Returns true if the feed broke because its history was compacted away.
	pub fn is_compacted(&self) -> bool {
		matches!(self, FeedError::Store(e) if e.is_compacted())
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("Failed to read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to parse config file {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("Invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },
}

pub type Result<T> = std::result::Result<T, InitializationError>;
