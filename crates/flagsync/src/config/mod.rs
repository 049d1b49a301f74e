// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered client configuration.
//!
//! Sources are merged in precedence order: built-in defaults, then an optional
//! TOML file, then `FLAGSYNC_*` environment variables.
//!
//! ```toml
//! [backend]
//! kind = "etcd"
//! etcd_namespace = "payments"
//!
//! [sync]
//! reconnect_max_delay_ms = 10000
//!
//! [evaluation]
//! default_on_missing = false
//! ```

mod sections;
mod sources;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

pub use sections::{
	BackendConfig, BackendConfigLayer, BackendKind, EvaluationConfig, EvaluationConfigLayer,
	SyncConfig, SyncConfigLayer,
};
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

/// Fully resolved client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagsConfig {
	pub backend: BackendConfig,
	pub sync: SyncConfig,
	pub evaluation: EvaluationConfig,
}

impl FlagsConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.backend.etcd_namespace.is_empty() || self.backend.etcd_namespace.contains('/') {
			return Err(ConfigError::InvalidValue {
				key: "backend.etcd_namespace".to_string(),
				message: format!("invalid namespace '{}'", self.backend.etcd_namespace),
			});
		}
		self.sync.validate()
	}
}

/// Partial configuration from a single source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagsConfigLayer {
	#[serde(default)]
	pub backend: Option<BackendConfigLayer>,
	#[serde(default)]
	pub sync: Option<SyncConfigLayer>,
	#[serde(default)]
	pub evaluation: Option<EvaluationConfigLayer>,
}

impl FlagsConfigLayer {
	pub fn merge(&mut self, other: FlagsConfigLayer) {
		if let Some(backend) = other.backend {
			self.backend.get_or_insert_with(Default::default).merge(backend);
		}
		if let Some(sync) = other.sync {
			self.sync.get_or_insert_with(Default::default).merge(sync);
		}
		if let Some(evaluation) = other.evaluation {
			self
				.evaluation
				.get_or_insert_with(Default::default)
				.merge(evaluation);
		}
	}

	pub fn finalize(self) -> Result<FlagsConfig, ConfigError> {
		let config = FlagsConfig {
			backend: self.backend.unwrap_or_default().finalize(),
			sync: self.sync.unwrap_or_default().finalize(),
			evaluation: self.evaluation.unwrap_or_default().finalize(),
		};
		config.validate()?;
		Ok(config)
	}
}

/// Load configuration from defaults and the environment.
pub fn load_config() -> Result<FlagsConfig, ConfigError> {
	load_from_sources(vec![Box::new(DefaultsSource), Box::new(EnvSource)])
}

/// Load configuration with a TOML file between defaults and the environment.
pub fn load_config_with_file(config_path: impl Into<PathBuf>) -> Result<FlagsConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Merge sources in precedence order and resolve the result.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<FlagsConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = FlagsConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	merged.finalize()
}
