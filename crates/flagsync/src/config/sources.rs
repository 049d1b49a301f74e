// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use super::sections::{BackendConfigLayer, BackendKind, EvaluationConfigLayer, SyncConfigLayer};
use super::FlagsConfigLayer;
use crate::error::ConfigError;

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<FlagsConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<FlagsConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(FlagsConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is not an error.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<FlagsConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(FlagsConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: FlagsConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: FLAGSYNC_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<FlagsConfigLayer, ConfigError> {
		debug!("loading environment variables");
		layer_from_env(&|name: &str| std::env::var(name).ok())
	}
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn layer_from_env(lookup: Lookup<'_>) -> Result<FlagsConfigLayer, ConfigError> {
	Ok(FlagsConfigLayer {
		backend: Some(load_backend_from_env(lookup)?),
		sync: Some(load_sync_from_env(lookup)?),
		evaluation: Some(EvaluationConfigLayer {
			default_on_missing: env_bool(lookup, "FLAGSYNC_DEFAULT_ON_MISSING"),
		}),
	})
}

fn env_var(lookup: Lookup<'_>, name: &str) -> Option<String> {
	lookup(name).filter(|s| !s.is_empty())
}

fn env_bool(lookup: Lookup<'_>, name: &str) -> Option<bool> {
	env_var(lookup, name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_u64(lookup: Lookup<'_>, name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(lookup, name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn load_backend_from_env(lookup: Lookup<'_>) -> Result<BackendConfigLayer, ConfigError> {
	let kind = match env_var(lookup, "FLAGSYNC_BACKEND") {
		Some(v) => Some(v.parse::<BackendKind>().map_err(|message| {
			ConfigError::InvalidValue {
				key: "FLAGSYNC_BACKEND".to_string(),
				message,
			}
		})?),
		None => None,
	};

	Ok(BackendConfigLayer {
		kind,
		etcd_namespace: env_var(lookup, "FLAGSYNC_ETCD_NAMESPACE"),
		database_url: env_var(lookup, "FLAGSYNC_DATABASE_URL"),
	})
}

fn load_sync_from_env(lookup: Lookup<'_>) -> Result<SyncConfigLayer, ConfigError> {
	Ok(SyncConfigLayer {
		poll_interval_ms: env_u64(lookup, "FLAGSYNC_POLL_INTERVAL_MS")?,
		reconnect_base_delay_ms: env_u64(lookup, "FLAGSYNC_RECONNECT_BASE_DELAY_MS")?,
		reconnect_max_delay_ms: env_u64(lookup, "FLAGSYNC_RECONNECT_MAX_DELAY_MS")?,
		reconnect_jitter: env_bool(lookup, "FLAGSYNC_RECONNECT_JITTER"),
		request_timeout_ms: env_u64(lookup, "FLAGSYNC_REQUEST_TIMEOUT_MS")?,
		shutdown_timeout_ms: env_u64(lookup, "FLAGSYNC_SHUTDOWN_TIMEOUT_MS")?,
	})
}
