// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Synchronizer timing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfigLayer {
	pub poll_interval_ms: Option<u64>,
	pub reconnect_base_delay_ms: Option<u64>,
	pub reconnect_max_delay_ms: Option<u64>,
	pub reconnect_jitter: Option<bool>,
	pub request_timeout_ms: Option<u64>,
	pub shutdown_timeout_ms: Option<u64>,
}

impl SyncConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.poll_interval_ms.is_some() {
			self.poll_interval_ms = other.poll_interval_ms;
		}
		if other.reconnect_base_delay_ms.is_some() {
			self.reconnect_base_delay_ms = other.reconnect_base_delay_ms;
		}
		if other.reconnect_max_delay_ms.is_some() {
			self.reconnect_max_delay_ms = other.reconnect_max_delay_ms;
		}
		if other.reconnect_jitter.is_some() {
			self.reconnect_jitter = other.reconnect_jitter;
		}
		if other.request_timeout_ms.is_some() {
			self.request_timeout_ms = other.request_timeout_ms;
		}
		if other.shutdown_timeout_ms.is_some() {
			self.shutdown_timeout_ms = other.shutdown_timeout_ms;
		}
	}

	pub fn finalize(self) -> SyncConfig {
		SyncConfig {
			poll_interval: Duration::from_millis(self.poll_interval_ms.unwrap_or(60_000)),
			reconnect_base_delay: Duration::from_millis(self.reconnect_base_delay_ms.unwrap_or(1_000)),
			reconnect_max_delay: Duration::from_millis(self.reconnect_max_delay_ms.unwrap_or(30_000)),
			reconnect_jitter: self.reconnect_jitter.unwrap_or(true),
			request_timeout: Duration::from_millis(self.request_timeout_ms.unwrap_or(5_000)),
			shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms.unwrap_or(5_000)),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
	/// How often the relational backend is listed and diffed.
	pub poll_interval: Duration,
	pub reconnect_base_delay: Duration,
	/// Upper bound on any single reconnect delay, jitter included.
	pub reconnect_max_delay: Duration,
	pub reconnect_jitter: bool,
	/// Deadline for each store call made by the synchronizer.
	pub request_timeout: Duration,
	/// How long `stop` waits for the background task before aborting it.
	pub shutdown_timeout: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		SyncConfigLayer::default().finalize()
	}
}

impl SyncConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		for (key, value) in [
			("sync.poll_interval_ms", self.poll_interval),
			("sync.request_timeout_ms", self.request_timeout),
			("sync.shutdown_timeout_ms", self.shutdown_timeout),
			("sync.reconnect_base_delay_ms", self.reconnect_base_delay),
			("sync.reconnect_max_delay_ms", self.reconnect_max_delay),
		] {
			if value.is_zero() {
				return Err(ConfigError::InvalidValue {
					key: key.to_string(),
					message: "must be greater than zero".to_string(),
				});
			}
		}

		if self.reconnect_base_delay > self.reconnect_max_delay {
			return Err(ConfigError::InvalidValue {
				key: "sync.reconnect_base_delay_ms".to_string(),
				message: format!(
					"base delay {:?} exceeds max delay {:?}",
					self.reconnect_base_delay, self.reconnect_max_delay
				),
			});
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_values() {
		let config = SyncConfig::default();
		assert_eq!(config.poll_interval, Duration::from_secs(60));
		assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));
		assert_eq!(config.reconnect_max_delay, Duration::from_secs(30));
		assert!(config.reconnect_jitter);
		assert_eq!(config.request_timeout, Duration::from_secs(5));
		assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_rejects_base_above_max() {
		let config = SyncConfigLayer {
			reconnect_base_delay_ms: Some(10_000),
			reconnect_max_delay_ms: Some(1_000),
			..Default::default()
		}
		.finalize();

		let err = config.validate().unwrap_err();
		assert!(
			matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "sync.reconnect_base_delay_ms")
		);
	}

	#[test]
	fn test_rejects_zero_poll_interval() {
		let config = SyncConfigLayer {
			poll_interval_ms: Some(0),
			..Default::default()
		}
		.finalize();
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_rejects_zero_reconnect_base_delay() {
		let config = SyncConfigLayer {
			reconnect_base_delay_ms: Some(0),
			..Default::default()
		}
		.finalize();
		match config.validate() {
			Err(ConfigError::InvalidValue { key, .. }) => {
				assert_eq!(key, "sync.reconnect_base_delay_ms")
			}
			other => panic!("expected invalid base delay, got {other:?}"),
		}
	}
}
