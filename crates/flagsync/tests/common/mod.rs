// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;

use flagsync::config::SyncConfig;
use flagsync::{FlagsConfig, FlagRecord, FlagValue, Version};
use flagsync_store::{FlagStore, Result, Snapshot, StoreError, WatchStream};

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

pub fn fast_config() -> FlagsConfig {
	FlagsConfig {
		sync: SyncConfig {
			poll_interval: Duration::from_millis(25),
			reconnect_base_delay: Duration::from_millis(10),
			reconnect_max_delay: Duration::from_millis(50),
			reconnect_jitter: false,
			request_timeout: Duration::from_secs(1),
			shutdown_timeout: Duration::from_secs(1),
		},
		..FlagsConfig::default()
	}
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	while tokio::time::Instant::now() < deadline {
		if condition() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	condition()
}

#[derive(Debug, Clone, Copy)]
pub enum StreamBreak {
	Disconnect,
	Compacted,
}

/// Wraps a store so tests can take it offline or break its watch streams
/// without touching the data behind it.
pub struct FlakyStore<S> {
	inner: Arc<S>,
	offline: AtomicBool,
	breaks: broadcast::Sender<StreamBreak>,
}

impl<S: FlagStore> FlakyStore<S> {
	pub fn new(inner: Arc<S>) -> Self {
		let (breaks, _) = broadcast::channel(16);
		Self {
			inner,
			offline: AtomicBool::new(false),
			breaks,
		}
	}

	pub fn set_offline(&self, offline: bool) {
		self.offline.store(offline, Ordering::SeqCst);
	}

	/// Ends every open watch stream with the given failure.
	pub fn break_streams(&self, kind: StreamBreak) {
		let _ = self.breaks.send(kind);
	}

	fn check_online(&self) -> Result<()> {
		if self.offline.load(Ordering::SeqCst) {
			Err(StoreError::Unavailable("store is offline".to_string()))
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl<S: FlagStore + 'static> FlagStore for FlakyStore<S> {
	fn backend_name(&self) -> &'static str {
		self.inner.backend_name()
	}

	async fn get(&self, key: &str) -> Result<Option<FlagRecord>> {
		self.check_online()?;
		self.inner.get(key).await
	}

	async fn list(&self) -> Result<Snapshot> {
		self.check_online()?;
		self.inner.list().await
	}

	async fn put(&self, key: &str, value: &FlagValue) -> Result<Version> {
		self.check_online()?;
		self.inner.put(key, value).await
	}

	async fn delete(&self, key: &str) -> Result<bool> {
		self.check_online()?;
		self.inner.delete(key).await
	}

	fn supports_watch(&self) -> bool {
		self.inner.supports_watch()
	}

	async fn watch(&self, after: Version) -> Result<WatchStream> {
		self.check_online()?;
		let mut breaks = self.breaks.subscribe();
		let events = self.inner.watch(after).await?;

		let broken = stream::once(async move {
			match breaks.recv().await {
				Ok(StreamBreak::Compacted) => Err(StoreError::Compacted {
					requested: after.next(),
					compacted: after.next(),
				}),
				_ => Err(StoreError::Unavailable("watch disconnected".to_string())),
			}
		});

		Ok(stream::select(events, broken).boxed())
	}
}
