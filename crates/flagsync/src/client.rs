// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flags client: builder, evaluation surface and lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flagsync_core::{evaluate, Evaluation, EvaluationContext, FlagRecord};
use flagsync_store::{EtcdStore, FlagStore, KvClient, RelationalStore};

use crate::cache::FlagCache;
use crate::config::{BackendKind, FlagsConfig};
use crate::error::{InitializationError, Result};
use crate::sync::{
	SyncCommand, SyncState, SyncStats, SyncStatsSnapshot, SyncStatus, Synchronizer,
};

/// Builder for [`FlagsClient`].
///
/// Store selection, in order: a store injected with [`store`](Self::store), an
/// etcd KV client given to [`kv_client`](Self::kv_client), then the configured
/// backend. Individual setters override the matching [`config`](Self::config)
/// fields whatever order they are called in.
pub struct FlagsClientBuilder {
	config: FlagsConfig,
	store: Option<Arc<dyn FlagStore>>,
	kv_client: Option<Arc<dyn KvClient>>,
	default_on_missing: Option<bool>,
	poll_interval: Option<Duration>,
}

impl FlagsClientBuilder {
	pub fn new() -> Self {
		Self {
			config: FlagsConfig::default(),
			store: None,
			kv_client: None,
			default_on_missing: None,
			poll_interval: None,
		}
	}

	pub fn config(mut self, config: FlagsConfig) -> Self {
		self.config = config;
		self
	}

	pub fn store(mut self, store: Arc<dyn FlagStore>) -> Self {
		self.store = Some(store);
		self
	}

	/// Uses an etcd KV client and selects the etcd backend.
	pub fn kv_client(mut self, client: Arc<dyn KvClient>) -> Self {
		self.kv_client = Some(client);
		self
	}

	/// Sets the result for flags that are missing or are not gates.
	pub fn default_on_missing(mut self, enabled: bool) -> Self {
		self.default_on_missing = Some(enabled);
		self
	}

	pub fn poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = Some(interval);
		self
	}

	/// Configuration with the individual setters applied on top.
	fn resolved_config(&self) -> FlagsConfig {
		let mut config = self.config.clone();
		if self.kv_client.is_some() {
			config.backend.kind = BackendKind::Etcd;
		}
		if let Some(enabled) = self.default_on_missing {
			config.evaluation.default_on_missing = enabled;
		}
		if let Some(interval) = self.poll_interval {
			config.sync.poll_interval = interval;
		}
		config
	}

	/// Loads every flag, opens the change feed and starts the background task.
	///
	/// Returns only once the cache holds the full flag set. Any failure before
	/// that point is returned and no background task is left running.
	pub async fn start(self) -> Result<FlagsClient> {
		let config = self.resolved_config();
		config.validate()?;
		let store = self.resolve_store(&config).await?;

		let cache = Arc::new(FlagCache::new());
		let cancel = CancellationToken::new();
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();

		let synchronizer = Synchronizer::new(
			Arc::clone(&store),
			Arc::clone(&cache),
			config.sync.clone(),
			commands_rx,
			cancel.clone(),
		);
		let stats = synchronizer.stats();
		let status = synchronizer.status();

		let feed = synchronizer.bootstrap().await?;
		let task = tokio::spawn(synchronizer.run(feed));

		info!(
			backend = store.backend_name(),
			flags = cache.len(),
			"flags client started"
		);

		Ok(FlagsClient {
			inner: Arc::new(FlagsClientInner {
				store,
				cache,
				config,
				stats,
				status,
				commands: commands_tx,
				cancel,
				task: Mutex::new(Some(task)),
			}),
		})
	}

	async fn resolve_store(&self, config: &FlagsConfig) -> Result<Arc<dyn FlagStore>> {
		if let Some(store) = &self.store {
			return Ok(Arc::clone(store));
		}

		match config.backend.kind {
			BackendKind::Etcd => {
				let client = self
					.kv_client
					.as_ref()
					.ok_or(InitializationError::MissingStore("etcd"))?;
				Ok(Arc::new(EtcdStore::new(
					Arc::clone(client),
					&config.backend.etcd_namespace,
				)))
			}
			BackendKind::Relational => {
				let store = RelationalStore::connect(&config.backend.database_url)
					.await
					.map_err(InitializationError::Connect)?;
				Ok(Arc::new(store))
			}
		}
	}
}

impl Default for FlagsClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct FlagsClientInner {
	store: Arc<dyn FlagStore>,
	cache: Arc<FlagCache>,
	config: FlagsConfig,
	stats: Arc<SyncStats>,
	status: Arc<watch::Sender<SyncStatus>>,
	commands: mpsc::UnboundedSender<SyncCommand>,
	cancel: CancellationToken,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for FlagsClientInner {
	fn drop(&mut self) {
		self.cancel.cancel();
		if let Some(handle) = self.task.get_mut().take() {
			handle.abort();
		}
	}
}

/// Feature flag client backed by a locally synchronized cache.
///
/// Evaluation methods are synchronous and read only the local cache; they never
/// wait on the store. Clones share one cache and one background task.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use flagsync::{EvaluationContext, FlagsClient, MemoryKv};
///
/// let client = FlagsClient::builder()
///     .kv_client(Arc::new(MemoryKv::new()))
///     .start()
///     .await?;
///
/// let ctx = EvaluationContext::new("user-42");
/// if client.is_enabled("new-ui", &ctx) {
///     // ...
/// }
///
/// client.stop().await;
/// ```
#[derive(Clone)]
pub struct FlagsClient {
	inner: Arc<FlagsClientInner>,
}

impl FlagsClient {
	pub fn builder() -> FlagsClientBuilder {
		FlagsClientBuilder::new()
	}

	/// Returns true if the flag is enabled for `context`.
	///
	/// Missing flags and flags whose payload is not a gate resolve to the
	/// configured default.
	pub fn is_enabled(&self, key: &str, context: &EvaluationContext) -> bool {
		self.evaluate(key, context).enabled
	}

	/// Evaluates a flag and reports why it resolved the way it did.
	pub fn evaluate(&self, key: &str, context: &EvaluationContext) -> Evaluation {
		let record = self.inner.cache.get(key);
		evaluate(
			key,
			record.as_ref(),
			context,
			self.inner.config.evaluation.default_on_missing,
		)
	}

	/// Returns the cached record for a flag, whatever its payload.
	pub fn get_value(&self, key: &str) -> Option<FlagRecord> {
		self.inner.cache.get(key)
	}

	/// Runs `on_enabled` if the flag is enabled for `context`, else `on_disabled`.
	pub fn if_enabled_else<T>(
		&self,
		key: &str,
		context: &EvaluationContext,
		on_enabled: impl FnOnce() -> T,
		on_disabled: impl FnOnce() -> T,
	) -> T {
		if self.is_enabled(key, context) {
			on_enabled()
		} else {
			on_disabled()
		}
	}

	/// Asks the background task to re-read one flag from the store.
	///
	/// Returns immediately; the cache is updated once the read completes. Has no
	/// effect after the client is stopped.
	pub fn invalidate(&self, key: &str) {
		if self
			.inner
			.commands
			.send(SyncCommand::Refresh(key.to_string()))
			.is_err()
		{
			warn!(key = %key, "invalidate ignored, client stopped");
		}
	}

	pub fn status(&self) -> SyncStatus {
		self.inner.status.borrow().clone()
	}

	pub fn state(&self) -> SyncState {
		self.inner.status.borrow().state
	}

	/// How long cached flags have been served without a working change feed.
	/// `None` unless degraded.
	pub fn staleness(&self) -> Option<Duration> {
		self.inner.status.borrow().staleness()
	}

	pub fn stats(&self) -> SyncStatsSnapshot {
		self.inner.stats.snapshot()
	}

	/// Subscribes to status changes.
	pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
		self.inner.status.subscribe()
	}

	/// Number of flags currently cached.
	pub fn flag_count(&self) -> usize {
		self.inner.cache.len()
	}

	pub fn backend_name(&self) -> &'static str {
		self.inner.store.backend_name()
	}

	/// Stops the background task. The cache is not modified afterwards and keeps
	/// serving the last known values. Idempotent.
	pub async fn stop(&self) {
		self.inner.cancel.cancel();

		let handle = self.inner.task.lock().await.take();
		if let Some(mut handle) = handle {
			let timeout = self.inner.config.sync.shutdown_timeout;
			if tokio::time::timeout(timeout, &mut handle).await.is_err() {
				warn!(
					timeout_ms = timeout.as_millis() as u64,
					"synchronizer did not stop in time, aborting"
				);
				handle.abort();
				let _ = handle.await;
			}
			info!(
				backend = self.inner.store.backend_name(),
				state = self.state().as_str(),
				"flags client stopped"
			);
		}

		self.inner
			.status
			.send_modify(|status| status.state = SyncState::Stopped);
	}
}
