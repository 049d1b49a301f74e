// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background synchronizer.
//!
//! Owns every write to the [`FlagCache`]. Moves through
//! `Bootstrapping -> Syncing -> Degraded -> Syncing`, ending in `Stopped`:
//!
//! - Bootstrapping lists the store, bulk-loads the cache and opens the feed.
//! - Syncing applies each change event as it arrives.
//! - Degraded keeps serving the cache untouched while retrying with backoff.
//!   Each retry lists the store, reconciles the cache against the listing and
//!   reopens the feed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use flagsync_core::ChangeEvent;
use flagsync_store::{with_timeout, FlagStore, Snapshot, StoreError};

use crate::backoff::Backoff;
use crate::cache::{ApplyOutcome, FlagCache};
use crate::config::SyncConfig;
use crate::error::{FeedError, InitializationError};
use crate::feed::{ChangeFeed, FeedBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
	Bootstrapping,
	Syncing,
	Degraded,
	Stopped,
}

impl SyncState {
	pub fn as_str(&self) -> &'static str {
		match self {
			SyncState::Bootstrapping => "bootstrapping",
			SyncState::Syncing => "syncing",
			SyncState::Degraded => "degraded",
			SyncState::Stopped => "stopped",
		}
	}
}

/// Observable synchronizer status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
	pub state: SyncState,
	/// When the current degraded period began.
	pub degraded_since: Option<DateTime<Utc>>,
	/// When the cache last matched a full listing of the store.
	pub last_synced_at: Option<DateTime<Utc>>,
	pub last_error: Option<String>,
}

impl SyncStatus {
	fn bootstrapping() -> Self {
		Self {
			state: SyncState::Bootstrapping,
			degraded_since: None,
			last_synced_at: None,
			last_error: None,
		}
	}

	/// How long the cache has been served without a working feed.
	pub fn staleness(&self) -> Option<Duration> {
		match (self.state, self.degraded_since) {
			(SyncState::Degraded, Some(since)) => {
				Some((Utc::now() - since).to_std().unwrap_or_default())
			}
			_ => None,
		}
	}
}

/// Synchronizer counters.
#[derive(Debug, Default)]
pub(crate) struct SyncStats {
	events_applied: AtomicU64,
	events_stale: AtomicU64,
	events_malformed: AtomicU64,
	resyncs: AtomicU64,
	reconnect_attempts: AtomicU64,
}

/// Point-in-time copy of the synchronizer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatsSnapshot {
	pub events_applied: u64,
	/// Events ignored because the cache already held that version or newer.
	pub events_stale: u64,
	/// Events and listing entries dropped because they could not be decoded.
	pub events_malformed: u64,
	/// Successful full resyncs after a feed failure.
	pub resyncs: u64,
	pub reconnect_attempts: u64,
}

impl SyncStats {
	pub(crate) fn snapshot(&self) -> SyncStatsSnapshot {
		SyncStatsSnapshot {
			events_applied: self.events_applied.load(Ordering::SeqCst),
			events_stale: self.events_stale.load(Ordering::SeqCst),
			events_malformed: self.events_malformed.load(Ordering::SeqCst),
			resyncs: self.resyncs.load(Ordering::SeqCst),
			reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
		}
	}
}

#[derive(Debug)]
pub(crate) enum SyncCommand {
	/// Re-read one key from the store and apply it.
	Refresh(String),
}

pub(crate) struct Synchronizer {
	store: Arc<dyn FlagStore>,
	cache: Arc<FlagCache>,
	config: SyncConfig,
	stats: Arc<SyncStats>,
	status: Arc<watch::Sender<SyncStatus>>,
	commands: mpsc::UnboundedReceiver<SyncCommand>,
	cancel: CancellationToken,
}

impl Synchronizer {
	pub(crate) fn new(
		store: Arc<dyn FlagStore>,
		cache: Arc<FlagCache>,
		config: SyncConfig,
		commands: mpsc::UnboundedReceiver<SyncCommand>,
		cancel: CancellationToken,
	) -> Self {
		let (status, _) = watch::channel(SyncStatus::bootstrapping());
		Self {
			store,
			cache,
			config,
			stats: Arc::new(SyncStats::default()),
			status: Arc::new(status),
			commands,
			cancel,
		}
	}

	pub(crate) fn stats(&self) -> Arc<SyncStats> {
		Arc::clone(&self.stats)
	}

	pub(crate) fn status(&self) -> Arc<watch::Sender<SyncStatus>> {
		Arc::clone(&self.status)
	}

	/// Loads the full flag set and opens the change feed.
	///
	/// The cache is only written once the listing succeeds; any failure here is
	/// fatal to client construction.
	pub(crate) async fn bootstrap(&self) -> Result<ChangeFeed, InitializationError> {
		info!(backend = self.store.backend_name(), "bootstrapping flag cache");

		let snapshot = self
			.list()
			.await
			.map_err(InitializationError::Bootstrap)?;
		let summary = self
			.cache
			.reconcile(&snapshot.records, &snapshot.malformed_keys);

		let feed = ChangeFeed::open(&self.store, &snapshot, &self.cache, &self.config)
			.await
			.map_err(InitializationError::Feed)?;

		self.mark_synced(Utc::now());
		info!(
			backend = self.store.backend_name(),
			feed = feed.kind(),
			flags = summary.loaded,
			revision = ?snapshot.revision,
			"flag cache bootstrapped"
		);
		Ok(feed)
	}

	/// Follows the feed until cancelled, recovering from every feed failure.
	pub(crate) async fn run(mut self, mut feed: ChangeFeed) {
		loop {
			let broken = match self.follow(&mut feed).await {
				Ok(()) => break,
				Err(e) => e,
			};

			error!(
				backend = self.store.backend_name(),
				feed = feed.kind(),
				error = %broken,
				"change feed broken, serving cached flags"
			);
			self.mark_degraded(&broken.to_string());

			match self.recover(broken.is_compacted()).await {
				Some(reopened) => feed = reopened,
				None => break,
			}
		}

		self.status.send_modify(|status| status.state = SyncState::Stopped);
		info!(backend = self.store.backend_name(), "synchronizer stopped");
	}

	/// Applies feed batches and commands. Returns `Ok` only when cancelled.
	///
	/// The pending read from the feed survives commands handled in between, so
	/// an in-flight poll is never restarted.
	async fn follow(&mut self, feed: &mut ChangeFeed) -> Result<(), FeedError> {
		loop {
			let next = feed.next_batch();
			tokio::pin!(next);

			loop {
				tokio::select! {
					biased;
					_ = self.cancel.cancelled() => return Ok(()),
					Some(command) = self.commands.recv() => self.handle_command(command).await,
					batch = &mut next => {
						self.apply_batch(batch?);
						break;
					}
				}
			}
		}
	}

	/// Retries a full resync with backoff until it succeeds or the task is
	/// cancelled. A compacted watch retries immediately the first time.
	async fn recover(&self, compacted: bool) -> Option<ChangeFeed> {
		let mut backoff = Backoff::from_config(&self.config);
		let mut immediate = compacted;

		loop {
			let delay = if immediate {
				immediate = false;
				Duration::ZERO
			} else {
				backoff.next_delay()
			};

			self.stats.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
			warn!(
				backend = self.store.backend_name(),
				delay_ms = delay.as_millis() as u64,
				attempt = backoff.attempt(),
				"resynchronizing flag store"
			);

			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return None,
				_ = tokio::time::sleep(delay) => {}
			}

			let result = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return None,
				result = self.resync() => result,
			};

			match result {
				Ok(feed) => {
					self.stats.resyncs.fetch_add(1, Ordering::SeqCst);
					self.status.send_modify(|status| {
						status.state = SyncState::Syncing;
						status.degraded_since = None;
					});
					info!(
						backend = self.store.backend_name(),
						feed = feed.kind(),
						"change feed recovered"
					);
					return Some(feed);
				}
				Err(e) => {
					warn!(backend = self.store.backend_name(), error = %e, "resync failed");
					let message = e.to_string();
					self.status
						.send_modify(|status| status.last_error = Some(message));
				}
			}
		}
	}

	/// Lists the store, makes the cache match it, and reopens the feed.
	async fn resync(&self) -> Result<ChangeFeed, FeedError> {
		let snapshot = self.list().await?;
		let listed_at = Utc::now();
		let summary = self
			.cache
			.reconcile(&snapshot.records, &snapshot.malformed_keys);
		debug!(
			loaded = summary.loaded,
			removed = summary.removed,
			"cache reconciled with store"
		);

		let feed = ChangeFeed::open(&self.store, &snapshot, &self.cache, &self.config).await?;
		self.status
			.send_modify(|status| status.last_synced_at = Some(listed_at));
		Ok(feed)
	}

	async fn list(&self) -> Result<Snapshot, StoreError> {
		let snapshot = with_timeout("list", self.config.request_timeout, self.store.list()).await?;
		if snapshot.malformed() > 0 {
			self.stats
				.events_malformed
				.fetch_add(snapshot.malformed() as u64, Ordering::SeqCst);
		}
		Ok(snapshot)
	}

	async fn handle_command(&self, command: SyncCommand) {
		match command {
			SyncCommand::Refresh(key) => {
				let fetched =
					with_timeout("get", self.config.request_timeout, self.store.get(&key)).await;
				match fetched {
					Ok(Some(record)) => self.apply(ChangeEvent::upserted(record)),
					Ok(None) => {
						if let Some(version) = self.cache.version(&key) {
							self.apply(ChangeEvent::deleted(key, version));
						}
					}
					Err(e) => warn!(key = %key, error = %e, "flag refresh failed"),
				}
			}
		}
	}

	fn apply_batch(&self, batch: FeedBatch) {
		if batch.malformed > 0 {
			self.stats
				.events_malformed
				.fetch_add(batch.malformed as u64, Ordering::SeqCst);
		}
		for event in batch.events {
			self.apply(event);
		}
		if let Some(watermark) = batch.watermark {
			let pruned = self.cache.prune_tombstones(watermark);
			if pruned > 0 {
				debug!(pruned, watermark = %watermark, "tombstones pruned");
			}
		}
		if let Some(listed_at) = batch.listed_at {
			self.status
				.send_modify(|status| status.last_synced_at = Some(listed_at));
		}
	}

	fn apply(&self, event: ChangeEvent) {
		let key = event.key.clone();
		let version = event.version;
		let kind = event.kind_name();

		match self.cache.apply(event) {
			ApplyOutcome::Applied => {
				self.stats.events_applied.fetch_add(1, Ordering::SeqCst);
				debug!(key = %key, version = %version, kind, "flag change applied");
			}
			ApplyOutcome::Stale => {
				self.stats.events_stale.fetch_add(1, Ordering::SeqCst);
				debug!(key = %key, version = %version, kind, "stale flag change ignored");
			}
		}
	}

	fn mark_synced(&self, at: DateTime<Utc>) {
		self.status.send_modify(|status| {
			status.state = SyncState::Syncing;
			status.degraded_since = None;
			status.last_synced_at = Some(at);
			status.last_error = None;
		});
	}

	fn mark_degraded(&self, error: &str) {
		self.status.send_modify(|status| {
			if status.state != SyncState::Degraded {
				status.degraded_since = Some(Utc::now());
			}
			status.state = SyncState::Degraded;
			status.last_error = Some(error.to_string());
		});
	}
}
