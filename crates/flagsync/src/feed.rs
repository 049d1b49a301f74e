// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Change feed normalizer.
//!
//! Turns a backend's native change mechanism into batches of uniform
//! [`ChangeEvent`]s. Watch-capable stores are followed through their watch
//! stream; the rest are listed on an interval and diffed against the previous
//! listing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use flagsync_core::{codec, validate_key, ChangeEvent, FlagRecord, FlagsError, Version};
use flagsync_store::{with_timeout, FlagStore, Snapshot, WatchEvent, WatchEventKind, WatchStream};

use crate::cache::FlagCache;
use crate::config::SyncConfig;
use crate::error::FeedError;

/// Events produced by one step of a feed.
#[derive(Debug, Default)]
pub(crate) struct FeedBatch {
	pub events: Vec<ChangeEvent>,
	pub malformed: usize,
	/// Set when the batch came from a full listing.
	pub listed_at: Option<DateTime<Utc>>,
	/// Store revision the feed has fully delivered, when known.
	pub watermark: Option<Version>,
}

pub(crate) enum ChangeFeed {
	Watch(WatchFeed),
	Poll(PollFeed),
}

impl ChangeFeed {
	/// Opens the feed that continues from `snapshot`.
	///
	/// Watch feeds start right after the snapshot revision, so nothing written
	/// after the listing is missed. Poll feeds start from the listing plus the
	/// cached versions of entries the listing could not decode.
	pub(crate) async fn open(
		store: &Arc<dyn FlagStore>,
		snapshot: &Snapshot,
		cache: &FlagCache,
		config: &SyncConfig,
	) -> Result<Self, FeedError> {
		if store.supports_watch() {
			let after = snapshot.revision.unwrap_or_default();
			let stream = with_timeout("watch", config.request_timeout, store.watch(after)).await?;
			debug!(backend = store.backend_name(), after = %after, "watch feed opened");
			Ok(ChangeFeed::Watch(WatchFeed { stream }))
		} else {
			debug!(
				backend = store.backend_name(),
				poll_interval_ms = config.poll_interval.as_millis() as u64,
				"poll feed opened"
			);
			let mut known: HashMap<String, Version> = snapshot
				.records
				.iter()
				.map(|record| (record.key().to_string(), record.version()))
				.collect();
			for key in &snapshot.malformed_keys {
				if let Some(version) = cache.version(key) {
					known.insert(key.clone(), version);
				}
			}

			Ok(ChangeFeed::Poll(PollFeed::new(
				Arc::clone(store),
				known,
				config.poll_interval,
				config.request_timeout,
			)))
		}
	}

	pub(crate) fn kind(&self) -> &'static str {
		match self {
			ChangeFeed::Watch(_) => "watch",
			ChangeFeed::Poll(_) => "poll",
		}
	}

	/// Waits for the next batch of changes.
	///
	/// Returns an error when the feed is broken; the feed must then be reopened
	/// from a fresh listing.
	pub(crate) async fn next_batch(&mut self) -> Result<FeedBatch, FeedError> {
		match self {
			ChangeFeed::Watch(feed) => feed.next_batch().await,
			ChangeFeed::Poll(feed) => feed.next_batch().await,
		}
	}
}

pub(crate) struct WatchFeed {
	stream: WatchStream,
}

impl WatchFeed {
	async fn next_batch(&mut self) -> Result<FeedBatch, FeedError> {
		let event = match self.stream.next().await {
			Some(event) => event?,
			None => return Err(FeedError::Closed),
		};

		let mut batch = FeedBatch {
			watermark: Version::from_revision(event.revision).ok(),
			..FeedBatch::default()
		};
		let key = event.key.clone();
		match normalize(event) {
			Ok(change) => batch.events.push(change),
			Err(e) => {
				warn!(key = %key, error = %e, "dropping malformed change event");
				batch.malformed = 1;
			}
		}
		Ok(batch)
	}
}

/// Decodes a native watch event into a change event.
pub(crate) fn normalize(event: WatchEvent) -> Result<ChangeEvent, FlagsError> {
	let version = Version::from_revision(event.revision)?;
	match event.kind {
		WatchEventKind::Put(bytes) => {
			let value = codec::decode(&bytes)?;
			let record = FlagRecord::new(event.key, value, version)?;
			Ok(ChangeEvent::upserted(record))
		}
		WatchEventKind::Delete => {
			if !validate_key(&event.key) {
				return Err(FlagsError::InvalidKey(event.key));
			}
			Ok(ChangeEvent::deleted(event.key, version))
		}
	}
}

pub(crate) struct PollFeed {
	store: Arc<dyn FlagStore>,
	interval: Interval,
	request_timeout: Duration,
	known: HashMap<String, Version>,
}

impl PollFeed {
	fn new(
		store: Arc<dyn FlagStore>,
		known: HashMap<String, Version>,
		poll_interval: Duration,
		request_timeout: Duration,
	) -> Self {
		// The listing that opened the feed counts as the first poll.
		let mut interval = interval_at(Instant::now() + poll_interval, poll_interval);
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		Self {
			store,
			interval,
			request_timeout,
			known,
		}
	}

	async fn next_batch(&mut self) -> Result<FeedBatch, FeedError> {
		self.interval.tick().await;

		let snapshot = with_timeout("list", self.request_timeout, self.store.list()).await?;
		let listed_at = Utc::now();
		let malformed = snapshot.malformed();
		let events = diff(&mut self.known, snapshot.records, &snapshot.malformed_keys);
		if !events.is_empty() {
			debug!(changes = events.len(), "poll found changes");
		}

		Ok(FeedBatch {
			events,
			malformed,
			listed_at: Some(listed_at),
			watermark: snapshot.revision,
		})
	}
}

/// Diffs a listing against the previously known versions.
///
/// New or changed keys become upserts; keys missing from the listing become
/// deletes carrying the last version seen for them. Keys whose entry could not
/// be decoded produce nothing and keep their last known version, the same as a
/// dropped watch event. `known` is updated to the new listing.
pub(crate) fn diff(
	known: &mut HashMap<String, Version>,
	records: Vec<FlagRecord>,
	malformed_keys: &[String],
) -> Vec<ChangeEvent> {
	let mut events = Vec::new();
	let mut current = HashMap::with_capacity(records.len());

	for key in malformed_keys {
		if let Some(version) = known.get(key) {
			current.insert(key.clone(), *version);
		}
	}

	for record in records {
		current.insert(record.key().to_string(), record.version());
		if known.get(record.key()) != Some(&record.version()) {
			events.push(ChangeEvent::upserted(record));
		}
	}

	let mut vanished: Vec<(String, Version)> = known
		.iter()
		.filter(|(key, _)| !current.contains_key(*key))
		.map(|(key, version)| (key.clone(), *version))
		.collect();
	vanished.sort();
	events.extend(
		vanished
			.into_iter()
			.map(|(key, version)| ChangeEvent::deleted(key, version)),
	);

	*known = current;
	events
}

#[cfg(test)]
mod tests {
	use super::*;
	use flagsync_core::{ChangeKind, FlagValue};

	fn record(key: &str, version: u64) -> FlagRecord {
		FlagRecord::new(key, FlagValue::Boolean(true), Version(version)).unwrap()
	}

	#[test]
	fn test_diff_emits_upserts_and_deletes() {
		let mut known = HashMap::from([
			("same".to_string(), Version(1)),
			("changed".to_string(), Version(2)),
			("gone".to_string(), Version(3)),
		]);

		let events = diff(
			&mut known,
			vec![record("same", 1), record("changed", 5), record("added", 6)],
			&[],
		);

		let summary: Vec<(String, &str, Version)> = events
			.iter()
			.map(|e| (e.key.clone(), e.kind_name(), e.version))
			.collect();
		assert_eq!(
			summary,
			vec![
				("changed".to_string(), "upserted", Version(5)),
				("added".to_string(), "upserted", Version(6)),
				("gone".to_string(), "deleted", Version(3)),
			]
		);
		assert_eq!(known.len(), 3);
		assert_eq!(known.get("changed"), Some(&Version(5)));
		assert!(!known.contains_key("gone"));
	}

	#[test]
	fn test_diff_of_identical_listing_is_empty() {
		let mut known = HashMap::from([("a".to_string(), Version(1))]);
		assert!(diff(&mut known, vec![record("a", 1)], &[]).is_empty());
	}

	#[test]
	fn test_diff_keeps_undecodable_keys() {
		let mut known = HashMap::from([
			("new-ui".to_string(), Version(3)),
			("other".to_string(), Version(4)),
		]);

		let events = diff(&mut known, vec![record("other", 4)], &["new-ui".to_string()]);
		assert!(events.is_empty());
		assert_eq!(known.get("new-ui"), Some(&Version(3)));

		// Once fixed, the entry is picked up as a normal change.
		let events = diff(&mut known, vec![record("new-ui", 7), record("other", 4)], &[]);
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].version, Version(7));
		assert!(!events[0].is_delete());

		// Undecodable and never seen before: nothing to keep.
		assert!(diff(&mut known, vec![], &["fresh".to_string()])
			.iter()
			.all(|e| e.key != "fresh"));
		assert!(!known.contains_key("fresh"));
	}

	#[test]
	fn test_normalize_put_and_delete() {
		let put = normalize(WatchEvent {
			key: "new-ui".to_string(),
			revision: 9,
			kind: WatchEventKind::Put(b"true".to_vec()),
		})
		.unwrap();
		assert_eq!(put.version, Version(9));
		assert!(matches!(put.kind, ChangeKind::Upserted(ref r) if r.value() == &FlagValue::Boolean(true)));

		let delete = normalize(WatchEvent {
			key: "new-ui".to_string(),
			revision: 10,
			kind: WatchEventKind::Delete,
		})
		.unwrap();
		assert!(delete.is_delete());
		assert_eq!(delete.version, Version(10));
	}

	#[test]
	fn test_normalize_rejects_malformed_events() {
		let bad_payload = WatchEvent {
			key: "new-ui".to_string(),
			revision: 1,
			kind: WatchEventKind::Put(b"{oops".to_vec()),
		};
		assert!(matches!(
			normalize(bad_payload),
			Err(FlagsError::MalformedPayload(_))
		));

		let bad_key = WatchEvent {
			key: "nested/key".to_string(),
			revision: 1,
			kind: WatchEventKind::Delete,
		};
		assert!(matches!(normalize(bad_key), Err(FlagsError::InvalidKey(_))));

		let bad_revision = WatchEvent {
			key: "new-ui".to_string(),
			revision: -3,
			kind: WatchEventKind::Delete,
		};
		assert_eq!(
			normalize(bad_revision).unwrap_err(),
			FlagsError::InvalidVersion(-3)
		);
	}
}
