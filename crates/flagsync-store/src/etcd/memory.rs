// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process [`KvClient`] with etcd revision semantics.
//!
//! Every write bumps a store-wide revision. A bounded history of events backs
//! watches that start in the past; once history is evicted or explicitly
//! compacted, watching from before the compact revision fails with
//! [`KvError::Compacted`]. Live events fan out over a broadcast channel.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, Mutex};

use super::kv::{
	KeyValue, KvClient, KvError, KvEvent, KvEventKind, KvResult, KvWatchStream, RangeResponse,
};

const DEFAULT_HISTORY_CAPACITY: usize = 1024;
const WATCH_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum KvMessage {
	Event(KvEvent),
	Disconnected,
}

#[derive(Debug)]
struct State {
	revision: i64,
	compact_revision: i64,
	data: BTreeMap<String, KeyValue>,
	history: VecDeque<KvEvent>,
	history_capacity: usize,
}

impl State {
	fn record(&mut self, event: KvEvent) {
		self.history.push_back(event);
		while self.history.len() > self.history_capacity {
			if let Some(evicted) = self.history.pop_front() {
				self.compact_revision = evicted.kv.mod_revision;
			}
		}
	}
}

pub struct MemoryKv {
	state: Mutex<State>,
	tx: broadcast::Sender<KvMessage>,
	available: AtomicBool,
}

impl Default for MemoryKv {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryKv {
	pub fn new() -> Self {
		Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
	}

	pub fn with_history_capacity(history_capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
		Self {
			state: Mutex::new(State {
				revision: 0,
				compact_revision: 0,
				data: BTreeMap::new(),
				history: VecDeque::new(),
				history_capacity: history_capacity.max(1),
			}),
			tx,
			available: AtomicBool::new(true),
		}
	}

	pub async fn revision(&self) -> i64 {
		self.state.lock().await.revision
	}

	/// Discards history up to and including `revision`.
	pub async fn compact(&self, revision: i64) {
		let mut state = self.state.lock().await;
		let revision = revision.min(state.revision);
		state.history.retain(|event| event.kv.mod_revision > revision);
		state.compact_revision = state.compact_revision.max(revision);
		tracing::debug!(revision, "memory kv compacted");
	}

	/// Ends every open watch with an error, as a dropped connection would.
	pub fn disconnect_watchers(&self) {
		let _ = self.tx.send(KvMessage::Disconnected);
	}

	/// Makes every call fail with [`KvError::Unavailable`] until re-enabled.
	/// Going offline also disconnects open watches.
	pub fn set_available(&self, available: bool) {
		self.available.store(available, Ordering::SeqCst);
		if !available {
			self.disconnect_watchers();
		}
	}

	fn check_available(&self) -> KvResult<()> {
		if self.available.load(Ordering::SeqCst) {
			Ok(())
		} else {
			Err(KvError::Unavailable("memory kv is offline".to_string()))
		}
	}
}

#[async_trait]
impl KvClient for MemoryKv {
	async fn get(&self, key: &str) -> KvResult<Option<KeyValue>> {
		self.check_available()?;
		Ok(self.state.lock().await.data.get(key).cloned())
	}

	async fn range(&self, prefix: &str) -> KvResult<RangeResponse> {
		self.check_available()?;
		let state = self.state.lock().await;
		let kvs = state
			.data
			.range(prefix.to_string()..)
			.take_while(|(key, _)| key.starts_with(prefix))
			.map(|(_, kv)| kv.clone())
			.collect();

		Ok(RangeResponse {
			kvs,
			revision: state.revision,
		})
	}

	async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<i64> {
		self.check_available()?;
		let mut state = self.state.lock().await;
		state.revision += 1;
		let kv = KeyValue {
			key: key.to_string(),
			value,
			mod_revision: state.revision,
		};
		state.data.insert(key.to_string(), kv.clone());

		let event = KvEvent {
			kind: KvEventKind::Put,
			kv,
		};
		state.record(event.clone());
		let _ = self.tx.send(KvMessage::Event(event));
		Ok(state.revision)
	}

	async fn delete(&self, key: &str) -> KvResult<bool> {
		self.check_available()?;
		let mut state = self.state.lock().await;
		if state.data.remove(key).is_none() {
			return Ok(false);
		}

		state.revision += 1;
		let event = KvEvent {
			kind: KvEventKind::Delete,
			kv: KeyValue {
				key: key.to_string(),
				value: Vec::new(),
				mod_revision: state.revision,
			},
		};
		state.record(event.clone());
		let _ = self.tx.send(KvMessage::Event(event));
		Ok(true)
	}

	async fn watch(&self, prefix: &str, start_revision: i64) -> KvResult<KvWatchStream> {
		self.check_available()?;
		let state = self.state.lock().await;
		let start_revision = if start_revision <= 0 {
			state.revision + 1
		} else {
			start_revision
		};

		if start_revision <= state.compact_revision {
			return Err(KvError::Compacted {
				requested: start_revision,
				compacted: state.compact_revision,
			});
		}

		// Subscribe while holding the lock so no write lands between the replay
		// and the live feed.
		let rx = self.tx.subscribe();
		let replay: Vec<KvEvent> = state
			.history
			.iter()
			.filter(|event| event.kv.mod_revision >= start_revision)
			.filter(|event| event.kv.key.starts_with(prefix))
			.cloned()
			.collect();
		let last = state.revision.max(start_revision - 1);
		drop(state);

		let prefix = prefix.to_string();
		let live = stream::unfold(Some((rx, last, prefix)), |cursor| async move {
			let (mut rx, last, prefix) = cursor?;
			loop {
				match rx.recv().await {
					Ok(KvMessage::Event(event)) => {
						if event.kv.mod_revision <= last || !event.kv.key.starts_with(&prefix) {
							continue;
						}
						let revision = event.kv.mod_revision;
						return Some((Ok(event), Some((rx, revision, prefix))));
					}
					Ok(KvMessage::Disconnected) => {
						return Some((
							Err(KvError::Unavailable("watch disconnected".to_string())),
							None,
						));
					}
					Err(broadcast::error::RecvError::Lagged(missed)) => {
						return Some((
							Err(KvError::Unavailable(format!(
								"watcher fell behind by {missed} events"
							))),
							None,
						));
					}
					Err(broadcast::error::RecvError::Closed) => {
						return Some((
							Err(KvError::Unavailable("memory kv closed".to_string())),
							None,
						));
					}
				}
			}
		});

		Ok(stream::iter(replay.into_iter().map(Ok)).chain(live).boxed())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_put_get_delete_bump_revision() {
		let kv = MemoryKv::new();

		assert_eq!(kv.put("a/one", b"1".to_vec()).await.unwrap(), 1);
		assert_eq!(kv.put("a/two", b"2".to_vec()).await.unwrap(), 2);
		assert_eq!(kv.put("a/one", b"3".to_vec()).await.unwrap(), 3);

		let one = kv.get("a/one").await.unwrap().unwrap();
		assert_eq!(one.value, b"3".to_vec());
		assert_eq!(one.mod_revision, 3);

		assert!(kv.delete("a/one").await.unwrap());
		assert!(!kv.delete("a/one").await.unwrap());
		assert_eq!(kv.revision().await, 4);
		assert!(kv.get("a/one").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_range_filters_by_prefix() {
		let kv = MemoryKv::new();
		kv.put("a/one", b"1".to_vec()).await.unwrap();
		kv.put("ab/two", b"2".to_vec()).await.unwrap();
		kv.put("b/three", b"3".to_vec()).await.unwrap();

		let range = kv.range("a/").await.unwrap();
		assert_eq!(range.revision, 3);
		assert_eq!(range.kvs.len(), 1);
		assert_eq!(range.kvs[0].key, "a/one");
	}

	#[tokio::test]
	async fn test_watch_replays_history_then_follows() {
		let kv = MemoryKv::new();
		kv.put("a/one", b"1".to_vec()).await.unwrap();
		kv.put("a/two", b"2".to_vec()).await.unwrap();

		let mut watch = kv.watch("a/", 2).await.unwrap();
		kv.put("b/other", b"x".to_vec()).await.unwrap();
		kv.delete("a/one").await.unwrap();

		let replayed = watch.next().await.unwrap().unwrap();
		assert_eq!(replayed.kv.key, "a/two");
		assert_eq!(replayed.kv.mod_revision, 2);

		let live = watch.next().await.unwrap().unwrap();
		assert_eq!(live.kind, KvEventKind::Delete);
		assert_eq!(live.kv.key, "a/one");
		assert_eq!(live.kv.mod_revision, 4);
	}

	#[tokio::test]
	async fn test_watch_before_compaction_fails() {
		let kv = MemoryKv::new();
		for i in 0..5 {
			kv.put("a/key", vec![b'0' + i]).await.unwrap();
		}
		kv.compact(3).await;

		let err = match kv.watch("a/", 2).await {
			Err(err) => err,
			Ok(_) => panic!("expected compaction error"),
		};
		assert_eq!(
			err,
			KvError::Compacted {
				requested: 2,
				compacted: 3
			}
		);
		assert!(kv.watch("a/", 4).await.is_ok());
	}

	#[tokio::test]
	async fn test_bounded_history_compacts_oldest() {
		let kv = MemoryKv::with_history_capacity(2);
		for _ in 0..4 {
			kv.put("a/key", b"v".to_vec()).await.unwrap();
		}

		assert!(matches!(
			kv.watch("a/", 1).await,
			Err(KvError::Compacted { compacted: 2, .. })
		));
		assert!(kv.watch("a/", 3).await.is_ok());
	}

	#[tokio::test]
	async fn test_disconnect_ends_watch_with_error() {
		let kv = MemoryKv::new();
		let mut watch = kv.watch("a/", 0).await.unwrap();

		kv.disconnect_watchers();

		assert!(matches!(
			watch.next().await,
			Some(Err(KvError::Unavailable(_)))
		));
		assert!(watch.next().await.is_none());
	}

	#[tokio::test]
	async fn test_offline_rejects_calls() {
		let kv = MemoryKv::new();
		kv.set_available(false);
		assert!(matches!(
			kv.get("a/key").await,
			Err(KvError::Unavailable(_))
		));

		kv.set_available(true);
		assert!(kv.get("a/key").await.unwrap().is_none());
	}
}
