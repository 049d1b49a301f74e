// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Local flag cache.
//!
//! The cache is the only read path for evaluation. It is written only by the
//! synchronizer, one key at a time, so readers never observe a half-applied
//! update and never contend on a global lock.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use flagsync_core::{ChangeEvent, ChangeKind, FlagRecord, Version};

/// A cached flag and when it was last written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
	pub record: FlagRecord,
	pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
enum Slot {
	Live(CacheEntry),
	/// Deleted at this version. Blocks older upserts from resurrecting the key.
	Tombstone(Version),
}

impl Slot {
	fn version(&self) -> Version {
		match self {
			Slot::Live(entry) => entry.record.version(),
			Slot::Tombstone(version) => *version,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
	Applied,
	/// The cache already held this version or a newer one.
	Stale,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
	pub loaded: usize,
	pub removed: usize,
}

#[derive(Debug, Default)]
pub struct FlagCache {
	slots: DashMap<String, Slot>,
}

impl FlagCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, key: &str) -> Option<FlagRecord> {
		self.entry(key).map(|entry| entry.record)
	}

	pub fn entry(&self, key: &str) -> Option<CacheEntry> {
		match self.slots.get(key)?.value() {
			Slot::Live(entry) => Some(entry.clone()),
			Slot::Tombstone(_) => None,
		}
	}

	/// Version of the live record for `key`, if any.
	pub fn version(&self, key: &str) -> Option<Version> {
		match self.slots.get(key)?.value() {
			Slot::Live(entry) => Some(entry.record.version()),
			Slot::Tombstone(_) => None,
		}
	}

	pub fn contains(&self, key: &str) -> bool {
		self.version(key).is_some()
	}

	/// Number of live flags.
	pub fn len(&self) -> usize {
		self
			.slots
			.iter()
			.filter(|slot| matches!(slot.value(), Slot::Live(_)))
			.count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Keys of all live flags, sorted.
	pub fn keys(&self) -> Vec<String> {
		let mut keys: Vec<String> = self
			.slots
			.iter()
			.filter(|slot| matches!(slot.value(), Slot::Live(_)))
			.map(|slot| slot.key().clone())
			.collect();
		keys.sort();
		keys
	}

	/// Applies one change event.
	///
	/// An upsert replaces the slot only when its version is newer than the
	/// slot's (live or deleted). A delete applies when its version is at least
	/// the live version and leaves a tombstone.
	pub(crate) fn apply(&self, event: ChangeEvent) -> ApplyOutcome {
		let ChangeEvent { key, version, kind } = event;

		match (self.slots.entry(key), kind) {
			(Entry::Vacant(vacant), ChangeKind::Upserted(record)) => {
				vacant.insert(Slot::Live(live(record)));
				ApplyOutcome::Applied
			}
			(Entry::Vacant(vacant), ChangeKind::Deleted) => {
				vacant.insert(Slot::Tombstone(version));
				ApplyOutcome::Applied
			}
			(Entry::Occupied(mut occupied), ChangeKind::Upserted(record)) => {
				if record.version() > occupied.get().version() {
					occupied.insert(Slot::Live(live(record)));
					ApplyOutcome::Applied
				} else {
					ApplyOutcome::Stale
				}
			}
			(Entry::Occupied(mut occupied), ChangeKind::Deleted) => {
				let applies = match occupied.get() {
					Slot::Live(entry) => version >= entry.record.version(),
					Slot::Tombstone(deleted_at) => version > *deleted_at,
				};
				if applies {
					occupied.insert(Slot::Tombstone(version));
					ApplyOutcome::Applied
				} else {
					ApplyOutcome::Stale
				}
			}
		}
	}

	/// Drops tombstones at or below `through`.
	///
	/// Once a feed has delivered revision `through`, every later event it
	/// produces is newer than those tombstones, so they no longer block anything.
	pub(crate) fn prune_tombstones(&self, through: Version) -> usize {
		let mut pruned = 0;
		self.slots.retain(|_, slot| match slot {
			Slot::Tombstone(version) if *version <= through => {
				pruned += 1;
				false
			}
			_ => true,
		});
		pruned
	}

	/// Number of deleted keys still remembered.
	pub(crate) fn tombstones(&self) -> usize {
		self.slots
			.iter()
			.filter(|slot| matches!(slot.value(), Slot::Tombstone(_)))
			.count()
	}

	/// Makes the cache match a full listing exactly.
	///
	/// Every listed record is written regardless of version, every other key is
	/// removed, and all tombstones are dropped. Listed keys are written before
	/// absent ones are removed, so a key present throughout is never missing.
	/// Keys in `undecodable` exist in the store but could not be read; their
	/// cached value is kept.
	pub(crate) fn reconcile(
		&self,
		records: &[FlagRecord],
		undecodable: &[String],
	) -> ReconcileSummary {
		let now = Utc::now();
		let mut listed = HashSet::with_capacity(records.len());

		for record in records {
			listed.insert(record.key().to_string());
			self.slots.insert(
				record.key().to_string(),
				Slot::Live(CacheEntry {
					record: record.clone(),
					refreshed_at: now,
				}),
			);
		}

		let undecodable: HashSet<&str> = undecodable.iter().map(String::as_str).collect();
		let mut removed = 0;
		self.slots.retain(|key, slot| {
			let keep = listed.contains(key)
				|| (undecodable.contains(key.as_str()) && matches!(slot, Slot::Live(_)));
			if !keep && matches!(slot, Slot::Live(_)) {
				removed += 1;
			}
			keep
		});

		ReconcileSummary {
			loaded: records.len(),
			removed,
		}
	}
}

fn live(record: FlagRecord) -> CacheEntry {
	CacheEntry {
		record,
		refreshed_at: Utc::now(),
	}
}
