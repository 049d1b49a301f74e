// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! etcd-backed flag store.
//!
//! Flags live under `{preamble}_feature_flag/{flag_key}` with the encoded
//! payload as the value. A flag's version is the key's `mod_revision`, and the
//! store can stream changes from any retained revision.

mod kv;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::instrument;

use flagsync_core::{codec, validate_key, FlagRecord, FlagValue, FlagsError, Version};

use crate::error::Result;
use crate::store::{FlagStore, Snapshot, WatchEvent, WatchEventKind, WatchStream};

pub use kv::{
	KeyValue, KvClient, KvError, KvEvent, KvEventKind, KvResult, KvWatchStream, RangeResponse,
};
pub use memory::MemoryKv;

const FLAG_KEY_SEGMENT: &str = "_feature_flag/";

#[derive(Clone)]
pub struct EtcdStore {
	client: Arc<dyn KvClient>,
	prefix: String,
}

impl EtcdStore {
	pub fn new(client: Arc<dyn KvClient>, preamble: &str) -> Self {
		Self {
			client,
			prefix: format!("{preamble}{FLAG_KEY_SEGMENT}"),
		}
	}

	/// Key prefix every flag of this store lives under.
	pub fn prefix(&self) -> &str {
		&self.prefix
	}

	fn storage_key(&self, key: &str) -> Result<String> {
		if !validate_key(key) {
			return Err(FlagsError::InvalidKey(key.to_string()).into());
		}
		Ok(format!("{}{}", self.prefix, key))
	}

	fn flag_key<'a>(&self, storage_key: &'a str) -> &'a str {
		storage_key.strip_prefix(&self.prefix).unwrap_or(storage_key)
	}

	fn decode(&self, kv: &KeyValue) -> Result<FlagRecord> {
		let key = self.flag_key(&kv.key);
		let value = codec::decode(&kv.value)?;
		let version = Version::from_revision(kv.mod_revision)?;
		Ok(FlagRecord::new(key, value, version)?)
	}
}

#[async_trait]
impl FlagStore for EtcdStore {
	fn backend_name(&self) -> &'static str {
		"etcd"
	}

	#[instrument(skip(self), fields(key = %key))]
	async fn get(&self, key: &str) -> Result<Option<FlagRecord>> {
		let storage_key = self.storage_key(key)?;
		match self.client.get(&storage_key).await? {
			Some(kv) => Ok(Some(self.decode(&kv)?)),
			None => Ok(None),
		}
	}

	#[instrument(skip(self), fields(prefix = %self.prefix))]
	async fn list(&self) -> Result<Snapshot> {
		let range = self.client.range(&self.prefix).await?;
		let mut snapshot = Snapshot {
			records: Vec::with_capacity(range.kvs.len()),
			revision: Some(Version::from_revision(range.revision)?),
			malformed_keys: Vec::new(),
		};

		for kv in &range.kvs {
			match self.decode(kv) {
				Ok(record) => snapshot.records.push(record),
				Err(e) => {
					tracing::warn!(key = %kv.key, error = %e, "skipping undecodable flag");
					snapshot.malformed_keys.push(self.flag_key(&kv.key).to_string());
				}
			}
		}

		Ok(snapshot)
	}

	#[instrument(skip(self, value), fields(key = %key))]
	async fn put(&self, key: &str, value: &FlagValue) -> Result<Version> {
		let storage_key = self.storage_key(key)?;
		value.validate()?;
		let revision = self.client.put(&storage_key, codec::encode(value)).await?;
		Ok(Version::from_revision(revision)?)
	}

	#[instrument(skip(self), fields(key = %key))]
	async fn delete(&self, key: &str) -> Result<bool> {
		let storage_key = self.storage_key(key)?;
		Ok(self.client.delete(&storage_key).await?)
	}

	fn supports_watch(&self) -> bool {
		true
	}

	#[instrument(skip(self), fields(after = %after))]
	async fn watch(&self, after: Version) -> Result<WatchStream> {
		let start_revision = after.next().as_revision();
		let stream = self.client.watch(&self.prefix, start_revision).await?;
		let prefix = self.prefix.clone();

		Ok(stream
			.map(move |event| {
				let event = event?;
				let key = event
					.kv
					.key
					.strip_prefix(&prefix)
					.unwrap_or(&event.kv.key)
					.to_string();
				let kind = match event.kind {
					KvEventKind::Put => WatchEventKind::Put(event.kv.value),
					KvEventKind::Delete => WatchEventKind::Delete,
				};
				Ok(WatchEvent {
					key,
					revision: event.kv.mod_revision,
					kind,
				})
			})
			.boxed())
	}
}
