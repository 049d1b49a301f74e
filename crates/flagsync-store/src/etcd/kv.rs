// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The slice of the etcd KV API the flag store relies on.
//!
//! Any client that can range over a prefix, read, write and delete single keys,
//! and watch a prefix from a revision can back an [`EtcdStore`](super::EtcdStore).
//! Connection handling, TLS and auth belong to the implementation.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
	pub key: String,
	pub value: Vec<u8>,
	/// Revision of the last write to this key.
	pub mod_revision: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvEventKind {
	Put,
	Delete,
}

/// A watch notification. For deletes `kv.value` is empty and `kv.mod_revision`
/// is the revision of the delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEvent {
	pub kind: KvEventKind,
	pub kv: KeyValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeResponse {
	pub kvs: Vec<KeyValue>,
	/// Store revision the range was served at.
	pub revision: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvError {
	#[error("required revision {requested} has been compacted (compact revision {compacted})")]
	Compacted { requested: i64, compacted: i64 },

	#[error("{0}")]
	Unavailable(String),
}

pub type KvResult<T> = std::result::Result<T, KvError>;

pub type KvWatchStream = BoxStream<'static, KvResult<KvEvent>>;

#[async_trait]
pub trait KvClient: Send + Sync {
	async fn get(&self, key: &str) -> KvResult<Option<KeyValue>>;

	/// Returns every key starting with `prefix`, in key order.
	async fn range(&self, prefix: &str) -> KvResult<RangeResponse>;

	/// Writes a key and returns the revision of the write.
	async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<i64>;

	async fn delete(&self, key: &str) -> KvResult<bool>;

	/// Watches keys starting with `prefix`, beginning at `start_revision` inclusive.
	///
	/// The stream ends with an error when the watch is cancelled by the server
	/// or the connection drops.
	async fn watch(&self, prefix: &str, start_revision: i64) -> KvResult<KvWatchStream>;
}
