// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use flagsync_core::{FlagRecord, FlagValue, Version};

use crate::error::{Result, StoreError};

/// Full listing of a store at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
	pub records: Vec<FlagRecord>,
	/// Store revision the listing was taken at, when the backend has one.
	pub revision: Option<Version>,
	/// Keys whose stored entry could not be decoded. They are left out of
	/// `records` but still exist in the store.
	pub malformed_keys: Vec<String>,
}

impl Snapshot {
	pub fn len(&self) -> usize {
		self.records.len()
	}

	/// Number of entries skipped because they could not be decoded.
	pub fn malformed(&self) -> usize {
		self.malformed_keys.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}
}

/// Native change notification from a watch-capable backend.
///
/// Events are not decoded here: the key has its namespace prefix stripped and
/// the payload is the raw stored bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
	pub key: String,
	pub revision: i64,
	pub kind: WatchEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEventKind {
	Put(Vec<u8>),
	Delete,
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// Capability interface over a flag backend.
///
/// Writes go to the backend only. Callers that cache flags observe their own
/// writes through the watch stream or the next poll, like any other change.
#[async_trait]
pub trait FlagStore: Send + Sync {
	/// Short backend name used in logs.
	fn backend_name(&self) -> &'static str;

	async fn get(&self, key: &str) -> Result<Option<FlagRecord>>;

	async fn list(&self) -> Result<Snapshot>;

	/// Writes a flag and returns the version assigned to it.
	async fn put(&self, key: &str, value: &FlagValue) -> Result<Version>;

	/// Removes a flag. Returns false if it did not exist.
	async fn delete(&self, key: &str) -> Result<bool>;

	fn supports_watch(&self) -> bool {
		false
	}

	/// Streams changes with a version newer than `after`.
	///
	/// Fails with [`StoreError::Compacted`] when `after` is older than the
	/// retained history; the caller must list again and watch from the listing.
	async fn watch(&self, after: Version) -> Result<WatchStream> {
		let _ = after;
		Err(StoreError::WatchUnsupported(self.backend_name()))
	}
}

/// Runs a store operation with a deadline.
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	match tokio::time::timeout(after, fut).await {
		Ok(result) => result,
		Err(_) => Err(StoreError::Timeout { operation, after }),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_with_timeout_passes_result_through() {
		let value = with_timeout("list", Duration::from_secs(1), async { Ok(7) })
			.await
			.unwrap();
		assert_eq!(value, 7);
	}

	#[tokio::test]
	async fn test_with_timeout_expires() {
		let err = with_timeout("list", Duration::from_millis(10), async {
			tokio::time::sleep(Duration::from_secs(5)).await;
			Ok(())
		})
		.await
		.unwrap_err();

		assert!(matches!(
			err,
			StoreError::Timeout {
				operation: "list",
				..
			}
		));
	}
}
