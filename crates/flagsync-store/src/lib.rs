// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag store adapters for flagsync.
//!
//! # Architecture
//!
//! - `store` - The [`FlagStore`] capability interface shared by every backend
//! - `etcd` - Watch-capable store over an etcd-style KV namespace
//! - `relational` - Poll-only store over SQLite via sqlx
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use flagsync_store::{EtcdStore, FlagStore, MemoryKv};
//! use flagsync_core::FlagValue;
//!
//! let store = EtcdStore::new(Arc::new(MemoryKv::new()), "payments");
//! let version = store.put("new-ui", &FlagValue::Boolean(true)).await?;
//! let snapshot = store.list().await?;
//! ```

pub mod error;
pub mod etcd;
pub mod relational;
pub mod store;

pub use error::{Result, StoreError};
pub use etcd::{EtcdStore, KvClient, KvError, MemoryKv};
pub use relational::RelationalStore;
pub use store::{with_timeout, FlagStore, Snapshot, WatchEvent, WatchEventKind, WatchStream};
