// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flag client with a locally synchronized cache.
//!
//! A [`FlagsClient`] loads every flag from its backend at startup, then keeps a
//! local cache current in the background: etcd stores push changes through a
//! watch, relational stores are polled and diffed. Evaluation never touches the
//! network. When the backend becomes unreachable the client keeps serving the
//! last known values and reports how stale they are.
//!
//! # Modules
//!
//! - [`config`] - Layered configuration (defaults, TOML, environment)
//! - [`FlagsClient`] / [`FlagsClientBuilder`] - Evaluation surface and lifecycle
//! - [`SyncStatus`] - Synchronizer state observable by callers

mod backoff;
mod cache;
mod client;
pub mod config;
mod error;
mod feed;
mod sync;

pub use client::{FlagsClient, FlagsClientBuilder};
pub use config::{load_config, load_config_with_file, BackendKind, FlagsConfig};
pub use error::{ConfigError, FeedError, InitializationError, Result};
pub use sync::{SyncState, SyncStatsSnapshot, SyncStatus};

pub use flagsync_core::{
	Evaluation, EvaluationContext, EvaluationReason, FlagRecord, FlagValue, Version,
};
pub use flagsync_store::{
	EtcdStore, FlagStore, KvClient, MemoryKv, RelationalStore, Snapshot, StoreError,
};
