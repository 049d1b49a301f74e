// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for synchronized feature flags.
//!
//! This crate provides the flag record model, the payload codec shared by every
//! backend, the uniform change event produced by the change feeds, and the pure
//! evaluation rule. It is used by both the store adapters (`flagsync-store`) and
//! the client (`flagsync`).
//!
//! # Overview
//!
//! A flag is a uniquely keyed record with a payload and a version token:
//! - Boolean payloads gate a feature on or off
//! - Rollout payloads enable a feature for a fraction of identifiers
//! - Text and structured payloads carry configuration values
//!
//! # Example
//!
//! ```
//! use flagsync_core::{evaluate, EvaluationContext, FlagRecord, FlagValue, Version};
//!
//! let record = FlagRecord::new("new-ui", FlagValue::Boolean(true), Version(3)).unwrap();
//! let ctx = EvaluationContext::new("user-42");
//!
//! let result = evaluate("new-ui", Some(&record), &ctx, false);
//! assert!(result.enabled);
//! assert_eq!(result.version, Some(Version(3)));
//! ```

pub mod codec;
pub mod error;
pub mod evaluation;
pub mod event;
pub mod record;

pub use error::{FlagsError, Result};
pub use evaluation::{
	evaluate, rollout_bucket, Evaluation, EvaluationContext, EvaluationReason, ROLLOUT_BUCKETS,
};
pub use event::{ChangeEvent, ChangeKind};
pub use record::{validate_key, FlagRecord, FlagValue, Version, MAX_KEY_LEN};
