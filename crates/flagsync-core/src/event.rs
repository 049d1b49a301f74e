// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::record::{FlagRecord, Version};

/// What happened to a key.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
	Upserted(FlagRecord),
	Deleted,
}

/// A uniform change notification, produced from either a watch stream or a
/// poll diff and applied once to the local cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
	pub key: String,
	pub version: Version,
	pub kind: ChangeKind,
}

impl ChangeEvent {
	pub fn upserted(record: FlagRecord) -> Self {
		Self {
			key: record.key().to_string(),
			version: record.version(),
			kind: ChangeKind::Upserted(record),
		}
	}

	/// A deletion observed at `version`.
	///
	/// For watch feeds this is the revision of the delete itself; for poll feeds,
	/// which never see the delete, it is the last version seen for the key.
	pub fn deleted(key: impl Into<String>, version: Version) -> Self {
		Self {
			key: key.into(),
			version,
			kind: ChangeKind::Deleted,
		}
	}

	pub fn record(&self) -> Option<&FlagRecord> {
		match &self.kind {
			ChangeKind::Upserted(record) => Some(record),
			ChangeKind::Deleted => None,
		}
	}

	pub fn is_delete(&self) -> bool {
		matches!(self.kind, ChangeKind::Deleted)
	}

	/// Short label for logs.
	pub fn kind_name(&self) -> &'static str {
		match self.kind {
			ChangeKind::Upserted(_) => "upserted",
			ChangeKind::Deleted => "deleted",
		}
	}
}
