// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQL-backed flag store.
//!
//! Flags are rows in `feature_flag`. Every write takes the next value of a
//! single-row revision counter in `feature_flag_revision` as the row's version,
//! so versions never go backwards for a key, even across delete and re-create.
//! The store has no change notification; consumers poll [`FlagStore::list`].

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use tracing::instrument;

use flagsync_core::{codec, validate_key, FlagRecord, FlagValue, FlagsError, Version};

use crate::error::{Result, StoreError};
use crate::store::{FlagStore, Snapshot};

#[derive(Clone)]
pub struct RelationalStore {
	pool: SqlitePool,
}

impl RelationalStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Opens a pool with WAL mode and creates the flag tables if needed.
	///
	/// # Arguments
	/// * `database_url` - SQLite connection string (e.g., "sqlite:./flags.db")
	#[instrument(skip(database_url))]
	pub async fn connect(database_url: &str) -> Result<Self> {
		let options = SqliteConnectOptions::from_str(database_url)
			.map_err(|e| StoreError::Unavailable(format!("Invalid database URL: {e}")))?
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Normal)
			.create_if_missing(true);

		let pool = SqlitePool::connect_with(options).await?;
		tracing::debug!("database pool created");

		let store = Self::new(pool);
		store.ensure_schema().await?;
		Ok(store)
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	/// Returns true if both flag tables exist.
	pub async fn schema_exists(&self) -> Result<bool> {
		let count: i64 = sqlx::query_scalar(
			r#"
			SELECT COUNT(*) FROM sqlite_master
			WHERE type = 'table' AND name IN ('feature_flag', 'feature_flag_revision')
			"#,
		)
		.fetch_one(&self.pool)
		.await?;

		Ok(count == 2)
	}

	/// Creates the flag tables and seeds the revision counter. Idempotent.
	#[instrument(skip(self))]
	pub async fn ensure_schema(&self) -> Result<()> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS feature_flag (
				feature_id TEXT PRIMARY KEY,
				value TEXT NOT NULL,
				version INTEGER NOT NULL,
				updated_at TEXT NOT NULL
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS feature_flag_revision (
				id INTEGER PRIMARY KEY CHECK (id = 1),
				revision INTEGER NOT NULL
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		sqlx::query("INSERT OR IGNORE INTO feature_flag_revision (id, revision) VALUES (1, 0)")
			.execute(&self.pool)
			.await?;

		Ok(())
	}
}

#[async_trait]
impl FlagStore for RelationalStore {
	fn backend_name(&self) -> &'static str {
		"relational"
	}

	#[instrument(skip(self), fields(key = %key))]
	async fn get(&self, key: &str) -> Result<Option<FlagRecord>> {
		let row = sqlx::query_as::<_, FeatureFlagRow>(
			r#"
			SELECT feature_id, value, version
			FROM feature_flag
			WHERE feature_id = ?
			"#,
		)
		.bind(key)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self))]
	async fn list(&self) -> Result<Snapshot> {
		let mut tx = self.pool.begin().await?;

		let revision: i64 =
			sqlx::query_scalar("SELECT revision FROM feature_flag_revision WHERE id = 1")
				.fetch_one(&mut *tx)
				.await?;

		let rows = sqlx::query_as::<_, FeatureFlagRow>(
			r#"
			SELECT feature_id, value, version
			FROM feature_flag
			ORDER BY feature_id ASC
			"#,
		)
		.fetch_all(&mut *tx)
		.await?;

		tx.commit().await?;

		let mut snapshot = Snapshot {
			records: Vec::with_capacity(rows.len()),
			revision: Some(Version::from_revision(revision)?),
			malformed_keys: Vec::new(),
		};

		for row in rows {
			let feature_id = row.feature_id.clone();
			match FlagRecord::try_from(row) {
				Ok(record) => snapshot.records.push(record),
				Err(e) => {
					tracing::warn!(key = %feature_id, error = %e, "skipping undecodable flag");
					snapshot.malformed_keys.push(feature_id);
				}
			}
		}

		Ok(snapshot)
	}

	#[instrument(skip(self, value), fields(key = %key))]
	async fn put(&self, key: &str, value: &FlagValue) -> Result<Version> {
		if !validate_key(key) {
			return Err(FlagsError::InvalidKey(key.to_string()).into());
		}
		value.validate()?;

		let mut tx = self.pool.begin().await?;

		let revision: i64 = sqlx::query_scalar(
			r#"
			UPDATE feature_flag_revision
			SET revision = revision + 1
			WHERE id = 1
			RETURNING revision
			"#,
		)
		.fetch_one(&mut *tx)
		.await?;

		sqlx::query(
			r#"
			INSERT INTO feature_flag (feature_id, value, version, updated_at)
			VALUES (?, ?, ?, ?)
			ON CONFLICT(feature_id) DO UPDATE SET
				value = excluded.value,
				version = excluded.version,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(key)
		.bind(codec::encode_str(value))
		.bind(revision)
		.bind(Utc::now().to_rfc3339())
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;

		Ok(Version::from_revision(revision)?)
	}

	#[instrument(skip(self), fields(key = %key))]
	async fn delete(&self, key: &str) -> Result<bool> {
		let mut tx = self.pool.begin().await?;

		let result = sqlx::query("DELETE FROM feature_flag WHERE feature_id = ?")
			.bind(key)
			.execute(&mut *tx)
			.await?;
		let deleted = result.rows_affected() > 0;

		if deleted {
			sqlx::query("UPDATE feature_flag_revision SET revision = revision + 1 WHERE id = 1")
				.execute(&mut *tx)
				.await?;
		}

		tx.commit().await?;
		Ok(deleted)
	}
}

#[derive(sqlx::FromRow)]
struct FeatureFlagRow {
	feature_id: String,
	value: String,
	version: i64,
}

impl TryFrom<FeatureFlagRow> for FlagRecord {
	type Error = StoreError;

	fn try_from(row: FeatureFlagRow) -> Result<Self> {
		let value = codec::decode(row.value.as_bytes())?;
		let version = Version::from_revision(row.version)?;
		Ok(FlagRecord::new(row.feature_id, value, version)?)
	}
}
