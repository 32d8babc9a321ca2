//! # Local Database Module
//!
//! SQLite persistence for the offline action queue, so queued inspection
//! work survives app restarts.
//!
//! ## Architecture
//!
//! - **Single Table**: one `pending_actions` row per queued action
//! - **WAL Mode**: readers are never blocked by the queue writer
//! - **Migrations**: `schema_migrations` tracks the applied schema version
//!
//! Each [`PersistenceBackend`] call is a single statement, so every record
//! write is atomic. Claims use a conditional `UPDATE`, which keeps them
//! exclusive even when several processes open the same file. Other
//! multi-step updates are serialized by
//! [`ActionStore`](crate::offline::store::ActionStore).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use doublecheck_sync::local_db::SqliteBackend;
//! use doublecheck_sync::offline::store::ActionStore;
//! use doublecheck_sync::shared::clock::SystemClock;
//! use std::sync::Arc;
//!
//! # async fn example() -> doublecheck_sync::shared::error::Result<()> {
//! let backend = SqliteBackend::open("/tmp/doublecheck/queue.db").await?;
//! let store = ActionStore::open(Arc::new(backend), Arc::new(SystemClock)).await?;
//! # Ok(())
//! # }
//! ```

pub mod schema;

use crate::offline::action::{ActionId, ActionKind, ActionStatus, PendingAction};
use crate::offline::store::PersistenceBackend;
use crate::shared::error::{QueueError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// SQLite-backed action persistence
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open or create the queue database at `path`
    ///
    /// Creates parent directories and the file if missing, then applies the
    /// schema and any pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    QueueError::storage(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("cache_size", "1000")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let backend = Self { pool };
        backend.init_schema().await?;
        tracing::info!(path = %path.display(), "Opened queue database");
        Ok(backend)
    }

    /// Private in-memory database; contents vanish with the backend
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // One connection, since each in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let backend = Self { pool };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(schema::SCHEMA_SQL).execute(&self.pool).await?;
        self.run_migrations().await
    }

    /// Checks the current schema version and applies any pending migrations.
    async fn run_migrations(&self) -> Result<()> {
        let (current_version,): (i32,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;

        for version in schema::pending_migrations(current_version) {
            // Version 1 is the base schema itself
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await?;
            tracing::debug!(version, "Applied queue schema migration");
        }
        Ok(())
    }

    /// Current schema version
    pub async fn schema_version(&self) -> Result<i32> {
        let (version,): (i32,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;
        Ok(version)
    }
}

fn action_from_row(row: &SqliteRow) -> Result<PendingAction> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let payload: String = row.try_get("payload")?;
    let status: String = row.try_get("status")?;
    let seq: i64 = row.try_get("seq")?;
    let attempts: i64 = row.try_get("attempts")?;

    Ok(PendingAction {
        id: ActionId::from(id),
        kind: ActionKind::from(kind),
        payload: serde_json::from_str(&payload)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        seq: u64::try_from(seq).map_err(|_| QueueError::storage(format!("negative seq {}", seq)))?,
        attempts: u32::try_from(attempts)
            .map_err(|_| QueueError::storage(format!("invalid attempts {}", attempts)))?,
        last_error: row.try_get("last_error")?,
        status: status.parse::<ActionStatus>().map_err(QueueError::storage)?,
        next_attempt_at: row.try_get("next_attempt_at")?,
    })
}

const SELECT_COLUMNS: &str = "SELECT id, kind, payload, created_at, seq, attempts, last_error, \
     status, next_attempt_at FROM pending_actions";

#[async_trait]
impl PersistenceBackend for SqliteBackend {
    async fn load_all(&self) -> Result<Vec<PendingAction>> {
        let rows = sqlx::query(&format!("{} ORDER BY seq", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(action_from_row).collect()
    }

    async fn get(&self, id: &ActionId) -> Result<Option<PendingAction>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(action_from_row).transpose()
    }

    async fn put(&self, action: &PendingAction) -> Result<()> {
        let payload = serde_json::to_string(&action.payload)?;

        sqlx::query(
            "INSERT INTO pending_actions
                 (id, kind, payload, created_at, seq, attempts, last_error, status, next_attempt_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 kind = excluded.kind,
                 payload = excluded.payload,
                 attempts = excluded.attempts,
                 last_error = excluded.last_error,
                 status = excluded.status,
                 next_attempt_at = excluded.next_attempt_at",
        )
        .bind(action.id.as_str())
        .bind(action.kind.as_str())
        .bind(payload)
        .bind(action.created_at)
        .bind(action.seq as i64)
        .bind(i64::from(action.attempts))
        .bind(action.last_error.as_deref())
        .bind(action.status.as_str())
        .bind(action.next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &ActionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pending_actions WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn compare_and_set_status(
        &self,
        id: &ActionId,
        from: ActionStatus,
        to: ActionStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE pending_actions SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(id.as_str())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
