use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio_rusqlite::Connection;

use crate::entity_store::SqliteEntityStore;
use crate::identity_map::IdentityMap;
use crate::sync_queue::SyncQueue;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

// ---------------------------------------------------------------------------
// SyncDb
// ---------------------------------------------------------------------------

/// Async SQLite database shared by the identity map, the sync queue and the
/// reference entity store.
///
/// Uniqueness of mappings and atomicity of queue claims are enforced by
/// SQLite itself, so several workers (threads or processes) can share one file.
#[derive(Clone)]
pub struct SyncDb {
    conn: Connection,
}

impl SyncDb {
    /// Open (or create) a database at the given file path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Corrupt(format!("cannot create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path.as_ref()).await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    pub fn identity_map(&self) -> IdentityMap {
        IdentityMap::new(self.conn.clone())
    }

    pub fn sync_queue(&self) -> SyncQueue {
        SyncQueue::new(self.conn.clone())
    }

    pub fn entity_store(&self) -> SqliteEntityStore {
        SqliteEntityStore::new(self.conn.clone())
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA busy_timeout=5000;
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;

                    CREATE TABLE IF NOT EXISTS sync_mappings (
                        platform            TEXT NOT NULL,
                        entity_type         TEXT NOT NULL,
                        cms_id              TEXT NOT NULL,
                        external_id         TEXT NOT NULL,
                        last_synced_at      TEXT NOT NULL,
                        last_sync_direction TEXT NOT NULL,
                        PRIMARY KEY (platform, entity_type, cms_id),
                        UNIQUE (platform, entity_type, external_id)
                    );

                    CREATE TABLE IF NOT EXISTS sync_operations (
                        seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                        id           TEXT NOT NULL UNIQUE,
                        platform     TEXT NOT NULL,
                        direction    TEXT NOT NULL,
                        entity_type  TEXT NOT NULL,
                        payload      TEXT NOT NULL,
                        attempt      INTEGER NOT NULL DEFAULT 0,
                        priority     INTEGER NOT NULL DEFAULT 0,
                        enqueued_at  TEXT NOT NULL,
                        claimed_by   TEXT,
                        claimed_at   TEXT,
                        last_error   TEXT
                    );

                    CREATE INDEX IF NOT EXISTS idx_ops_visible
                        ON sync_operations(claimed_by, priority DESC, seq);

                    CREATE TABLE IF NOT EXISTS dead_letters (
                        id          TEXT PRIMARY KEY,
                        operation   TEXT NOT NULL,
                        error       TEXT NOT NULL,
                        failed_at   TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS entities (
                        entity_type TEXT NOT NULL,
                        id          TEXT NOT NULL,
                        data        TEXT NOT NULL,
                        created_at  TEXT NOT NULL,
                        updated_at  TEXT NOT NULL,
                        PRIMARY KEY (entity_type, id)
                    );
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// helpers – enum/time <-> SQLite string
// ---------------------------------------------------------------------------

pub(crate) fn enum_from_sql<T: DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| StoreError::Corrupt(format!("bad enum value '{raw}': {e}")))
}

pub(crate) fn time_from_sql(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}
