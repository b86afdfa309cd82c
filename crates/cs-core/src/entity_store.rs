//! Local entity store capability and the SQLite reference implementation.
//!
//! The sync layer only talks to [`EntityStore`]; any backing store works as
//! long as it emits a [`ChangeEvent`] for every committed mutation, carrying
//! the [`Origin`] the caller supplied.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::{Map, Value};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::db::StoreError;
use crate::types::{ChangeAction, ChangeEvent, CmsEntity, Origin};

/// Filter for [`EntityStore::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    /// Match on the entity's `status` field.
    pub status: Option<String>,
}

impl EntityFilter {
    pub fn published() -> Self {
        Self {
            status: Some("published".to_string()),
        }
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn load(&self, entity_type: &str, id: &str) -> Result<Option<CmsEntity>, StoreError>;

    /// Persist a new entity and return its id.
    async fn create(
        &self,
        entity_type: &str,
        data: Map<String, Value>,
        origin: Origin,
    ) -> Result<String, StoreError>;

    /// Replace an entity's fields. Fails with `NotFound` if absent.
    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        data: Map<String, Value>,
        origin: Origin,
    ) -> Result<(), StoreError>;

    /// Remove an entity. Returns whether it existed.
    async fn delete(&self, entity_type: &str, id: &str, origin: Origin) -> Result<bool, StoreError>;

    /// Ids of all entities of a type matching the filter, oldest first.
    async fn query(&self, entity_type: &str, filter: &EntityFilter) -> Result<Vec<String>, StoreError>;
}

// ---------------------------------------------------------------------------
// SqliteEntityStore
// ---------------------------------------------------------------------------

/// Entities stored as JSON documents in the `entities` table.
#[derive(Clone)]
pub struct SqliteEntityStore {
    conn: Connection,
    subscribers: Arc<Mutex<Vec<flume::Sender<ChangeEvent>>>>,
}

impl SqliteEntityStore {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            conn,
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Receive a [`ChangeEvent`] for every mutation committed after this call.
    pub fn subscribe(&self) -> flume::Receiver<ChangeEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    fn emit(&self, entity_type: &str, cms_id: &str, action: ChangeAction, origin: Origin) {
        let event = ChangeEvent {
            entity_type: entity_type.to_string(),
            cms_id: cms_id.to_string(),
            action,
            origin,
            occurred_at: Utc::now(),
        };
        tracing::debug!(entity_type, cms_id, %action, %origin, "entity change");
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn load(&self, entity_type: &str, id: &str) -> Result<Option<CmsEntity>, StoreError> {
        let (t, i) = (entity_type.to_string(), id.to_string());
        let raw = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT data FROM entities WHERE entity_type = ?1 AND id = ?2",
                        rusqlite::params![t, i],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let data: Map<String, Value> = serde_json::from_str(&raw)?;
        Ok(Some(CmsEntity {
            entity_type: entity_type.to_string(),
            id: Some(id.to_string()),
            data,
        }))
    }

    async fn create(
        &self,
        entity_type: &str,
        data: Map<String, Value>,
        origin: Origin,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let (t, i) = (entity_type.to_string(), id.clone());
        let json = serde_json::to_string(&data)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO entities (entity_type, id, data, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    rusqlite::params![t, i, json, now],
                )?;
                Ok(())
            })
            .await?;
        self.emit(entity_type, &id, ChangeAction::Create, origin);
        Ok(id)
    }

    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        data: Map<String, Value>,
        origin: Origin,
    ) -> Result<(), StoreError> {
        let (t, i) = (entity_type.to_string(), id.to_string());
        let json = serde_json::to_string(&data)?;
        let now = Utc::now().to_rfc3339();
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE entities SET data = ?3, updated_at = ?4 WHERE entity_type = ?1 AND id = ?2",
                    rusqlite::params![t, i, json, now],
                )?)
            })
            .await?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("{entity_type}/{id}")));
        }
        self.emit(entity_type, id, ChangeAction::Update, origin);
        Ok(())
    }

    async fn delete(&self, entity_type: &str, id: &str, origin: Origin) -> Result<bool, StoreError> {
        let (t, i) = (entity_type.to_string(), id.to_string());
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM entities WHERE entity_type = ?1 AND id = ?2",
                    rusqlite::params![t, i],
                )?)
            })
            .await?;
        if n == 0 {
            return Ok(false);
        }
        self.emit(entity_type, id, ChangeAction::Delete, origin);
        Ok(true)
    }

    async fn query(&self, entity_type: &str, filter: &EntityFilter) -> Result<Vec<String>, StoreError> {
        let t = entity_type.to_string();
        let status = filter.status.clone();
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id FROM entities
                     WHERE entity_type = ?1
                       AND (?2 IS NULL OR json_extract(data, '$.status') = ?2)
                     ORDER BY created_at ASC, rowid ASC",
                )?;
                let ids = stmt
                    .query_map(rusqlite::params![t, status], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SyncDb;
    use crate::types::Platform;
    use serde_json::json;

    fn fields(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn create_load_update_delete() {
        let store = SyncDb::open_in_memory().await.unwrap().entity_store();
        let id = store
            .create("content", fields(json!({"title": "Hello"})), Origin::Local)
            .await
            .unwrap();

        let loaded = store.load("content", &id).await.unwrap().unwrap();
        assert_eq!(loaded.str_field("title"), Some("Hello"));

        store
            .update("content", &id, fields(json!({"title": "Bye"})), Origin::Local)
            .await
            .unwrap();
        assert_eq!(
            store.load("content", &id).await.unwrap().unwrap().str_field("title"),
            Some("Bye")
        );

        assert!(store.delete("content", &id, Origin::Local).await.unwrap());
        assert!(!store.delete("content", &id, Origin::Local).await.unwrap());
        assert!(store.load("content", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = SyncDb::open_in_memory().await.unwrap().entity_store();
        let err = store
            .update("content", "nope", Map::new(), Origin::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn query_filters_by_status() {
        let store = SyncDb::open_in_memory().await.unwrap().entity_store();
        let a = store
            .create("content", fields(json!({"status": "published"})), Origin::Local)
            .await
            .unwrap();
        store
            .create("content", fields(json!({"status": "draft"})), Origin::Local)
            .await
            .unwrap();
        store
            .create("product", fields(json!({"status": "published"})), Origin::Local)
            .await
            .unwrap();

        assert_eq!(store.query("content", &EntityFilter::default()).await.unwrap().len(), 2);
        assert_eq!(store.query("content", &EntityFilter::published()).await.unwrap(), vec![a]);
    }

    #[tokio::test]
    async fn mutations_carry_their_origin() {
        let store = SyncDb::open_in_memory().await.unwrap().entity_store();
        let rx = store.subscribe();

        let id = store
            .create("product", Map::new(), Origin::External(Platform::Shopify))
            .await
            .unwrap();
        store.delete("product", &id, Origin::Local).await.unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.action, ChangeAction::Create);
        assert_eq!(first.origin, Origin::External(Platform::Shopify));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.action, ChangeAction::Delete);
        assert_eq!(second.origin, Origin::Local);
        assert!(rx.try_recv().is_err());
    }
}
