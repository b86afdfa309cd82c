//! Persistent mapping between CMS entities and their external twins.
//!
//! For a given `(platform, entity_type)` the pair `(cms_id, external_id)` is
//! unique in both directions. The invariant is enforced by the table's
//! primary key and unique constraint, and checked explicitly inside the
//! upsert transaction so violations surface as [`IdentityError::Conflict`]
//! rather than a raw constraint error.

use chrono::Utc;
use rusqlite::{OptionalExtension, TransactionBehavior};
use tokio_rusqlite::Connection;

use crate::db::{enum_from_sql, time_from_sql, StoreError};
use crate::types::{Platform, SyncMapping};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The upsert would pair an id with a second partner.
    #[error(
        "mapping conflict on {platform}/{entity_type}: cms_id {cms_id} ↔ external_id {external_id} \
         collides with existing pair ({existing_cms_id} ↔ {existing_external_id})"
    )]
    Conflict {
        platform: Platform,
        entity_type: String,
        cms_id: String,
        external_id: String,
        existing_cms_id: String,
        existing_external_id: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<tokio_rusqlite::Error> for IdentityError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        IdentityError::Store(StoreError::Database(e))
    }
}

enum UpsertOutcome {
    Written,
    Conflict { cms_id: String, external_id: String },
}

/// SQLite-backed identity map. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct IdentityMap {
    conn: Connection,
}

impl IdentityMap {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn lookup_by_external_id(
        &self,
        platform: Platform,
        entity_type: &str,
        external_id: &str,
    ) -> Result<Option<String>, IdentityError> {
        let (p, t, e) = (platform.to_string(), entity_type.to_string(), external_id.to_string());
        let found = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT cms_id FROM sync_mappings
                         WHERE platform = ?1 AND entity_type = ?2 AND external_id = ?3",
                        rusqlite::params![p, t, e],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(found)
    }

    pub async fn lookup_by_cms_id(
        &self,
        platform: Platform,
        entity_type: &str,
        cms_id: &str,
    ) -> Result<Option<String>, IdentityError> {
        let (p, t, c) = (platform.to_string(), entity_type.to_string(), cms_id.to_string());
        let found = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT external_id FROM sync_mappings
                         WHERE platform = ?1 AND entity_type = ?2 AND cms_id = ?3",
                        rusqlite::params![p, t, c],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(found)
    }

    /// Full mapping row for a CMS entity, if any.
    pub async fn get(
        &self,
        platform: Platform,
        entity_type: &str,
        cms_id: &str,
    ) -> Result<Option<SyncMapping>, IdentityError> {
        let (p, t, c) = (platform.to_string(), entity_type.to_string(), cms_id.to_string());
        let row = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT external_id, last_synced_at, last_sync_direction FROM sync_mappings
                         WHERE platform = ?1 AND entity_type = ?2 AND cms_id = ?3",
                        rusqlite::params![p, t, c],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                            ))
                        },
                    )
                    .optional()?)
            })
            .await?;

        let Some((external_id, synced_at, direction)) = row else {
            return Ok(None);
        };
        Ok(Some(SyncMapping {
            cms_entity_type: entity_type.to_string(),
            cms_id: cms_id.to_string(),
            platform,
            external_id,
            last_synced_at: time_from_sql(&synced_at)?,
            last_sync_direction: enum_from_sql(&direction)?,
        }))
    }

    /// Insert or refresh a mapping.
    ///
    /// Idempotent for an existing pair (only `last_synced_at` and
    /// `last_sync_direction` change). Fails with [`IdentityError::Conflict`]
    /// when either id is already paired with a different partner; the
    /// existing row is left untouched.
    pub async fn upsert(&self, mapping: &SyncMapping) -> Result<(), IdentityError> {
        let p = mapping.platform.to_string();
        let t = mapping.cms_entity_type.clone();
        let c = mapping.cms_id.clone();
        let e = mapping.external_id.clone();
        let synced_at = mapping.last_synced_at.to_rfc3339();
        let direction = mapping.last_sync_direction.as_str().to_string();

        let outcome = self
            .conn
            .call(move |conn| {
                // Take the write lock up front so racing writers serialize on
                // busy_timeout instead of failing a read-to-write upgrade.
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let by_external: Option<String> = tx
                    .query_row(
                        "SELECT cms_id FROM sync_mappings
                         WHERE platform = ?1 AND entity_type = ?2 AND external_id = ?3",
                        rusqlite::params![p, t, e],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(existing) = by_external.filter(|existing| *existing != c) {
                    return Ok(UpsertOutcome::Conflict {
                        cms_id: existing,
                        external_id: e,
                    });
                }

                let by_cms: Option<String> = tx
                    .query_row(
                        "SELECT external_id FROM sync_mappings
                         WHERE platform = ?1 AND entity_type = ?2 AND cms_id = ?3",
                        rusqlite::params![p, t, c],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(existing) = by_cms.filter(|existing| *existing != e) {
                    return Ok(UpsertOutcome::Conflict {
                        cms_id: c,
                        external_id: existing,
                    });
                }

                tx.execute(
                    "INSERT INTO sync_mappings
                        (platform, entity_type, cms_id, external_id, last_synced_at, last_sync_direction)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(platform, entity_type, cms_id) DO UPDATE SET
                        last_synced_at = excluded.last_synced_at,
                        last_sync_direction = excluded.last_sync_direction",
                    rusqlite::params![p, t, c, e, synced_at, direction],
                )?;
                tx.commit()?;
                Ok(UpsertOutcome::Written)
            })
            .await?;

        match outcome {
            UpsertOutcome::Written => Ok(()),
            UpsertOutcome::Conflict {
                cms_id: existing_cms_id,
                external_id: existing_external_id,
            } => {
                tracing::warn!(
                    platform = %mapping.platform,
                    entity_type = %mapping.cms_entity_type,
                    cms_id = %mapping.cms_id,
                    external_id = %mapping.external_id,
                    %existing_cms_id,
                    %existing_external_id,
                    "identity map upsert rejected"
                );
                Err(IdentityError::Conflict {
                    platform: mapping.platform,
                    entity_type: mapping.cms_entity_type.clone(),
                    cms_id: mapping.cms_id.clone(),
                    external_id: mapping.external_id.clone(),
                    existing_cms_id,
                    existing_external_id,
                })
            }
        }
    }

    /// Delete the mapping for a CMS entity. Absent rows are not an error.
    /// Returns whether a row was removed.
    pub async fn remove(
        &self,
        platform: Platform,
        entity_type: &str,
        cms_id: &str,
    ) -> Result<bool, IdentityError> {
        let (p, t, c) = (platform.to_string(), entity_type.to_string(), cms_id.to_string());
        let removed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM sync_mappings WHERE platform = ?1 AND entity_type = ?2 AND cms_id = ?3",
                    rusqlite::params![p, t, c],
                )?)
            })
            .await?;
        Ok(removed > 0)
    }

    /// Number of mappings for a platform, all entity types.
    pub async fn count(&self, platform: Platform) -> Result<u64, IdentityError> {
        let p = platform.to_string();
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sync_mappings WHERE platform = ?1",
                    rusqlite::params![p],
                    |row| row.get::<_, i64>(0),
                )?)
            })
            .await?;
        Ok(n.max(0) as u64)
    }

    /// Bump `last_synced_at` to now without touching the pair.
    pub async fn touch(
        &self,
        platform: Platform,
        entity_type: &str,
        cms_id: &str,
    ) -> Result<(), IdentityError> {
        let (p, t, c) = (platform.to_string(), entity_type.to_string(), cms_id.to_string());
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE sync_mappings SET last_synced_at = ?4
                     WHERE platform = ?1 AND entity_type = ?2 AND cms_id = ?3",
                    rusqlite::params![p, t, c, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SyncDb;
    use crate::types::SyncDirection;

    async fn map() -> IdentityMap {
        SyncDb::open_in_memory().await.unwrap().identity_map()
    }

    #[tokio::test]
    async fn lookup_both_directions() {
        let m = map().await;
        m.upsert(&SyncMapping::new(Platform::Shopify, "product", "cms-1", "ext-1", SyncDirection::Outbound))
            .await
            .unwrap();

        assert_eq!(
            m.lookup_by_cms_id(Platform::Shopify, "product", "cms-1").await.unwrap().as_deref(),
            Some("ext-1")
        );
        assert_eq!(
            m.lookup_by_external_id(Platform::Shopify, "product", "ext-1").await.unwrap().as_deref(),
            Some("cms-1")
        );
        // Scoped by platform and entity type.
        assert!(m.lookup_by_cms_id(Platform::Wix, "product", "cms-1").await.unwrap().is_none());
        assert!(m.lookup_by_cms_id(Platform::Shopify, "order", "cms-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_partner_is_a_conflict() {
        let m = map().await;
        m.upsert(&SyncMapping::new(Platform::Drupal, "node", "cms-1", "ext-1", SyncDirection::Inbound))
            .await
            .unwrap();

        let err = m
            .upsert(&SyncMapping::new(Platform::Drupal, "node", "cms-2", "ext-1", SyncDirection::Inbound))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Conflict { .. }));

        let err = m
            .upsert(&SyncMapping::new(Platform::Drupal, "node", "cms-1", "ext-2", SyncDirection::Inbound))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Conflict { .. }));

        // Original row untouched.
        assert_eq!(m.count(Platform::Drupal).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let m = map().await;
        m.upsert(&SyncMapping::new(Platform::Wix, "content", "c", "e", SyncDirection::Outbound))
            .await
            .unwrap();
        assert!(m.remove(Platform::Wix, "content", "c").await.unwrap());
        assert!(!m.remove(Platform::Wix, "content", "c").await.unwrap());
    }
}
