//! Durable queue of pending sync operations.
//!
//! Operations move through claim/ack states instead of being popped from
//! memory: `claim` hides an operation from other workers in a single
//! `UPDATE ... RETURNING` statement, `ack` deletes it, `release` makes it
//! visible again with a bumped attempt count, and `dead_letter` moves it to
//! the terminal table. Claims left behind by a crashed worker are recovered
//! by [`SyncQueue::release_stale_claims`].

use chrono::{Duration, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::db::{enum_from_sql, time_from_sql, StoreError};
use crate::types::{DeadLetter, QueueStats, SyncOperation};

/// Raw column tuple of `sync_operations`, decoded outside the db thread.
type OpRow = (String, String, String, String, String, i64, i64, String, Option<String>);

const OP_COLUMNS: &str =
    "id, platform, direction, entity_type, payload, attempt, priority, enqueued_at, last_error";

fn read_op_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OpRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn decode_op(raw: OpRow) -> Result<SyncOperation, StoreError> {
    let (id, platform, direction, entity_type, payload, attempt, priority, enqueued_at, last_error) =
        raw;
    Ok(SyncOperation {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(format!("bad op id '{id}': {e}")))?,
        platform: enum_from_sql(&platform)?,
        direction: enum_from_sql(&direction)?,
        entity_type,
        payload: serde_json::from_str(&payload)?,
        attempt: attempt.max(0) as u32,
        priority: priority as i32,
        enqueued_at: time_from_sql(&enqueued_at)?,
        last_error,
    })
}

/// SQLite-backed sync queue. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct SyncQueue {
    conn: Connection,
}

impl SyncQueue {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Add an operation to the visible queue.
    pub async fn enqueue(&self, op: &SyncOperation) -> Result<(), StoreError> {
        let row = OpInsert::new(op, None)?;
        self.conn
            .call(move |conn| {
                row.insert(conn)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert a batch of operations already claimed by `worker_id`, in one
    /// transaction. Other workers never see them; if the owner dies they
    /// come back through [`SyncQueue::release_stale_claims`].
    pub async fn enqueue_claimed(&self, ops: &[SyncOperation], worker_id: &str) -> Result<(), StoreError> {
        let claim = (worker_id.to_string(), Utc::now().to_rfc3339());
        let rows = ops
            .iter()
            .map(|op| OpInsert::new(op, Some(claim.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                for row in &rows {
                    row.insert(&tx)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Atomically claim the next visible operation (priority, then FIFO).
    ///
    /// Returns `None` when nothing is visible. The operation stays in the
    /// table, hidden from other workers, until acked, released or
    /// dead-lettered.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<SyncOperation>, StoreError> {
        let worker = worker_id.to_string();
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE sync_operations SET claimed_by = ?1, claimed_at = ?2
             WHERE seq = (
                SELECT seq FROM sync_operations
                WHERE claimed_by IS NULL
                ORDER BY priority DESC, seq ASC
                LIMIT 1
             )
             RETURNING {OP_COLUMNS}"
        );
        let raw = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(&sql, rusqlite::params![worker, now], read_op_row)
                    .optional()?)
            })
            .await?;
        raw.map(decode_op).transpose()
    }

    /// Delete a claimed operation after it succeeded.
    pub async fn ack(&self, id: Uuid) -> Result<bool, StoreError> {
        let id = id.to_string();
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM sync_operations WHERE id = ?1", rusqlite::params![id])?)
            })
            .await?;
        Ok(n > 0)
    }

    /// Return a claimed operation to the visible queue with a new attempt count.
    pub async fn release(&self, id: Uuid, attempt: u32, error: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let error = error.to_string();
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE sync_operations
                     SET claimed_by = NULL, claimed_at = NULL, attempt = ?2, last_error = ?3
                     WHERE id = ?1",
                    rusqlite::params![id, attempt as i64, error],
                )?)
            })
            .await?;
        Ok(n > 0)
    }

    /// Move an operation (claimed or not) to the dead-letter table.
    pub async fn dead_letter(&self, op: &SyncOperation, error: &str) -> Result<(), StoreError> {
        let id = op.id.to_string();
        let mut terminal = op.clone();
        terminal.last_error = Some(error.to_string());
        let operation = serde_json::to_string(&terminal)?;
        let error = error.to_string();
        let failed_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                tx.execute("DELETE FROM sync_operations WHERE id = ?1", rusqlite::params![id])?;
                tx.execute(
                    "INSERT OR REPLACE INTO dead_letters (id, operation, error, failed_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, operation, error, failed_at],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Make claims older than `lease` visible again. Returns how many were released.
    pub async fn release_stale_claims(&self, lease: Duration) -> Result<usize, StoreError> {
        let cutoff = (Utc::now() - lease).to_rfc3339();
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE sync_operations SET claimed_by = NULL, claimed_at = NULL
                     WHERE claimed_by IS NOT NULL AND claimed_at < ?1",
                    rusqlite::params![cutoff],
                )?)
            })
            .await?;
        if n > 0 {
            tracing::warn!(released = n, "released stale queue claims");
        }
        Ok(n)
    }

    /// Remove every pending (unclaimed) operation. Returns the count removed.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let n = self
            .conn
            .call(|conn| Ok(conn.execute("DELETE FROM sync_operations WHERE claimed_by IS NULL", [])?))
            .await?;
        Ok(n)
    }

    /// Number of visible (unclaimed) operations.
    pub async fn pending(&self) -> Result<u64, StoreError> {
        Ok(self.stats().await?.pending)
    }

    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        let (pending, claimed, dead) = self
            .conn
            .call(|conn| {
                let pending: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sync_operations WHERE claimed_by IS NULL",
                    [],
                    |r| r.get(0),
                )?;
                let claimed: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sync_operations WHERE claimed_by IS NOT NULL",
                    [],
                    |r| r.get(0),
                )?;
                let dead: i64 = conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |r| r.get(0))?;
                Ok((pending, claimed, dead))
            })
            .await?;
        Ok(QueueStats {
            pending: pending.max(0) as u64,
            claimed: claimed.max(0) as u64,
            dead_letters: dead.max(0) as u64,
        })
    }

    /// Pending operations in the order they would be claimed.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<SyncOperation>, StoreError> {
        let sql = format!(
            "SELECT {OP_COLUMNS} FROM sync_operations WHERE claimed_by IS NULL
             ORDER BY priority DESC, seq ASC LIMIT ?1"
        );
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params![limit as i64], read_op_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(decode_op).collect()
    }

    // -----------------------------------------------------------------------
    // Dead letters
    // -----------------------------------------------------------------------

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare("SELECT operation, error, failed_at FROM dead_letters ORDER BY failed_at ASC")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(operation, error, failed_at)| {
                Ok(DeadLetter {
                    operation: serde_json::from_str(&operation)?,
                    error,
                    failed_at: time_from_sql(&failed_at)?,
                })
            })
            .collect()
    }

    /// Move one dead letter back into the queue with a fresh retry budget.
    pub async fn retry_dead_letter(&self, id: Uuid) -> Result<bool, StoreError> {
        let Some(letter) = self.dead_letters().await?.into_iter().find(|d| d.operation.id == id) else {
            return Ok(false);
        };
        self.requeue(letter).await?;
        Ok(true)
    }

    /// Move all dead letters back into the queue. Returns how many moved.
    pub async fn retry_all_dead_letters(&self) -> Result<usize, StoreError> {
        let letters = self.dead_letters().await?;
        let n = letters.len();
        for letter in letters {
            self.requeue(letter).await?;
        }
        Ok(n)
    }

    /// Discard all dead letters. Returns the count removed.
    pub async fn purge_dead_letters(&self) -> Result<usize, StoreError> {
        let n = self
            .conn
            .call(|conn| Ok(conn.execute("DELETE FROM dead_letters", [])?))
            .await?;
        Ok(n)
    }

    /// Delete the dead letter and insert its operation in one transaction,
    /// so a failed insert leaves the dead letter in place.
    async fn requeue(&self, letter: DeadLetter) -> Result<(), StoreError> {
        let mut op = letter.operation;
        op.attempt = 0;
        op.last_error = Some(letter.error);
        let id = op.id.to_string();
        let row = OpInsert::new(&op, None)?;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                tx.execute("DELETE FROM dead_letters WHERE id = ?1", rusqlite::params![id])?;
                row.insert(&tx)?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// Owned column values of one `sync_operations` row, ready to move into a
/// `conn.call` closure.
struct OpInsert {
    id: String,
    platform: String,
    direction: String,
    entity_type: String,
    payload: String,
    attempt: i64,
    priority: i64,
    enqueued_at: String,
    last_error: Option<String>,
    claim: Option<(String, String)>,
}

impl OpInsert {
    fn new(op: &SyncOperation, claim: Option<(String, String)>) -> Result<Self, StoreError> {
        Ok(Self {
            id: op.id.to_string(),
            platform: op.platform.to_string(),
            direction: op.direction.as_str().to_string(),
            entity_type: op.entity_type.clone(),
            payload: serde_json::to_string(&op.payload)?,
            attempt: op.attempt as i64,
            priority: op.priority as i64,
            enqueued_at: op.enqueued_at.to_rfc3339(),
            last_error: op.last_error.clone(),
            claim,
        })
    }

    fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<usize> {
        let (claimed_by, claimed_at) = match &self.claim {
            Some((worker, at)) => (Some(worker.as_str()), Some(at.as_str())),
            None => (None, None),
        };
        conn.execute(
            "INSERT INTO sync_operations
                (id, platform, direction, entity_type, payload, attempt, priority, enqueued_at, last_error,
                 claimed_by, claimed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                self.id,
                self.platform,
                self.direction,
                self.entity_type,
                self.payload,
                self.attempt,
                self.priority,
                self.enqueued_at,
                self.last_error,
                claimed_by,
                claimed_at,
            ],
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SyncDb;
    use crate::types::{ChangeAction, Platform};

    async fn queue() -> SyncQueue {
        SyncDb::open_in_memory().await.unwrap().sync_queue()
    }

    fn op(cms_id: &str) -> SyncOperation {
        SyncOperation::outbound(Platform::Wordpress, "content", cms_id, ChangeAction::Update)
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_fifo() {
        let q = queue().await;
        q.enqueue(&op("a")).await.unwrap();
        q.enqueue(&op("b")).await.unwrap();
        q.enqueue(&op("urgent").with_priority(10)).await.unwrap();

        let first = q.claim("w1").await.unwrap().unwrap();
        let second = q.claim("w1").await.unwrap().unwrap();
        let third = q.claim("w1").await.unwrap().unwrap();
        assert!(q.claim("w1").await.unwrap().is_none());

        let ids: Vec<String> = [first, second, third]
            .into_iter()
            .map(|o| match o.payload {
                crate::types::OperationPayload::ToExternal { cms_id, .. } => cms_id,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec!["urgent", "a", "b"]);
    }

    #[tokio::test]
    async fn claimed_items_are_invisible_until_released() {
        let q = queue().await;
        let o = op("a");
        q.enqueue(&o).await.unwrap();

        let claimed = q.claim("w1").await.unwrap().unwrap();
        assert!(q.claim("w2").await.unwrap().is_none());
        assert_eq!(q.stats().await.unwrap().claimed, 1);

        q.release(claimed.id, 1, "boom").await.unwrap();
        let again = q.claim("w2").await.unwrap().unwrap();
        assert_eq!(again.id, o.id);
        assert_eq!(again.attempt, 1);
        assert_eq!(again.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn dead_letter_and_retry() {
        let q = queue().await;
        let mut o = op("a");
        q.enqueue(&o).await.unwrap();
        q.claim("w1").await.unwrap();
        o.attempt = 3;
        q.dead_letter(&o, "gave up").await.unwrap();

        let stats = q.stats().await.unwrap();
        assert_eq!(stats.pending + stats.claimed, 0);
        assert_eq!(stats.dead_letters, 1);

        let letters = q.dead_letters().await.unwrap();
        assert_eq!(letters[0].operation.attempt, 3);
        assert_eq!(letters[0].error, "gave up");

        assert!(q.retry_dead_letter(o.id).await.unwrap());
        let back = q.claim("w1").await.unwrap().unwrap();
        assert_eq!(back.attempt, 0);
        assert_eq!(q.stats().await.unwrap().dead_letters, 0);
    }

    #[tokio::test]
    async fn failed_retry_keeps_the_dead_letter() {
        let q = queue().await;
        let o = op("a");
        q.enqueue(&o).await.unwrap();
        q.claim("w1").await.unwrap();
        q.dead_letter(&o, "gave up").await.unwrap();
        // Same id back in the queue: the re-insert violates the unique key.
        q.enqueue(&o).await.unwrap();

        assert!(q.retry_dead_letter(o.id).await.is_err());
        let stats = q.stats().await.unwrap();
        assert_eq!(stats.dead_letters, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn claimed_batches_are_hidden_from_other_workers() {
        let q = queue().await;
        let batch = vec![op("a"), op("b")];
        q.enqueue_claimed(&batch, "bulk").await.unwrap();

        assert!(q.claim("w1").await.unwrap().is_none());
        let stats = q.stats().await.unwrap();
        assert_eq!((stats.pending, stats.claimed), (0, 2));

        assert_eq!(q.release_stale_claims(Duration::seconds(-1)).await.unwrap(), 2);
        assert_eq!(q.claim("w1").await.unwrap().unwrap().id, batch[0].id);
    }

    #[tokio::test]
    async fn clear_leaves_claimed_items() {
        let q = queue().await;
        q.enqueue(&op("a")).await.unwrap();
        q.enqueue(&op("b")).await.unwrap();
        q.claim("w1").await.unwrap();
        assert_eq!(q.clear().await.unwrap(), 1);
        assert_eq!(q.stats().await.unwrap().claimed, 1);
    }
}
