//! Queue draining and bulk sync.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cs_core::config::QueueConfig;
use cs_core::db::StoreError;
use cs_core::entity_store::EntityFilter;
use cs_core::types::{ChangeAction, Platform, QueueRunReport, SyncOperation, SyncResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::hub::SyncHub;
use crate::error::{Result, SyncError};

/// Bulk work yields to change-driven operations in the queue.
pub const BULK_PRIORITY: i32 = -1;

/// Outcome of a bulk sync or import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSyncReport {
    pub total: usize,
    pub batches: usize,
    pub successful: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// How a claimed operation left the queue.
enum Settled {
    Done(SyncResult),
    /// Back in the queue for another attempt.
    Released(String),
    DeadLettered(String),
}

/// Drains the durable queue and runs bulk operations through a [`SyncHub`].
pub struct BatchRunner {
    hub: Arc<SyncHub>,
    worker_id: String,
    batch_size: usize,
    batch_delay: Duration,
    time_budget: Duration,
}

impl BatchRunner {
    pub fn new(hub: Arc<SyncHub>, config: &QueueConfig) -> Self {
        Self {
            hub,
            worker_id: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            batch_size: config.batch_size.max(1),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            time_budget: Duration::from_millis(config.time_budget_ms),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn hub(&self) -> &Arc<SyncHub> {
        &self.hub
    }

    pub fn time_budget(&self) -> Duration {
        self.time_budget
    }

    /// Claim and run queued operations until the queue is empty or the
    /// time budget is spent. The budget is checked between operations, so
    /// an operation already in flight always completes.
    pub async fn process_queue(&self, time_budget: Duration) -> std::result::Result<QueueRunReport, StoreError> {
        let queue = self.hub.queue();
        let started = Instant::now();
        let mut report = QueueRunReport::default();

        while started.elapsed() < time_budget {
            let Some(op) = queue.claim(&self.worker_id).await? else {
                break;
            };
            report.processed += 1;
            match self.settle(op).await? {
                Settled::Done(_) => {}
                Settled::Released(_) => report.errors += 1,
                Settled::DeadLettered(_) => {
                    report.errors += 1;
                    report.dead_lettered += 1;
                }
            }
        }

        report.remaining = queue.pending().await?;
        if report.processed > 0 {
            info!(
                processed = report.processed,
                errors = report.errors,
                remaining = report.remaining,
                dead_lettered = report.dead_lettered,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "queue run finished"
            );
        }
        Ok(report)
    }

    /// Run one claimed operation and resolve its queue row.
    ///
    /// Successful operations are acked. A failed operation is dead-lettered
    /// with its final attempt count, except for local store errors, which
    /// release the claim while attempts remain.
    async fn settle(&self, mut op: SyncOperation) -> std::result::Result<Settled, StoreError> {
        let queue = self.hub.queue();
        match self.hub.execute(&op).await {
            Ok(result) => {
                debug!(op_id = %op.id, platform = %op.platform, success = result.success, message = ?result.message, "operation complete");
                queue.ack(op.id).await?;
                Ok(Settled::Done(result))
            }
            Err(failure) => {
                let message = failure.error.to_string();
                if matches!(failure.error, SyncError::Store(_))
                    && failure.attempts < self.hub.retry_policy().max_retries
                {
                    warn!(op_id = %op.id, attempt = failure.attempts, error = %message, "store error, releasing operation");
                    queue.release(op.id, failure.attempts, &message).await?;
                    return Ok(Settled::Released(message));
                }
                op.attempt = failure.attempts;
                error!(op_id = %op.id, platform = %op.platform, entity_type = %op.entity_type, attempt = op.attempt, error = %message, "operation failed, moving to dead letters");
                queue.dead_letter(&op, &message).await?;
                self.hub.observer().on_dead_letter(&op, &message);
                Ok(Settled::DeadLettered(message))
            }
        }
    }

    /// Release claims held longer than `lease` by a worker that died.
    pub async fn release_stale(&self, lease: Duration) -> std::result::Result<usize, StoreError> {
        let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::weeks(52));
        let released = self.hub.queue().release_stale_claims(lease).await?;
        if released > 0 {
            warn!(released, "released stale queue claims");
        }
        Ok(released)
    }

    /// Push every entity of a type (or the given ids) to one platform, or
    /// to every platform that syncs the type outward.
    ///
    /// Entities are processed in batches of `batch_size` with `batch_delay`
    /// between consecutive batches. Each batch is written to the queue at
    /// [`BULK_PRIORITY`], claimed by this runner, then run and settled like
    /// any queued operation: failures end up as dead letters. Each entity
    /// counts once, successful when every target platform accepted it.
    pub async fn bulk_sync(
        &self,
        entity_type: &str,
        ids: Option<Vec<String>>,
        only_published: bool,
        platform: Option<Platform>,
    ) -> Result<BulkSyncReport> {
        let ids = match ids {
            Some(ids) => ids,
            None => {
                let filter = if only_published {
                    EntityFilter::published()
                } else {
                    EntityFilter::default()
                };
                self.hub.store().query(entity_type, &filter).await?
            }
        };

        let targets: Vec<Platform> = self
            .hub
            .platforms()
            .filter(|p| platform.map_or(true, |only| only == *p))
            .filter(|p| {
                self.hub.coordinator(*p).is_some_and(|c| {
                    c.config.should_sync_to()
                        && c.config.entity_type_enabled(entity_type)
                        && c.profile.supports(entity_type)
                })
            })
            .collect();

        let mut report = BulkSyncReport {
            total: ids.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            warn!(entity_type, "bulk sync has no target platform");
            report.failed = report.total;
            report
                .errors
                .push(format!("no platform syncs {entity_type} outward"));
            return Ok(report);
        }

        info!(entity_type, total = report.total, platforms = targets.len(), "bulk sync started");
        for (index, chunk) in ids.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            report.batches += 1;
            self.run_batch(entity_type, chunk, &targets, &mut report).await?;
            debug!(entity_type, batch = report.batches, size = chunk.len(), "bulk batch done");
        }

        info!(
            entity_type,
            total = report.total,
            batches = report.batches,
            successful = report.successful,
            failed = report.failed,
            "bulk sync finished"
        );
        Ok(report)
    }

    async fn run_batch(
        &self,
        entity_type: &str,
        chunk: &[String],
        targets: &[Platform],
        report: &mut BulkSyncReport,
    ) -> Result<()> {
        let mut batch: Vec<(&str, Vec<SyncOperation>)> = Vec::with_capacity(chunk.len());
        for cms_id in chunk {
            match self.hub.store().load(entity_type, cms_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    report.failed += 1;
                    report.errors.push(format!("{entity_type}/{cms_id}: not found"));
                    continue;
                }
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(format!("{entity_type}/{cms_id}: {e}"));
                    continue;
                }
            }
            let ops = targets
                .iter()
                .map(|p| {
                    SyncOperation::outbound(*p, entity_type, cms_id.as_str(), ChangeAction::Update)
                        .with_priority(BULK_PRIORITY)
                })
                .collect();
            batch.push((cms_id.as_str(), ops));
        }
        if batch.is_empty() {
            return Ok(());
        }

        let ops: Vec<SyncOperation> = batch.iter().flat_map(|(_, ops)| ops.iter().cloned()).collect();
        self.hub.queue().enqueue_claimed(&ops, &self.worker_id).await?;

        for (cms_id, ops) in batch {
            let mut ok = true;
            for op in ops {
                let platform = op.platform;
                let error = match self.settle(op).await? {
                    Settled::Done(result) if result.success => continue,
                    Settled::Done(result) => result.error.unwrap_or_else(|| "not synced".into()),
                    Settled::Released(e) | Settled::DeadLettered(e) => e,
                };
                ok = false;
                report.errors.push(format!("{platform} {entity_type}/{cms_id}: {error}"));
            }
            if ok {
                report.successful += 1;
            } else {
                report.failed += 1;
            }
        }
        Ok(())
    }

    /// Pull every resource of a type from a platform into the queue as
    /// inbound operations, in batches with the same throttle as bulk sync.
    pub async fn bulk_import(&self, platform: Platform, entity_type: &str) -> Result<BulkSyncReport> {
        let c = self
            .hub
            .coordinator(platform)
            .ok_or_else(|| SyncError::ConfigDisabled {
                platform,
                entity_type: entity_type.to_string(),
            })?;
        if !c.config.should_sync_from() || !c.config.entity_type_enabled(entity_type) {
            return Err(SyncError::ConfigDisabled {
                platform,
                entity_type: entity_type.to_string(),
            });
        }
        if !c.profile.supports(entity_type) {
            return Err(c.profile.unsupported(entity_type));
        }

        let items = self.hub.fetch_all(platform, entity_type).await?;
        let event = format!("{entity_type}/update");
        let mut report = BulkSyncReport {
            total: items.len(),
            ..Default::default()
        };

        for (index, chunk) in items.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            report.batches += 1;
            for item in chunk {
                if c.profile.external_id(entity_type, item).is_none() {
                    report.failed += 1;
                    report.errors.push(format!("{platform} {entity_type}: item without id"));
                    continue;
                }
                let op = SyncOperation::inbound(platform, entity_type, &event, item.clone())
                    .with_priority(BULK_PRIORITY);
                self.hub.queue().enqueue(&op).await?;
                report.successful += 1;
            }
        }

        info!(%platform, entity_type, total = report.total, enqueued = report.successful, "bulk import enqueued");
        Ok(report)
    }
}
