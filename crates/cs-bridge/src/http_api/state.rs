use std::sync::Arc;
use std::time::Instant;

use cs_core::db::StoreError;
use cs_core::types::QueueStats;
use cs_integrations::sync::hub::SyncHub;
use cs_integrations::sync::runner::BatchRunner;
use cs_telemetry::metrics::global_metrics;

use crate::event_bus::EventBus;

/// Shared state behind every route.
pub struct ApiState {
    pub runner: Arc<BatchRunner>,
    pub event_bus: EventBus,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(runner: Arc<BatchRunner>, event_bus: EventBus) -> Self {
        Self {
            runner,
            event_bus,
            started_at: Instant::now(),
        }
    }

    pub fn hub(&self) -> &Arc<SyncHub> {
        self.runner.hub()
    }

    /// Current queue stats, mirrored into the queue gauges.
    pub async fn queue_stats(&self) -> Result<QueueStats, StoreError> {
        let stats = self.hub().queue().stats().await?;
        global_metrics().set_queue_depth(stats.pending, stats.dead_letters);
        Ok(stats)
    }
}
