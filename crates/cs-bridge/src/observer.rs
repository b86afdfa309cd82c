use std::time::Duration;

use cs_core::types::{SyncDirection, SyncOperation, SyncResult};
use cs_integrations::sync::SyncObserver;
use cs_telemetry::metrics::global_metrics;

use crate::event_bus::EventBus;
use crate::protocol::SyncEvent;

/// Metric label for a sync outcome.
pub fn outcome_label(result: &SyncResult) -> &'static str {
    if result.is_disabled() {
        "disabled"
    } else if !result.success {
        "failure"
    } else if result.action.is_none() {
        "skipped"
    } else {
        "success"
    }
}

/// Publishes sync outcomes on the [`EventBus`] and records them in the
/// global metrics collector.
#[derive(Clone)]
pub struct BridgeObserver {
    bus: EventBus,
}

impl BridgeObserver {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl SyncObserver for BridgeObserver {
    fn on_sync(&self, direction: SyncDirection, result: &SyncResult, elapsed: Duration) {
        global_metrics().record_sync(
            result.platform.as_str(),
            direction.as_str(),
            outcome_label(result),
            elapsed.as_secs_f64(),
        );
        self.bus.publish(SyncEvent::Synced {
            direction,
            result: result.clone(),
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    fn on_dead_letter(&self, operation: &SyncOperation, error: &str) {
        global_metrics().record_dead_letter(operation.platform.as_str());
        self.bus.publish(SyncEvent::DeadLettered {
            op_id: operation.id,
            platform: operation.platform,
            entity_type: operation.entity_type.clone(),
            attempt: operation.attempt,
            error: error.to_string(),
        });
    }
}
