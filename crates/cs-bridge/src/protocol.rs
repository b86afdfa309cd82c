use cs_core::types::{Platform, QueueRunReport, SyncDirection, SyncResult};
use cs_integrations::sync::runner::BulkSyncReport;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events published on the bus and streamed to operators over SSE.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum SyncEvent {
    Synced {
        direction: SyncDirection,
        result: SyncResult,
        elapsed_ms: u64,
    },
    DeadLettered {
        op_id: Uuid,
        platform: Platform,
        entity_type: String,
        attempt: u32,
        error: String,
    },
    WebhookReceived {
        platform: Platform,
        event: String,
        status: u16,
    },
    QueueProcessed(QueueRunReport),
    BulkFinished {
        entity_type: String,
        platform: Option<Platform>,
        report: BulkSyncReport,
    },
}

impl SyncEvent {
    /// SSE `event:` field.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Synced { .. } => "synced",
            SyncEvent::DeadLettered { .. } => "dead_lettered",
            SyncEvent::WebhookReceived { .. } => "webhook_received",
            SyncEvent::QueueProcessed(_) => "queue_processed",
            SyncEvent::BulkFinished { .. } => "bulk_finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_wire_format() {
        let ev = SyncEvent::WebhookReceived {
            platform: Platform::Shopify,
            event: "products/create".into(),
            status: 200,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "webhook_received");
        assert_eq!(v["payload"]["platform"], "shopify");
        assert_eq!(ev.kind(), "webhook_received");

        let report = SyncEvent::QueueProcessed(QueueRunReport {
            processed: 3,
            ..Default::default()
        });
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["payload"]["processed"], 3);
    }
}
