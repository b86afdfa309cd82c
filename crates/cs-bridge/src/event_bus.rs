use std::sync::{Arc, Mutex, MutexGuard};

use crate::protocol::SyncEvent;

/// Fan-out bus over flume channels.
///
/// Every [`subscribe`](EventBus::subscribe) call gets its own unbounded
/// receiver that sees all events published afterwards. Subscribers whose
/// receiver was dropped are pruned on the next publish.
#[derive(Clone, Default)]
pub struct EventBus {
    senders: Arc<Mutex<Vec<flume::Sender<SyncEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn senders(&self) -> MutexGuard<'_, Vec<flume::Sender<SyncEvent>>> {
        self.senders.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn subscribe(&self) -> flume::Receiver<SyncEvent> {
        let (tx, rx) = flume::unbounded();
        self.senders().push(tx);
        rx
    }

    pub fn publish(&self, event: SyncEvent) {
        self.senders().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_core::types::Platform;

    fn webhook(status: u16) -> SyncEvent {
        SyncEvent::WebhookReceived {
            platform: Platform::Wix,
            event: "item.updated".into(),
            status,
        }
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(webhook(200));
        bus.publish(webhook(401));
        assert_eq!(a.drain().count(), 2);
        assert_eq!(b.drain().count(), 2);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish(webhook(200));
        assert_eq!(bus.subscriber_count(), 1);
        assert!(keep.try_recv().is_ok());
    }
}
