//! Loop prevention.
//!
//! The origin tag on a [`ChangeEvent`] is the primary mechanism: a change
//! written by an inbound webhook from platform P is never pushed back to P,
//! though it still fans out to other platforms. Short-lived marks add a
//! second line for the opposite direction: after we push a resource to P,
//! P's webhook echoing that same write is ignored for a brief window.

use std::time::{Duration, Instant};

use cs_core::types::{ChangeEvent, Platform};
use dashmap::DashMap;
use tracing::debug;

type Key = (Platform, String, String);

pub struct LoopGuard {
    window: Duration,
    /// Local writes made by inbound processing, keyed by cms id.
    inbound: DashMap<Key, Instant>,
    /// Platform writes made by the dispatcher, keyed by external id.
    outbound: DashMap<Key, Instant>,
}

impl LoopGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inbound: DashMap::new(),
            outbound: DashMap::new(),
        }
    }

    /// Whether a local change should be pushed to `target`.
    ///
    /// Consumes any inbound mark for the entity, so only the change caused
    /// by the webhook is suppressed.
    pub fn should_dispatch(&self, event: &ChangeEvent, target: Platform) -> bool {
        let key = (target, event.entity_type.clone(), event.cms_id.clone());
        let marked = self.take_fresh(&self.inbound, &key);
        if event.origin.is_from(target) || marked {
            debug!(
                platform = %target,
                entity_type = %event.entity_type,
                cms_id = %event.cms_id,
                origin = %event.origin,
                "suppressing outbound echo"
            );
            return false;
        }
        true
    }

    /// Record that inbound processing from `platform` is writing `cms_id`.
    pub fn mark_inbound(&self, platform: Platform, entity_type: &str, cms_id: &str) {
        if !self.window.is_zero() {
            self.inbound
                .insert((platform, entity_type.to_string(), cms_id.to_string()), Instant::now());
        }
    }

    /// Record that the dispatcher just wrote `external_id` on `platform`.
    pub fn mark_outbound(&self, platform: Platform, entity_type: &str, external_id: &str) {
        if !self.window.is_zero() {
            self.outbound.insert(
                (platform, entity_type.to_string(), external_id.to_string()),
                Instant::now(),
            );
        }
    }

    /// `true` if a webhook for `external_id` is the echo of our own recent
    /// write. Consumes the mark.
    pub fn is_echo(&self, platform: Platform, entity_type: &str, external_id: &str) -> bool {
        let key = (platform, entity_type.to_string(), external_id.to_string());
        self.take_fresh(&self.outbound, &key)
    }

    /// Drop marks older than the window.
    pub fn purge_expired(&self) {
        let window = self.window;
        self.inbound.retain(|_, at| at.elapsed() < window);
        self.outbound.retain(|_, at| at.elapsed() < window);
    }

    pub fn len(&self) -> usize {
        self.inbound.len() + self.outbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_fresh(&self, marks: &DashMap<Key, Instant>, key: &Key) -> bool {
        marks
            .remove(key)
            .is_some_and(|(_, at)| at.elapsed() < self.window)
    }
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cs_core::types::{ChangeAction, Origin};

    fn event(origin: Origin) -> ChangeEvent {
        ChangeEvent {
            entity_type: "product".into(),
            cms_id: "cms-1".into(),
            action: ChangeAction::Update,
            origin,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn origin_blocks_only_the_source_platform() {
        let guard = LoopGuard::default();
        let ev = event(Origin::External(Platform::Shopify));
        assert!(!guard.should_dispatch(&ev, Platform::Shopify));
        assert!(guard.should_dispatch(&ev, Platform::Wordpress));
        assert!(guard.should_dispatch(&event(Origin::Local), Platform::Shopify));
    }

    #[test]
    fn inbound_mark_is_consumed_once() {
        let guard = LoopGuard::default();
        guard.mark_inbound(Platform::Shopify, "product", "cms-1");
        // A store that dropped the origin tag still gets suppressed once.
        assert!(!guard.should_dispatch(&event(Origin::Local), Platform::Shopify));
        assert!(guard.should_dispatch(&event(Origin::Local), Platform::Shopify));
    }

    #[test]
    fn outbound_echo_detection() {
        let guard = LoopGuard::default();
        guard.mark_outbound(Platform::Wix, "content", "ext-1");
        assert!(!guard.is_echo(Platform::Wix, "content", "ext-2"));
        assert!(guard.is_echo(Platform::Wix, "content", "ext-1"));
        assert!(!guard.is_echo(Platform::Wix, "content", "ext-1"));
    }

    #[test]
    fn zero_window_keeps_no_marks() {
        let guard = LoopGuard::new(Duration::ZERO);
        guard.mark_outbound(Platform::Wix, "content", "ext-1");
        guard.mark_inbound(Platform::Wix, "content", "cms-1");
        assert!(guard.is_empty());
    }

    #[test]
    fn expired_marks_do_not_suppress() {
        let guard = LoopGuard::new(Duration::from_millis(1));
        guard.mark_outbound(Platform::Drupal, "node", "u-1");
        std::thread::sleep(Duration::from_millis(5));
        assert!(!guard.is_echo(Platform::Drupal, "node", "u-1"));
        guard.mark_outbound(Platform::Drupal, "node", "u-2");
        std::thread::sleep(Duration::from_millis(5));
        guard.purge_expired();
        assert!(guard.is_empty());
    }
}
