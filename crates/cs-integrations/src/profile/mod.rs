//! Per-platform profiles: the Transformer pair plus the routing and webhook
//! conventions that differ between platforms.
//!
//! The coordinator is written once against [`PlatformProfile`]; a platform
//! is added by implementing the trait, never by copying sync logic.

pub mod drupal;
pub mod optimizely;
pub mod shopify;
pub mod wix;
pub mod wordpress;

use std::sync::Arc;

use cs_core::config::PlatformConfig;
use cs_core::types::{CmsEntity, Platform};
use reqwest::Method;
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::webhook::SignatureEncoding;

pub use drupal::DrupalProfile;
pub use optimizely::OptimizelyProfile;
pub use shopify::ShopifyProfile;
pub use wix::WixProfile;
pub use wordpress::WordPressProfile;

// ---------------------------------------------------------------------------
// Webhook events
// ---------------------------------------------------------------------------

/// What an inbound webhook asks the local side to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAction {
    Create,
    Update,
    Delete,
    /// Set the local `status` field to the given (local) value.
    StatusUpdate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub entity_type: String,
    pub action: WebhookAction,
}

/// Split `products/create`, `post.updated` or `node:update` into
/// `(resource, verb)`. The verb is the last segment.
pub fn split_event(event: &str) -> Option<(&str, &str)> {
    let event = event.trim().trim_matches('/');
    let idx = event.rfind(['/', '.', ':'])?;
    let (resource, verb) = (&event[..idx], &event[idx + 1..]);
    if resource.is_empty() || verb.is_empty() {
        return None;
    }
    Some((resource, verb))
}

/// Map a webhook verb onto an action. `None` for verbs we do not know.
pub fn action_for_verb(verb: &str) -> Option<WebhookAction> {
    let verb = verb.to_ascii_lowercase();
    Some(match verb.as_str() {
        "create" | "created" | "publish" | "published" => WebhookAction::Create,
        "update" | "updated" | "edit" | "edited" => WebhookAction::Update,
        "delete" | "deleted" | "trash" | "trashed" | "remove" | "removed" => WebhookAction::Delete,
        "paid" => WebhookAction::StatusUpdate("paid".into()),
        "fulfilled" => WebhookAction::StatusUpdate("fulfilled".into()),
        "cancelled" => WebhookAction::StatusUpdate("cancelled".into()),
        "unpublished" => WebhookAction::StatusUpdate("draft".into()),
        "archived" => WebhookAction::StatusUpdate("archived".into()),
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Status vocabularies
// ---------------------------------------------------------------------------

/// Bijective mapping between local and platform status values. Values
/// outside the table pass through unchanged in both directions.
#[derive(Debug, Clone, Copy)]
pub struct StatusMap(pub &'static [(&'static str, &'static str)]);

impl StatusMap {
    pub fn to_external<'a>(&self, local: &'a str) -> &'a str {
        self.0
            .iter()
            .find(|(l, _)| *l == local)
            .map(|(_, e)| *e)
            .unwrap_or(local)
    }

    pub fn to_local<'a>(&self, external: &'a str) -> &'a str {
        self.0
            .iter()
            .find(|(_, e)| e.eq_ignore_ascii_case(external))
            .map(|(l, _)| *l)
            .unwrap_or(external)
    }
}

// ---------------------------------------------------------------------------
// PlatformProfile
// ---------------------------------------------------------------------------

pub trait PlatformProfile: Send + Sync {
    fn platform(&self) -> Platform;

    /// CMS entity types this platform can sync.
    fn entity_types(&self) -> &'static [&'static str];

    fn supports(&self, entity_type: &str) -> bool {
        self.entity_types().contains(&entity_type)
    }

    /// Collection path (POST target) for an entity type.
    fn collection_path(&self, entity_type: &str) -> Result<String>;

    /// Item path (update/delete target).
    fn item_path(&self, entity_type: &str, external_id: &str) -> Result<String> {
        Ok(format!("{}/{}", self.collection_path(entity_type)?, external_id))
    }

    fn delete_path(&self, entity_type: &str, external_id: &str) -> Result<String> {
        self.item_path(entity_type, external_id)
    }

    fn update_method(&self) -> Method {
        Method::PUT
    }

    /// Request listing every resource of a type, used by bulk import.
    fn list_request(&self, entity_type: &str) -> Result<(Method, String, Option<Value>)> {
        Ok((Method::GET, self.collection_path(entity_type)?, None))
    }

    /// Extract the individual resources from a list response.
    fn list_items(&self, entity_type: &str, response: &Value) -> Vec<Value>;

    /// Media type of request bodies.
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    /// CMS entity → platform payload.
    fn to_external(&self, entity: &CmsEntity) -> Result<Value>;

    /// Platform payload (webhook body, API response or list item) → CMS
    /// fields. Unknown fields are dropped.
    fn to_local(&self, entity_type: &str, payload: &Value) -> Result<Map<String, Value>>;

    /// Add the external id to an update body, for APIs that require it.
    fn with_external_id(&self, _entity_type: &str, body: Value, _external_id: &str) -> Value {
        body
    }

    /// The platform's id for the resource in a payload or API response.
    fn external_id(&self, entity_type: &str, payload: &Value) -> Option<String>;

    fn signature_header(&self) -> &'static str;

    fn signature_encoding(&self) -> SignatureEncoding;

    /// Header carrying the event name when it is not in the URL.
    fn event_header(&self) -> &'static str;

    /// Map the resource segment of an event name onto a CMS entity type.
    fn entity_type_for_resource(&self, resource: &str) -> Option<&'static str>;

    /// Parse an event name into entity type and action.
    fn parse_event(&self, event: &str) -> Result<WebhookEvent> {
        let (resource, verb) =
            split_event(event).ok_or_else(|| SyncError::UnknownAction(event.to_string()))?;
        let action = action_for_verb(verb).ok_or_else(|| SyncError::UnknownAction(event.to_string()))?;
        let entity_type = self
            .entity_type_for_resource(&resource.to_ascii_lowercase())
            .ok_or_else(|| SyncError::UnsupportedEntityType {
                platform: self.platform(),
                entity_type: resource.to_string(),
            })?;
        Ok(WebhookEvent {
            entity_type: entity_type.to_string(),
            action,
        })
    }

    fn unsupported(&self, entity_type: &str) -> SyncError {
        SyncError::UnsupportedEntityType {
            platform: self.platform(),
            entity_type: entity_type.to_string(),
        }
    }
}

/// Build the profile for a configured platform.
pub fn profile_for(config: &PlatformConfig) -> Arc<dyn PlatformProfile> {
    match config.platform {
        Platform::Wordpress => Arc::new(WordPressProfile::from_config(config)),
        Platform::Shopify => Arc::new(ShopifyProfile::from_config(config)),
        Platform::Drupal => Arc::new(DrupalProfile::from_config(config)),
        Platform::Optimizely => Arc::new(OptimizelyProfile::from_config(config)),
        Platform::Wix => Arc::new(WixProfile::from_config(config)),
    }
}

// ---------------------------------------------------------------------------
// Payload helpers shared by the profiles
// ---------------------------------------------------------------------------

/// Text of a field that may be a plain string or an object wrapping one
/// (`{"rendered": ..}`, `{"raw": ..}`, `{"value": ..}`).
pub(crate) fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => ["raw", "rendered", "value"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        // Drupal field lists: [{"value": ..}].
        Value::Array(items) => text(items.first()),
        _ => None,
    }
}

/// Platform ids arrive as numbers or strings; the identity map stores strings.
pub(crate) fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The payload as an object, or `InvalidPayload`.
pub(crate) fn object<'a>(payload: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    payload
        .as_object()
        .ok_or_else(|| SyncError::InvalidPayload(format!("{what} payload must be a JSON object")))
}

/// Copy a local field into `out` under `key` when present and not null.
pub(crate) fn put(out: &mut Map<String, Value>, key: &str, value: Option<&Value>) {
    if let Some(v) = value.filter(|v| !v.is_null()) {
        out.insert(key.to_string(), v.clone());
    }
}

pub(crate) fn put_text(out: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(v) = value {
        out.insert(key.to_string(), Value::String(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_event_handles_all_separators() {
        assert_eq!(split_event("products/create"), Some(("products", "create")));
        assert_eq!(split_event("post.updated"), Some(("post", "updated")));
        assert_eq!(split_event("node:update"), Some(("node", "update")));
        assert_eq!(split_event("/orders/paid/"), Some(("orders", "paid")));
        assert_eq!(split_event("nothing"), None);
        assert_eq!(split_event("products/"), None);
    }

    #[test]
    fn verbs_map_to_actions() {
        assert_eq!(action_for_verb("Published"), Some(WebhookAction::Create));
        assert_eq!(action_for_verb("edited"), Some(WebhookAction::Update));
        assert_eq!(action_for_verb("trashed"), Some(WebhookAction::Delete));
        assert_eq!(
            action_for_verb("paid"),
            Some(WebhookAction::StatusUpdate("paid".into()))
        );
        assert_eq!(action_for_verb("exploded"), None);
    }

    #[test]
    fn status_map_passes_unknowns_through() {
        let map = StatusMap(&[("published", "publish"), ("draft", "draft")]);
        assert_eq!(map.to_external("published"), "publish");
        assert_eq!(map.to_local("publish"), "published");
        assert_eq!(map.to_external("embargoed"), "embargoed");
        assert_eq!(map.to_local("embargoed"), "embargoed");
    }

    #[test]
    fn text_unwraps_rendered_fields() {
        let v = serde_json::json!({"rendered": "<p>Hi</p>"});
        assert_eq!(text(Some(&v)).as_deref(), Some("<p>Hi</p>"));
        assert_eq!(text(Some(&Value::Null)), None);
        assert_eq!(id_string(Some(&serde_json::json!(42))).as_deref(), Some("42"));
    }
}
