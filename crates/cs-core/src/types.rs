use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// External systems the coordinator knows how to sync with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Wordpress,
    Shopify,
    Drupal,
    Optimizely,
    Wix,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Wordpress,
        Platform::Shopify,
        Platform::Drupal,
        Platform::Optimizely,
        Platform::Wix,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Wordpress => "wordpress",
            Platform::Shopify => "shopify",
            Platform::Drupal => "drupal",
            Platform::Optimizely => "optimizely",
            Platform::Wix => "wix",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Origin tags
// ---------------------------------------------------------------------------

/// Where a mutation of the local entity store came from.
///
/// Inbound webhook processing tags its writes with `External(platform)` so
/// the change observer can skip echoing them back to the same platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "platform")]
pub enum Origin {
    Local,
    External(Platform),
}

impl Origin {
    /// True when this mutation was caused by an inbound webhook from `platform`.
    pub fn is_from(&self, platform: Platform) -> bool {
        matches!(self, Origin::External(p) if *p == platform)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => f.write_str("local"),
            Origin::External(p) => write!(f, "external:{p}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Local entities and change events
// ---------------------------------------------------------------------------

/// A CMS-side entity as seen by the sync layer: a type tag, the store's id
/// (absent before the first persist) and a flat JSON object of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmsEntity {
    pub entity_type: String,
    pub id: Option<String>,
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl CmsEntity {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
            data: serde_json::Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Overwrite fields present in `other`, leaving every other field as is.
    pub fn merge_from(&mut self, other: &serde_json::Map<String, serde_json::Value>) {
        for (k, v) in other {
            self.data.insert(k.clone(), v.clone());
        }
    }
}

/// Lifecycle action on a local entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        })
    }
}

/// Emitted by the entity store for every committed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_type: String,
    pub cms_id: String,
    pub action: ChangeAction,
    pub origin: Origin,
    pub occurred_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Identity map
// ---------------------------------------------------------------------------

/// Direction of the most recent successful sync for a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Outbound,
    Inbound,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Outbound => "outbound",
            SyncDirection::Inbound => "inbound",
        }
    }
}

/// One row of the identity map: a CMS entity paired with its external twin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMapping {
    pub cms_entity_type: String,
    pub cms_id: String,
    pub platform: Platform,
    pub external_id: String,
    pub last_synced_at: DateTime<Utc>,
    pub last_sync_direction: SyncDirection,
}

impl SyncMapping {
    pub fn new(
        platform: Platform,
        cms_entity_type: impl Into<String>,
        cms_id: impl Into<String>,
        external_id: impl Into<String>,
        direction: SyncDirection,
    ) -> Self {
        Self {
            cms_entity_type: cms_entity_type.into(),
            cms_id: cms_id.into(),
            platform,
            external_id: external_id.into(),
            last_synced_at: Utc::now(),
            last_sync_direction: direction,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Which side a queued operation writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationDirection {
    ToExternal,
    FromExternal,
}

impl OperationDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationDirection::ToExternal => "to_external",
            OperationDirection::FromExternal => "from_external",
        }
    }
}

/// Work carried by a [`SyncOperation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OperationPayload {
    /// Push a local entity outward. Without a snapshot the entity is loaded
    /// from the store when the operation runs.
    ToExternal {
        action: ChangeAction,
        cms_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<serde_json::Map<String, serde_json::Value>>,
    },
    /// Apply a platform payload locally, as if delivered by a verified webhook.
    FromExternal {
        event: String,
        body: serde_json::Value,
    },
}

/// A unit of work in the durable sync queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: Uuid,
    pub platform: Platform,
    pub direction: OperationDirection,
    pub entity_type: String,
    pub payload: OperationPayload,
    pub attempt: u32,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SyncOperation {
    pub fn outbound(
        platform: Platform,
        entity_type: impl Into<String>,
        cms_id: impl Into<String>,
        action: ChangeAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform,
            direction: OperationDirection::ToExternal,
            entity_type: entity_type.into(),
            payload: OperationPayload::ToExternal {
                action,
                cms_id: cms_id.into(),
                snapshot: None,
            },
            attempt: 0,
            priority: 0,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn inbound(
        platform: Platform,
        entity_type: impl Into<String>,
        event: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform,
            direction: OperationDirection::FromExternal,
            entity_type: entity_type.into(),
            payload: OperationPayload::FromExternal {
                event: event.into(),
                body,
            },
            attempt: 0,
            priority: 0,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_snapshot(mut self, data: serde_json::Map<String, serde_json::Value>) -> Self {
        if let OperationPayload::ToExternal { snapshot, .. } = &mut self.payload {
            *snapshot = Some(data);
        }
        self
    }
}

/// Terminal record of an operation that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub operation: SyncOperation,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Point-in-time queue health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub claimed: u64,
    pub dead_letters: u64,
}

/// Outcome of one `process_queue` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRunReport {
    pub processed: u64,
    pub errors: u64,
    pub remaining: u64,
    pub dead_lettered: u64,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What a successful sync did to the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    Deleted,
    StatusUpdated,
}

/// Outcome of a single sync attempt, returned by the dispatcher and the
/// inbound processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub platform: Platform,
    pub entity_type: String,
    pub cms_id: Option<String>,
    pub external_id: Option<String>,
    pub action: Option<SyncAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl SyncResult {
    pub fn succeeded(
        platform: Platform,
        entity_type: impl Into<String>,
        action: SyncAction,
        cms_id: Option<String>,
        external_id: Option<String>,
    ) -> Self {
        Self {
            success: true,
            platform,
            entity_type: entity_type.into(),
            cms_id,
            external_id,
            action: Some(action),
            message: None,
            error: None,
            attempts: 1,
            timestamp: Utc::now(),
        }
    }

    /// Sync was skipped because configuration turned it off. Not an error.
    pub fn disabled(platform: Platform, entity_type: impl Into<String>) -> Self {
        Self {
            success: false,
            platform,
            entity_type: entity_type.into(),
            cms_id: None,
            external_id: None,
            action: None,
            message: Some("disabled".to_string()),
            error: None,
            attempts: 0,
            timestamp: Utc::now(),
        }
    }

    /// Nothing needed doing (echo of our own write, entity already gone).
    pub fn skipped(platform: Platform, entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            platform,
            entity_type: entity_type.into(),
            cms_id: None,
            external_id: None,
            action: None,
            message: Some(message.into()),
            error: None,
            attempts: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(platform: Platform, entity_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            platform,
            entity_type: entity_type.into(),
            cms_id: None,
            external_id: None,
            action: None,
            message: None,
            error: Some(error.into()),
            attempts: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_ids(mut self, cms_id: Option<String>, external_id: Option<String>) -> Self {
        self.cms_id = cms_id;
        self.external_id = external_id;
        self
    }

    pub fn is_disabled(&self) -> bool {
        !self.success && self.error.is_none() && self.message.as_deref() == Some("disabled")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parse_is_case_insensitive() {
        assert_eq!("Shopify".parse::<Platform>().unwrap(), Platform::Shopify);
        assert_eq!(" wix ".parse::<Platform>().unwrap(), Platform::Wix);
        assert!("joomla".parse::<Platform>().is_err());
    }

    #[test]
    fn origin_display_and_matching() {
        let origin = Origin::External(Platform::Drupal);
        assert_eq!(origin.to_string(), "external:drupal");
        assert!(origin.is_from(Platform::Drupal));
        assert!(!origin.is_from(Platform::Wordpress));
        assert!(!Origin::Local.is_from(Platform::Drupal));
    }

    #[test]
    fn merge_only_touches_present_fields() {
        let mut entity = CmsEntity::new("content")
            .with_field("title", "Old")
            .with_field("body", "Keep me");
        let mut patch = serde_json::Map::new();
        patch.insert("title".into(), "New".into());
        entity.merge_from(&patch);

        assert_eq!(entity.str_field("title"), Some("New"));
        assert_eq!(entity.str_field("body"), Some("Keep me"));
    }

    #[test]
    fn operation_payload_is_tagged() {
        let op = SyncOperation::outbound(Platform::Shopify, "product", "cms-1", ChangeAction::Update);
        let json = serde_json::to_value(&op.payload).unwrap();
        assert_eq!(json["kind"], "to_external");
        assert_eq!(json["action"], "update");
        assert!(json.get("snapshot").is_none());
    }

    #[test]
    fn disabled_result_is_not_an_error() {
        let r = SyncResult::disabled(Platform::Wix, "content");
        assert!(!r.success);
        assert!(r.error.is_none());
        assert!(r.is_disabled());
    }
}
