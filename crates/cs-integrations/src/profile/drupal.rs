//! Drupal JSON:API.
//!
//! Resources are addressed by UUID. Webhook bodies arrive either as JSON:API
//! documents (`{"data": {"id", "attributes"}}`) or as flat entity
//! serializations with a `uuid` field; both are accepted.

use cs_core::config::PlatformConfig;
use cs_core::types::{CmsEntity, Platform};
use reqwest::Method;
use serde_json::{json, Map, Value};

use super::{id_string, object, put, put_text, text, PlatformProfile, StatusMap};
use crate::error::Result;
use crate::webhook::SignatureEncoding;

const MODERATION: StatusMap = StatusMap(&[
    ("published", "published"),
    ("draft", "draft"),
    ("pending_review", "review"),
    ("archived", "archived"),
]);

pub struct DrupalProfile {
    bundle: String,
    vocabulary: String,
    /// Send `moderation_state` (sites with Content Moderation enabled).
    moderation: bool,
}

impl DrupalProfile {
    pub fn new(bundle: impl Into<String>, vocabulary: impl Into<String>) -> Self {
        Self {
            bundle: bundle.into(),
            vocabulary: vocabulary.into(),
            moderation: false,
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        let mut profile = Self::new(
            config.option("bundle").unwrap_or("article"),
            config.option("vocabulary").unwrap_or("tags"),
        );
        profile.moderation = config.option("content_moderation") == Some("true");
        profile
    }

    pub fn with_moderation(mut self, enabled: bool) -> Self {
        self.moderation = enabled;
        self
    }

    /// JSON:API resource type, e.g. `node--article`.
    fn resource_type(&self, entity_type: &str) -> Option<String> {
        match entity_type {
            "node" => Some(format!("node--{}", self.bundle)),
            "user" => Some("user--user".to_string()),
            "taxonomy_term" => Some(format!("taxonomy_term--{}", self.vocabulary)),
            _ => None,
        }
    }

    /// The attribute object of a JSON:API document or a flat entity.
    fn attributes(payload: &Value) -> &Value {
        let resource = payload.get("data").filter(|d| d.is_object()).unwrap_or(payload);
        resource
            .get("attributes")
            .filter(|a| a.is_object())
            .unwrap_or(resource)
    }

    fn published(value: Option<&Value>) -> Option<bool> {
        match value? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            Value::String(s) => Some(s == "1" || s.eq_ignore_ascii_case("true")),
            // Flat serializations wrap scalars: [{"value": true}].
            Value::Array(items) => Self::published(items.first().and_then(|i| i.get("value"))),
            _ => None,
        }
    }
}

impl PlatformProfile for DrupalProfile {
    fn platform(&self) -> Platform {
        Platform::Drupal
    }

    fn entity_types(&self) -> &'static [&'static str] {
        &["node", "user", "taxonomy_term"]
    }

    fn collection_path(&self, entity_type: &str) -> Result<String> {
        let resource = self
            .resource_type(entity_type)
            .ok_or_else(|| self.unsupported(entity_type))?;
        Ok(format!("/jsonapi/{}", resource.replace("--", "/")))
    }

    fn update_method(&self) -> Method {
        Method::PATCH
    }

    fn content_type(&self) -> &'static str {
        "application/vnd.api+json"
    }

    fn list_items(&self, _entity_type: &str, response: &Value) -> Vec<Value> {
        response
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    fn to_external(&self, entity: &CmsEntity) -> Result<Value> {
        let resource = self
            .resource_type(&entity.entity_type)
            .ok_or_else(|| self.unsupported(&entity.entity_type))?;
        let d = &entity.data;
        let mut attrs = Map::new();
        match entity.entity_type.as_str() {
            "node" => {
                put(&mut attrs, "title", d.get("title"));
                if let Some(body) = d.get("body").filter(|v| !v.is_null()) {
                    attrs.insert("body".into(), json!({ "value": body, "format": "basic_html" }));
                }
                if let Some(status) = entity.str_field("status") {
                    attrs.insert("status".into(), Value::Bool(status == "published"));
                    if self.moderation {
                        attrs.insert("moderation_state".into(), MODERATION.to_external(status).into());
                    }
                }
            }
            "user" => {
                put(&mut attrs, "name", d.get("name"));
                put(&mut attrs, "mail", d.get("email"));
                if let Some(status) = entity.str_field("status") {
                    attrs.insert("status".into(), Value::Bool(status != "blocked"));
                }
            }
            _ => {
                put(&mut attrs, "name", d.get("name"));
                if let Some(body) = d.get("body").filter(|v| !v.is_null()) {
                    attrs.insert("description".into(), json!({ "value": body }));
                }
            }
        }
        Ok(json!({ "data": { "type": resource, "attributes": attrs } }))
    }

    fn to_local(&self, entity_type: &str, payload: &Value) -> Result<Map<String, Value>> {
        let a = object(Self::attributes(payload), "Drupal")?;
        let mut out = Map::new();
        match entity_type {
            "node" => {
                put_text(&mut out, "title", text(a.get("title")));
                put_text(&mut out, "body", text(a.get("body")));
                let status = match a.get("moderation_state").and_then(Value::as_str) {
                    Some(state) => Some(MODERATION.to_local(state).to_string()),
                    None => Self::published(a.get("status"))
                        .map(|p| if p { "published" } else { "draft" }.to_string()),
                };
                put_text(&mut out, "status", status);
            }
            "user" => {
                put_text(&mut out, "name", text(a.get("name")));
                put_text(&mut out, "email", text(a.get("mail")));
                let status = Self::published(a.get("status"))
                    .map(|active| if active { "active" } else { "blocked" }.to_string());
                put_text(&mut out, "status", status);
            }
            "taxonomy_term" => {
                put_text(&mut out, "name", text(a.get("name")));
                put_text(&mut out, "body", text(a.get("description")));
            }
            other => return Err(self.unsupported(other)),
        }
        Ok(out)
    }

    fn with_external_id(&self, _entity_type: &str, mut body: Value, external_id: &str) -> Value {
        if let Some(data) = body.get_mut("data").and_then(Value::as_object_mut) {
            data.insert("id".into(), Value::String(external_id.to_string()));
        }
        body
    }

    fn external_id(&self, _entity_type: &str, payload: &Value) -> Option<String> {
        if let Some(id) = payload.get("data").and_then(|d| id_string(d.get("id"))) {
            return Some(id);
        }
        ["uuid", "id"].iter().find_map(|k| match payload.get(*k) {
            // Flat serializations: [{"value": "..."}].
            Some(Value::Array(items)) => id_string(items.first().and_then(|i| i.get("value"))),
            other => id_string(other),
        })
    }

    fn signature_header(&self) -> &'static str {
        "x-drupal-signature"
    }

    fn signature_encoding(&self) -> SignatureEncoding {
        SignatureEncoding::Hex
    }

    fn event_header(&self) -> &'static str {
        "x-drupal-event"
    }

    fn entity_type_for_resource(&self, resource: &str) -> Option<&'static str> {
        match resource {
            "node" | "content" => Some("node"),
            "user" => Some("user"),
            "taxonomy_term" | "term" => Some("taxonomy_term"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_document_shape() {
        let p = DrupalProfile::new("page", "tags");
        let entity = CmsEntity::new("node")
            .with_field("title", "About")
            .with_field("body", "<p>Us</p>")
            .with_field("status", "draft");
        let out = p.to_external(&entity).unwrap();
        assert_eq!(out["data"]["type"], "node--page");
        assert_eq!(out["data"]["attributes"]["body"]["value"], "<p>Us</p>");
        assert_eq!(out["data"]["attributes"]["status"], false);
        assert!(out["data"]["attributes"].get("moderation_state").is_none());

        let patched = p.with_external_id("node", out, "9f1c");
        assert_eq!(patched["data"]["id"], "9f1c");
        assert_eq!(p.collection_path("node").unwrap(), "/jsonapi/node/page");
        assert_eq!(p.update_method(), Method::PATCH);
    }

    #[test]
    fn moderation_state_wins_over_status_flag() {
        let p = DrupalProfile::new("article", "tags").with_moderation(true);
        let doc = json!({"data": {"id": "u-1", "attributes": {
            "title": "T", "status": false, "moderation_state": "review"
        }}});
        let local = p.to_local("node", &doc).unwrap();
        assert_eq!(local["status"], "pending_review");
        assert_eq!(p.external_id("node", &doc).as_deref(), Some("u-1"));
    }

    #[test]
    fn flat_serialization_is_accepted() {
        let p = DrupalProfile::new("article", "tags");
        let flat = json!({
            "uuid": [{"value": "abc-123"}],
            "title": "Flat",
            "status": [{"value": true}],
        });
        let local = p.to_local("node", &flat).unwrap();
        assert_eq!(local["status"], "published");
        assert_eq!(p.external_id("node", &flat).as_deref(), Some("abc-123"));
        assert_eq!(p.parse_event("node:update").unwrap().entity_type, "node");
    }
}
