//! Optimizely Content Management API.

use cs_core::config::PlatformConfig;
use cs_core::types::{CmsEntity, Platform};
use serde_json::{json, Map, Value};

use super::{id_string, object, put, put_text, text, PlatformProfile, StatusMap};
use crate::error::Result;
use crate::webhook::SignatureEncoding;

const STATUS: StatusMap = StatusMap(&[
    ("published", "Published"),
    ("draft", "CheckedOut"),
    ("pending_review", "AwaitingApproval"),
    ("scheduled", "DelayedPublish"),
    ("rejected", "Rejected"),
]);

const MANAGEMENT: &str = "/api/episerver/v3.0/contentmanagement";

pub struct OptimizelyProfile {
    content_type: String,
    language: String,
    parent_id: Option<String>,
}

impl OptimizelyProfile {
    pub fn new(content_type: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            language: language.into(),
            parent_id: None,
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        let mut profile = Self::new(
            config.option("content_type").unwrap_or("ArticlePage"),
            config.option("language").unwrap_or("en"),
        );
        profile.parent_id = config.option("parent_id").map(str::to_string);
        profile
    }
}

impl PlatformProfile for OptimizelyProfile {
    fn platform(&self) -> Platform {
        Platform::Optimizely
    }

    fn entity_types(&self) -> &'static [&'static str] {
        &["content"]
    }

    fn collection_path(&self, entity_type: &str) -> Result<String> {
        if entity_type != "content" {
            return Err(self.unsupported(entity_type));
        }
        Ok(MANAGEMENT.to_string())
    }

    fn list_request(&self, entity_type: &str) -> Result<(reqwest::Method, String, Option<Value>)> {
        if entity_type != "content" {
            return Err(self.unsupported(entity_type));
        }
        // The management API has no listing; children of the parent come
        // from the delivery API.
        let parent = self.parent_id.as_deref().unwrap_or("1");
        Ok((
            reqwest::Method::GET,
            format!("/api/episerver/v3.0/content/{parent}/children"),
            None,
        ))
    }

    fn list_items(&self, _entity_type: &str, response: &Value) -> Vec<Value> {
        response
            .as_array()
            .or_else(|| response.get("items").and_then(Value::as_array))
            .cloned()
            .unwrap_or_default()
    }

    fn to_external(&self, entity: &CmsEntity) -> Result<Value> {
        if entity.entity_type != "content" {
            return Err(self.unsupported(&entity.entity_type));
        }
        let d = &entity.data;
        let mut out = Map::new();
        put(&mut out, "name", d.get("title"));
        put(&mut out, "mainBody", d.get("body"));
        put(&mut out, "routeSegment", d.get("slug"));
        if let Some(status) = entity.str_field("status") {
            out.insert("status".into(), STATUS.to_external(status).into());
        }
        out.insert("contentType".into(), json!([self.content_type]));
        out.insert("language".into(), json!({ "name": self.language }));
        if let Some(parent) = &self.parent_id {
            out.insert("parentLink".into(), json!({ "id": parent }));
        }
        Ok(Value::Object(out))
    }

    fn to_local(&self, entity_type: &str, payload: &Value) -> Result<Map<String, Value>> {
        if entity_type != "content" {
            return Err(self.unsupported(entity_type));
        }
        let p = object(payload.get("content").unwrap_or(payload), "Optimizely")?;
        let mut out = Map::new();
        put_text(&mut out, "title", text(p.get("name")));
        put_text(&mut out, "body", text(p.get("mainBody")));
        put_text(&mut out, "slug", text(p.get("routeSegment")));
        if let Some(status) = p.get("status").and_then(Value::as_str) {
            out.insert("status".into(), STATUS.to_local(status).into());
        }
        Ok(out)
    }

    fn external_id(&self, _entity_type: &str, payload: &Value) -> Option<String> {
        let p = payload.get("content").unwrap_or(payload);
        p.get("contentLink")
            .and_then(|link| id_string(link.get("guidValue")))
            .or_else(|| ["contentGuid", "guid", "id"].iter().find_map(|k| id_string(p.get(*k))))
    }

    fn signature_header(&self) -> &'static str {
        "x-optimizely-signature"
    }

    fn signature_encoding(&self) -> SignatureEncoding {
        SignatureEncoding::Hex
    }

    fn event_header(&self) -> &'static str {
        "x-optimizely-event"
    }

    fn entity_type_for_resource(&self, resource: &str) -> Option<&'static str> {
        match resource {
            "content" | "page" | "block" => Some("content"),
            _ => None,
        }
    }
}
