//! WordPress REST API (`wp/v2`).

use cs_core::config::PlatformConfig;
use cs_core::types::{CmsEntity, Platform};
use serde_json::{Map, Value};

use super::{id_string, object, put, put_text, text, PlatformProfile, StatusMap};
use crate::error::Result;
use crate::webhook::SignatureEncoding;

const STATUS: StatusMap = StatusMap(&[
    ("published", "publish"),
    ("draft", "draft"),
    ("pending_review", "pending"),
    ("scheduled", "future"),
    ("private", "private"),
]);

/// Wrapper keys some webhook plugins put around the resource.
const ENVELOPES: [&str; 4] = ["post", "page", "user", "term"];

pub struct WordPressProfile {
    api_prefix: String,
}

impl WordPressProfile {
    pub fn new() -> Self {
        Self {
            api_prefix: "/wp-json/wp/v2".to_string(),
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        let mut profile = Self::new();
        if let Some(prefix) = config.option("api_prefix") {
            profile.api_prefix = prefix.trim_end_matches('/').to_string();
        }
        profile
    }

    fn resource(entity_type: &str) -> Option<&'static str> {
        match entity_type {
            "content" => Some("posts"),
            "page" => Some("pages"),
            "user" => Some("users"),
            "taxonomy_term" => Some("categories"),
            _ => None,
        }
    }

    fn unwrap<'a>(payload: &'a Value) -> &'a Value {
        ENVELOPES
            .iter()
            .find_map(|k| payload.get(*k).filter(|v| v.is_object()))
            .unwrap_or(payload)
    }
}

impl Default for WordPressProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformProfile for WordPressProfile {
    fn platform(&self) -> Platform {
        Platform::Wordpress
    }

    fn entity_types(&self) -> &'static [&'static str] {
        &["content", "page", "user", "taxonomy_term"]
    }

    fn collection_path(&self, entity_type: &str) -> Result<String> {
        let resource = Self::resource(entity_type).ok_or_else(|| self.unsupported(entity_type))?;
        Ok(format!("{}/{resource}", self.api_prefix))
    }

    fn delete_path(&self, entity_type: &str, external_id: &str) -> Result<String> {
        // Without force=true posts only move to the trash; users need a reassign target.
        let base = self.item_path(entity_type, external_id)?;
        Ok(match entity_type {
            "user" => format!("{base}?force=true&reassign=1"),
            _ => format!("{base}?force=true"),
        })
    }

    fn list_items(&self, _entity_type: &str, response: &Value) -> Vec<Value> {
        response.as_array().cloned().unwrap_or_default()
    }

    fn to_external(&self, entity: &CmsEntity) -> Result<Value> {
        let d = &entity.data;
        let mut out = Map::new();
        match entity.entity_type.as_str() {
            "content" | "page" => {
                put(&mut out, "title", d.get("title"));
                put(&mut out, "content", d.get("body"));
                put(&mut out, "excerpt", d.get("excerpt"));
                put(&mut out, "slug", d.get("slug"));
                if let Some(status) = entity.str_field("status") {
                    out.insert("status".into(), STATUS.to_external(status).into());
                }
            }
            "user" => {
                put(&mut out, "name", d.get("name"));
                put(&mut out, "email", d.get("email"));
                put(&mut out, "username", d.get("username"));
                put(&mut out, "description", d.get("body"));
            }
            "taxonomy_term" => {
                put(&mut out, "name", d.get("name"));
                put(&mut out, "slug", d.get("slug"));
                put(&mut out, "description", d.get("body"));
            }
            other => return Err(self.unsupported(other)),
        }
        Ok(Value::Object(out))
    }

    fn to_local(&self, entity_type: &str, payload: &Value) -> Result<Map<String, Value>> {
        let p = object(Self::unwrap(payload), "WordPress")?;
        let mut out = Map::new();
        match entity_type {
            "content" | "page" => {
                put_text(&mut out, "title", text(p.get("title")));
                put_text(&mut out, "body", text(p.get("content")));
                put_text(&mut out, "excerpt", text(p.get("excerpt")));
                put_text(&mut out, "slug", text(p.get("slug")));
                if let Some(status) = p.get("status").and_then(Value::as_str) {
                    out.insert("status".into(), STATUS.to_local(status).into());
                }
            }
            "user" => {
                put_text(&mut out, "name", text(p.get("name")));
                put_text(&mut out, "email", text(p.get("email")));
                put_text(&mut out, "username", text(p.get("username").or_else(|| p.get("slug"))));
                put_text(&mut out, "body", text(p.get("description")));
            }
            "taxonomy_term" => {
                put_text(&mut out, "name", text(p.get("name")));
                put_text(&mut out, "slug", text(p.get("slug")));
                put_text(&mut out, "body", text(p.get("description")));
            }
            other => return Err(self.unsupported(other)),
        }
        Ok(out)
    }

    fn external_id(&self, _entity_type: &str, payload: &Value) -> Option<String> {
        let p = Self::unwrap(payload);
        ["id", "ID", "post_id"].iter().find_map(|k| id_string(p.get(*k)))
    }

    fn signature_header(&self) -> &'static str {
        "x-wp-webhook-signature"
    }

    fn signature_encoding(&self) -> SignatureEncoding {
        SignatureEncoding::Base64
    }

    fn event_header(&self) -> &'static str {
        "x-wp-webhook-topic"
    }

    fn entity_type_for_resource(&self, resource: &str) -> Option<&'static str> {
        match resource {
            "post" | "posts" | "content" => Some("content"),
            "page" | "pages" => Some("page"),
            "user" | "users" => Some("user"),
            "category" | "categories" | "term" | "taxonomy_term" => Some("taxonomy_term"),
            _ => None,
        }
    }
}
