//! Wix Data API v2. Every request names the data collection.

use cs_core::config::PlatformConfig;
use cs_core::types::{CmsEntity, Platform};
use reqwest::Method;
use serde_json::{json, Map, Value};

use super::{id_string, object, put, put_text, text, PlatformProfile, StatusMap};
use crate::error::Result;
use crate::webhook::SignatureEncoding;

const STATUS: StatusMap = StatusMap(&[("published", "PUBLISHED"), ("draft", "DRAFT")]);

const ITEMS: &str = "/wix-data/v2/items";

pub struct WixProfile {
    collection_id: String,
}

impl WixProfile {
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        Self::new(config.option("collection_id").unwrap_or("Content"))
    }

    /// The item's field object, from an API response, an event body or a bare item.
    fn item_data(payload: &Value) -> &Value {
        let item = payload
            .get("dataItem")
            .or_else(|| payload.get("entity"))
            .unwrap_or(payload);
        item.get("data").filter(|d| d.is_object()).unwrap_or(item)
    }

    fn check(&self, entity_type: &str) -> Result<()> {
        if entity_type == "content" {
            Ok(())
        } else {
            Err(self.unsupported(entity_type))
        }
    }
}

impl PlatformProfile for WixProfile {
    fn platform(&self) -> Platform {
        Platform::Wix
    }

    fn entity_types(&self) -> &'static [&'static str] {
        &["content"]
    }

    fn collection_path(&self, entity_type: &str) -> Result<String> {
        self.check(entity_type)?;
        Ok(ITEMS.to_string())
    }

    fn delete_path(&self, entity_type: &str, external_id: &str) -> Result<String> {
        self.check(entity_type)?;
        Ok(format!("{ITEMS}/{external_id}?dataCollectionId={}", self.collection_id))
    }

    fn list_request(&self, entity_type: &str) -> Result<(Method, String, Option<Value>)> {
        self.check(entity_type)?;
        Ok((
            Method::POST,
            format!("{ITEMS}/query"),
            Some(json!({ "dataCollectionId": self.collection_id })),
        ))
    }

    fn list_items(&self, _entity_type: &str, response: &Value) -> Vec<Value> {
        response
            .get("dataItems")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    fn to_external(&self, entity: &CmsEntity) -> Result<Value> {
        self.check(&entity.entity_type)?;
        let d = &entity.data;
        let mut data = Map::new();
        put(&mut data, "title", d.get("title"));
        put(&mut data, "content", d.get("body"));
        put(&mut data, "slug", d.get("slug"));
        if let Some(status) = entity.str_field("status") {
            data.insert("status".into(), STATUS.to_external(status).into());
        }
        Ok(json!({
            "dataCollectionId": self.collection_id,
            "dataItem": { "data": data },
        }))
    }

    fn to_local(&self, entity_type: &str, payload: &Value) -> Result<Map<String, Value>> {
        self.check(entity_type)?;
        let d = object(Self::item_data(payload), "Wix")?;
        let mut out = Map::new();
        put_text(&mut out, "title", text(d.get("title")));
        put_text(&mut out, "body", text(d.get("content")));
        put_text(&mut out, "slug", text(d.get("slug")));
        if let Some(status) = d.get("status").and_then(Value::as_str) {
            out.insert("status".into(), STATUS.to_local(status).into());
        }
        Ok(out)
    }

    fn with_external_id(&self, _entity_type: &str, mut body: Value, external_id: &str) -> Value {
        if let Some(item) = body.get_mut("dataItem").and_then(Value::as_object_mut) {
            item.insert("id".into(), Value::String(external_id.to_string()));
        }
        body
    }

    fn external_id(&self, _entity_type: &str, payload: &Value) -> Option<String> {
        let item = payload
            .get("dataItem")
            .or_else(|| payload.get("entity"))
            .unwrap_or(payload);
        ["id", "_id"]
            .iter()
            .find_map(|k| id_string(item.get(*k)))
            .or_else(|| id_string(item.get("data").and_then(|d| d.get("_id"))))
            .or_else(|| id_string(payload.get("entityId")))
    }

    fn signature_header(&self) -> &'static str {
        "x-wix-signature"
    }

    fn signature_encoding(&self) -> SignatureEncoding {
        SignatureEncoding::Hex
    }

    fn event_header(&self) -> &'static str {
        "x-wix-event"
    }

    fn entity_type_for_resource(&self, resource: &str) -> Option<&'static str> {
        match resource {
            "item" | "items" | "data_item" | "content" => Some("content"),
            _ => None,
        }
    }
}
