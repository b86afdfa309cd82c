//! Shopify Admin REST API.

use cs_core::config::PlatformConfig;
use cs_core::types::{CmsEntity, Platform};
use serde_json::{json, Map, Value};

use super::{id_string, object, put, put_text, text, PlatformProfile, StatusMap};
use crate::error::Result;
use crate::webhook::SignatureEncoding;

const PRODUCT_STATUS: StatusMap = StatusMap(&[
    ("published", "active"),
    ("draft", "draft"),
    ("archived", "archived"),
]);

const CUSTOMER_STATUS: StatusMap = StatusMap(&[
    ("active", "enabled"),
    ("inactive", "disabled"),
    ("invited", "invited"),
]);

pub struct ShopifyProfile {
    api_version: String,
}

impl ShopifyProfile {
    pub fn new(api_version: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        Self::new(config.option("api_version").unwrap_or("2024-01"))
    }

    /// Singular envelope key and plural path segment.
    fn names(entity_type: &str) -> Option<(&'static str, &'static str)> {
        match entity_type {
            "product" => Some(("product", "products")),
            "order" => Some(("order", "orders")),
            "customer" => Some(("customer", "customers")),
            _ => None,
        }
    }

    /// Admin API responses wrap the resource (`{"product": {..}}`), webhooks do not.
    fn unwrap<'a>(entity_type: &str, payload: &'a Value) -> &'a Value {
        Self::names(entity_type)
            .and_then(|(singular, _)| payload.get(singular))
            .filter(|v| v.is_object())
            .unwrap_or(payload)
    }
}

impl PlatformProfile for ShopifyProfile {
    fn platform(&self) -> Platform {
        Platform::Shopify
    }

    fn entity_types(&self) -> &'static [&'static str] {
        &["product", "order", "customer"]
    }

    fn collection_path(&self, entity_type: &str) -> Result<String> {
        let (_, plural) = Self::names(entity_type).ok_or_else(|| self.unsupported(entity_type))?;
        Ok(format!("/admin/api/{}/{plural}.json", self.api_version))
    }

    fn item_path(&self, entity_type: &str, external_id: &str) -> Result<String> {
        let (_, plural) = Self::names(entity_type).ok_or_else(|| self.unsupported(entity_type))?;
        Ok(format!("/admin/api/{}/{plural}/{external_id}.json", self.api_version))
    }

    fn list_items(&self, entity_type: &str, response: &Value) -> Vec<Value> {
        Self::names(entity_type)
            .and_then(|(_, plural)| response.get(plural))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    fn to_external(&self, entity: &CmsEntity) -> Result<Value> {
        let d = &entity.data;
        let mut out = Map::new();
        let singular = match entity.entity_type.as_str() {
            "product" => {
                put(&mut out, "title", d.get("title"));
                put(&mut out, "body_html", d.get("body"));
                put(&mut out, "handle", d.get("slug"));
                put(&mut out, "vendor", d.get("vendor"));
                put(&mut out, "product_type", d.get("product_type"));
                if let Some(status) = entity.str_field("status") {
                    out.insert("status".into(), PRODUCT_STATUS.to_external(status).into());
                }
                if let Some(price) = d.get("price").filter(|v| !v.is_null()) {
                    out.insert("variants".into(), json!([{ "price": price }]));
                }
                "product"
            }
            "order" => {
                put(&mut out, "name", d.get("title"));
                put(&mut out, "note", d.get("body"));
                put(&mut out, "email", d.get("email"));
                put(&mut out, "total_price", d.get("total"));
                put(&mut out, "currency", d.get("currency"));
                put(&mut out, "financial_status", d.get("status"));
                "order"
            }
            "customer" => {
                if let Some(name) = entity.str_field("name") {
                    let mut parts = name.trim().splitn(2, ' ');
                    put_text(&mut out, "first_name", parts.next().map(str::to_string));
                    put_text(&mut out, "last_name", parts.next().map(str::to_string));
                }
                put(&mut out, "email", d.get("email"));
                put(&mut out, "phone", d.get("phone"));
                put(&mut out, "note", d.get("body"));
                if let Some(status) = entity.str_field("status") {
                    out.insert("state".into(), CUSTOMER_STATUS.to_external(status).into());
                }
                "customer"
            }
            other => return Err(self.unsupported(other)),
        };
        let mut envelope = Map::new();
        envelope.insert(singular.to_string(), Value::Object(out));
        Ok(Value::Object(envelope))
    }

    fn to_local(&self, entity_type: &str, payload: &Value) -> Result<Map<String, Value>> {
        let p = object(Self::unwrap(entity_type, payload), "Shopify")?;
        let mut out = Map::new();
        match entity_type {
            "product" => {
                put_text(&mut out, "title", text(p.get("title")));
                put_text(&mut out, "body", text(p.get("body_html")));
                put_text(&mut out, "slug", text(p.get("handle")));
                put_text(&mut out, "vendor", text(p.get("vendor")));
                put_text(&mut out, "product_type", text(p.get("product_type")));
                if let Some(status) = p.get("status").and_then(Value::as_str) {
                    out.insert("status".into(), PRODUCT_STATUS.to_local(status).into());
                }
                let price = p
                    .get("variants")
                    .and_then(|v| v.get(0))
                    .and_then(|v| v.get("price"));
                put(&mut out, "price", price);
            }
            "order" => {
                put_text(&mut out, "title", text(p.get("name")));
                put_text(&mut out, "body", text(p.get("note")));
                put_text(&mut out, "email", text(p.get("email")));
                put(&mut out, "total", p.get("total_price"));
                put_text(&mut out, "currency", text(p.get("currency")));
                put_text(&mut out, "status", text(p.get("financial_status")));
            }
            "customer" => {
                let name = [p.get("first_name"), p.get("last_name")]
                    .into_iter()
                    .filter_map(text)
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                if !name.is_empty() {
                    out.insert("name".into(), name.into());
                }
                put_text(&mut out, "email", text(p.get("email")));
                put_text(&mut out, "phone", text(p.get("phone")));
                put_text(&mut out, "body", text(p.get("note")));
                if let Some(state) = p.get("state").and_then(Value::as_str) {
                    out.insert("status".into(), CUSTOMER_STATUS.to_local(state).into());
                }
            }
            other => return Err(self.unsupported(other)),
        }
        Ok(out)
    }

    fn external_id(&self, entity_type: &str, payload: &Value) -> Option<String> {
        id_string(Self::unwrap(entity_type, payload).get("id"))
    }

    fn signature_header(&self) -> &'static str {
        "x-shopify-hmac-sha256"
    }

    fn signature_encoding(&self) -> SignatureEncoding {
        SignatureEncoding::Base64
    }

    fn event_header(&self) -> &'static str {
        "x-shopify-topic"
    }

    fn entity_type_for_resource(&self, resource: &str) -> Option<&'static str> {
        match resource {
            "product" | "products" => Some("product"),
            "order" | "orders" => Some("order"),
            "customer" | "customers" => Some("customer"),
            _ => None,
        }
    }
}
