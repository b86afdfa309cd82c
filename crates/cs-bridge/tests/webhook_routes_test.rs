//! Webhook entry point: signature gate, status mapping, event sources.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{app, get, json_body, send, FakeApi, SECRET};
use cs_bridge::protocol::SyncEvent;
use cs_core::entity_store::{EntityFilter, EntityStore};
use cs_integrations::webhook::{sign, SignatureEncoding};

fn shopify_webhook(uri: &str, topic: Option<&str>, body: &'static [u8], signature: Option<String>) -> Request<Body> {
    let mut b = Request::builder().method("POST").uri(uri);
    if let Some(topic) = topic {
        b = b.header("x-shopify-topic", topic);
    }
    if let Some(sig) = signature {
        b = b.header("x-shopify-hmac-sha256", sig);
    }
    b.body(Body::from(body)).unwrap()
}

const WIDGET: &[u8] = br#"{"id":"ext-1","title":"Widget"}"#;

#[tokio::test]
async fn signed_create_returns_200_with_result() {
    let t = app(Arc::new(FakeApi::default()), None).await;
    let events = t.bus.subscribe();
    let sig = sign(SECRET, WIDGET, SignatureEncoding::Base64);

    let resp = send(
        &t.router,
        shopify_webhook("/webhooks/shopify", Some("products/create"), WIDGET, Some(sig)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["action"], "created");
    assert_eq!(body["external_id"], "ext-1");

    let ids = t.store.query("product", &EntityFilter::default()).await.unwrap();
    assert_eq!(ids.len(), 1);

    let kinds: Vec<&str> = events.drain().map(|e| e.kind()).collect();
    assert!(kinds.contains(&"synced"));
    assert!(kinds.contains(&"webhook_received"));
}

#[tokio::test]
async fn event_can_come_from_the_path() {
    let t = app(Arc::new(FakeApi::default()), None).await;
    let sig = sign(SECRET, WIDGET, SignatureEncoding::Base64);
    let resp = send(
        &t.router,
        shopify_webhook("/webhooks/shopify/products/create", None, WIDGET, Some(sig)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["action"], "created");
}

#[tokio::test]
async fn tampered_body_is_401_without_mutation() {
    let t = app(Arc::new(FakeApi::default()), None).await;
    let events = t.bus.subscribe();
    let sig = sign(SECRET, WIDGET, SignatureEncoding::Base64);
    let tampered: &'static [u8] = br#"{"id":"ext-1","title":"Gadget"}"#;

    let resp = send(
        &t.router,
        shopify_webhook("/webhooks/shopify", Some("products/create"), tampered, Some(sig)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(resp).await["success"], false);
    assert!(t.store.query("product", &EntityFilter::default()).await.unwrap().is_empty());

    let statuses: Vec<u16> = events
        .drain()
        .filter_map(|e| match e {
            SyncEvent::WebhookReceived { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![401]);
}

#[tokio::test]
async fn missing_signature_is_401() {
    let t = app(Arc::new(FakeApi::default()), None).await;
    let resp = send(&t.router, shopify_webhook("/webhooks/shopify", Some("products/create"), WIDGET, None)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_event_is_400() {
    let t = app(Arc::new(FakeApi::default()), None).await;
    let sig = sign(SECRET, WIDGET, SignatureEncoding::Base64);
    let resp = send(
        &t.router,
        shopify_webhook("/webhooks/shopify", Some("products/explode"), WIDGET, Some(sig)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_topic_header_is_400() {
    let t = app(Arc::new(FakeApi::default()), None).await;
    let sig = sign(SECRET, WIDGET, SignatureEncoding::Base64);
    let resp = send(&t.router, shopify_webhook("/webhooks/shopify", None, WIDGET, Some(sig))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(resp).await["error"].as_str().unwrap().contains("x-shopify-topic"));
}

#[tokio::test]
async fn unconfigured_platform_is_200_disabled() {
    let t = app(Arc::new(FakeApi::default()), None).await;
    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/drupal/node:update")
        .body(Body::from(r#"{"id":"1"}"#))
        .unwrap();
    let resp = send(&t.router, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "disabled");
}

#[tokio::test]
async fn unknown_platform_is_404() {
    let t = app(Arc::new(FakeApi::default()), None).await;
    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/myspace")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&t.router, req).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhooks_bypass_the_admin_key() {
    let t = app(Arc::new(FakeApi::default()), Some("admin")).await;
    let sig = sign(SECRET, WIDGET, SignatureEncoding::Base64);
    let resp = send(
        &t.router,
        shopify_webhook("/webhooks/shopify", Some("products/create"), WIDGET, Some(sig)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(send(&t.router, get("/api/sync/stats")).await.status(), StatusCode::UNAUTHORIZED);
}
