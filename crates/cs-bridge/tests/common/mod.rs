//! Router wiring over an in-memory database and a scripted platform API.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use cs_bridge::event_bus::EventBus;
use cs_bridge::http_api::{api_router_with_auth, ApiState};
use cs_bridge::observer::BridgeObserver;
use cs_core::config::{PlatformConfig, QueueConfig, SyncMode};
use cs_core::db::SyncDb;
use cs_core::entity_store::{EntityStore, SqliteEntityStore};
use cs_core::types::Platform;
use cs_integrations::client::PlatformApi;
use cs_integrations::error::{Result, SyncError};
use cs_integrations::sync::guard::LoopGuard;
use cs_integrations::sync::hub::SyncHub;
use cs_integrations::sync::retry::RetryPolicy;
use cs_integrations::sync::runner::BatchRunner;
use reqwest::Method;
use serde_json::{json, Value};
use tower::ServiceExt;

pub const SECRET: &str = "s3cret";

/// POST answers `{"id": "ext-<n>"}`, everything else `null`, unless the
/// API was built to fail with a fixed status.
#[derive(Default)]
pub struct FakeApi {
    pub calls: Mutex<Vec<(Method, String)>>,
    next_id: AtomicU64,
    fail_with: Option<u16>,
}

impl FakeApi {
    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(status),
            ..Default::default()
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PlatformApi for FakeApi {
    async fn request(&self, method: Method, path: &str, _body: Option<&Value>) -> Result<Value> {
        self.calls.lock().unwrap().push((method.clone(), path.to_string()));
        if let Some(status) = self.fail_with {
            return Err(SyncError::Http {
                status,
                body: "scripted failure".into(),
            });
        }
        if method == Method::POST {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(json!({ "id": format!("ext-{n}") }));
        }
        Ok(Value::Null)
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<ApiState>,
    pub store: SqliteEntityStore,
    pub bus: EventBus,
}

/// Shopify (signed webhooks, bidirectional) backed by `api`.
pub async fn app(api: Arc<FakeApi>, admin_key: Option<&str>) -> TestApp {
    let db = SyncDb::open_in_memory().await.unwrap();
    let store = db.entity_store();
    let bus = EventBus::new();
    let mut hub = SyncHub::new(
        Arc::new(store.clone()) as Arc<dyn EntityStore>,
        db.identity_map(),
        db.sync_queue(),
        Arc::new(LoopGuard::default()),
        RetryPolicy::new(3, Duration::from_millis(1)),
        Arc::new(BridgeObserver::new(bus.clone())),
    );
    let mut cfg = PlatformConfig::new(Platform::Shopify, "https://shop.example.test");
    cfg.mode = SyncMode::Bidirectional;
    hub.register(cfg, api);
    hub.set_webhook_secret(Platform::Shopify, Some(SECRET.into()));

    let queue = QueueConfig {
        batch_delay_ms: 0,
        ..Default::default()
    };
    let runner = Arc::new(BatchRunner::new(Arc::new(hub), &queue));
    let state = Arc::new(ApiState::new(runner, bus.clone()));
    let router = api_router_with_auth(state.clone(), admin_key.map(str::to_string));
    TestApp {
        router,
        state,
        store,
        bus,
    }
}

pub async fn send(router: &Router, req: Request<Body>) -> Response<Body> {
    router.clone().oneshot(req).await.unwrap()
}

pub async fn json_body(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
