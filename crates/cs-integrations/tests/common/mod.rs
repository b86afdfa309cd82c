//! Shared helpers: a scripted in-process platform API and hub wiring.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use cs_core::config::{PlatformConfig, SyncMode};
use cs_core::db::SyncDb;
use cs_core::entity_store::{EntityStore, SqliteEntityStore};
use cs_core::types::Platform;
use cs_integrations::client::PlatformApi;
use cs_integrations::error::{Result, SyncError};
use cs_integrations::sync::guard::LoopGuard;
use cs_integrations::sync::hub::SyncHub;
use cs_integrations::sync::retry::RetryPolicy;
use cs_integrations::sync::NoopObserver;
use reqwest::Method;
use serde_json::{json, Value};

// ===========================================================================
// FakeApi
// ===========================================================================

#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub at: Instant,
}

pub enum Reply {
    Json(Value),
    Status(u16),
}

/// Platform API double. Scripted replies are served first, in order; after
/// that POST answers `{"id": "ext-<n>"}` and everything else `null`.
#[derive(Default)]
pub struct FakeApi {
    calls: Mutex<Vec<Call>>,
    script: Mutex<VecDeque<Reply>>,
    next_id: AtomicU64,
    always_fail: Option<u16>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call fails with the given HTTP status.
    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            always_fail: Some(status),
            ..Default::default()
        })
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PlatformApi for FakeApi {
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        self.calls.lock().unwrap().push(Call {
            method: method.clone(),
            path: path.to_string(),
            body: body.cloned(),
            at: Instant::now(),
        });
        if let Some(status) = self.always_fail {
            return Err(SyncError::Http {
                status,
                body: "scripted failure".into(),
            });
        }
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(Reply::Json(v)) => Ok(v),
            Some(Reply::Status(status)) => Err(SyncError::Http {
                status,
                body: "scripted".into(),
            }),
            None if method == Method::POST => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({ "id": format!("ext-{n}") }))
            }
            None => Ok(Value::Null),
        }
    }
}

// ===========================================================================
// Hub wiring
// ===========================================================================

pub struct Harness {
    pub db: SyncDb,
    pub store: SqliteEntityStore,
    pub hub: SyncHub,
}

pub fn platform(platform: Platform, mode: SyncMode) -> PlatformConfig {
    let mut cfg = PlatformConfig::new(platform, "https://example.test");
    cfg.mode = mode;
    cfg.require_signature = false;
    cfg
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, std::time::Duration::from_millis(1))
}

pub async fn harness(platforms: Vec<(PlatformConfig, Arc<FakeApi>)>) -> Harness {
    harness_with(platforms, fast_retry()).await
}

pub async fn harness_with(platforms: Vec<(PlatformConfig, Arc<FakeApi>)>, retry: RetryPolicy) -> Harness {
    harness_on(SyncDb::open_in_memory().await.unwrap(), platforms, retry)
}

pub fn harness_on(db: SyncDb, platforms: Vec<(PlatformConfig, Arc<FakeApi>)>, retry: RetryPolicy) -> Harness {
    let store = db.entity_store();
    let mut hub = SyncHub::new(
        Arc::new(store.clone()) as Arc<dyn EntityStore>,
        db.identity_map(),
        db.sync_queue(),
        Arc::new(LoopGuard::default()),
        retry,
        Arc::new(NoopObserver),
    );
    for (cfg, api) in platforms {
        hub.register(cfg, api);
    }
    Harness { db, store, hub }
}
