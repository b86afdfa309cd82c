//! `PlatformClient` against a local HTTP server: one credential refresh and
//! one resend on 401.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use cs_core::config::PlatformConfig;
use cs_core::types::Platform;
use cs_integrations::client::{CredentialSource, PlatformApi, PlatformClient};
use cs_integrations::error::{Result, SyncError};
use reqwest::Method;
use serde_json::{json, Value};

/// Hands out `Bearer stale` until refreshed, `Bearer fresh` afterwards.
#[derive(Default)]
struct RotatingToken {
    refreshes: AtomicUsize,
    refreshable: bool,
}

impl RotatingToken {
    fn refreshable() -> Arc<Self> {
        Arc::new(Self {
            refreshable: true,
            ..Default::default()
        })
    }

    fn fixed() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for RotatingToken {
    async fn headers(&self) -> Result<Vec<(String, String)>> {
        let token = if self.refreshes() > 0 { "fresh" } else { "stale" };
        Ok(vec![("Authorization".into(), format!("Bearer {token}"))])
    }

    async fn refresh(&self) -> Result<bool> {
        if !self.refreshable {
            return Ok(false);
        }
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[derive(Clone)]
struct Server {
    hits: Arc<AtomicUsize>,
    accepted: Option<&'static str>,
}

async fn create_item(State(server): State<Server>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    server.hits.fetch_add(1, Ordering::SeqCst);
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
    match server.accepted {
        Some(token) if auth == Some(token) => (StatusCode::CREATED, Json(json!({"id": "7"}))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({"error": "token expired"}))),
    }
}

/// Serve `POST /items` on an ephemeral port; returns the base URL and hit counter.
async fn serve(accepted: Option<&'static str>) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route("/items", post(create_item)).with_state(Server {
        hits: hits.clone(),
        accepted,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), hits)
}

fn client(base_url: &str, creds: Arc<RotatingToken>) -> PlatformClient {
    let config = PlatformConfig::new(Platform::Optimizely, base_url);
    PlatformClient::new(&config, creds).unwrap()
}

#[tokio::test]
async fn unauthorized_refreshes_once_and_resends() {
    let (url, hits) = serve(Some("Bearer fresh")).await;
    let creds = RotatingToken::refreshable();

    let body = json!({"name": "Spring"});
    let resp = client(&url, creds.clone())
        .request(Method::POST, "/items", Some(&body))
        .await
        .unwrap();

    assert_eq!(resp, json!({"id": "7"}));
    assert_eq!(creds.refreshes(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn persistent_unauthorized_surfaces_after_one_resend() {
    let (url, hits) = serve(None).await;
    let creds = RotatingToken::refreshable();

    let err = client(&url, creds.clone())
        .request(Method::POST, "/items", None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Http { status: 401, .. }), "{err}");
    assert_eq!(creds.refreshes(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unrefreshable_credentials_fail_on_first_401() {
    let (url, hits) = serve(Some("Bearer fresh")).await;
    let creds = RotatingToken::fixed();

    let err = client(&url, creds.clone())
        .request(Method::POST, "/items", None)
        .await
        .unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(creds.refreshes(), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
