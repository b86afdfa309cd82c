//! Admin API key middleware for the operator endpoints.
//!
//! With a key configured, requests must present it in `X-API-Key` or as
//! `Authorization: Bearer <key>`. Without one, everything passes.
//! Webhook routes are never wrapped: they carry platform signatures instead.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    http::{HeaderMap, Request, Response},
    response::IntoResponse,
};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::debug;

use crate::api_error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Key presented by the caller, if any.
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
}

fn key_matches(expected: &str, presented: Option<&str>) -> bool {
    presented.is_some_and(|p| bool::from(p.as_bytes().ct_eq(expected.as_bytes())))
}

#[derive(Clone)]
pub struct AuthLayer {
    admin_key: Option<Arc<str>>,
}

impl AuthLayer {
    /// `None` (or an empty key) leaves the API open.
    pub fn new(admin_key: Option<String>) -> Self {
        Self {
            admin_key: admin_key.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }

    pub fn is_enforcing(&self) -> bool {
        self.admin_key.is_some()
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            admin_key: self.admin_key.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    admin_key: Option<Arc<str>>,
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let authorized = match &self.admin_key {
            Some(expected) => key_matches(expected, presented_key(req.headers())),
            None => true,
        };
        if !authorized {
            debug!(path = %req.uri().path(), "rejected operator request without a valid key");
            let response = ApiError::Unauthorized("unauthorized".into()).into_response();
            return Box::pin(async move { Ok::<_, S::Error>(response) });
        }

        // Take the service that was driven to readiness, leave a fresh clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}
