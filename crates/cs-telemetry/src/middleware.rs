use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::metrics::{global_metrics, API_REQUESTS_TOTAL, API_REQUEST_DURATION_SECONDS};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 32 hex characters, usable as an OpenTelemetry trace id.
pub fn generate_request_id() -> String {
    Uuid::new_v4().as_simple().to_string()
}

/// Records `api_requests_total{method,path,status}` and
/// `api_request_duration_seconds`.
///
/// `path` is the route template when routing matched (so entity ids do not
/// explode the label set), the raw path otherwise.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let m = global_metrics();
    m.increment_counter(
        API_REQUESTS_TOTAL,
        &[("method", &method), ("path", &path), ("status", &status)],
    );
    m.record_histogram(API_REQUEST_DURATION_SECONDS, start.elapsed().as_secs_f64());

    response
}

/// Propagates or assigns `X-Request-Id` and runs the request inside a span
/// carrying it.
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    let header = HeaderValue::from_str(&request_id).unwrap_or_else(|_| HeaderValue::from_static("invalid"));
    request.headers_mut().insert(REQUEST_ID_HEADER, header.clone());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, header);
    response
}
