//! Webhook entry point.
//!
//! Platforms get a fast, well-formed answer whatever happens inside:
//! 401 for a bad signature, 400 for a request we cannot interpret, 500 for
//! an internal failure and 200 with the sync result otherwise. A disabled
//! platform or entity type is still 200 so the sender does not retry.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use cs_core::types::{Platform, SyncResult};
use cs_integrations::error::SyncError;
use cs_telemetry::metrics::global_metrics;
use serde_json::json;
use tracing::{info, warn};

use super::state::ApiState;
use crate::api_error::ApiError;
use crate::protocol::SyncEvent;

pub(crate) fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/webhooks/{platform}", post(receive))
        .route("/webhooks/{platform}/{*event}", post(receive_named))
}

fn parse_platform(raw: &str) -> Result<Platform, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("unknown platform '{raw}'")))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn error_status(err: &SyncError) -> StatusCode {
    match err {
        SyncError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /webhooks/{platform} -- event name read from the platform's header.
async fn receive(
    State(state): State<Arc<ApiState>>,
    Path(platform): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let platform = parse_platform(&platform)?;
    let event = match state.hub().webhook_headers(platform) {
        Some((_, event_header)) => match header(&headers, event_header) {
            Some(event) => event.to_string(),
            None => {
                global_metrics().record_webhook(platform.as_str(), 400);
                return Err(ApiError::BadRequest(format!("missing {event_header} header")));
            }
        },
        // Unconfigured platform; the hub answers "disabled".
        None => String::new(),
    };
    Ok(handle(&state, platform, &event, &headers, &body).await)
}

/// POST /webhooks/{platform}/{*event} -- event name in the path.
async fn receive_named(
    State(state): State<Arc<ApiState>>,
    Path((platform, event)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let platform = parse_platform(&platform)?;
    Ok(handle(&state, platform, &event, &headers, &body).await)
}

async fn handle(state: &ApiState, platform: Platform, event: &str, headers: &HeaderMap, body: &[u8]) -> Response {
    let signature = state
        .hub()
        .webhook_headers(platform)
        .and_then(|(sig_header, _)| header(headers, sig_header));

    let outcome = state.hub().process_webhook(platform, event, body, signature).await;
    let (status, response) = match outcome {
        Ok(result) => (StatusCode::OK, ok_response(&result)),
        Err(err) => {
            let status = error_status(&err);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                warn!(%platform, event, error = %err, "webhook processing failed");
            } else {
                info!(%platform, event, status = status.as_u16(), error = %err, "webhook rejected");
            }
            let body = Json(json!({ "success": false, "error": err.to_string() }));
            (status, (status, body).into_response())
        }
    };

    global_metrics().record_webhook(platform.as_str(), status.as_u16());
    state.event_bus.publish(SyncEvent::WebhookReceived {
        platform,
        event: event.to_string(),
        status: status.as_u16(),
    });
    response
}

fn ok_response(result: &SyncResult) -> Response {
    (StatusCode::OK, Json(result)).into_response()
}
