use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Json, Router,
};
use cs_telemetry::metrics::global_metrics;
use futures_util::stream::{Stream, StreamExt};
use tracing::warn;

use super::state::ApiState;
use crate::api_error::ApiError;

pub(crate) fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/api/metrics", get(get_metrics_prometheus))
        .route("/api/metrics/json", get(get_metrics_json))
        .route("/api/events", get(stream_events))
}

/// GET /api/metrics -- Prometheus text exposition.
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, ApiError> {
    state.queue_stats().await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        global_metrics().export_prometheus(),
    ))
}

async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, ApiError> {
    state.queue_stats().await?;
    Ok(Json(global_metrics().export_json()))
}

/// GET /api/events -- sync events as server-sent events, one per bus message.
async fn stream_events(State(state): State<Arc<ApiState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = state
        .event_bus
        .subscribe()
        .into_stream()
        .filter_map(|event| async move {
            match serde_json::to_string(&event) {
                Ok(data) => Some(Ok(Event::default().event(event.kind()).data(data))),
                Err(e) => {
                    warn!(error = %e, "dropping unserializable sync event");
                    None
                }
            }
        });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
}
