use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use cs_core::types::{DeadLetter, Platform, QueueRunReport, SyncMapping};
use cs_integrations::sync::runner::BulkSyncReport;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::state::ApiState;
use crate::api_error::ApiError;
use crate::protocol::SyncEvent;

pub(crate) fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/api/sync/stats", get(get_stats))
        .route("/api/sync/process", post(process_queue))
        .route("/api/sync/bulk", post(bulk_sync))
        .route("/api/sync/import", post(bulk_import))
        .route("/api/sync/dead-letters", get(list_dead_letters).delete(purge_dead_letters))
        .route("/api/sync/dead-letters/retry", post(retry_dead_letters))
        .route("/api/sync/queue", delete(clear_queue))
        .route("/api/sync/mappings/{platform}/{entity_type}/{cms_id}", get(get_mapping))
}

#[derive(Debug, Serialize)]
struct PlatformStatus {
    platform: Platform,
    sync_to: bool,
    sync_from: bool,
    mappings: u64,
}

/// GET /api/sync/stats -- queue health plus per-platform mapping counts.
async fn get_stats(State(state): State<Arc<ApiState>>) -> Result<Json<Value>, ApiError> {
    let queue = state.queue_stats().await?;
    let hub = state.hub();
    let mut platforms = Vec::new();
    for platform in hub.platforms() {
        let Some(c) = hub.coordinator(platform) else { continue };
        platforms.push(PlatformStatus {
            platform,
            sync_to: c.config.should_sync_to(),
            sync_from: c.config.should_sync_from(),
            mappings: hub.identity().count(platform).await?,
        });
    }
    Ok(Json(json!({
        "queue": queue,
        "platforms": platforms,
        "guard_entries": hub.guard().len(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    })))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ProcessQuery {
    time_budget_ms: Option<u64>,
}

/// POST /api/sync/process -- drain the queue once, within a time budget.
async fn process_queue(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ProcessQuery>,
) -> Result<Json<QueueRunReport>, ApiError> {
    let budget = query
        .time_budget_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.runner.time_budget());
    let report = state.runner.process_queue(budget).await?;
    state.queue_stats().await?;
    state.event_bus.publish(SyncEvent::QueueProcessed(report));
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkRequest {
    entity_type: String,
    #[serde(default)]
    ids: Option<Vec<String>>,
    #[serde(default)]
    only_published: bool,
    #[serde(default)]
    platform: Option<Platform>,
}

/// POST /api/sync/bulk -- push existing entities outward in throttled batches.
async fn bulk_sync(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<BulkRequest>,
) -> Result<Json<BulkSyncReport>, ApiError> {
    if req.entity_type.trim().is_empty() {
        return Err(ApiError::BadRequest("entity_type is required".into()));
    }
    let report = state
        .runner
        .bulk_sync(&req.entity_type, req.ids, req.only_published, req.platform)
        .await?;
    state.event_bus.publish(SyncEvent::BulkFinished {
        entity_type: req.entity_type,
        platform: req.platform,
        report: report.clone(),
    });
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImportRequest {
    platform: Platform,
    entity_type: String,
}

/// POST /api/sync/import -- enqueue every remote resource of a type.
async fn bulk_import(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<BulkSyncReport>, ApiError> {
    let report = state.runner.bulk_import(req.platform, &req.entity_type).await?;
    state.queue_stats().await?;
    Ok(Json(report))
}

/// GET /api/sync/dead-letters
async fn list_dead_letters(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<DeadLetter>>, ApiError> {
    Ok(Json(state.hub().queue().dead_letters().await?))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RetryRequest {
    #[serde(default)]
    id: Option<Uuid>,
}

/// POST /api/sync/dead-letters/retry -- requeue one (`{"id": ..}`) or all.
async fn retry_dead_letters(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RetryRequest>,
) -> Result<Json<Value>, ApiError> {
    let queue = state.hub().queue();
    let requeued = match req.id {
        Some(id) => {
            if !queue.retry_dead_letter(id).await? {
                return Err(ApiError::NotFound(format!("dead letter {id}")));
            }
            1
        }
        None => queue.retry_all_dead_letters().await?,
    };
    info!(requeued, "dead letters requeued");
    state.queue_stats().await?;
    Ok(Json(json!({ "requeued": requeued })))
}

/// DELETE /api/sync/dead-letters
async fn purge_dead_letters(State(state): State<Arc<ApiState>>) -> Result<Json<Value>, ApiError> {
    let purged = state.hub().queue().purge_dead_letters().await?;
    info!(purged, "dead letters purged");
    state.queue_stats().await?;
    Ok(Json(json!({ "purged": purged })))
}

/// DELETE /api/sync/queue -- drop pending operations. Claimed ones finish.
async fn clear_queue(State(state): State<Arc<ApiState>>) -> Result<Json<Value>, ApiError> {
    let cleared = state.hub().queue().clear().await?;
    info!(cleared, "sync queue cleared");
    state.queue_stats().await?;
    Ok(Json(json!({ "cleared": cleared })))
}

/// GET /api/sync/mappings/{platform}/{entity_type}/{cms_id}
async fn get_mapping(
    State(state): State<Arc<ApiState>>,
    Path((platform, entity_type, cms_id)): Path<(String, String, String)>,
) -> Result<Json<SyncMapping>, ApiError> {
    let platform: Platform = platform
        .parse()
        .map_err(|_| ApiError::NotFound(format!("unknown platform '{platform}'")))?;
    state
        .hub()
        .identity()
        .get(platform, &entity_type, &cms_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no {platform} mapping for {entity_type}/{cms_id}")))
}
