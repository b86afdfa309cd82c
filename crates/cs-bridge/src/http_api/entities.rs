//! Minimal entity API over the local store.
//!
//! Every mutation is tagged [`Origin::Local`], so it feeds the change
//! observer and fans out to the platforms that sync the type outward.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use cs_core::entity_store::EntityFilter;
use cs_core::types::{CmsEntity, Origin};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::state::ApiState;
use crate::api_error::ApiError;

pub(crate) fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/api/entities/{entity_type}", get(list_entities).post(create_entity))
        .route(
            "/api/entities/{entity_type}/{id}",
            get(get_entity).put(update_entity).delete(delete_entity),
        )
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    status: Option<String>,
}

async fn list_entities(
    State(state): State<Arc<ApiState>>,
    Path(entity_type): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = EntityFilter { status: query.status };
    let ids = state.hub().store().query(&entity_type, &filter).await?;
    Ok(Json(json!({ "entity_type": entity_type, "ids": ids })))
}

async fn create_entity(
    State(state): State<Arc<ApiState>>,
    Path(entity_type): Path<String>,
    Json(data): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let id = state.hub().store().create(&entity_type, data, Origin::Local).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn get_entity(
    State(state): State<Arc<ApiState>>,
    Path((entity_type, id)): Path<(String, String)>,
) -> Result<Json<CmsEntity>, ApiError> {
    state
        .hub()
        .store()
        .load(&entity_type, &id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{entity_type}/{id}")))
}

async fn update_entity(
    State(state): State<Arc<ApiState>>,
    Path((entity_type, id)): Path<(String, String)>,
    Json(data): Json<Map<String, Value>>,
) -> Result<Json<Value>, ApiError> {
    state
        .hub()
        .store()
        .update(&entity_type, &id, data, Origin::Local)
        .await?;
    Ok(Json(json!({ "id": id })))
}

async fn delete_entity(
    State(state): State<Arc<ApiState>>,
    Path((entity_type, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    if state.hub().store().delete(&entity_type, &id, Origin::Local).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("{entity_type}/{id}")))
    }
}
