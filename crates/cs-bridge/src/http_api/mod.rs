//! axum router for the bridge.
//!
//! Two surfaces share one listener: `/webhooks/*`, authenticated by
//! platform signatures, and `/api/*`, behind the admin key when one is set.

mod entities;
mod events;
pub mod state;
mod sync;
mod webhooks;

use std::sync::Arc;

use axum::{middleware, Router};
use cs_telemetry::middleware::{metrics_middleware, request_id_middleware};
use tower_http::cors::CorsLayer;

use crate::auth::AuthLayer;

pub use state::ApiState;

/// Router with an open operator API.
pub fn api_router(state: Arc<ApiState>) -> Router {
    api_router_with_auth(state, None)
}

/// Full router. `admin_key` guards `/api/*` only.
pub fn api_router_with_auth(state: Arc<ApiState>, admin_key: Option<String>) -> Router {
    let operator = Router::new()
        .merge(sync::router())
        .merge(events::router())
        .merge(entities::router())
        .layer(AuthLayer::new(admin_key));

    Router::new()
        .merge(webhooks::router())
        .merge(operator)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}
