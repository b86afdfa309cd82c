//! Error responses for the HTTP API.
//!
//! Every handler error renders as `{"error": "<message>"}` with a status
//! chosen by the variant.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cs_core::db::StoreError;
use cs_core::identity_map::IdentityError;
use cs_integrations::error::SyncError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::NotFound(m)
            | ApiError::BadRequest(m)
            | ApiError::Unauthorized(m)
            | ApiError::InternalError(m) => m,
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::Store(store) => store.into(),
            conflict => ApiError::BadRequest(conflict.to_string()),
        }
    }
}

/// Signature failures are 401, caller mistakes and disabled sync are 400,
/// everything else is 500.
impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::InvalidSignature(_) => ApiError::Unauthorized(e.to_string()),
            SyncError::ConfigDisabled { .. } => ApiError::BadRequest(e.to_string()),
            ref client if client.is_client_error() => ApiError::BadRequest(e.to_string()),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}
