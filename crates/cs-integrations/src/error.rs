use cs_core::db::StoreError;
use cs_core::identity_map::IdentityError;
use cs_core::types::Platform;
use thiserror::Error;

/// Errors raised by the sync coordinator.
///
/// Variants split into three groups. Boundary errors (`InvalidSignature`,
/// `UnsupportedEntityType`, `UnknownAction`, `InvalidPayload`) are resolved
/// by the caller and never reach the queue. Transient errors (see
/// [`SyncError::is_retryable`]) drive the retry loop. Everything else is
/// terminal for the operation and ends up as a dead letter.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Sync is turned off for this platform, direction or entity type.
    ///
    /// Not a failure: public entry points translate it into a
    /// `SyncResult` with `message = "disabled"`.
    #[error("sync disabled for {platform}/{entity_type}")]
    ConfigDisabled { platform: Platform, entity_type: String },

    /// The webhook signature did not match the body, or a strict platform
    /// received a webhook without a configured secret.
    #[error("invalid webhook signature for {0}")]
    InvalidSignature(Platform),

    #[error("unsupported entity type '{entity_type}' for {platform}")]
    UnsupportedEntityType { platform: Platform, entity_type: String },

    #[error("unknown webhook action in event '{0}'")]
    UnknownAction(String),

    /// The payload is not shaped like the platform's resource.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The identity map refused a second partner for an id.
    #[error(transparent)]
    Conflict(IdentityError),

    /// The platform answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection, DNS, TLS or timeout failure talking to the platform.
    #[error("transport error: {0}")]
    Transport(String),

    /// An env var named by the auth config is unset.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// The retry budget ran out; `last_error` is the final attempt's error.
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// Local store or identity map failure.
    #[error("store error: {0}")]
    Store(String),

    /// A local change could not be queued for some platforms; the others
    /// (`enqueued` of them) were.
    #[error("could not enqueue change for {}: {error}", platform_list(.platforms))]
    Enqueue {
        platforms: Vec<Platform>,
        enqueued: usize,
        error: String,
    },
}

fn platform_list(platforms: &[Platform]) -> String {
    platforms.iter().map(Platform::as_str).collect::<Vec<_>>().join(", ")
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// `true` for failures worth another attempt: transport errors and any
    /// HTTP error except 401 (the client already refreshed credentials once)
    /// and 404 (the dispatcher resolves it by recreating or by treating the
    /// delete as done).
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) => true,
            SyncError::Http { status, .. } => !matches!(status, 401 | 404),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Http { status: 404, .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Http { status: 401, .. })
    }

    /// Errors caused by the request itself rather than by processing it:
    /// bad signature, unknown event, unsupported type, malformed payload.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidSignature(_)
                | SyncError::UnsupportedEntityType { .. }
                | SyncError::UnknownAction(_)
                | SyncError::InvalidPayload(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => SyncError::Http {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => SyncError::Transport(e.to_string()),
        }
    }
}

impl From<IdentityError> for SyncError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::Conflict { .. } => SyncError::Conflict(e),
            IdentityError::Store(store) => SyncError::Store(store.to_string()),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e.to_string())
    }
}
