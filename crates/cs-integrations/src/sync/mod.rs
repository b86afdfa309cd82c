//! The bidirectional sync coordinator.
//!
//! One [`hub::PlatformCoordinator`] per configured platform, each built from
//! the same generic parts:
//!
//! - [`dispatcher::OutboundDispatcher`] pushes local changes out,
//! - [`inbound::InboundProcessor`] applies verified webhooks locally,
//! - [`guard::LoopGuard`] keeps the two from feeding each other,
//! - [`retry::RetryPolicy`] bounds outbound attempts.
//!
//! [`hub::SyncHub`] routes change events and queued operations to the right
//! coordinator, and [`runner::BatchRunner`] drains the durable queue.

pub mod dispatcher;
pub mod guard;
pub mod hub;
pub mod inbound;
pub mod retry;
pub mod runner;

use std::fmt;
use std::time::Duration;

use cs_core::types::{SyncDirection, SyncOperation, SyncResult};

use crate::error::SyncError;

/// Receives sync outcomes (metrics, logs, event streams).
pub trait SyncObserver: Send + Sync {
    /// Called once per dispatch or inbound event, success or failure.
    fn on_sync(&self, _direction: SyncDirection, _result: &SyncResult, _elapsed: Duration) {}

    /// Called when an operation is moved to the dead-letter table.
    fn on_dead_letter(&self, _operation: &SyncOperation, _error: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}

/// A failed sync attempt: the error plus the attempt number it ended on.
#[derive(Debug)]
pub struct SyncFailure {
    pub error: SyncError,
    pub attempts: u32,
}

impl SyncFailure {
    pub fn new(error: SyncError, attempts: u32) -> Self {
        Self { error, attempts }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (attempt {})", self.error, self.attempts)
    }
}

impl std::error::Error for SyncFailure {}
