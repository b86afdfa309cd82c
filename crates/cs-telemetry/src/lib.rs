//! Observability for the sync daemon.
//!
//! - **Logging**: human-readable or JSON lines via `tracing-subscriber`
//! - **Metrics**: counters, gauges and histograms with Prometheus export,
//!   plus helpers for the sync-specific series
//! - **Middleware**: axum layers for request metrics and `X-Request-Id`

pub mod logging;
pub mod metrics;
pub mod middleware;
