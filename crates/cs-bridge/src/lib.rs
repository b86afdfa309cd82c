//! HTTP surface of the sync coordinator.
//!
//! - [`http_api`]: webhook entry point, operator API and entity API
//! - [`auth`]: admin API key middleware
//! - [`event_bus`]: in-process pub/sub feeding the SSE stream
//! - [`observer`]: turns sync outcomes into bus events and metrics

pub mod api_error;
pub mod auth;
pub mod event_bus;
pub mod http_api;
pub mod observer;
pub mod protocol;
