//! Platform integrations and the sync coordinator built on them.

pub mod client;
pub mod error;
pub mod profile;
pub mod sync;
pub mod webhook;

pub use error::{Result, SyncError};
