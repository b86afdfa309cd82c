//! Long-running sync service: queue worker, change observer and the HTTP
//! bridge sharing one database and one [`cs_integrations::sync::hub::SyncHub`].

pub mod daemon;
