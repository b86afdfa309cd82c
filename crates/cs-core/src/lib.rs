pub mod config;
pub mod db;
pub mod entity_store;
pub mod identity_map;
pub mod shutdown;
pub mod sync_queue;
pub mod types;
