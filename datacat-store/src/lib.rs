//! The Session Store: durable persistence, deep-merged state, append-only
//! event/metric logs, retention cleanup, and heartbeat/crash-derived
//! liveness, exposed over the HTTP surface of spec.md §6.

pub mod auth;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod error;
pub mod gzip;
pub mod http;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use store::Store;

use std::sync::Arc;

/// Shared axum application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<StoreConfig>,
}
