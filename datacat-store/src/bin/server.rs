//! Entry point for `datacat-server`: the central Session Store.

use std::path::PathBuf;
use std::sync::Arc;

use datacat_store::{http, AppState, Store, StoreConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var("DATACAT_STORE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("datacat-store.json"));
    let config = Arc::new(StoreConfig::load(&config_path)?);

    let database_url = format!("sqlite://{}?mode=rwc", config.data_path);
    let store = Arc::new(Store::connect(&database_url, config.heartbeat_timeout()).await?);

    let cleanup = datacat_store::cleanup::CleanupWorker::spawn(
        store.clone(),
        config.cleanup_interval(),
        config.retention(),
    );

    let state = AppState {
        store: store.clone(),
        config: config.clone(),
    };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server_port)).await?;
    tracing::info!(port = config.server_port, "datacat-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cleanup.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
