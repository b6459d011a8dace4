//! Entry point for `datacat-aggregator`: the per-application sidecar.

use std::path::PathBuf;
use std::sync::Arc;

use datacat_aggregator::{http, Aggregator, AggregatorConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var("DATACAT_AGGREGATOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("datacat-aggregator.json"));
    let config = Arc::new(AggregatorConfig::load(&config_path)?);

    let aggregator = Aggregator::new(config.clone());
    let workers = aggregator.spawn_workers();

    let app = http::router(aggregator.clone());
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.daemon_port)).await?;
    tracing::info!(port = config.daemon_port, "datacat-aggregator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for worker in workers {
        worker.shutdown().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
