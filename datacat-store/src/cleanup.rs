//! Retention cleanup worker.
//!
//! One periodic task, built the same way as the teacher's event-bus sink
//! workers: a ticker racing a shutdown channel inside `tokio::select!`,
//! instead of a shared atomic flag.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::store::Store;

pub struct CleanupWorker {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupWorker {
    pub fn spawn(store: Arc<Store>, interval: Duration, retention: chrono::Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        match store.cleanup_expired(Utc::now(), retention).await {
                            Ok(n) if n > 0 => info!(removed = n, "retention cleanup removed expired sessions"),
                            Ok(_) => {}
                            Err(err) => warn!(%err, "retention cleanup failed"),
                        }
                    }
                }
            }
        });
        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
