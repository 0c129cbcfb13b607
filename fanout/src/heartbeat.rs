use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::manager::SessionManager;

/// Periodic liveness sweep (spec.md §4.8 `heartbeatInterval`).
pub async fn run(manager: Arc<SessionManager>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("fan-out heartbeat sweep shutting down");
                return;
            }
            _ = ticker.tick() => {
                manager.sweep().await;
            }
        }
    }
}
