//! Background cleanup and expiration sweeper.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::service::VectorStoreService;

/// Run the periodic sweeper until shutdown.
///
/// Each pass performs the same cleanup the search path does per store, plus
/// global expiration. The task outlives individual requests.
pub async fn run(service: Arc<VectorStoreService>, interval: std::time::Duration, shutdown: CancellationToken) {
    log::debug!("Vector store sweeper running every {interval:?}");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                service.sweep().await;
            }
            _ = shutdown.cancelled() => {
                log::debug!("Vector store sweeper shutting down");
                break;
            }
        }
    }
}
