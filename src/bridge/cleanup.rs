//! Periodic stale-session sweep.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::persistence::session_repo::SessionStore;

/// Spawn the cleanup task. It sweeps once per `interval`, starting one
/// interval after launch, and exits when `cancel` fires.
#[must_use]
pub fn spawn_session_cleanup(
    store: SessionStore,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("session cleanup shutting down");
                    break;
                }
                _ = ticker.tick() => match store.cleanup_stale().await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "cleaned up stale sessions"),
                    Err(err) => error!(?err, "session cleanup failed"),
                },
            }
        }
    })
}
