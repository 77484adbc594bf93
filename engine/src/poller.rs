//! The consistency poller: the low-frequency fallback that heals divergence
//! caused by dropped events or missed reconnect windows.
//!
//! On a fixed interval, and on every successful (re)connect, a full snapshot
//! re-fetch is forced through the store. The poller only *schedules* the
//! fetch; the reducer applies the diff under the store lock, so polling can
//! never race the booking pipeline's own rollback logic.

use crate::reconciler::{SyncAction, SyncStore};
use crate::types::ConnectionState;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::watch;

/// Drive the poller until `stop` flips or the store shuts down
///
/// `actions` must be subscribed before the event channel is spawned, so the
/// very first `connected` transition cannot slip past the poller.
pub async fn run(
    store: SyncStore,
    interval: Duration,
    mut actions: broadcast::Receiver<SyncAction>,
    mut stop: watch::Receiver<bool>,
) {
    // First tick comes after one full interval; the engine start sequence
    // already issues the initial fetch.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracing::debug!("periodic consistency re-fetch");
                if refresh(&store).await {
                    break;
                }
            },
            result = actions.recv() => match result {
                Ok(SyncAction::ConnectionChanged { state: ConnectionState::Connected }) => {
                    tracing::debug!("re-fetch on (re)connect");
                    if refresh(&store).await {
                        break;
                    }
                },
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "poller lagged behind action broadcast");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            },
        }
    }

    tracing::debug!("consistency poller stopped");
}

/// Send one refresh; true when the store is shutting down.
async fn refresh(store: &SyncStore) -> bool {
    match store.send(SyncAction::RefreshSnapshot).await {
        Ok(_) => false,
        Err(err) => {
            tracing::debug!(error = %err, "poller stopping: store rejected refresh");
            true
        },
    }
}
