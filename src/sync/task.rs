//! Async drivers around [`BookSynchronizer`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{BookSynchronizer, SyncError, SyncOutcome, SyncState};
use crate::models::{DepthEvent, DepthSnapshot, Pair, Venue};
use crate::registry::UpdateNotifier;
use crate::utils::Shutdown;

/// Source of full book snapshots for a (venue, pair).
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, venue: &Venue, pair: &Pair) -> Result<DepthSnapshot, SyncError>;
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Pause before refetching after a failed or rejected snapshot.
    pub retry_delay: Duration,
    /// Resync automatically after a desync. When off the book stays halted.
    pub resync_on_desync: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            resync_on_desync: true,
        }
    }
}

/// Drive one book from an incremental event queue.
///
/// Fetches a snapshot while buffering events, splices, then applies events as
/// they arrive and publishes on `notifier` after every applied change. Runs
/// until `shutdown` fires or the event queue closes, and hands the
/// synchronizer back.
pub async fn run_reconciler(
    mut sync: BookSynchronizer,
    source: Arc<dyn SnapshotSource>,
    mut events: mpsc::Receiver<DepthEvent>,
    notifier: UpdateNotifier,
    config: ReconcilerConfig,
    mut shutdown: Shutdown,
) -> BookSynchronizer {
    let venue = sync.venue().clone();
    let pair = sync.pair().clone();
    let mut fetch_delay: Option<Duration> = None;

    'outer: loop {
        match sync.state() {
            SyncState::Uninitialized => {
                if let Err(err) = sync.start() {
                    error!(%venue, %pair, error = %err, "[SYNC] start failed");
                    break;
                }
            }
            SyncState::SnapshotPending => {}
            SyncState::Desynced if config.resync_on_desync => {
                sync.resync();
                continue;
            }
            SyncState::Buffering | SyncState::Synced | SyncState::Desynced => {}
        }

        // Snapshot phase: keep queueing events while the fetch is in flight.
        if sync.state() == SyncState::SnapshotPending {
            let delay = fetch_delay.take();
            let fetch = async {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                source.fetch_snapshot(&venue, &pair).await
            };
            tokio::pin!(fetch);

            let fetched = loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break 'outer,
                    res = &mut fetch => break res,
                    ev = events.recv() => {
                        let Some(ev) = ev else { break 'outer };
                        if let Err(err) = sync.on_event(ev) {
                            error!(%venue, %pair, error = %err, "[SYNC] event rejected while awaiting snapshot");
                            if sync.state() == SyncState::Desynced {
                                continue 'outer;
                            }
                        }
                    }
                }
            };

            match fetched.and_then(|snapshot| sync.apply_snapshot(snapshot)) {
                Ok(replayed) => {
                    notifier.notify();
                    debug!(%venue, %pair, replayed, "[SYNC] buffered events replayed");
                }
                Err(err) if sync.state() == SyncState::Desynced => {
                    error!(%venue, %pair, error = %err, "[SYNC] desync during replay");
                    continue;
                }
                Err(err) => {
                    warn!(%venue, %pair, error = %err, retry_in = ?config.retry_delay, "[SYNC] snapshot unavailable");
                    fetch_delay = Some(config.retry_delay);
                    continue;
                }
            }
        }

        // Live phase.
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break 'outer,
                ev = events.recv() => {
                    let Some(ev) = ev else { break 'outer };
                    match sync.on_event(ev) {
                        Ok(SyncOutcome::Applied) => notifier.notify(),
                        Ok(outcome) => debug!(%venue, %pair, ?outcome, "[SYNC] event skipped"),
                        Err(SyncError::Halted) => {}
                        // Gaps, overflow and malformed levels all leave the book halted.
                        Err(err) if sync.state() == SyncState::Desynced => {
                            error!(%venue, %pair, error = %err, "[SYNC] desync");
                            if config.resync_on_desync {
                                continue 'outer;
                            }
                            warn!(%venue, %pair, "[SYNC] automatic resync disabled; book halted");
                        }
                        Err(err) => warn!(%venue, %pair, error = %err, "[SYNC] event rejected"),
                    }
                }
            }
        }
    }

    info!(%venue, %pair, state = %sync.state(), "[SYNC] reconciler stopped");
    sync
}

/// Periodically replace a book with a fresh snapshot, for venues without an
/// incremental stream.
pub async fn run_snapshot_poller(
    mut sync: BookSynchronizer,
    source: Arc<dyn SnapshotSource>,
    notifier: UpdateNotifier,
    interval: Duration,
    mut shutdown: Shutdown,
) -> BookSynchronizer {
    let venue = sync.venue().clone();
    let pair = sync.pair().clone();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }
        match source.fetch_snapshot(&venue, &pair).await {
            Ok(snapshot) => match sync.reload(snapshot) {
                Ok(_) => notifier.notify(),
                Err(err) => warn!(%venue, %pair, error = %err, "[SYNC] snapshot rejected"),
            },
            Err(err) => warn!(%venue, %pair, error = %err, "[SYNC] snapshot poll failed"),
        }
    }

    info!(%venue, %pair, "[SYNC] snapshot poller stopped");
    sync
}
