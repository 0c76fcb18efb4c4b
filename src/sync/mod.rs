//! Snapshot + incremental-event reconciliation for one (venue, pair) book.
//!
//! [`BookSynchronizer`] is the state machine; [`task`] drives it from an event
//! queue and a [`task::SnapshotSource`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{DepthEvent, DepthSnapshot, Pair, Venue};
use crate::orderbook::{BookError, OrderBook};

pub mod task;

pub use task::{ReconcilerConfig, SnapshotSource, run_reconciler, run_snapshot_poller};

/// Default cap on events queued while waiting for a snapshot.
pub const DEFAULT_MAX_BUFFERED: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    SnapshotPending,
    Buffering,
    Synced,
    /// Contiguity was lost. Nothing is applied until [`BookSynchronizer::resync`].
    Desynced,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::SnapshotPending => "snapshot-pending",
            SyncState::Buffering => "buffering",
            SyncState::Synced => "synced",
            SyncState::Desynced => "desynced",
        };
        f.write_str(name)
    }
}

/// What happened to one incoming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Queued until the snapshot arrives.
    Buffered,
    /// Entirely covered by the snapshot; dropped.
    Stale,
    /// Already applied (redelivery); dropped.
    Duplicate,
    Applied,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    #[error("sequence gap on {venue} {pair}: expected first update {expected}, got {first}..={last}")]
    Desync {
        venue: Venue,
        pair: Pair,
        expected: u64,
        first: u64,
        last: u64,
    },

    #[error("more than {limit} events buffered for {venue} {pair} before a snapshot loaded")]
    BufferOverflow { venue: Venue, pair: Pair, limit: usize },

    #[error("snapshot fetch failed: {0}")]
    Fetch(String),

    #[error("event for {venue} {pair} routed to the wrong book")]
    WrongBook { venue: Venue, pair: Pair },

    #[error("cannot {action} while {state}")]
    InvalidState { state: SyncState, action: &'static str },

    #[error("book is halted after a desync; resync required")]
    Halted,

    #[error(transparent)]
    Book(#[from] BookError),
}

impl SyncError {
    /// Errors after which the book must be resynchronized.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            SyncError::Desync { .. } | SyncError::BufferOverflow { .. } | SyncError::Halted
        )
    }
}

/// Which incremental range has been applied on top of which snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCursor {
    pub last_snapshot_seq: Option<u64>,
    pub last_applied_seq: u64,
    pub state: SyncState,
}

impl Default for SequenceCursor {
    fn default() -> Self {
        Self {
            last_snapshot_seq: None,
            last_applied_seq: 0,
            state: SyncState::Uninitialized,
        }
    }
}

/// Keeps one local [`OrderBook`] consistent with a venue's snapshot and
/// incremental stream. Sole writer of that book apart from evaluator tracebacks.
pub struct BookSynchronizer {
    venue: Venue,
    pair: Pair,
    book: Arc<OrderBook>,
    cursor: SequenceCursor,
    buffer: VecDeque<DepthEvent>,
    max_buffered: usize,
}

impl BookSynchronizer {
    pub fn new(venue: Venue, pair: Pair, book: Arc<OrderBook>) -> Self {
        Self::with_buffer_limit(venue, pair, book, DEFAULT_MAX_BUFFERED)
    }

    pub fn with_buffer_limit(venue: Venue, pair: Pair, book: Arc<OrderBook>, max_buffered: usize) -> Self {
        Self {
            venue,
            pair,
            book,
            cursor: SequenceCursor::default(),
            buffer: VecDeque::new(),
            max_buffered,
        }
    }

    pub fn venue(&self) -> &Venue {
        &self.venue
    }

    pub fn pair(&self) -> &Pair {
        &self.pair
    }

    pub fn book(&self) -> &Arc<OrderBook> {
        &self.book
    }

    pub fn state(&self) -> SyncState {
        self.cursor.state
    }

    pub fn cursor(&self) -> SequenceCursor {
        self.cursor
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Uninitialized -> SnapshotPending. The caller fetches a snapshot next.
    pub fn start(&mut self) -> Result<(), SyncError> {
        if self.cursor.state != SyncState::Uninitialized {
            return Err(SyncError::InvalidState {
                state: self.cursor.state,
                action: "start",
            });
        }
        self.cursor.state = SyncState::SnapshotPending;
        debug!(venue = %self.venue, pair = %self.pair, "[SYNC] awaiting snapshot");
        Ok(())
    }

    /// Feed one incremental event through the state machine.
    pub fn on_event(&mut self, event: DepthEvent) -> Result<SyncOutcome, SyncError> {
        if event.venue != self.venue || event.pair != self.pair {
            return Err(SyncError::WrongBook {
                venue: event.venue,
                pair: event.pair,
            });
        }
        if let Some(snapshot_seq) = self.cursor.last_snapshot_seq {
            if event.final_update_seq <= snapshot_seq {
                return Ok(SyncOutcome::Stale);
            }
        }
        match self.cursor.state {
            SyncState::Uninitialized | SyncState::SnapshotPending => self.buffer_event(event),
            SyncState::Buffering => self.splice(event),
            SyncState::Synced => self.apply_contiguous(event),
            SyncState::Desynced => Err(SyncError::Halted),
        }
    }

    /// Load a snapshot, then replay whatever was buffered while it was in
    /// flight. Returns how many buffered events were applied.
    pub fn apply_snapshot(&mut self, snapshot: DepthSnapshot) -> Result<usize, SyncError> {
        if self.cursor.state != SyncState::SnapshotPending {
            return Err(SyncError::InvalidState {
                state: self.cursor.state,
                action: "apply a snapshot",
            });
        }
        self.book.replace_all(&snapshot.bids, &snapshot.asks)?;
        self.cursor.last_snapshot_seq = Some(snapshot.sequence);
        self.cursor.last_applied_seq = snapshot.sequence;
        self.cursor.state = SyncState::Buffering;
        info!(
            venue = %self.venue,
            pair = %self.pair,
            seq = snapshot.sequence,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            buffered = self.buffer.len(),
            "[SYNC] snapshot loaded"
        );

        let mut applied = 0;
        while let Some(event) = self.buffer.pop_front() {
            if self.on_event(event)? == SyncOutcome::Applied {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Replace the book with a fresh snapshot regardless of current state.
    /// Used for venues that only publish snapshots.
    pub fn reload(&mut self, snapshot: DepthSnapshot) -> Result<usize, SyncError> {
        self.reset();
        self.cursor.state = SyncState::SnapshotPending;
        self.apply_snapshot(snapshot)
    }

    /// Explicit recovery after a desync: flush the buffer and return to
    /// Uninitialized so the driver can start over with a fresh snapshot.
    pub fn resync(&mut self) {
        warn!(
            venue = %self.venue,
            pair = %self.pair,
            state = %self.cursor.state,
            dropped = self.buffer.len(),
            "[SYNC] resynchronizing"
        );
        self.reset();
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = SequenceCursor::default();
    }

    fn buffer_event(&mut self, event: DepthEvent) -> Result<SyncOutcome, SyncError> {
        if self.buffer.len() >= self.max_buffered {
            self.halt();
            return Err(SyncError::BufferOverflow {
                venue: self.venue.clone(),
                pair: self.pair.clone(),
                limit: self.max_buffered,
            });
        }
        self.buffer.push_back(event);
        Ok(SyncOutcome::Buffered)
    }

    /// First event after the snapshot must straddle `snapshot_seq + 1`.
    fn splice(&mut self, event: DepthEvent) -> Result<SyncOutcome, SyncError> {
        let expected = self.cursor.last_applied_seq + 1;
        if event.first_update_seq <= expected && expected <= event.final_update_seq {
            self.apply(event)?;
            self.cursor.state = SyncState::Synced;
            debug!(venue = %self.venue, pair = %self.pair, seq = self.cursor.last_applied_seq, "[SYNC] synced");
            return Ok(SyncOutcome::Applied);
        }
        Err(self.gap(&event, expected))
    }

    fn apply_contiguous(&mut self, event: DepthEvent) -> Result<SyncOutcome, SyncError> {
        if event.final_update_seq <= self.cursor.last_applied_seq {
            return Ok(SyncOutcome::Duplicate);
        }
        let expected = self.cursor.last_applied_seq + 1;
        if event.first_update_seq != expected {
            return Err(self.gap(&event, expected));
        }
        self.apply(event)?;
        Ok(SyncOutcome::Applied)
    }

    fn apply(&mut self, event: DepthEvent) -> Result<(), SyncError> {
        if let Err(err) = self.book.apply_levels(&event.bids, &event.asks) {
            // Skipping a malformed event would break contiguity just the same.
            self.halt();
            return Err(err.into());
        }
        self.cursor.last_applied_seq = event.final_update_seq;
        Ok(())
    }

    fn gap(&mut self, event: &DepthEvent, expected: u64) -> SyncError {
        self.halt();
        SyncError::Desync {
            venue: self.venue.clone(),
            pair: self.pair.clone(),
            expected,
            first: event.first_update_seq,
            last: event.final_update_seq,
        }
    }

    /// Enter Desynced. The book keeps the last consistent state until the
    /// next snapshot replaces it.
    fn halt(&mut self) {
        self.cursor.state = SyncState::Desynced;
        warn!(
            venue = %self.venue,
            pair = %self.pair,
            last_applied = self.cursor.last_applied_seq,
            "[SYNC] halted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PriceLevel, Side};

    fn venue() -> Venue {
        Venue::binance()
    }

    fn pair() -> Pair {
        Pair::new("ETH", "USDT")
    }

    fn event(first: u64, last: u64, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> DepthEvent {
        DepthEvent {
            venue: venue(),
            pair: pair(),
            first_update_seq: first,
            final_update_seq: last,
            bids: bids.iter().map(|&(p, q)| PriceLevel::new(p, q)).collect(),
            asks: asks.iter().map(|&(p, q)| PriceLevel::new(p, q)).collect(),
        }
    }

    fn snapshot(seq: u64) -> DepthSnapshot {
        DepthSnapshot {
            sequence: seq,
            bids: vec![PriceLevel::new(100.0, 1.0), PriceLevel::new(99.0, 2.0)],
            asks: vec![PriceLevel::new(101.0, 1.0), PriceLevel::new(102.0, 2.0)],
        }
    }

    fn synced_at(seq: u64) -> BookSynchronizer {
        let mut sync = BookSynchronizer::new(venue(), pair(), Arc::new(OrderBook::new()));
        sync.start().unwrap();
        sync.apply_snapshot(snapshot(seq)).unwrap();
        sync
    }

    #[test]
    fn lifecycle_reaches_synced() {
        let mut sync = BookSynchronizer::new(venue(), pair(), Arc::new(OrderBook::new()));
        assert_eq!(sync.state(), SyncState::Uninitialized);
        sync.start().unwrap();
        assert_eq!(sync.state(), SyncState::SnapshotPending);
        sync.apply_snapshot(snapshot(100)).unwrap();
        assert_eq!(sync.state(), SyncState::Buffering);
        assert_eq!(sync.cursor().last_applied_seq, 100);
        assert_eq!(sync.on_event(event(101, 105, &[(100.5, 3.0)], &[])).unwrap(), SyncOutcome::Applied);
        assert_eq!(sync.state(), SyncState::Synced);
        assert_eq!(sync.cursor().last_applied_seq, 105);
        assert_eq!(sync.book().best_bid(), Some(PriceLevel::new(100.5, 3.0)));
    }

    #[test]
    fn events_before_snapshot_are_buffered_not_applied() {
        let mut sync = BookSynchronizer::new(venue(), pair(), Arc::new(OrderBook::new()));
        sync.start().unwrap();
        assert_eq!(sync.on_event(event(95, 98, &[(50.0, 1.0)], &[])).unwrap(), SyncOutcome::Buffered);
        assert_eq!(sync.on_event(event(99, 103, &[(98.0, 4.0)], &[])).unwrap(), SyncOutcome::Buffered);
        assert_eq!(sync.on_event(event(104, 104, &[], &[(101.0, 0.0)])).unwrap(), SyncOutcome::Buffered);
        assert!(sync.book().best_bid().is_none());

        let applied = sync.apply_snapshot(snapshot(100)).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(sync.buffered(), 0);
        assert_eq!(sync.state(), SyncState::Synced);
        assert_eq!(sync.cursor().last_applied_seq, 104);
        // stale range never touched the book
        assert!(sync.book().level(Side::Bid, 50.0).unwrap().is_none());
        assert_eq!(sync.book().level(Side::Bid, 98.0).unwrap(), Some(PriceLevel::new(98.0, 4.0)));
        assert_eq!(sync.book().best_ask().map(|l| l.price), Some(102.0));
    }

    #[test]
    fn stale_event_is_a_noop() {
        let mut sync = synced_at(100);
        assert_eq!(sync.on_event(event(90, 100, &[(100.0, 0.0)], &[])).unwrap(), SyncOutcome::Stale);
        assert_eq!(sync.book().best_bid(), Some(PriceLevel::new(100.0, 1.0)));
        assert_eq!(sync.state(), SyncState::Buffering);
    }

    #[test]
    fn snapshot_plus_one_applies() {
        let mut sync = synced_at(100);
        assert_eq!(sync.on_event(event(101, 101, &[], &[(101.0, 5.0)])).unwrap(), SyncOutcome::Applied);
        assert_eq!(sync.book().best_ask(), Some(PriceLevel::new(101.0, 5.0)));
    }

    #[test]
    fn gap_after_sync_is_rejected_and_book_unchanged_by_it() {
        let mut sync = synced_at(100);
        sync.on_event(event(101, 102, &[], &[])).unwrap();
        let err = sync.on_event(event(104, 105, &[(100.0, 9.0)], &[])).unwrap_err();
        assert_eq!(
            err,
            SyncError::Desync {
                venue: venue(),
                pair: pair(),
                expected: 103,
                first: 104,
                last: 105,
            }
        );
        assert!(err.requires_resync());
        assert_eq!(sync.state(), SyncState::Desynced);
        assert_eq!(sync.book().best_bid(), Some(PriceLevel::new(100.0, 1.0)));
        assert_eq!(sync.book().depth(Side::Bid), 2);
        assert_eq!(sync.cursor().last_applied_seq, 102);
        // everything is refused until resync
        assert_eq!(sync.on_event(event(103, 103, &[], &[])), Err(SyncError::Halted));
    }

    #[test]
    fn snapshot_older_than_stream_is_a_desync() {
        let mut sync = synced_at(100);
        assert!(matches!(
            sync.on_event(event(150, 160, &[], &[])),
            Err(SyncError::Desync { expected: 101, .. })
        ));
    }

    #[test]
    fn redelivered_event_is_a_duplicate() {
        let mut sync = synced_at(100);
        sync.on_event(event(101, 110, &[(100.0, 7.0)], &[])).unwrap();
        sync.on_event(event(111, 120, &[(100.0, 8.0)], &[])).unwrap();
        assert_eq!(sync.on_event(event(101, 110, &[(100.0, 7.0)], &[])).unwrap(), SyncOutcome::Duplicate);
        assert_eq!(sync.book().best_bid(), Some(PriceLevel::new(100.0, 8.0)));
        assert_eq!(sync.state(), SyncState::Synced);
    }

    #[test]
    fn resync_restarts_from_uninitialized() {
        let mut sync = synced_at(100);
        let _ = sync.on_event(event(200, 201, &[], &[]));
        assert_eq!(sync.state(), SyncState::Desynced);
        sync.resync();
        assert_eq!(sync.cursor(), SequenceCursor::default());
        sync.start().unwrap();
        sync.apply_snapshot(snapshot(300)).unwrap();
        assert_eq!(sync.on_event(event(301, 302, &[], &[])).unwrap(), SyncOutcome::Applied);
    }

    #[test]
    fn buffer_is_bounded() {
        let mut sync = BookSynchronizer::with_buffer_limit(venue(), pair(), Arc::new(OrderBook::new()), 2);
        sync.start().unwrap();
        sync.on_event(event(1, 1, &[], &[])).unwrap();
        sync.on_event(event(2, 2, &[], &[])).unwrap();
        assert!(matches!(
            sync.on_event(event(3, 3, &[], &[])),
            Err(SyncError::BufferOverflow { limit: 2, .. })
        ));
        assert_eq!(sync.state(), SyncState::Desynced);
    }

    #[test]
    fn wrong_book_and_wrong_state_are_reported() {
        let mut sync = BookSynchronizer::new(venue(), pair(), Arc::new(OrderBook::new()));
        let mut foreign = event(1, 1, &[], &[]);
        foreign.pair = Pair::new("BTC", "USDT");
        assert!(matches!(sync.on_event(foreign), Err(SyncError::WrongBook { .. })));
        assert!(matches!(
            sync.apply_snapshot(snapshot(1)),
            Err(SyncError::InvalidState { state: SyncState::Uninitialized, .. })
        ));
    }

    #[test]
    fn malformed_event_halts_without_partial_apply() {
        let mut sync = synced_at(100);
        let err = sync
            .on_event(event(101, 101, &[(100.0, 5.0), (f64::NAN, 1.0)], &[]))
            .unwrap_err();
        assert!(matches!(err, SyncError::Book(BookError::InvalidPrice(_))));
        assert_eq!(sync.state(), SyncState::Desynced);
        assert_eq!(sync.book().best_bid(), Some(PriceLevel::new(100.0, 1.0)));
    }

    #[test]
    fn reload_replaces_book_in_any_state() {
        let mut sync = synced_at(100);
        sync.on_event(event(101, 101, &[(100.0, 4.0)], &[])).unwrap();
        let fresh = DepthSnapshot {
            sequence: 2,
            bids: vec![PriceLevel::new(10.0, 1.0)],
            asks: vec![PriceLevel::new(11.0, 1.0)],
        };
        assert_eq!(sync.reload(fresh).unwrap(), 0);
        assert_eq!(sync.state(), SyncState::Buffering);
        assert_eq!(sync.book().top_n(Side::Bid, 5), vec![PriceLevel::new(10.0, 1.0)]);
    }
}
