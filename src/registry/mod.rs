//! Process-wide market context: the (venue, pair) book table, fee tables,
//! per-venue update notifications and the shared halt signal.
//!
//! Built once at startup with [`MarketContext::new`] and handed to every
//! component that needs it; [`MarketContext::shutdown`] is the teardown.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::models::{Pair, Venue};
use crate::orderbook::OrderBook;
use crate::utils::{Shutdown, ShutdownHandle, shutdown_channel};

pub mod fees;

pub use fees::{FeeError, FeeSchedule, WithdrawalFee};

/// Publishes "order book updated" for one venue. Subscribers see a
/// monotonically increasing generation; bursts coalesce into one wakeup.
#[derive(Debug, Clone)]
pub struct UpdateNotifier {
    venue: Venue,
    tx: Arc<watch::Sender<u64>>,
}

impl UpdateNotifier {
    pub fn venue(&self) -> &Venue {
        &self.venue
    }

    pub fn notify(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }

    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }
}

pub struct MarketContext {
    books: HashMap<(Venue, Pair), Arc<OrderBook>>,
    listings: BTreeMap<Venue, Vec<Pair>>,
    fees: FeeSchedule,
    updates: HashMap<Venue, UpdateNotifier>,
    shutdown: ShutdownHandle,
}

impl MarketContext {
    /// Create an empty book for every listed (venue, pair).
    pub fn new(listings: &[(Venue, Vec<Pair>)], fees: FeeSchedule) -> Self {
        let mut books = HashMap::new();
        let mut table = BTreeMap::new();
        let mut updates = HashMap::new();
        for (venue, pairs) in listings {
            for pair in pairs {
                books
                    .entry((venue.clone(), pair.clone()))
                    .or_insert_with(|| Arc::new(OrderBook::new()));
            }
            let listed: &mut Vec<Pair> = table.entry(venue.clone()).or_default();
            listed.extend(pairs.iter().cloned());
            listed.sort();
            listed.dedup();
            updates.entry(venue.clone()).or_insert_with(|| {
                let (tx, _rx) = watch::channel(0u64);
                UpdateNotifier {
                    venue: venue.clone(),
                    tx: Arc::new(tx),
                }
            });
        }
        let (shutdown, _) = shutdown_channel();
        debug!(books = books.len(), venues = table.len(), "[INIT] market context built");
        Self {
            books,
            listings: table,
            fees,
            updates,
            shutdown,
        }
    }

    pub fn book(&self, venue: &Venue, pair: &Pair) -> Option<Arc<OrderBook>> {
        self.books.get(&(venue.clone(), pair.clone())).cloned()
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    pub fn venues(&self) -> impl Iterator<Item = &Venue> {
        self.listings.keys()
    }

    pub fn pairs_for(&self, venue: &Venue) -> &[Pair] {
        self.listings.get(venue).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn venues_for(&self, pair: &Pair) -> Vec<Venue> {
        self.listings
            .iter()
            .filter(|(_, pairs)| pairs.contains(pair))
            .map(|(venue, _)| venue.clone())
            .collect()
    }

    pub fn is_tradable(&self, pair: &Pair) -> bool {
        self.listings.values().any(|pairs| pairs.contains(pair))
    }

    pub fn notifier(&self, venue: &Venue) -> Option<UpdateNotifier> {
        self.updates.get(venue).cloned()
    }

    /// Receiver that wakes whenever any book on `venue` is updated.
    pub fn subscribe(&self, venue: &Venue) -> Option<watch::Receiver<u64>> {
        self.updates.get(venue).map(|notifier| notifier.tx.subscribe())
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Signal every task holding a [`Shutdown`] from this context to stop.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }
}
