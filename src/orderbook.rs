//! Local mirror of one venue's book for one pair.
//!
//! Each side is a [`SkipList`] keyed by price. Bids iterate highest first and
//! asks lowest first, so the best price on either side is the first entry.

use bigdecimal::BigDecimal;
use num_traits::FromPrimitive;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

use crate::models::{PriceLevel, Side};
use crate::skiplist::{Comparator, SkipList};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BookError {
    #[error("price {0} cannot be used as a book key")]
    InvalidPrice(f64),

    #[error("quantity {0} is not a valid depth")]
    InvalidQuantity(f64),
}

/// Price ordering strategy injected into each book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceOrder {
    /// Lowest price first (asks).
    Ascending,
    /// Highest price first (bids).
    Descending,
}

impl Comparator<BigDecimal> for PriceOrder {
    fn compare(&self, left: &BigDecimal, right: &BigDecimal) -> Ordering {
        match self {
            PriceOrder::Ascending => left.cmp(right),
            PriceOrder::Descending => right.cmp(left),
        }
    }
}

pub type BookSide = SkipList<BigDecimal, PriceLevel, PriceOrder>;

/// Convert a price into its exact decimal key. Every book path goes through
/// here so the same `f64` always maps to the same key.
pub fn price_key(price: f64) -> Result<BigDecimal, BookError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(BookError::InvalidPrice(price));
    }
    BigDecimal::from_f64(price).ok_or(BookError::InvalidPrice(price))
}

fn check_level(level: &PriceLevel) -> Result<(), BookError> {
    if !level.quantity.is_finite() || level.quantity < 0.0 {
        return Err(BookError::InvalidQuantity(level.quantity));
    }
    price_key(level.price).map(|_| ())
}

pub struct OrderBook {
    bids: BookSide,
    asks: BookSide,
}

impl fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderBook")
            .field("best_bid", &self.best_bid())
            .field("best_ask", &self.best_ask())
            .field("bid_depth", &self.bids.len())
            .field("ask_depth", &self.asks.len())
            .finish()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: SkipList::new(PriceOrder::Descending),
            asks: SkipList::new(PriceOrder::Ascending),
        }
    }

    fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Set the absolute depth at `price`. A quantity of zero removes the level.
    pub fn upsert(&self, side: Side, price: f64, quantity: f64) -> Result<(), BookError> {
        if !quantity.is_finite() || quantity < 0.0 {
            return Err(BookError::InvalidQuantity(quantity));
        }
        let key = price_key(price)?;
        let book = self.side(side);
        if quantity == 0.0 {
            book.delete(&key);
        } else {
            book.set(key, PriceLevel::new(price, quantity));
        }
        Ok(())
    }

    pub fn upsert_level(&self, side: Side, level: PriceLevel) -> Result<(), BookError> {
        self.upsert(side, level.price, level.quantity)
    }

    /// Upsert a batch of levels on both sides. Every level is checked before
    /// the first write, so a malformed batch leaves the book untouched.
    pub fn apply_levels(&self, bids: &[PriceLevel], asks: &[PriceLevel]) -> Result<(), BookError> {
        bids.iter().chain(asks).try_for_each(check_level)?;
        for level in bids {
            self.upsert_level(Side::Bid, *level)?;
        }
        for level in asks {
            self.upsert_level(Side::Ask, *level)?;
        }
        Ok(())
    }

    /// Replace the whole book with a snapshot.
    pub fn replace_all(&self, bids: &[PriceLevel], asks: &[PriceLevel]) -> Result<(), BookError> {
        bids.iter().chain(asks).try_for_each(check_level)?;
        self.clear();
        self.apply_levels(bids, asks)
    }

    pub fn remove(&self, side: Side, price: f64) -> Result<Option<PriceLevel>, BookError> {
        let key = price_key(price)?;
        Ok(self.side(side).delete(&key))
    }

    /// Take up to `quantity` out of the level at `price`, dropping the level
    /// once it is exhausted. Returns the depth left behind.
    ///
    /// This is a single-level read-modify-write: two concurrent consumers of
    /// the same level race and the last write wins.
    pub fn consume(&self, side: Side, price: f64, quantity: f64) -> Result<f64, BookError> {
        if !quantity.is_finite() || quantity < 0.0 {
            return Err(BookError::InvalidQuantity(quantity));
        }
        let key = price_key(price)?;
        let book = self.side(side);
        let Some(level) = book.get(&key) else {
            return Ok(0.0);
        };
        let remaining = level.quantity - quantity;
        if remaining <= 0.0 {
            book.delete(&key);
            Ok(0.0)
        } else {
            book.set(key, PriceLevel::new(level.price, remaining));
            Ok(remaining)
        }
    }

    pub fn level(&self, side: Side, price: f64) -> Result<Option<PriceLevel>, BookError> {
        let key = price_key(price)?;
        Ok(self.side(side).get(&key))
    }

    pub fn best(&self, side: Side) -> Option<PriceLevel> {
        self.side(side).seek_to_first()?.value()
    }

    /// Highest resident buy price.
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.best(Side::Bid)
    }

    /// Lowest resident sell price.
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.best(Side::Ask)
    }

    /// Furthest level from the touch: lowest bid or highest ask.
    pub fn worst(&self, side: Side) -> Option<PriceLevel> {
        self.side(side).seek_to_last()?.value()
    }

    pub fn top_n(&self, side: Side, n: usize) -> Vec<PriceLevel> {
        self.side(side).iter().take(n).map(|(_, level)| level).collect()
    }

    pub fn depth(&self, side: Side) -> usize {
        self.side(side).len()
    }

    /// True when either side has no levels.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() || self.asks.is_empty()
    }

    pub fn clear(&self) {
        self.bids.clear();
        self.asks.clear();
    }
}
