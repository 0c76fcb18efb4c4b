//! Shared data structures used throughout the application.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Trading venue identifier, e.g. "Binance".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Venue(String);

impl Venue {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn binance() -> Self {
        Self::new("Binance")
    }

    pub fn indodax() -> Self {
        Self::new("Indodax")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Currency ticker, e.g. "ETH".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self(ticker.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Currency pair quoted as `BASE/QUOTE`. Buying spends quote and receives base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pair {
    pub base: Currency,
    pub quote: Currency,
}

impl Pair {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: Currency::new(base),
            quote: Currency::new(quote),
        }
    }

    /// Parse a `"ETH/USDT"` style symbol.
    pub fn parse(symbol: &str) -> Option<Self> {
        let (base, quote) = symbol.split_once('/')?;
        if base.is_empty() || quote.is_empty() {
            return None;
        }
        Some(Self::new(base.trim(), quote.trim()))
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Side of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// Direction of a trading leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The book side a taker order of this direction trades against.
    pub fn opposite_book_side(self) -> Side {
        match self {
            OrderSide::Buy => Side::Ask,
            OrderSide::Sell => Side::Bid,
        }
    }
}

/// One resting price level. A quantity of zero means "remove".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

impl PriceLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}

/// Full book snapshot as returned by a venue's snapshot endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthSnapshot {
    pub sequence: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Incremental book update covering sequence range `first_update_seq..=final_update_seq`.
/// Quantities are absolute depth at the price, not deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthEvent {
    pub venue: Venue,
    pub pair: Pair,
    pub first_update_seq: u64,
    pub final_update_seq: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Parse `[["price", "qty"], ...]` string levels, skipping malformed entries.
pub fn parse_string_levels(raw: &[[String; 2]]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|lvl| Some(PriceLevel::new(lvl[0].parse().ok()?, lvl[1].parse().ok()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_parses_and_displays() {
        let pair = Pair::parse("eth/usdt").expect("valid symbol");
        assert_eq!(pair.base, Currency::new("ETH"));
        assert_eq!(pair.quote, Currency::new("USDT"));
        assert_eq!(pair.to_string(), "ETH/USDT");
        assert!(Pair::parse("ETHUSDT").is_none());
        assert!(Pair::parse("/USDT").is_none());
    }

    #[test]
    fn buy_trades_against_asks() {
        assert_eq!(OrderSide::Buy.opposite_book_side(), Side::Ask);
        assert_eq!(OrderSide::Sell.opposite_book_side(), Side::Bid);
    }

    #[test]
    fn string_levels_skip_garbage() {
        let raw = vec![
            ["100.5".to_string(), "2.25".to_string()],
            ["bad".to_string(), "1".to_string()],
        ];
        assert_eq!(parse_string_levels(&raw), vec![PriceLevel::new(100.5, 2.25)]);
    }
}
