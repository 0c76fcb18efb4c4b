use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Currency, OrderSide, Pair, Side, Venue};
use crate::orderbook::{BookError, OrderBook};
use crate::registry::FeeError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("fee table lookup failed: {0}")]
    Configuration(#[from] FeeError),

    #[error("leg {leg}: holding {found}, expected {expected}")]
    ChainIntegrity {
        leg: usize,
        expected: Currency,
        found: Currency,
    },

    #[error("cycle has no legs")]
    EmptyCycle,

    #[error("no book registered for {venue} {pair}")]
    MissingBook { venue: Venue, pair: Pair },

    #[error("{venue} {pair} has no {side:?} levels")]
    EmptySide { venue: Venue, pair: Pair, side: Side },

    #[error(transparent)]
    Book(#[from] BookError),
}

/// One directional trade: buy or sell `pair` on `venue`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Leg {
    pub pair: Pair,
    pub venue: Venue,
    pub side: OrderSide,
}

impl Leg {
    pub fn new(pair: Pair, venue: Venue, side: OrderSide) -> Self {
        Self { pair, venue, side }
    }

    pub fn buy(pair: Pair, venue: Venue) -> Self {
        Self::new(pair, venue, OrderSide::Buy)
    }

    pub fn sell(pair: Pair, venue: Venue) -> Self {
        Self::new(pair, venue, OrderSide::Sell)
    }

    /// Currency given up by this leg.
    pub fn spends(&self) -> &Currency {
        match self.side {
            OrderSide::Buy => &self.pair.quote,
            OrderSide::Sell => &self.pair.base,
        }
    }

    /// Currency obtained by this leg.
    pub fn receives(&self) -> &Currency {
        match self.side {
            OrderSide::Buy => &self.pair.base,
            OrderSide::Sell => &self.pair.quote,
        }
    }

    /// Book side this leg takes liquidity from.
    pub fn book_side(&self) -> Side {
        self.side.opposite_book_side()
    }

    /// Price conversion applied to the held amount.
    pub fn operator(&self) -> Operator {
        match self.side {
            OrderSide::Buy => Operator::Divide,
            OrderSide::Sell => Operator::Multiply,
        }
    }
}

/// Closed chain of legs. Validated once, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cycle {
    id: String,
    legs: Vec<Leg>,
}

impl Cycle {
    /// Each leg must spend what the previous one received, and the last leg
    /// must return the currency the first one spends.
    pub fn new(id: impl Into<String>, legs: Vec<Leg>) -> Result<Self, EvalError> {
        let Some(last) = legs.last() else {
            return Err(EvalError::EmptyCycle);
        };
        let mut held = last.receives();
        for (i, leg) in legs.iter().enumerate() {
            if leg.spends() != held {
                return Err(EvalError::ChainIntegrity {
                    leg: i,
                    expected: leg.spends().clone(),
                    found: held.clone(),
                });
            }
            held = leg.receives();
        }
        Ok(Self { id: id.into(), legs })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    pub fn start_currency(&self) -> &Currency {
        // non-empty by construction
        self.legs[0].spends()
    }

    pub fn venues(&self) -> Vec<Venue> {
        let set: BTreeSet<&Venue> = self.legs.iter().map(|leg| &leg.venue).collect();
        set.into_iter().cloned().collect()
    }

    /// Whether leaving leg `index` moves the balance to another venue.
    pub fn crosses_venue_after(&self, index: usize) -> bool {
        let next = (index + 1) % self.legs.len();
        self.legs[index].venue != self.legs[next].venue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Multiply,
    Divide,
}

impl Operator {
    pub fn apply(self, amount: f64, operand: f64) -> f64 {
        match self {
            Operator::Multiply => amount * operand,
            Operator::Divide => amount / operand,
        }
    }

    pub fn invert(self, amount: f64, operand: f64) -> f64 {
        match self {
            Operator::Multiply => amount / operand,
            Operator::Divide => amount * operand,
        }
    }
}

/// Starting amounts for the two forward trackers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Notionals {
    /// Depth-unconstrained tracker.
    pub start_quantity: f64,
    /// Depth-constrained tracker.
    pub start_funds: f64,
}

impl Default for Notionals {
    fn default() -> Self {
        Self {
            start_quantity: 1000.0,
            start_funds: 10_000.0,
        }
    }
}

/// Amounts held between legs during one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub currency: Currency,
    pub quantity: f64,
    pub funds: f64,
}

/// One recorded forward transformation, replayed in reverse by the traceback.
#[derive(Debug, Clone)]
pub struct Step {
    pub leg: Leg,
    pub book: Arc<OrderBook>,
    pub operator: Operator,
    /// Best price read on the opposite side.
    pub price: f64,
    /// Depth resident at `price` when it was read.
    pub level_quantity: f64,
    pub trading_fee: f64,
    /// Withdrawal fee was charged on the leg's proceeds.
    pub withdrawn: bool,
}

#[derive(Debug, Clone)]
pub struct ForwardPass {
    pub start: Notionals,
    pub quantity: f64,
    pub funds: f64,
    pub steps: Vec<Step>,
}

impl ForwardPass {
    pub fn is_profitable(&self) -> bool {
        self.quantity > self.start.start_quantity && self.funds > 0.0
    }
}

/// Depth taken from one level by a traceback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consumption {
    pub venue: Venue,
    pub pair: Pair,
    pub side: Side,
    pub price: f64,
    /// Base-currency amount removed from the level.
    pub quantity: f64,
}

/// Result of a traceback: what the cycle costs and what it takes from each book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    /// Start-currency amount needed to realize `end_funds`.
    pub start_funds: f64,
    pub end_funds: f64,
    /// Depth-unconstrained tracker at the end of the forward pass.
    pub quantity: f64,
    pub consumed: Vec<Consumption>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Profitable(Trade),
    /// Rates are profitable but the depth at the touched levels is not: the
    /// start amount exceeds what comes back.
    DepthLimited(Trade),
    NotProfitable {
        start_quantity: f64,
        quantity: f64,
        funds: f64,
    },
}

/// Outcome without its payload, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Profitable,
    DepthLimited,
    NotProfitable,
}

impl Outcome {
    pub fn is_profitable(&self) -> bool {
        matches!(self, Outcome::Profitable(_))
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Profitable(_) => OutcomeKind::Profitable,
            Outcome::DepthLimited(_) => OutcomeKind::DepthLimited,
            Outcome::NotProfitable { .. } => OutcomeKind::NotProfitable,
        }
    }

    pub fn trade(&self) -> Option<&Trade> {
        match self {
            Outcome::Profitable(trade) | Outcome::DepthLimited(trade) => Some(trade),
            Outcome::NotProfitable { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_usdt() -> Pair {
        Pair::new("ETH", "USDT")
    }

    #[test]
    fn leg_currency_flow() {
        let buy = Leg::buy(eth_usdt(), Venue::binance());
        assert_eq!(buy.spends(), &Currency::new("USDT"));
        assert_eq!(buy.receives(), &Currency::new("ETH"));
        assert_eq!(buy.book_side(), Side::Ask);
        let sell = Leg::sell(eth_usdt(), Venue::binance());
        assert_eq!(sell.spends(), &Currency::new("ETH"));
        assert_eq!(sell.book_side(), Side::Bid);
    }

    #[test]
    fn cycle_must_close() {
        let ok = Cycle::new(
            "tri",
            vec![
                Leg::buy(eth_usdt(), Venue::binance()),
                Leg::sell(Pair::new("ETH", "IDR"), Venue::indodax()),
                Leg::buy(Pair::new("USDT", "IDR"), Venue::indodax()),
            ],
        )
        .unwrap();
        assert_eq!(ok.start_currency(), &Currency::new("USDT"));
        assert_eq!(ok.venues(), vec![Venue::binance(), Venue::indodax()]);
        assert!(ok.crosses_venue_after(0));
        assert!(!ok.crosses_venue_after(1));
        assert!(ok.crosses_venue_after(2));

        let open = Cycle::new(
            "open",
            vec![
                Leg::buy(eth_usdt(), Venue::binance()),
                Leg::sell(Pair::new("ETH", "IDR"), Venue::indodax()),
            ],
        );
        assert_eq!(
            open,
            Err(EvalError::ChainIntegrity {
                leg: 0,
                expected: Currency::new("USDT"),
                found: Currency::new("IDR"),
            })
        );
        assert_eq!(Cycle::new("none", vec![]), Err(EvalError::EmptyCycle));
    }

    #[test]
    fn operators_invert() {
        let x = Operator::Divide.apply(300.0, 150.0);
        assert_eq!(x, 2.0);
        assert_eq!(Operator::Divide.invert(x, 150.0), 300.0);
        assert_eq!(Operator::Multiply.invert(Operator::Multiply.apply(2.0, 4.0), 4.0), 2.0);
    }
}
