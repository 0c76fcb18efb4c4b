//! Static venue fee tables.

use std::collections::HashMap;
use thiserror::Error;

use crate::models::{Currency, Venue};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeeError {
    #[error("venue {0} is unrecognized")]
    UnknownVenue(Venue),

    #[error("currency {currency} unrecognized in {venue}")]
    UnknownCurrency { venue: Venue, currency: Currency },
}

/// Cost of moving a balance off a venue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WithdrawalFee {
    Flat(f64),
    /// `max(rate * quantity, minimum)`
    Proportional { rate: f64, minimum: f64 },
}

impl WithdrawalFee {
    pub fn amount(&self, quantity: f64) -> f64 {
        match *self {
            WithdrawalFee::Flat(fee) => fee,
            WithdrawalFee::Proportional { rate, minimum } => (rate * quantity).max(minimum),
        }
    }
}

/// Proportional taker fees per venue and withdrawal costs per (venue, currency).
#[derive(Debug, Clone, Default)]
pub struct FeeSchedule {
    trading: HashMap<Venue, f64>,
    withdrawal: HashMap<(Venue, Currency), WithdrawalFee>,
}

impl FeeSchedule {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fee tables for the Binance / Indodax venues the bot ships with.
    pub fn standard() -> Self {
        let binance = Venue::binance();
        let indodax = Venue::indodax();
        Self::empty()
            .with_trading_fee(binance.clone(), 0.001)
            // market orders only
            .with_trading_fee(indodax.clone(), 0.003)
            .with_withdrawal_fee(binance.clone(), Currency::new("ETH"), WithdrawalFee::Flat(0.01))
            .with_withdrawal_fee(binance, Currency::new("USDT"), WithdrawalFee::Flat(2.0))
            .with_withdrawal_fee(indodax.clone(), Currency::new("ETH"), WithdrawalFee::Flat(0.005))
            .with_withdrawal_fee(indodax.clone(), Currency::new("USDT"), WithdrawalFee::Flat(5.0))
            .with_withdrawal_fee(
                indodax,
                Currency::new("IDR"),
                WithdrawalFee::Proportional {
                    rate: 0.01,
                    minimum: 25_000.0,
                },
            )
    }

    pub fn with_trading_fee(mut self, venue: Venue, fee: f64) -> Self {
        self.trading.insert(venue, fee);
        self
    }

    pub fn with_withdrawal_fee(mut self, venue: Venue, currency: Currency, fee: WithdrawalFee) -> Self {
        self.withdrawal.insert((venue, currency), fee);
        self
    }

    pub fn trading_fee(&self, venue: &Venue) -> Result<f64, FeeError> {
        self.trading
            .get(venue)
            .copied()
            .ok_or_else(|| FeeError::UnknownVenue(venue.clone()))
    }

    /// Withdrawal cost for moving `quantity` of `currency` off `venue`.
    pub fn withdrawal_fee(&self, venue: &Venue, currency: &Currency, quantity: f64) -> Result<f64, FeeError> {
        if !self.trading.contains_key(venue) {
            return Err(FeeError::UnknownVenue(venue.clone()));
        }
        self.withdrawal
            .get(&(venue.clone(), currency.clone()))
            .map(|fee| fee.amount(quantity))
            .ok_or_else(|| FeeError::UnknownCurrency {
                venue: venue.clone(),
                currency: currency.clone(),
            })
    }
}
