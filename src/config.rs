//! Configuration loader and application settings.

use std::str::FromStr;
use std::time::Duration;

use crate::arbitrage::{Cycle, Leg, Notionals};
use crate::cex::binance::{BINANCE_REST_ENDPOINT, BINANCE_WS_ENDPOINT};
use crate::cex::indodax::INDODAX_REST_ENDPOINT;
use crate::errors::{AppError, Result};
use crate::models::{Pair, Venue};
use crate::sync::{DEFAULT_MAX_BUFFERED, ReconcilerConfig};

/// Consolidated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Binance websocket base, e.g. `wss://stream.binance.com:9443/ws`.
    pub binance_ws_url: String,
    pub binance_rest_url: String,
    pub indodax_rest_url: String,
    /// Indodax depth polling period.
    pub indodax_poll_interval: Duration,
    /// Capacity of each feed -> reconciler queue.
    pub event_queue_capacity: usize,
    /// Events held per book while its snapshot loads.
    pub max_buffered_events: usize,
    pub snapshot_retry_delay: Duration,
    pub reconnect_delay: Duration,
    pub resync_on_desync: bool,
    pub notionals: Notionals,
    /// Minimum spacing between passes of one cycle. `None` evaluates on every update.
    pub min_eval_interval: Option<Duration>,
    pub decision_feed_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            binance_ws_url: BINANCE_WS_ENDPOINT.to_string(),
            binance_rest_url: BINANCE_REST_ENDPOINT.to_string(),
            indodax_rest_url: INDODAX_REST_ENDPOINT.to_string(),
            indodax_poll_interval: Duration::from_secs(5),
            event_queue_capacity: 1024,
            max_buffered_events: DEFAULT_MAX_BUFFERED,
            snapshot_retry_delay: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(2),
            resync_on_desync: true,
            notionals: Notionals::default(),
            min_eval_interval: None,
            decision_feed_capacity: 256,
        }
    }
}

impl AppConfig {
    /// Load from the process environment (after `.env` has been read).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let min_eval_ms: u64 = parse_or(&lookup, "MIN_EVAL_INTERVAL_MS", 0)?;
        Ok(Self {
            binance_ws_url: lookup("BINANCE_WS_URL").unwrap_or(defaults.binance_ws_url),
            binance_rest_url: lookup("BINANCE_REST_URL").unwrap_or(defaults.binance_rest_url),
            indodax_rest_url: lookup("INDODAX_REST_URL").unwrap_or(defaults.indodax_rest_url),
            indodax_poll_interval: Duration::from_millis(parse_or(&lookup, "INDODAX_POLL_MS", 5_000)?),
            event_queue_capacity: positive(parse_or(&lookup, "EVENT_QUEUE_CAPACITY", defaults.event_queue_capacity)?, "EVENT_QUEUE_CAPACITY")?,
            max_buffered_events: parse_or(&lookup, "MAX_BUFFERED_EVENTS", defaults.max_buffered_events)?,
            snapshot_retry_delay: Duration::from_millis(parse_or(&lookup, "SNAPSHOT_RETRY_MS", 1_000)?),
            reconnect_delay: Duration::from_millis(parse_or(&lookup, "RECONNECT_DELAY_MS", 2_000)?),
            resync_on_desync: parse_flag(&lookup, "RESYNC_ON_DESYNC", defaults.resync_on_desync)?,
            notionals: Notionals {
                start_quantity: parse_or(&lookup, "START_QUANTITY", defaults.notionals.start_quantity)?,
                start_funds: parse_or(&lookup, "START_FUNDS", defaults.notionals.start_funds)?,
            },
            min_eval_interval: (min_eval_ms > 0).then(|| Duration::from_millis(min_eval_ms)),
            decision_feed_capacity: positive(
                parse_or(&lookup, "DECISION_FEED_CAPACITY", defaults.decision_feed_capacity)?,
                "DECISION_FEED_CAPACITY",
            )?,
        })
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            retry_delay: self.snapshot_retry_delay,
            resync_on_desync: self.resync_on_desync,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key}={raw:?} is not a valid value"))),
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1" | "true" | "TRUE" | "yes") => Ok(true),
        Some("0" | "false" | "FALSE" | "no") => Ok(false),
        Some(raw) => Err(AppError::Config(format!("{key}={raw:?} is not a boolean"))),
    }
}

fn positive(value: usize, key: &str) -> Result<usize> {
    if value == 0 {
        return Err(AppError::Config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

/// Pairs listed per venue.
pub fn default_listings() -> Vec<(Venue, Vec<Pair>)> {
    vec![
        (Venue::binance(), vec![Pair::new("ETH", "USDT")]),
        (Venue::indodax(), vec![Pair::new("ETH", "IDR"), Pair::new("USDT", "IDR")]),
    ]
}

/// USDT -> ETH on Binance, ETH -> IDR -> USDT on Indodax.
pub fn default_cycles() -> Result<Vec<Cycle>> {
    let cycle = Cycle::new(
        "ETH/USDT-ETH/IDR-USDT/IDR",
        vec![
            Leg::buy(Pair::new("ETH", "USDT"), Venue::binance()),
            Leg::sell(Pair::new("ETH", "IDR"), Venue::indodax()),
            Leg::buy(Pair::new("USDT", "IDR"), Venue::indodax()),
        ],
    )?;
    Ok(vec![cycle])
}
