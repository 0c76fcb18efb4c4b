//! Indodax publishes no incremental stream; books are refreshed by polling
//! the public depth endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::{DepthSnapshot, Pair, PriceLevel, Venue};
use crate::sync::{SnapshotSource, SyncError};

pub const INDODAX_REST_ENDPOINT: &str = "https://indodax.com";

/// `/api/<pair>/depth` payload. Prices come back as numbers, quantities as
/// strings; both forms are accepted for either field.
#[derive(Debug, Deserialize)]
struct DepthMsg {
    #[serde(default)]
    buy: Vec<[Value; 2]>,
    #[serde(default)]
    sell: Vec<[Value; 2]>,
}

/// Exchange symbol for a pair, e.g. `eth_idr`.
pub fn symbol(pair: &Pair) -> String {
    format!("{}_{}", pair.base, pair.quote).to_lowercase()
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn levels(raw: &[[Value; 2]]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|lvl| Some(PriceLevel::new(number(&lvl[0])?, number(&lvl[1])?)))
        .collect()
}

fn parse_depth(txt: &str, sequence: u64) -> serde_json::Result<DepthSnapshot> {
    let parsed: DepthMsg = serde_json::from_str(txt)?;
    Ok(DepthSnapshot {
        sequence,
        bids: levels(&parsed.buy),
        asks: levels(&parsed.sell),
    })
}

/// REST depth poller. The endpoint carries no sequence number, so each
/// snapshot is stamped from a local counter.
#[derive(Debug)]
pub struct IndodaxSnapshotSource {
    client: reqwest::Client,
    base_url: String,
    sequence: AtomicU64,
}

impl IndodaxSnapshotSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            sequence: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl SnapshotSource for IndodaxSnapshotSource {
    async fn fetch_snapshot(&self, _venue: &Venue, pair: &Pair) -> Result<DepthSnapshot, SyncError> {
        let url = format!("{}/api/{}/depth", self.base_url, symbol(pair));
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SyncError::Fetch(e.to_string()))?
            .text()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        parse_depth(&body, sequence).map_err(|e| SyncError::Fetch(format!("malformed depth: {e}")))
    }
}
