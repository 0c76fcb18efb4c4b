use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};
use url::Url;

use crate::errors::Result;
use crate::models::{DepthEvent, DepthSnapshot, Pair, Venue, parse_string_levels};
use crate::sync::{SnapshotSource, SyncError};
use crate::utils::Shutdown;

pub const BINANCE_WS_ENDPOINT: &str = "wss://stream.binance.com:9443/ws";
pub const BINANCE_REST_ENDPOINT: &str = "https://api.binance.com";
const SNAPSHOT_LIMIT: u32 = 1000;

/// Diff-depth stream payload.
#[derive(Debug, Deserialize)]
struct DepthUpdateMsg {
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
}

/// REST `/api/v3/depth` payload.
#[derive(Debug, Deserialize)]
struct DepthSnapshotMsg {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

/// Exchange symbol for a pair, e.g. `ETHUSDT`.
pub fn symbol(pair: &Pair) -> String {
    format!("{}{}", pair.base, pair.quote)
}

fn parse_depth_update(txt: &str, pair: &Pair) -> Option<DepthEvent> {
    let parsed: DepthUpdateMsg = match serde_json::from_str(txt) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "[CEX] depth update parse failed");
            return None;
        }
    };
    Some(DepthEvent {
        venue: Venue::binance(),
        pair: pair.clone(),
        first_update_seq: parsed.first_update_id,
        final_update_seq: parsed.final_update_id,
        bids: parse_string_levels(&parsed.bids),
        asks: parse_string_levels(&parsed.asks),
    })
}

fn parse_snapshot(txt: &str) -> serde_json::Result<DepthSnapshot> {
    let parsed: DepthSnapshotMsg = serde_json::from_str(txt)?;
    Ok(DepthSnapshot {
        sequence: parsed.last_update_id,
        bids: parse_string_levels(&parsed.bids),
        asks: parse_string_levels(&parsed.asks),
    })
}

/// Stream of incremental depth events for `pair`.
pub async fn connect_depth_stream(ws_endpoint: &str, pair: &Pair) -> Result<impl Stream<Item = DepthEvent>> {
    let stream_path = format!("{}@depth@100ms", symbol(pair).to_lowercase());
    let url = Url::parse(&format!("{}/{}", ws_endpoint, stream_path))?;

    let (ws_stream, _resp) = connect_async(url).await?;

    let pair = pair.clone();
    let mapped = ws_stream.filter_map(move |msg_res| {
        let pair = pair.clone();
        async move {
            match msg_res {
                Ok(msg) if msg.is_text() => {
                    let txt = match msg.into_text() {
                        Ok(t) => t,
                        Err(e) => {
                            warn!(error = %e, "[CEX] text extraction failed");
                            return None;
                        }
                    };
                    parse_depth_update(&txt, &pair)
                }
                Err(e) => {
                    warn!(error = %e, "[CEX] websocket message error");
                    None
                }
                _ => None,
            }
        }
    });
    Ok(mapped)
}

/// Forward the depth stream for `pair` into a reconciler queue, reconnecting
/// after `reconnect_delay` whenever the connection drops. A reconnect leaves a
/// sequence gap, which the reconciler resolves with a resync.
pub fn spawn_depth_feed(
    ws_endpoint: String,
    pair: Pair,
    tx: mpsc::Sender<DepthEvent>,
    reconnect_delay: Duration,
    mut shutdown: Shutdown,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        'session: loop {
            match connect_depth_stream(&ws_endpoint, &pair).await {
                Ok(stream) => {
                    info!(%pair, "[CEX] depth stream connected");
                    futures::pin_mut!(stream);
                    loop {
                        tokio::select! {
                            biased;
                            _ = shutdown.wait() => break 'session,
                            next = stream.next() => {
                                let Some(event) = next else { break };
                                // bounded queue: waits when the reconciler lags
                                if tx.send(event).await.is_err() {
                                    break 'session;
                                }
                            }
                        }
                    }
                    warn!(%pair, "[CEX] depth stream ended");
                }
                Err(e) => warn!(%pair, error = %e, "[CEX] depth stream connect failed"),
            }
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(reconnect_delay) => {}
            }
        }
        info!(%pair, "[CEX] depth feed stopped");
    })
}

/// REST order book snapshots.
#[derive(Debug, Clone)]
pub struct BinanceSnapshotSource {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceSnapshotSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SnapshotSource for BinanceSnapshotSource {
    async fn fetch_snapshot(&self, _venue: &Venue, pair: &Pair) -> std::result::Result<DepthSnapshot, SyncError> {
        let url = format!("{}/api/v3/depth", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol(pair)), ("limit", SNAPSHOT_LIMIT.to_string())])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        let body = response.text().await.map_err(|e| SyncError::Fetch(e.to_string()))?;
        parse_snapshot(&body).map_err(|e| SyncError::Fetch(format!("malformed depth snapshot: {e}")))
    }
}
