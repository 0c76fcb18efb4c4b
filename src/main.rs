use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use venue_arbitrage::{
    arbitrage::OutcomeKind,
    cex,
    config::{self, AppConfig},
    models::Venue,
    registry::{FeeSchedule, MarketContext},
    sync::{BookSynchronizer, SnapshotSource, run_reconciler, run_snapshot_poller},
    utils::{self, Shutdown},
    worker::{CycleWorker, DecisionFeed},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let cfg = AppConfig::from_env().context("loading configuration")?;
    let listings = config::default_listings();
    let context = Arc::new(MarketContext::new(&listings, FeeSchedule::standard()));
    info!(
        start_quantity = cfg.notionals.start_quantity,
        start_funds = cfg.notionals.start_funds,
        resync_on_desync = cfg.resync_on_desync,
        "[INIT] venue-arbitrage starting"
    );

    let binance_source: Arc<dyn SnapshotSource> =
        Arc::new(cex::BinanceSnapshotSource::new(cfg.binance_rest_url.clone()));
    let indodax_source: Arc<dyn SnapshotSource> =
        Arc::new(cex::IndodaxSnapshotSource::new(cfg.indodax_rest_url.clone()));

    let mut handles = Vec::new();

    // Book producers ------------------------------------------------------
    for (venue, pairs) in &listings {
        let notifier = context
            .notifier(venue)
            .ok_or_else(|| anyhow!("no update bus for {venue}"))?;
        for pair in pairs {
            let book = context
                .book(venue, pair)
                .ok_or_else(|| anyhow!("no book for {venue} {pair}"))?;
            let sync = BookSynchronizer::with_buffer_limit(venue.clone(), pair.clone(), book, cfg.max_buffered_events);

            if *venue == Venue::binance() {
                let (tx, rx) = mpsc::channel(cfg.event_queue_capacity);
                handles.push(cex::spawn_depth_feed(
                    cfg.binance_ws_url.clone(),
                    pair.clone(),
                    tx,
                    cfg.reconnect_delay,
                    context.shutdown_signal(),
                ));
                let task = run_reconciler(
                    sync,
                    binance_source.clone(),
                    rx,
                    notifier.clone(),
                    cfg.reconciler(),
                    context.shutdown_signal(),
                );
                handles.push(tokio::spawn(async move {
                    task.await;
                }));
            } else if *venue == Venue::indodax() {
                let task = run_snapshot_poller(
                    sync,
                    indodax_source.clone(),
                    notifier.clone(),
                    cfg.indodax_poll_interval,
                    context.shutdown_signal(),
                );
                handles.push(tokio::spawn(async move {
                    task.await;
                }));
            } else {
                warn!(%venue, %pair, "[INIT] no feed adapter for venue; book stays empty");
            }
            info!(%venue, %pair, "[INIT] book feed started");
        }
    }

    // Decision consumers --------------------------------------------------
    let feed = DecisionFeed::new(cfg.decision_feed_capacity);
    handles.push(spawn_decision_logger(&feed, context.shutdown_signal()));

    for cycle in config::default_cycles()? {
        let id = cycle.id().to_string();
        let worker = CycleWorker::new(
            cycle,
            context.clone(),
            cfg.notionals,
            feed.clone(),
            cfg.min_eval_interval,
        )?;
        handles.push(worker.spawn(context.shutdown_signal()));
        info!(cycle = %id, "[INIT] cycle worker started");
    }

    tokio::signal::ctrl_c().await?;
    info!("[SHUTDOWN] stopping tasks");
    context.shutdown();
    futures::future::join_all(handles).await;
    info!("[SHUTDOWN] done");
    Ok(())
}

/// Log every trade update and hedge alert as JSON.
fn spawn_decision_logger(feed: &DecisionFeed, mut shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    let mut trades = feed.subscribe_trades();
    let mut hedges = feed.subscribe_hedges();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                update = trades.recv() => match update {
                    Ok(update) => {
                        let payload = serde_json::to_string(&update).unwrap_or_default();
                        if update.outcome == OutcomeKind::Profitable {
                            info!(%payload, "[TRADE] update");
                        } else {
                            debug!(%payload, "[TRADE] update");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => warn!(skipped, "[TRADE] logger lagging"),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                alert = hedges.recv() => match alert {
                    Ok(alert) => info!(payload = %serde_json::to_string(&alert).unwrap_or_default(), "[HEDGE] alert"),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => warn!(skipped, "[HEDGE] logger lagging"),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}
