//! One evaluation task per cycle, woken by book updates on the venues its
//! legs touch, publishing trade and hedge decisions.

use futures::future::select_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::arbitrage::{Cycle, EvalError, Evaluator, Notionals, Outcome, OutcomeKind};
use crate::registry::MarketContext;
use crate::utils::Shutdown;

/// Result of one completed pass. Amounts are in the cycle's start currency,
/// taken from the depth-bounded funds tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeUpdate {
    pub cycle: String,
    pub outcome: OutcomeKind,
    pub start_amount: f64,
    pub end_amount: f64,
    /// Rate-only quantity tracker at the end of the pass.
    pub quantity: f64,
}

/// Emitted on the first non-profitable pass after one or more trades.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HedgeAlert {
    pub cycle: String,
    /// Outcome of the pass that triggered the hedge.
    pub outcome: OutcomeKind,
    pub start_amount: f64,
    pub end_amount: f64,
    /// Start amount accumulated over the trades being hedged.
    pub traded_amount: f64,
}

/// Outbound decision streams shared by every worker.
#[derive(Debug, Clone)]
pub struct DecisionFeed {
    trades: broadcast::Sender<TradeUpdate>,
    hedges: broadcast::Sender<HedgeAlert>,
}

impl DecisionFeed {
    pub fn new(capacity: usize) -> Self {
        let (trades, _) = broadcast::channel(capacity.max(1));
        let (hedges, _) = broadcast::channel(capacity.max(1));
        Self { trades, hedges }
    }

    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeUpdate> {
        self.trades.subscribe()
    }

    pub fn subscribe_hedges(&self) -> broadcast::Receiver<HedgeAlert> {
        self.hedges.subscribe()
    }

    fn publish_trade(&self, update: TradeUpdate) {
        // no subscribers is fine
        let _ = self.trades.send(update);
    }

    fn publish_hedge(&self, alert: HedgeAlert) {
        let _ = self.hedges.send(alert);
    }
}

pub struct CycleWorker {
    cycle: Cycle,
    evaluator: Evaluator,
    feed: DecisionFeed,
    triggers: Vec<watch::Receiver<u64>>,
    min_interval: Option<Duration>,
    traded: f64,
}

impl CycleWorker {
    /// Subscribe to the update bus of every venue the cycle touches.
    pub fn new(
        cycle: Cycle,
        context: Arc<MarketContext>,
        notionals: Notionals,
        feed: DecisionFeed,
        min_interval: Option<Duration>,
    ) -> Result<Self, EvalError> {
        let mut triggers = Vec::new();
        for venue in cycle.venues() {
            let rx = context.subscribe(&venue).ok_or_else(|| {
                let leg = cycle.legs().iter().find(|leg| leg.venue == venue);
                EvalError::MissingBook {
                    venue: venue.clone(),
                    pair: leg.map(|leg| leg.pair.clone()).unwrap_or_else(|| cycle.legs()[0].pair.clone()),
                }
            })?;
            triggers.push(rx);
        }
        Ok(Self {
            cycle,
            evaluator: Evaluator::new(context, notionals),
            feed,
            triggers,
            min_interval,
            traded: 0.0,
        })
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// Start amount traded since the last hedge.
    pub fn traded(&self) -> f64 {
        self.traded
    }

    /// Evaluate once and publish the decision.
    pub fn run_once(&mut self) -> Result<Outcome, EvalError> {
        let outcome = self.evaluator.evaluate(&self.cycle)?;
        let (start_amount, end_amount, quantity) = match &outcome {
            Outcome::Profitable(trade) | Outcome::DepthLimited(trade) => {
                (trade.start_funds, trade.end_funds, trade.quantity)
            }
            Outcome::NotProfitable { quantity, funds, .. } => {
                (self.evaluator.notionals().start_funds, *funds, *quantity)
            }
        };
        let kind = outcome.kind();
        self.feed.publish_trade(TradeUpdate {
            cycle: self.cycle.id().to_string(),
            outcome: kind,
            start_amount,
            end_amount,
            quantity,
        });

        if kind == OutcomeKind::Profitable {
            self.traded += start_amount;
        } else {
            self.hedge(kind, start_amount, end_amount);
        }
        Ok(outcome)
    }

    fn hedge(&mut self, outcome: OutcomeKind, start_amount: f64, end_amount: f64) {
        if self.traded <= 0.0 {
            return;
        }
        info!(
            cycle = self.cycle.id(),
            ?outcome,
            start_amount,
            end_amount,
            traded = self.traded,
            "[HEDGE] hedge now"
        );
        self.feed.publish_hedge(HedgeAlert {
            cycle: self.cycle.id().to_string(),
            outcome,
            start_amount,
            end_amount,
            traded_amount: self.traded,
        });
        self.traded = 0.0;
    }

    /// Evaluate on every book update until `shutdown` fires. A pass that has
    /// started always runs to completion.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!(cycle = self.cycle.id(), venues = self.triggers.len(), "[WORKER] started");
        let mut last_run: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                alive = next_trigger(&mut self.triggers) => {
                    if !alive {
                        warn!(cycle = self.cycle.id(), "[WORKER] update bus closed");
                        break;
                    }
                }
            }

            if let (Some(min), Some(last)) = (self.min_interval, last_run) {
                let ready_at = last + min;
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    _ = tokio::time::sleep_until(ready_at) => {}
                }
            }
            // fold any updates that arrived meanwhile into this pass
            for rx in &mut self.triggers {
                rx.borrow_and_update();
            }

            last_run = Some(Instant::now());
            match self.run_once() {
                Ok(_) => {}
                Err(err @ (EvalError::EmptySide { .. } | EvalError::MissingBook { .. })) => {
                    debug!(cycle = self.cycle.id(), error = %err, "[WORKER] books not ready");
                }
                Err(err) => warn!(cycle = self.cycle.id(), error = %err, "[WORKER] pass aborted"),
            }
        }

        info!(cycle = self.cycle.id(), "[WORKER] stopped");
    }

    pub fn spawn(self, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// Resolves when any receiver sees a new generation. `false` once every
/// sender is gone.
async fn next_trigger(triggers: &mut [watch::Receiver<u64>]) -> bool {
    if triggers.is_empty() {
        return futures::future::pending().await;
    }
    let mut pending: Vec<_> = triggers.iter_mut().map(|rx| Box::pin(rx.changed())).collect();
    while !pending.is_empty() {
        let (res, _, rest) = select_all(pending).await;
        if res.is_ok() {
            return true;
        }
        pending = rest;
    }
    false
}
