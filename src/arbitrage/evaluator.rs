use std::sync::Arc;
use tracing::{debug, info};

use super::types::{
    Consumption, Cycle, EvalError, ForwardPass, Notionals, Outcome, Position, Step, Trade,
};
use crate::models::Side;
use crate::registry::MarketContext;

/// Levels left with less than this share of their depth count as exhausted.
const DUST_RATIO: f64 = 1e-9;

/// Walks cycles against the books in a [`MarketContext`].
#[derive(Clone)]
pub struct Evaluator {
    context: Arc<MarketContext>,
    notionals: Notionals,
}

impl Evaluator {
    pub fn new(context: Arc<MarketContext>, notionals: Notionals) -> Self {
        Self { context, notionals }
    }

    pub fn notionals(&self) -> Notionals {
        self.notionals
    }

    /// Convert both trackers through every leg at the best opposite price,
    /// charging trading fees and, on a venue change, withdrawal fees.
    /// Reads books only.
    pub fn forward_pass(&self, cycle: &Cycle) -> Result<ForwardPass, EvalError> {
        let fees = self.context.fees();
        let mut position = Position {
            currency: cycle.start_currency().clone(),
            quantity: self.notionals.start_quantity,
            funds: self.notionals.start_funds,
        };
        let mut steps = Vec::with_capacity(cycle.legs().len());

        for (i, leg) in cycle.legs().iter().enumerate() {
            if &position.currency != leg.spends() {
                return Err(EvalError::ChainIntegrity {
                    leg: i,
                    expected: leg.spends().clone(),
                    found: position.currency,
                });
            }
            let book = self
                .context
                .book(&leg.venue, &leg.pair)
                .ok_or_else(|| EvalError::MissingBook {
                    venue: leg.venue.clone(),
                    pair: leg.pair.clone(),
                })?;
            let side = leg.book_side();
            let level = book.best(side).ok_or_else(|| EvalError::EmptySide {
                venue: leg.venue.clone(),
                pair: leg.pair.clone(),
                side,
            })?;
            let trading_fee = fees.trading_fee(&leg.venue)?;
            let operator = leg.operator();

            position.quantity = operator.apply(position.quantity, level.price);
            // Funds are capped by the depth at the level, counted in base units.
            position.funds = match side {
                Side::Ask => level.quantity.min(position.funds / level.price),
                Side::Bid => level.quantity.min(position.funds) * level.price,
            };
            position.quantity *= 1.0 - trading_fee;
            position.funds *= 1.0 - trading_fee;
            position.currency = leg.receives().clone();

            let withdrawn = cycle.crosses_venue_after(i);
            if withdrawn {
                position.quantity -= fees.withdrawal_fee(&leg.venue, &position.currency, position.quantity)?;
                position.funds -= fees.withdrawal_fee(&leg.venue, &position.currency, position.funds)?;
            }

            steps.push(Step {
                leg: leg.clone(),
                book,
                operator,
                price: level.price,
                level_quantity: level.quantity,
                trading_fee,
                withdrawn,
            });
        }

        Ok(ForwardPass {
            start: self.notionals,
            quantity: position.quantity,
            funds: position.funds,
            steps,
        })
    }

    /// Replay `pass` in reverse from its ending funds to find the start amount
    /// and the depth each leg takes from its level. Does not touch any book.
    pub fn traceback(&self, cycle: &Cycle, pass: &ForwardPass) -> Result<Trade, EvalError> {
        let fees = self.context.fees();
        let mut held = cycle.start_currency().clone();
        let mut amount = pass.funds;
        let mut consumed = Vec::with_capacity(pass.steps.len());

        for (i, step) in pass.steps.iter().enumerate().rev() {
            let leg = &step.leg;
            if &held != leg.receives() {
                return Err(EvalError::ChainIntegrity {
                    leg: i,
                    expected: leg.receives().clone(),
                    found: held,
                });
            }
            if step.withdrawn {
                amount += fees.withdrawal_fee(&leg.venue, &held, amount)?;
            }
            amount /= 1.0 - step.trading_fee;

            let spent = step.operator.invert(amount, step.price);
            let base = match step.leg.book_side() {
                // bought base
                Side::Ask => amount,
                // sold base
                Side::Bid => spent,
            };
            consumed.push(Consumption {
                venue: leg.venue.clone(),
                pair: leg.pair.clone(),
                side: leg.book_side(),
                price: step.price,
                quantity: settle(base, step.level_quantity),
            });
            amount = spent;
            held = leg.spends().clone();
        }

        consumed.reverse();
        Ok(Trade {
            start_funds: amount,
            end_funds: pass.funds,
            quantity: pass.quantity,
            consumed,
        })
    }

    /// Full pass: forward, profitability check, then traceback and
    /// decrement of the touched levels.
    pub fn evaluate(&self, cycle: &Cycle) -> Result<Outcome, EvalError> {
        let pass = self.forward_pass(cycle)?;
        if !pass.is_profitable() {
            debug!(
                cycle = cycle.id(),
                quantity = pass.quantity,
                funds = pass.funds,
                "[EVAL] not profitable"
            );
            return Ok(Outcome::NotProfitable {
                start_quantity: pass.start.start_quantity,
                quantity: pass.quantity,
                funds: pass.funds,
            });
        }

        // Plan every consumption before the first write.
        let trade = self.traceback(cycle, &pass)?;
        for (step, take) in pass.steps.iter().zip(&trade.consumed) {
            step.book.consume(take.side, take.price, take.quantity)?;
        }

        if trade.end_funds < trade.start_funds {
            info!(
                cycle = cycle.id(),
                start = trade.start_funds,
                end = trade.end_funds,
                "[EVAL] not profitable for available quantity"
            );
            Ok(Outcome::DepthLimited(trade))
        } else {
            info!(
                cycle = cycle.id(),
                start = trade.start_funds,
                end = trade.end_funds,
                quantity = trade.quantity,
                "[EVAL] profitable"
            );
            Ok(Outcome::Profitable(trade))
        }
    }
}

/// Clamp a consumption to the level it was read from; float residue left
/// behind by the reverse arithmetic counts as the whole level.
fn settle(quantity: f64, level_quantity: f64) -> f64 {
    let take = quantity.min(level_quantity);
    if level_quantity - take <= level_quantity * DUST_RATIO {
        level_quantity
    } else {
        take.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::types::Leg;
    use crate::models::{Pair, PriceLevel, Venue};
    use crate::registry::{FeeError, FeeSchedule};

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    fn single_venue() -> (Arc<MarketContext>, Cycle) {
        let venue = Venue::new("Local");
        let ctx = MarketContext::new(
            &[(venue.clone(), vec![Pair::new("A", "B"), Pair::new("A", "C"), Pair::new("B", "C")])],
            FeeSchedule::empty().with_trading_fee(venue.clone(), 0.0),
        );
        let cycle = Cycle::new(
            "abc",
            vec![
                Leg::buy(Pair::new("A", "B"), venue.clone()),
                Leg::sell(Pair::new("A", "C"), venue.clone()),
                Leg::buy(Pair::new("B", "C"), venue),
            ],
        )
        .unwrap();
        (Arc::new(ctx), cycle)
    }

    fn seed(ctx: &MarketContext, pair: Pair, bid: (f64, f64), ask: (f64, f64)) {
        let book = ctx.book(&Venue::new("Local"), &pair).unwrap();
        book.upsert(Side::Bid, bid.0, bid.1).unwrap();
        book.upsert(Side::Ask, ask.0, ask.1).unwrap();
    }

    #[test]
    fn fee_free_round_trip_matches_rates() {
        let (ctx, cycle) = single_venue();
        seed(&ctx, Pair::new("A", "B"), (1.9, 100.0), (2.0, 100.0));
        seed(&ctx, Pair::new("A", "C"), (5.0, 100.0), (5.1, 100.0));
        seed(&ctx, Pair::new("B", "C"), (2.4, 100.0), (2.5, 100.0));
        let eval = Evaluator::new(ctx, Notionals::default());

        let pass = eval.forward_pass(&cycle).unwrap();
        // 1000 / 2 * 5 / 2.5
        assert!(approx(pass.quantity, 1000.0));
        assert!(!pass.is_profitable());
        assert_eq!(pass.steps.len(), 3);
        assert_eq!(pass.steps[1].price, 5.0);
    }

    #[test]
    fn traceback_inverts_forward_pass() {
        let (ctx, cycle) = single_venue();
        seed(&ctx, Pair::new("A", "B"), (1.9, 100.0), (2.0, 100.0));
        seed(&ctx, Pair::new("A", "C"), (6.0, 100.0), (6.1, 100.0));
        seed(&ctx, Pair::new("B", "C"), (2.4, 100.0), (2.5, 100.0));
        let eval = Evaluator::new(
            ctx,
            Notionals {
                start_quantity: 1000.0,
                start_funds: 10.0,
            },
        );

        let pass = eval.forward_pass(&cycle).unwrap();
        assert!(pass.is_profitable());
        let trade = eval.traceback(&cycle, &pass).unwrap();
        assert!(approx(trade.start_funds, 10.0));
        // 10 B -> 5 A -> 30 C -> 12 B
        assert!(approx(trade.end_funds, 12.0));
        let taken: Vec<f64> = trade.consumed.iter().map(|c| c.quantity).collect();
        assert!(approx(taken[0], 5.0));
        assert!(approx(taken[1], 5.0));
        assert!(approx(taken[2], 12.0));
    }

    #[test]
    fn missing_and_empty_books_are_reported() {
        let (ctx, cycle) = single_venue();
        let eval = Evaluator::new(ctx.clone(), Notionals::default());
        assert!(matches!(eval.evaluate(&cycle), Err(EvalError::EmptySide { side: Side::Ask, .. })));

        let stray = Cycle::new(
            "stray",
            vec![
                Leg::buy(Pair::new("X", "Y"), Venue::new("Local")),
                Leg::sell(Pair::new("X", "Y"), Venue::new("Local")),
            ],
        )
        .unwrap();
        assert!(matches!(eval.evaluate(&stray), Err(EvalError::MissingBook { .. })));
    }

    #[test]
    fn unknown_fee_venue_is_a_configuration_error() {
        let venue = Venue::new("Unpriced");
        let ctx = MarketContext::new(&[(venue.clone(), vec![Pair::new("A", "B")])], FeeSchedule::empty());
        ctx.book(&venue, &Pair::new("A", "B"))
            .unwrap()
            .upsert(Side::Ask, 1.0, 1.0)
            .unwrap();
        let cycle = Cycle::new(
            "ab",
            vec![Leg::buy(Pair::new("A", "B"), venue.clone()), Leg::sell(Pair::new("A", "B"), venue.clone())],
        )
        .unwrap();
        let eval = Evaluator::new(Arc::new(ctx), Notionals::default());
        assert_eq!(
            eval.evaluate(&cycle).unwrap_err(),
            EvalError::Configuration(FeeError::UnknownVenue(venue))
        );
    }

    #[test]
    fn not_profitable_leaves_books_alone() {
        let (ctx, cycle) = single_venue();
        seed(&ctx, Pair::new("A", "B"), (1.9, 100.0), (2.0, 100.0));
        seed(&ctx, Pair::new("A", "C"), (4.0, 100.0), (4.1, 100.0));
        seed(&ctx, Pair::new("B", "C"), (2.4, 100.0), (2.5, 100.0));
        let eval = Evaluator::new(ctx.clone(), Notionals::default());

        let outcome = eval.evaluate(&cycle).unwrap();
        assert!(matches!(outcome, Outcome::NotProfitable { .. }));
        let ab = ctx.book(&Venue::new("Local"), &Pair::new("A", "B")).unwrap();
        assert_eq!(ab.best_ask(), Some(PriceLevel::new(2.0, 100.0)));
    }

    #[test]
    fn settle_absorbs_float_residue() {
        assert_eq!(settle(249.99999999999997, 250.0), 250.0);
        assert_eq!(settle(250.00000000000003, 250.0), 250.0);
        assert_eq!(settle(1.5, 3.0), 1.5);
    }
}
