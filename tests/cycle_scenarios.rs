//! USDT -> ETH (Binance) -> IDR -> USDT (Indodax) against fixed books.

use std::sync::Arc;
use venue_arbitrage::arbitrage::{Cycle, Evaluator, Leg, Notionals, Outcome};
use venue_arbitrage::models::{Pair, PriceLevel, Side, Venue};
use venue_arbitrage::registry::{FeeSchedule, MarketContext};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

fn levels(raw: &[(f64, f64)]) -> Vec<PriceLevel> {
    raw.iter().map(|&(p, q)| PriceLevel::new(p, q)).collect()
}

struct Books<'a> {
    eth_usdt: (&'a [(f64, f64)], &'a [(f64, f64)]),
    eth_idr: (&'a [(f64, f64)], &'a [(f64, f64)]),
    usdt_idr: (&'a [(f64, f64)], &'a [(f64, f64)]),
}

const ETH_IDR_BIDS: &[(f64, f64)] = &[(2_283_000.0, 3.0), (2_282_000.0, 1.0), (2_281_000.0, 1.0)];
const ETH_IDR_ASKS: &[(f64, f64)] = &[(2_284_000.0, 1.0), (2_285_000.0, 1.0), (2_286_000.0, 2.0)];
const USDT_IDR_BIDS: &[(f64, f64)] = &[(14_680.0, 153.0), (14_670.0, 145.0), (14_660.0, 153.0)];

fn eth_usdt() -> Pair {
    Pair::new("ETH", "USDT")
}

fn eth_idr() -> Pair {
    Pair::new("ETH", "IDR")
}

fn usdt_idr() -> Pair {
    Pair::new("USDT", "IDR")
}

fn setup(books: Books<'_>) -> (Arc<MarketContext>, Evaluator, Cycle) {
    let ctx = Arc::new(MarketContext::new(
        &[
            (Venue::binance(), vec![eth_usdt()]),
            (Venue::indodax(), vec![eth_idr(), usdt_idr()]),
        ],
        FeeSchedule::standard(),
    ));
    for (venue, pair, (bids, asks)) in [
        (Venue::binance(), eth_usdt(), books.eth_usdt),
        (Venue::indodax(), eth_idr(), books.eth_idr),
        (Venue::indodax(), usdt_idr(), books.usdt_idr),
    ] {
        ctx.book(&venue, &pair)
            .unwrap()
            .replace_all(&levels(bids), &levels(asks))
            .unwrap();
    }
    let cycle = Cycle::new(
        "eth-usdt-idr",
        vec![
            Leg::buy(eth_usdt(), Venue::binance()),
            Leg::sell(eth_idr(), Venue::indodax()),
            Leg::buy(usdt_idr(), Venue::indodax()),
        ],
    )
    .unwrap();
    let evaluator = Evaluator::new(ctx.clone(), Notionals::default());
    (ctx, evaluator, cycle)
}

fn profitable_books() -> (Arc<MarketContext>, Evaluator, Cycle) {
    setup(Books {
        eth_usdt: (&[(149.0, 2.0), (148.0, 1.0), (147.0, 1.0)], &[(150.0, 3.0), (151.0, 3.0), (152.0, 3.0)]),
        eth_idr: (ETH_IDR_BIDS, ETH_IDR_ASKS),
        usdt_idr: (USDT_IDR_BIDS, &[(14_700.0, 250.0), (14_710.0, 250.0), (14_711.0, 250.0)]),
    })
}

fn depth_limited_books() -> (Arc<MarketContext>, Evaluator, Cycle) {
    setup(Books {
        eth_usdt: (&[(149.0, 2.0), (148.0, 1.0), (147.0, 1.0)], &[(150.0, 1.0), (151.0, 1.0), (152.0, 2.0)]),
        eth_idr: (ETH_IDR_BIDS, ETH_IDR_ASKS),
        usdt_idr: (USDT_IDR_BIDS, &[(14_700.0, 145.0), (14_710.0, 145.0), (14_711.0, 145.0)]),
    })
}

fn unprofitable_books() -> (Arc<MarketContext>, Evaluator, Cycle) {
    setup(Books {
        eth_usdt: (&[(153.0, 2.0), (152.0, 1.0), (151.0, 1.0)], &[(154.0, 1.0), (155.0, 1.0), (156.0, 2.0)]),
        eth_idr: (
            &[(2_273_000.0, 3.0), (2_272_000.0, 1.0), (2_271_000.0, 1.0)],
            &[(2_274_000.0, 1.0), (2_275_000.0, 1.0), (2_276_000.0, 2.0)],
        ),
        usdt_idr: (USDT_IDR_BIDS, &[(14_700.0, 145.0), (14_710.0, 145.0), (14_711.0, 145.0)]),
    })
}

fn top(ctx: &MarketContext, venue: Venue, pair: Pair, side: Side) -> Vec<PriceLevel> {
    ctx.book(&venue, &pair).unwrap().top_n(side, 3)
}

/// Ending funds as a closed form of the start amount for the fixed top of book.
fn expected_end(start: f64) -> f64 {
    ((((start / 150.0) * (1.0 - 0.001)) - 0.01) * 2_283_000.0 * (1.0 - 0.003) / 14_700.0 * (1.0 - 0.003)) - 5.0
}

#[test]
fn profitable_cycle_reserves_consumed_depth() {
    let (ctx, evaluator, cycle) = profitable_books();

    let outcome = evaluator.evaluate(&cycle).unwrap();
    let Outcome::Profitable(trade) = outcome else {
        panic!("expected a profitable pass, got {outcome:?}");
    };
    assert!(approx(trade.quantity, 1021.5982950714285));
    assert!(approx(trade.end_funds, 244.25));
    assert!(approx(trade.end_funds, expected_end(trade.start_funds)));
    assert!(trade.start_funds < trade.end_funds);

    // USDT/IDR best ask fully taken: the next level is now best
    let usdt_asks = top(&ctx, Venue::indodax(), usdt_idr(), Side::Ask);
    assert_eq!(usdt_asks, levels(&[(14_710.0, 250.0), (14_711.0, 250.0)]));

    let eth_idr_bids = top(&ctx, Venue::indodax(), eth_idr(), Side::Bid);
    assert_eq!(eth_idr_bids.len(), 3);
    assert_eq!(eth_idr_bids[0].price, 2_283_000.0);
    assert!(approx(eth_idr_bids[0].quantity, 3.0 - 1.6145677505578495));

    let eth_usdt_asks = top(&ctx, Venue::binance(), eth_usdt(), Side::Ask);
    assert_eq!(eth_usdt_asks[0].price, 150.0);
    assert!(approx(eth_usdt_asks[0].quantity, 3.0 - 1.6261939445023519));

    // untouched sides stay as seeded
    assert_eq!(
        top(&ctx, Venue::binance(), eth_usdt(), Side::Bid),
        levels(&[(149.0, 2.0), (148.0, 1.0), (147.0, 1.0)])
    );
}

#[test]
fn deep_books_return_closed_form_of_start_funds() {
    const DEEP: f64 = 1e9;
    let (ctx, evaluator, cycle) = setup(Books {
        eth_usdt: (&[(149.0, DEEP)], &[(150.0, DEEP)]),
        eth_idr: (&[(2_283_000.0, DEEP)], &[(2_284_000.0, DEEP)]),
        usdt_idr: (&[(14_680.0, DEEP)], &[(14_700.0, DEEP)]),
    });

    let outcome = evaluator.evaluate(&cycle).unwrap();
    let Outcome::Profitable(trade) = outcome else {
        panic!("expected a profitable pass, got {outcome:?}");
    };
    // no level caps the funds tracker, so it follows the notional exactly
    assert!(approx(trade.end_funds, expected_end(Notionals::default().start_funds)));
    assert!(approx(trade.end_funds, 10_274.876762226531));
    assert!(approx(trade.start_funds, 10_000.0));

    let eth_usdt_asks = top(&ctx, Venue::binance(), eth_usdt(), Side::Ask);
    assert_eq!(eth_usdt_asks[0].price, 150.0);
    assert!(approx(eth_usdt_asks[0].quantity, DEEP - 10_000.0 / 150.0));
    assert!(eth_usdt_asks[0].quantity < DEEP);
}

#[test]
fn unprofitable_cycle_leaves_books_untouched() {
    let (ctx, evaluator, cycle) = unprofitable_books();
    let before: Vec<Vec<PriceLevel>> = [
        (Venue::binance(), eth_usdt()),
        (Venue::indodax(), eth_idr()),
        (Venue::indodax(), usdt_idr()),
    ]
    .into_iter()
    .flat_map(|(v, p)| [top(&ctx, v.clone(), p.clone(), Side::Bid), top(&ctx, v, p, Side::Ask)])
    .collect();

    match evaluator.evaluate(&cycle).unwrap() {
        Outcome::NotProfitable { start_quantity, quantity, .. } => {
            assert_eq!(start_quantity, 1000.0);
            assert!(approx(quantity, 990.5135725590688));
        }
        other => panic!("expected not profitable, got {other:?}"),
    }

    let after: Vec<Vec<PriceLevel>> = [
        (Venue::binance(), eth_usdt()),
        (Venue::indodax(), eth_idr()),
        (Venue::indodax(), usdt_idr()),
    ]
    .into_iter()
    .flat_map(|(v, p)| [top(&ctx, v.clone(), p.clone(), Side::Bid), top(&ctx, v, p, Side::Ask)])
    .collect();
    assert_eq!(before, after);
}

#[test]
fn shallow_levels_are_not_profitable_for_available_quantity() {
    let (ctx, evaluator, cycle) = depth_limited_books();

    let outcome = evaluator.evaluate(&cycle).unwrap();
    let Outcome::DepthLimited(trade) = outcome else {
        panic!("expected a depth-limited pass, got {outcome:?}");
    };
    assert!(approx(trade.quantity, 1021.5982950714285));
    assert!(approx(trade.end_funds, 139.565));
    assert!(approx(trade.start_funds, 142.10950380233527));
    assert!(trade.end_funds < trade.start_funds);

    // exactly the consumed depth is gone from each touched level
    assert_eq!(
        top(&ctx, Venue::indodax(), usdt_idr(), Side::Ask),
        levels(&[(14_710.0, 145.0), (14_711.0, 145.0)])
    );
    let eth_idr_bids = top(&ctx, Venue::indodax(), eth_idr(), Side::Bid);
    assert!(approx(eth_idr_bids[0].quantity, 3.0 - 0.9364492953235528));
    let eth_usdt_asks = top(&ctx, Venue::binance(), eth_usdt(), Side::Ask);
    assert_eq!(eth_usdt_asks[0].price, 150.0);
    assert!(approx(eth_usdt_asks[0].quantity, 1.0 - 0.9473966920155684));
    assert_eq!(eth_usdt_asks[1], PriceLevel::new(151.0, 1.0));

    let taken: Vec<(Side, f64)> = trade.consumed.iter().map(|c| (c.side, c.price)).collect();
    assert_eq!(taken, vec![(Side::Ask, 150.0), (Side::Bid, 2_283_000.0), (Side::Ask, 14_700.0)]);
}

#[test]
fn forward_pass_is_idempotent_without_updates() {
    let (ctx, evaluator, cycle) = profitable_books();

    let first = evaluator.forward_pass(&cycle).unwrap();
    let second = evaluator.forward_pass(&cycle).unwrap();
    assert_eq!(first.quantity, second.quantity);
    assert_eq!(first.funds, second.funds);
    let prices = |pass: &venue_arbitrage::arbitrage::ForwardPass| -> Vec<f64> {
        pass.steps.iter().map(|s| s.price).collect()
    };
    assert_eq!(prices(&first), prices(&second));
    assert_eq!(prices(&first), vec![150.0, 2_283_000.0, 14_700.0]);

    // forward passes never write
    assert_eq!(top(&ctx, Venue::indodax(), usdt_idr(), Side::Ask)[0], PriceLevel::new(14_700.0, 250.0));
}
