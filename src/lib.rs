//! Local order-book mirrors for several venues and a multi-leg arbitrage
//! evaluator over them.
//!
//! Data flows leaf-first: [`skiplist`] backs each [`orderbook`] side, the
//! [`registry`] owns every book, [`sync`] keeps books consistent with venue
//! feeds from [`cex`], and [`worker`] runs the [`arbitrage`] evaluator when
//! books change.

pub mod arbitrage;
pub mod cex;
pub mod config;
pub mod errors;
pub mod models;
pub mod orderbook;
pub mod registry;
pub mod skiplist;
pub mod sync;
pub mod utils;
pub mod worker;
