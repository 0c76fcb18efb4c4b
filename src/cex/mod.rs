//! Venue adapters.
//!
//! Responsibilities:
//! • Turn each venue's public market-data feed into [`DepthEvent`]s and
//!   [`DepthSnapshot`]s.
//! • Implement [`SnapshotSource`] for the reconciler.
//! • Reconnect dropped streams.
//!
//! [`DepthEvent`]: crate::models::DepthEvent
//! [`DepthSnapshot`]: crate::models::DepthSnapshot
//! [`SnapshotSource`]: crate::sync::SnapshotSource

pub mod binance;
pub mod indodax;

pub use binance::{BinanceSnapshotSource, spawn_depth_feed};
pub use indodax::IndodaxSnapshotSource;
