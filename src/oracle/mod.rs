//! Oracle module - Multi-venue reference price aggregation
//!
//! Venue adapters stream 1-minute candle closes into one bounded queue; the
//! aggregation window drains it every tick, rejects outliers around the
//! cross-venue median and publishes a volume weighted price per asset.

mod aggregator;
mod publisher;
pub mod sources;
mod supervisor;
mod window;

pub use aggregator::{
    compute_median, discard_outliers, group_by_asset, vwap, PriceAggregator,
    DEFAULT_OUTLIER_BASIS_POINTS,
};
pub use publisher::{AggregateStore, Publisher};
pub use sources::{build_source, CandleSource};
pub use supervisor::{Supervisor, DEFAULT_RESTART_COOLDOWN};
pub use window::{drain, AggregationWindow, DEFAULT_TICK_INTERVAL};

#[cfg(test)]
pub use publisher::MockAggregateStore;
