//! Oracle Aggregator - Combines candle closes from multiple venues
//!
//! Groups the deduplicated observations of one window by asset, drops every
//! close that strays too far from the cross-venue median and volume-weights
//! the rest into a single reference price.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::AggregationError;
use crate::types::{Aggregate, CandleObservation};

/// Default outlier threshold in basis points of the median
pub const DEFAULT_OUTLIER_BASIS_POINTS: f64 = 30.0;

const BASIS_POINT: f64 = 0.0001;

/// Median-filtered VWAP aggregator
#[derive(Debug, Clone)]
pub struct PriceAggregator {
    /// Maximum deviation from the median, in basis points of the median
    outlier_basis_points: f64,
}

impl PriceAggregator {
    pub fn new(outlier_basis_points: f64) -> Self {
        Self {
            outlier_basis_points,
        }
    }

    /// Compute the reference price of every asset in one window.
    ///
    /// `observations` is the drain result keyed by `venue-asset` identity.
    pub fn aggregate(
        &self,
        observations: &HashMap<String, CandleObservation>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<Aggregate>, AggregationError> {
        let grouped = group_by_asset(observations);
        let mut aggregates = Vec::with_capacity(grouped.len());

        for (asset, members) in grouped {
            let prices: Vec<f64> = members.iter().map(|o| o.closing_price).collect();
            let volumes: Vec<f64> = members.iter().map(|o| o.volume).collect();

            let (kept_prices, kept_volumes) =
                discard_outliers(&prices, &volumes, self.outlier_basis_points)?;

            let rejected = prices.len() - kept_prices.len();
            if rejected > 0 {
                tracing::debug!(
                    asset = %asset,
                    rejected,
                    kept = kept_prices.len(),
                    "Discarded outlier closes"
                );
            }

            aggregates.push(Aggregate {
                asset,
                vwap: vwap(&kept_prices, &kept_volumes)?,
                window_end,
            });
        }

        aggregates.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(aggregates)
    }
}

impl Default for PriceAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_OUTLIER_BASIS_POINTS)
    }
}

/// Regroup `venue-asset` keyed observations by asset across venues
pub fn group_by_asset(
    observations: &HashMap<String, CandleObservation>,
) -> HashMap<String, Vec<CandleObservation>> {
    let mut grouped: HashMap<String, Vec<CandleObservation>> = HashMap::new();
    for observation in observations.values() {
        grouped
            .entry(observation.asset.clone())
            .or_default()
            .push(observation.clone());
    }
    grouped
}

/// Volume weighted average price using absolute volume as weight.
///
/// A zero total volume yields a price of zero.
pub fn vwap(prices: &[f64], volumes: &[f64]) -> Result<f64, AggregationError> {
    check_lengths(prices, volumes)?;

    let (weighted, total_volume) = prices
        .iter()
        .zip(volumes)
        .fold((0.0, 0.0), |(weighted, total), (price, volume)| {
            (weighted + price * volume.abs(), total + volume.abs())
        });

    if total_volume > 0.0 {
        Ok(weighted / total_volume)
    } else {
        Ok(0.0)
    }
}

/// Drop every point whose price deviates from the median by `basis_points`
/// of the median or more.
pub fn discard_outliers(
    prices: &[f64],
    volumes: &[f64],
    basis_points: f64,
) -> Result<(Vec<f64>, Vec<f64>), AggregationError> {
    check_lengths(prices, volumes)?;

    let median = compute_median(prices);
    let threshold = basis_points * BASIS_POINT * median;

    Ok(prices
        .iter()
        .zip(volumes)
        .filter(|(price, _)| (*price - median).abs() < threshold)
        .map(|(price, volume)| (*price, *volume))
        .unzip())
}

/// Median of `samples`; the mean of the two middle points for even lengths.
/// Returns 0 for an empty slice.
pub fn compute_median(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let len = sorted.len();
    if len % 2 == 0 {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    } else {
        sorted[len / 2]
    }
}

fn check_lengths(prices: &[f64], volumes: &[f64]) -> Result<(), AggregationError> {
    if prices.len() != volumes.len() {
        return Err(AggregationError::LengthMismatch {
            prices: prices.len(),
            volumes: volumes.len(),
        });
    }
    Ok(())
}
