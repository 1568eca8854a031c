//! Aggregation window - drains the shared queue on a fixed cadence
//!
//! Every tick the window pulls observations off the queue until one crosses
//! the tick boundary, keeps the latest fresh close per `venue-asset`, and hands
//! the aggregator's result to the publisher.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::Receiver;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::oracle::aggregator::PriceAggregator;
use crate::oracle::publisher::Publisher;
use crate::types::CandleObservation;

/// Default tick cadence
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Drain `rx` up to the `window_end` boundary.
///
/// Returns once an observation stamped at or after `window_end` arrives (that
/// observation is dropped) or every producer is gone. Observations decoded
/// more than `max_age` before `window_end` are discarded as stale. For each
/// `venue-asset` identity only the latest candle survives.
pub async fn drain(
    rx: &mut Receiver<CandleObservation>,
    window_end: DateTime<Utc>,
    max_age: chrono::Duration,
) -> HashMap<String, CandleObservation> {
    drain_window(rx, window_end, max_age).await.0
}

/// Same as [`drain`], also reporting whether the queue has closed.
async fn drain_window(
    rx: &mut Receiver<CandleObservation>,
    window_end: DateTime<Utc>,
    max_age: chrono::Duration,
) -> (HashMap<String, CandleObservation>, bool) {
    let mut latest: HashMap<String, CandleObservation> = HashMap::new();

    while let Some(observation) = rx.recv().await {
        if observation.candle_ts >= window_end {
            return (latest, false);
        }
        if window_end.signed_duration_since(observation.observed_at) > max_age {
            continue;
        }
        keep_latest(&mut latest, observation);
    }

    tracing::warn!("Observation queue closed: all producers are gone");
    (latest, true)
}

fn keep_latest(latest: &mut HashMap<String, CandleObservation>, observation: CandleObservation) {
    let identity = observation.identity();
    match latest.get(&identity) {
        Some(existing) if existing.candle_ts >= observation.candle_ts => {}
        _ => {
            latest.insert(identity, observation);
        }
    }
}

/// Periodic drain → aggregate → publish loop
pub struct AggregationWindow {
    tick_interval: Duration,
    aggregator: PriceAggregator,
    publisher: Publisher,
}

impl AggregationWindow {
    pub fn new(tick_interval: Duration, aggregator: PriceAggregator, publisher: Publisher) -> Self {
        Self {
            tick_interval,
            aggregator,
            publisher,
        }
    }

    fn max_age(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.tick_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_TICK_INTERVAL.as_secs() as i64))
    }

    /// Run forever, one window per tick. Only returns if the queue closes.
    pub async fn run(self, mut rx: Receiver<CandleObservation>) {
        let mut ticker = interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let max_age = self.max_age();

        tracing::info!(
            tick_secs = self.tick_interval.as_secs(),
            "Aggregation window started"
        );

        loop {
            ticker.tick().await;
            let window_end = Utc::now();

            let (observations, closed) = drain_window(&mut rx, window_end, max_age).await;
            tracing::info!(
                window_end = %window_end,
                observations = observations.len(),
                "Window drained"
            );

            match self.aggregator.aggregate(&observations, window_end) {
                Ok(aggregates) => {
                    for aggregate in &aggregates {
                        tracing::info!(
                            asset = %aggregate.asset,
                            vwap = aggregate.vwap,
                            "Aggregate computed"
                        );
                    }
                    self.publisher.publish(&aggregates, window_end).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Aggregation failed for this window");
                }
            }

            if closed {
                tracing::warn!("Aggregation window stopping: queue closed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn obs(venue: &str, asset: &str, price: f64, candle: i64, observed: i64) -> CandleObservation {
        CandleObservation {
            asset: asset.to_string(),
            closing_price: price,
            volume: 1.0,
            candle_ts: at(candle),
            observed_at: at(observed),
            venue: venue.to_string(),
        }
    }

    async fn drain_all(items: Vec<CandleObservation>, end: i64) -> HashMap<String, CandleObservation> {
        let (tx, mut rx) = mpsc::channel(items.len() + 1);
        for item in items {
            tx.send(item).await.unwrap();
        }
        drop(tx);
        drain(&mut rx, at(end), chrono::Duration::seconds(60)).await
    }

    #[tokio::test]
    async fn drain_stops_at_boundary_and_discards_crossing_item() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(obs("Binance", "BTCUSDT", 100.0, 10, 10)).await.unwrap();
        tx.send(obs("Binance", "ETHUSDT", 10.0, 60, 60)).await.unwrap();
        tx.send(obs("GateIO", "BTCUSDT", 101.0, 61, 61)).await.unwrap();

        let result = drain(&mut rx, at(60), chrono::Duration::seconds(60)).await;
        assert_eq!(result.len(), 1);
        assert!(result.contains_key("Binance-BTCUSDT"));

        // the item after the boundary stays queued for the next tick
        let next = rx.recv().await.unwrap();
        assert_eq!(next.venue, "GateIO");
    }

    #[tokio::test]
    async fn drain_skips_stale_observations() {
        let result = drain_all(
            vec![
                obs("Binance", "BTCUSDT", 100.0, 0, -5),
                obs("Huobi", "BTCUSDT", 100.0, 50, 50),
            ],
            60,
        )
        .await;
        assert_eq!(result.len(), 1);
        assert!(result.contains_key("Huobi-BTCUSDT"));
    }

    #[tokio::test]
    async fn drain_keeps_observation_exactly_one_interval_old() {
        let result = drain_all(vec![obs("Binance", "BTCUSDT", 100.0, 0, 0)], 60).await;
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn drain_keeps_latest_candle_not_latest_arrival() {
        let result = drain_all(
            vec![
                obs("Kucoin", "BTCUSDT", 102.0, 40, 41),
                obs("Kucoin", "BTCUSDT", 101.0, 20, 42),
            ],
            60,
        )
        .await;
        assert_eq!(result["Kucoin-BTCUSDT"].closing_price, 102.0);
    }

    #[tokio::test]
    async fn drain_is_independent_of_arrival_order() {
        let items = vec![
            obs("Binance", "BTCUSDT", 100.0, 10, 10),
            obs("Binance", "BTCUSDT", 100.5, 30, 30),
            obs("GateIO", "BTCUSDT", 99.0, 20, 20),
            obs("GateIO", "ETHUSDT", 5.0, 25, 25),
            obs("GateIO", "ETHUSDT", 6.0, 15, 15),
        ];
        let mut reversed = items.clone();
        reversed.reverse();

        let forward = drain_all(items, 60).await;
        let backward = drain_all(reversed, 60).await;
        assert_eq!(forward, backward);
        assert_eq!(forward["Binance-BTCUSDT"].closing_price, 100.5);
        assert_eq!(forward["GateIO-ETHUSDT"].closing_price, 5.0);
    }

    #[tokio::test]
    async fn drain_returns_when_producers_hang_up() {
        let result = drain_all(vec![obs("OKEx", "BTCUSDT", 1.0, 5, 5)], 60).await;
        assert_eq!(result.len(), 1);
    }
}
