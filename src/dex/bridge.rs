//! Forwards on-chain trades into the aggregation window's queue

use std::collections::HashSet;

use chrono::Utc;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::types::{CandleObservation, TradeEvent};

/// Forward every trade whose asset identity is tracked, until either side
/// hangs up. Returns the number of forwarded trades.
pub async fn forward_trades(
    mut trades: Receiver<TradeEvent>,
    queue: Sender<CandleObservation>,
    tracked_assets: HashSet<String>,
) -> usize {
    let mut forwarded = 0;
    while let Some(trade) = trades.recv().await {
        let asset = trade.asset_identity();
        if !tracked_assets.contains(&asset) {
            tracing::trace!(asset = %asset, venue = %trade.venue, "Untracked trade dropped");
            continue;
        }
        if queue.send(trade.to_observation(Utc::now())).await.is_err() {
            tracing::warn!(venue = %trade.venue, "Observation queue closed, stopping trade bridge");
            break;
        }
        forwarded += 1;
    }
    forwarded
}
