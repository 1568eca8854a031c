//! HitBTC v3 public candle stream

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use super::{from_millis, parse_decimal, Frame, VenueProtocol};
use crate::error::FeedError;
use crate::types::{canonical_asset, CandleObservation, Exchange};

pub const HITBTC_WS_URL: &str = "wss://api.hitbtc.com/api/3/ws/public";

#[derive(Debug, Clone)]
pub struct HitbtcProtocol {
    ws_url: String,
}

impl HitbtcProtocol {
    pub fn new(ws_url: &str) -> Self {
        Self {
            ws_url: ws_url.to_string(),
        }
    }
}

impl Default for HitbtcProtocol {
    fn default() -> Self {
        Self::new(HITBTC_WS_URL)
    }
}

#[derive(Debug, Serialize)]
struct SubscribeMsg {
    method: &'static str,
    ch: &'static str,
    params: SubscribeParams,
    id: usize,
}

#[derive(Debug, Serialize)]
struct SubscribeParams {
    symbols: Vec<String>,
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct HitbtcMessage {
    #[serde(default)]
    result: Option<IgnoredAny>,
    #[serde(default)]
    snapshot: Option<IgnoredAny>,
    #[serde(default)]
    update: Option<HashMap<String, Vec<HitbtcCandle>>>,
}

#[derive(Debug, Deserialize)]
struct HitbtcCandle {
    /// Candle start (ms)
    t: i64,
    c: String,
    v: String,
}

#[async_trait]
impl VenueProtocol for HitbtcProtocol {
    fn venue(&self) -> Exchange {
        Exchange::HitBTC
    }

    async fn endpoint(&self, _assets: &[String]) -> Result<String, FeedError> {
        Ok(self.ws_url.clone())
    }

    fn subscribe_messages(&self, assets: &[String]) -> Vec<String> {
        assets
            .iter()
            .enumerate()
            .filter_map(|(i, asset)| {
                serde_json::to_string(&SubscribeMsg {
                    method: "subscribe",
                    ch: "candles/M1",
                    params: SubscribeParams {
                        symbols: vec![format!("{}USDT", asset.to_uppercase())],
                        limit: 10,
                    },
                    id: i + 1,
                })
                .ok()
            })
            .collect()
    }

    fn decode(&self, payload: &str, observed_at: DateTime<Utc>) -> Result<Frame, FeedError> {
        let msg: HitbtcMessage = serde_json::from_str(payload)?;
        if msg.result.is_some() || msg.snapshot.is_some() {
            return Ok(Frame::Skip);
        }

        let update = msg
            .update
            .ok_or_else(|| FeedError::decode(self.venue().as_str(), "frame without update"))?;

        let mut candles = Vec::with_capacity(update.len());
        for (symbol, series) in update {
            let Some(latest) = series.first() else {
                continue;
            };
            candles.push(CandleObservation {
                asset: canonical_asset(&symbol),
                closing_price: parse_decimal(self.venue(), "update.c", &latest.c)?,
                volume: parse_decimal(self.venue(), "update.v", &latest.v)?,
                candle_ts: from_millis(self.venue(), latest.t)?,
                observed_at,
                venue: self.venue().to_string(),
            });
        }
        Ok(Frame::candles(candles))
    }
}
