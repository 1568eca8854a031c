//! OKEx v3 spot candle stream (raw deflate frames)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{parse_decimal, Compression, Frame, VenueProtocol};
use crate::error::FeedError;
use crate::types::{canonical_asset, CandleObservation, Exchange};

pub const OKEX_WS_URL: &str = "wss://real.okex.com:8443/ws/v3";

const CANDLE_TABLE: &str = "spot/candle60s";
const PING_INTERVAL: Duration = Duration::from_secs(25);

#[derive(Debug, Clone)]
pub struct OkexProtocol {
    ws_url: String,
}

impl OkexProtocol {
    pub fn new(ws_url: &str) -> Self {
        Self {
            ws_url: ws_url.to_string(),
        }
    }

    fn candle_observation(
        &self,
        candle: &OkexCandle,
        observed_at: DateTime<Utc>,
    ) -> Result<CandleObservation, FeedError> {
        let fields = &candle.candle;
        if fields.len() < 6 {
            return Err(FeedError::decode(
                self.venue().as_str(),
                format!("expected 6 candle fields, got {}", fields.len()),
            ));
        }
        let start = DateTime::parse_from_rfc3339(&fields[0])
            .map_err(|e| FeedError::decode(self.venue().as_str(), format!("candle[0]: {e}")))?
            .with_timezone(&Utc);

        Ok(CandleObservation {
            asset: canonical_asset(&candle.instrument_id),
            closing_price: parse_decimal(self.venue(), "candle[4]", &fields[4])?,
            volume: parse_decimal(self.venue(), "candle[5]", &fields[5])?,
            candle_ts: start,
            observed_at,
            venue: self.venue().to_string(),
        })
    }
}

impl Default for OkexProtocol {
    fn default() -> Self {
        Self::new(OKEX_WS_URL)
    }
}

#[derive(Debug, Serialize)]
struct SubscribeMsg {
    op: &'static str,
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OkexMessage {
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    data: Vec<OkexCandle>,
}

#[derive(Debug, Deserialize)]
struct OkexCandle {
    /// `[timestamp, open, high, low, close, volume]`
    candle: Vec<String>,
    instrument_id: String,
}

#[async_trait]
impl VenueProtocol for OkexProtocol {
    fn venue(&self) -> Exchange {
        Exchange::OKEx
    }

    async fn endpoint(&self, _assets: &[String]) -> Result<String, FeedError> {
        Ok(self.ws_url.clone())
    }

    fn subscribe_messages(&self, assets: &[String]) -> Vec<String> {
        assets
            .iter()
            .filter_map(|asset| {
                serde_json::to_string(&SubscribeMsg {
                    op: "subscribe",
                    args: vec![format!("{CANDLE_TABLE}:{}-USDT", asset.to_uppercase())],
                })
                .ok()
            })
            .collect()
    }

    fn compression(&self) -> Compression {
        Compression::Deflate
    }

    fn heartbeat(&self) -> Option<(Duration, String)> {
        Some((PING_INTERVAL, "ping".to_string()))
    }

    fn decode(&self, payload: &str, observed_at: DateTime<Utc>) -> Result<Frame, FeedError> {
        if payload.trim() == "pong" {
            return Ok(Frame::Skip);
        }

        let msg: OkexMessage = serde_json::from_str(payload)?;
        if msg.table.as_deref() != Some(CANDLE_TABLE) {
            return Ok(Frame::Skip);
        }
        if msg.data.is_empty() {
            return Err(FeedError::decode(self.venue().as_str(), "candle table without data"));
        }

        let candles = msg
            .data
            .iter()
            .map(|candle| self.candle_observation(candle, observed_at))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Frame::candles(candles))
    }
}
