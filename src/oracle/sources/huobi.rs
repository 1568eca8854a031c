//! Huobi market kline stream (gzip-compressed frames)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{from_millis, Compression, Frame, VenueProtocol};
use crate::error::FeedError;
use crate::types::{canonical_asset, CandleObservation, Exchange};

pub const HUOBI_WS_URL: &str = "wss://api.huobi.pro/ws";

#[derive(Debug, Clone)]
pub struct HuobiProtocol {
    ws_url: String,
}

impl HuobiProtocol {
    pub fn new(ws_url: &str) -> Self {
        Self {
            ws_url: ws_url.to_string(),
        }
    }
}

impl Default for HuobiProtocol {
    fn default() -> Self {
        Self::new(HUOBI_WS_URL)
    }
}

#[derive(Debug, Serialize)]
struct SubscribeMsg {
    sub: String,
    id: String,
}

#[derive(Debug, Deserialize)]
struct HuobiMessage {
    #[serde(default)]
    ping: Option<i64>,
    /// `market.<sym>usdt.kline.1min`
    #[serde(default)]
    ch: Option<String>,
    /// Push time (ms)
    #[serde(default)]
    ts: Option<i64>,
    #[serde(default)]
    tick: Option<Tick>,
}

#[derive(Debug, Deserialize)]
struct Tick {
    close: f64,
    /// Base currency volume
    amount: f64,
}

#[async_trait]
impl VenueProtocol for HuobiProtocol {
    fn venue(&self) -> Exchange {
        Exchange::Huobi
    }

    async fn endpoint(&self, _assets: &[String]) -> Result<String, FeedError> {
        Ok(self.ws_url.clone())
    }

    fn subscribe_messages(&self, assets: &[String]) -> Vec<String> {
        assets
            .iter()
            .filter_map(|asset| {
                serde_json::to_string(&SubscribeMsg {
                    sub: format!("market.{}usdt.kline.1min", asset.to_lowercase()),
                    id: "id1".to_string(),
                })
                .ok()
            })
            .collect()
    }

    fn compression(&self) -> Compression {
        Compression::Gzip
    }

    fn decode(&self, payload: &str, observed_at: DateTime<Utc>) -> Result<Frame, FeedError> {
        let msg: HuobiMessage = serde_json::from_str(payload)?;

        if let Some(ping) = msg.ping {
            return Ok(Frame::Reply(format!(r#"{{"pong":{ping}}}"#)));
        }
        let Some(tick) = msg.tick else {
            return Ok(Frame::Skip);
        };

        let channel = msg
            .ch
            .ok_or_else(|| FeedError::decode(self.venue().as_str(), "tick without ch"))?;
        let symbol = channel.split('.').nth(1).ok_or_else(|| {
            FeedError::decode(self.venue().as_str(), format!("unexpected channel {channel:?}"))
        })?;
        let ts = msg
            .ts
            .ok_or_else(|| FeedError::decode(self.venue().as_str(), "tick without ts"))?;

        Ok(Frame::candles(vec![CandleObservation {
            asset: canonical_asset(symbol),
            closing_price: tick.close,
            volume: tick.amount,
            candle_ts: from_millis(self.venue(), ts)?,
            observed_at,
            venue: self.venue().to_string(),
        }]))
    }
}
