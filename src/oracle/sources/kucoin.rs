//! Kucoin candle stream
//!
//! Kucoin requires a public bullet token before dialing the socket, and the
//! client must send its own pings to keep the session alive.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{parse_decimal, Frame, VenueProtocol};
use crate::error::FeedError;
use crate::types::{canonical_asset, CandleObservation, Exchange};

pub const KUCOIN_TOKEN_URL: &str = "https://api.kucoin.com/api/v1/bullet-public";
pub const KUCOIN_WS_URL: &str = "wss://ws-api-spot.kucoin.com/";

const PING_INTERVAL: Duration = Duration::from_secs(18);

#[derive(Debug, Clone)]
pub struct KucoinProtocol {
    token_url: String,
    ws_url: String,
    http: reqwest::Client,
}

impl KucoinProtocol {
    pub fn new(token_url: &str, ws_url: &str) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            token_url: token_url.to_string(),
            ws_url: ws_url.to_string(),
            http,
        })
    }

    fn topic(asset: &str) -> String {
        format!("/market/candles:{}-USDT_1min", asset.to_uppercase())
    }

    /// Socket URL for a bullet response, falling back to the configured URL
    /// when the venue lists no instance server
    fn socket_url(&self, bullet: &BulletData) -> String {
        let base = bullet
            .instance_servers
            .first()
            .map(|s| s.endpoint.as_str())
            .unwrap_or(self.ws_url.as_str());
        format!("{}?token={}", base, bullet.token)
    }
}

#[derive(Debug, Deserialize)]
struct BulletResponse {
    data: BulletData,
}

#[derive(Debug, Deserialize)]
struct BulletData {
    token: String,
    #[serde(rename = "instanceServers", default)]
    instance_servers: Vec<InstanceServer>,
}

#[derive(Debug, Deserialize)]
struct InstanceServer {
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct SubscribeMsg {
    id: usize,
    #[serde(rename = "type")]
    msg_type: &'static str,
    topic: String,
    response: bool,
}

#[derive(Debug, Deserialize)]
struct KucoinMessage {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    data: Option<CandleData>,
}

#[derive(Debug, Deserialize)]
struct CandleData {
    symbol: String,
    /// `[start, open, close, high, low, volume, turnover]`
    candles: Vec<String>,
    /// Push time in nanoseconds
    time: i64,
}

#[async_trait]
impl VenueProtocol for KucoinProtocol {
    fn venue(&self) -> Exchange {
        Exchange::Kucoin
    }

    async fn endpoint(&self, _assets: &[String]) -> Result<String, FeedError> {
        let bullet: BulletResponse = self
            .http
            .post(&self.token_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::debug!(venue = %self.venue(), "Obtained public bullet token");
        Ok(self.socket_url(&bullet.data))
    }

    fn subscribe_messages(&self, assets: &[String]) -> Vec<String> {
        assets
            .iter()
            .enumerate()
            .filter_map(|(i, asset)| {
                serde_json::to_string(&SubscribeMsg {
                    id: i + 1,
                    msg_type: "subscribe",
                    topic: Self::topic(asset),
                    response: true,
                })
                .ok()
            })
            .collect()
    }

    fn heartbeat(&self) -> Option<(Duration, String)> {
        Some((PING_INTERVAL, r#"{"id":"1","type":"ping"}"#.to_string()))
    }

    fn decode(&self, payload: &str, observed_at: DateTime<Utc>) -> Result<Frame, FeedError> {
        let msg: KucoinMessage = serde_json::from_str(payload)?;
        if msg.msg_type != "message" {
            return Ok(Frame::Skip);
        }

        let data = msg
            .data
            .ok_or_else(|| FeedError::decode(self.venue().as_str(), "message without data"))?;
        if data.candles.len() < 6 {
            return Err(FeedError::decode(
                self.venue().as_str(),
                format!("expected 7 candle fields, got {}", data.candles.len()),
            ));
        }

        Ok(Frame::candles(vec![CandleObservation {
            asset: canonical_asset(&data.symbol),
            closing_price: parse_decimal(self.venue(), "candles[2]", &data.candles[2])?,
            volume: parse_decimal(self.venue(), "candles[5]", &data.candles[5])?,
            candle_ts: Utc.timestamp_nanos(data.time),
            observed_at,
            venue: self.venue().to_string(),
        }]))
    }
}
