//! GateIO v4 spot candlestick stream

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{from_secs, parse_decimal, Frame, VenueProtocol};
use crate::error::FeedError;
use crate::types::{canonical_asset, CandleObservation, Exchange};

pub const GATEIO_WS_URL: &str = "wss://api.gateio.ws/ws/v4/";

const CHANNEL: &str = "spot.candlesticks";
const INTERVAL: &str = "1m";

#[derive(Debug, Clone)]
pub struct GateioProtocol {
    ws_url: String,
}

impl GateioProtocol {
    pub fn new(ws_url: &str) -> Self {
        Self {
            ws_url: ws_url.to_string(),
        }
    }
}

impl Default for GateioProtocol {
    fn default() -> Self {
        Self::new(GATEIO_WS_URL)
    }
}

#[derive(Debug, Serialize)]
struct SubscribeMsg<'a> {
    time: i64,
    channel: &'a str,
    event: &'a str,
    payload: [String; 2],
}

#[derive(Debug, Deserialize)]
struct GateioMessage {
    #[serde(default)]
    error: Option<GateioError>,
    #[serde(default)]
    result: Option<CandleResult>,
}

#[derive(Debug, Deserialize)]
struct GateioError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CandleResult {
    /// Present on subscribe acknowledgements only
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    c: Option<String>,
    #[serde(default)]
    v: Option<String>,
    /// Candle start, unix seconds as a string
    #[serde(default)]
    t: Option<String>,
    /// `<interval>_<BASE>_<QUOTE>`
    #[serde(default)]
    n: Option<String>,
}

fn required<'a>(field: &str, value: &'a Option<String>) -> Result<&'a str, FeedError> {
    value
        .as_deref()
        .ok_or_else(|| FeedError::decode(Exchange::GateIO.as_str(), format!("missing result.{field}")))
}

#[async_trait]
impl VenueProtocol for GateioProtocol {
    fn venue(&self) -> Exchange {
        Exchange::GateIO
    }

    async fn endpoint(&self, _assets: &[String]) -> Result<String, FeedError> {
        Ok(self.ws_url.clone())
    }

    fn subscribe_messages(&self, assets: &[String]) -> Vec<String> {
        let now = Utc::now().timestamp();
        assets
            .iter()
            .filter_map(|asset| {
                serde_json::to_string(&SubscribeMsg {
                    time: now,
                    channel: CHANNEL,
                    event: "subscribe",
                    payload: [INTERVAL.to_string(), format!("{}_USDT", asset.to_uppercase())],
                })
                .ok()
            })
            .collect()
    }

    fn decode(&self, payload: &str, observed_at: DateTime<Utc>) -> Result<Frame, FeedError> {
        let msg: GateioMessage = serde_json::from_str(payload)?;

        if let Some(err) = msg.error {
            tracing::warn!(venue = %self.venue(), code = err.code, message = %err.message, "Venue reported an error");
            return Ok(Frame::Skip);
        }

        let Some(result) = msg.result else {
            return Ok(Frame::Skip);
        };
        if result.status.is_some() {
            return Ok(Frame::Skip);
        }

        let name = required("n", &result.n)?;
        let base = name.split('_').nth(1).ok_or_else(|| {
            FeedError::decode(self.venue().as_str(), format!("unexpected candle name {name:?}"))
        })?;
        let start: i64 = required("t", &result.t)?
            .parse()
            .map_err(|e| FeedError::decode(self.venue().as_str(), format!("result.t: {e}")))?;

        Ok(Frame::candles(vec![CandleObservation {
            asset: canonical_asset(base),
            closing_price: parse_decimal(self.venue(), "result.c", required("c", &result.c)?)?,
            volume: parse_decimal(self.venue(), "result.v", required("v", &result.v)?)?,
            candle_ts: from_secs(self.venue(), start)?,
            observed_at,
            venue: self.venue().to_string(),
        }]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::sources::expect_candles;

    #[test]
    fn subscribe_payload_per_asset() {
        let msgs = GateioProtocol::default().subscribe_messages(&["btc".to_string(), "ETH".to_string()]);
        assert_eq!(msgs.len(), 2);

        let first: serde_json::Value = serde_json::from_str(&msgs[0]).unwrap();
        assert_eq!(first["channel"], "spot.candlesticks");
        assert_eq!(first["event"], "subscribe");
        assert_eq!(first["payload"][0], "1m");
        assert_eq!(first["payload"][1], "BTC_USDT");
    }

    #[test]
    fn decode_candle_update() {
        let payload = r#"{
            "time": 1700000001,
            "channel": "spot.candlesticks",
            "event": "update",
            "result": {
                "t": "1700000000",
                "v": "2165.5",
                "c": "36950.1",
                "h": "36960",
                "l": "36940",
                "o": "36945",
                "n": "1m_BTC_USDT",
                "a": "58.6"
            }
        }"#;

        let candles = expect_candles(GateioProtocol::default().decode(payload, Utc::now()).unwrap());
        assert_eq!(candles[0].asset, "BTCUSDT");
        assert_eq!(candles[0].closing_price, 36950.1);
        assert_eq!(candles[0].volume, 2165.5);
        assert_eq!(candles[0].candle_ts.timestamp(), 1_700_000_000);
        assert_eq!(candles[0].venue, "GateIO");
    }

    #[test]
    fn subscribe_ack_is_skipped() {
        let payload = r#"{"time":1700000000,"channel":"spot.candlesticks","event":"subscribe","result":{"status":"success"}}"#;
        let frame = GateioProtocol::default().decode(payload, Utc::now()).unwrap();
        assert_eq!(frame, Frame::Skip);
    }

    #[test]
    fn error_frame_is_logged_and_skipped() {
        let payload = r#"{"time":1700000000,"channel":"spot.candlesticks","event":"subscribe","error":{"code":2,"message":"unknown currency pair FOO_USDT"},"result":null}"#;
        let frame = GateioProtocol::default().decode(payload, Utc::now()).unwrap();
        assert_eq!(frame, Frame::Skip);
    }

    #[test]
    fn missing_close_is_a_decode_error() {
        let payload = r#"{"result":{"t":"1700000000","v":"1","n":"1m_BTC_USDT"}}"#;
        let err = GateioProtocol::default().decode(payload, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("result.c"));
    }

    #[test]
    fn negative_close_is_skipped() {
        let payload = r#"{"event":"update","result":{"t":"1700000000","v":"1","c":"-36950.1","n":"1m_BTC_USDT"}}"#;
        assert_eq!(GateioProtocol::default().decode(payload, Utc::now()).unwrap(), Frame::Skip);
    }
}
