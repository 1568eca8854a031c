//! Binance WebSocket client for 1-minute klines
//!
//! Uses the combined stream endpoint so a single connection carries every
//! asset: `<sym>usdt@kline_1m` joined with `/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{from_millis, parse_decimal, Frame, VenueProtocol};
use crate::error::FeedError;
use crate::types::{canonical_asset, CandleObservation, Exchange};

pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/stream";

#[derive(Debug, Clone)]
pub struct BinanceProtocol {
    ws_url: String,
}

impl BinanceProtocol {
    pub fn new(ws_url: &str) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
        }
    }

    fn build_stream_name(asset: &str) -> String {
        format!("{}usdt@kline_1m", asset.to_lowercase())
    }
}

impl Default for BinanceProtocol {
    fn default() -> Self {
        Self::new(BINANCE_WS_URL)
    }
}

/// Combined stream wrapper: `{"stream": "...", "data": {...}}`
#[derive(Debug, Deserialize)]
struct CombinedStreamMsg {
    data: KlineEvent,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    /// Event time (ms)
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "k")]
    kline: Kline,
}

#[derive(Debug, Deserialize)]
struct Kline {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    close: String,
    /// Taker buy base asset volume
    #[serde(rename = "V")]
    taker_buy_volume: String,
}

#[async_trait]
impl VenueProtocol for BinanceProtocol {
    fn venue(&self) -> Exchange {
        Exchange::Binance
    }

    async fn endpoint(&self, assets: &[String]) -> Result<String, FeedError> {
        let streams: Vec<String> = assets.iter().map(|a| Self::build_stream_name(a)).collect();
        Ok(format!("{}?streams={}", self.ws_url, streams.join("/")))
    }

    fn subscribe_messages(&self, _assets: &[String]) -> Vec<String> {
        // streams are selected by the URL
        Vec::new()
    }

    fn decode(&self, payload: &str, observed_at: DateTime<Utc>) -> Result<Frame, FeedError> {
        let msg: CombinedStreamMsg = serde_json::from_str(payload)?;
        let kline = msg.data.kline;

        Ok(Frame::candles(vec![CandleObservation {
            asset: canonical_asset(&kline.symbol),
            closing_price: parse_decimal(self.venue(), "k.c", &kline.close)?,
            volume: parse_decimal(self.venue(), "k.V", &kline.taker_buy_volume)?,
            candle_ts: from_millis(self.venue(), msg.data.event_time)?,
            observed_at,
            venue: self.venue().to_string(),
        }]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::sources::expect_candles;

    const KLINE_FRAME: &str = r#"{
        "stream": "btcusdt@kline_1m",
        "data": {
            "e": "kline",
            "E": 1700000000123,
            "s": "BTCUSDT",
            "k": {
                "t": 1699999980000,
                "T": 1700000039999,
                "s": "BTCUSDT",
                "i": "1m",
                "o": "36990.00",
                "c": "37000.50",
                "h": "37010.00",
                "l": "36980.00",
                "v": "120.5",
                "V": "60.25",
                "x": false
            }
        }
    }"#;

    #[tokio::test]
    async fn endpoint_combines_lowercase_streams() {
        let protocol = BinanceProtocol::default();
        let url = protocol
            .endpoint(&["BTC".to_string(), "eth".to_string()])
            .await
            .unwrap();
        assert_eq!(
            url,
            "wss://stream.binance.com:9443/stream?streams=btcusdt@kline_1m/ethusdt@kline_1m"
        );
    }

    #[test]
    fn decode_kline_frame() {
        let observed = Utc::now();
        let candles = expect_candles(BinanceProtocol::default().decode(KLINE_FRAME, observed).unwrap());
        assert_eq!(candles.len(), 1);
        let candle = &candles[0];
        assert_eq!(candle.asset, "BTCUSDT");
        assert_eq!(candle.closing_price, 37000.50);
        assert_eq!(candle.volume, 60.25);
        assert_eq!(candle.candle_ts.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(candle.observed_at, observed);
        assert_eq!(candle.venue, "Binance");
    }

    #[test]
    fn decode_rejects_malformed_frame() {
        let err = BinanceProtocol::default()
            .decode(r#"{"result":null,"id":1}"#, Utc::now())
            .unwrap_err();
        assert!(matches!(err, FeedError::Json(_)));
    }

    #[test]
    fn decode_rejects_non_numeric_close() {
        let frame = KLINE_FRAME.replace("37000.50", "n/a");
        let err = BinanceProtocol::default().decode(&frame, Utc::now()).unwrap_err();
        assert!(matches!(err, FeedError::Decode { .. }));
    }

    #[test]
    fn non_positive_close_is_skipped() {
        for close in ["0.00", "-1.5", "NaN", "inf"] {
            let frame = KLINE_FRAME.replace("37000.50", close);
            assert_eq!(BinanceProtocol::default().decode(&frame, Utc::now()).unwrap(), Frame::Skip);
        }
    }
}
