//! Candle source implementations (Binance, GateIO, Kucoin, Huobi, OKEx, HitBTC)
//!
//! Each venue only describes its protocol: where to connect, what to
//! subscribe, how frames are compressed and how a payload decodes. The
//! shared [`StreamingSession`] owns the WebSocket and the receive loop.

pub mod binance;
pub mod gateio;
pub mod hitbtc;
pub mod huobi;
pub mod kucoin;
pub mod okex;

pub use binance::BinanceProtocol;
pub use gateio::GateioProtocol;
pub use hitbtc::HitbtcProtocol;
pub use huobi::HuobiProtocol;
pub use kucoin::KucoinProtocol;
pub use okex::OkexProtocol;

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use flate2::read::{DeflateDecoder, GzDecoder};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::Sender;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::EndpointsConfig;
use crate::error::FeedError;
use crate::types::{CandleObservation, Exchange};

/// Trait for candle sources the supervisor can run
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Venue name used in observations and logs
    fn name(&self) -> &str;

    /// Stream candles for `assets` into `tx` until the session fails or is closed
    async fn run(&self, assets: &[String], tx: &Sender<CandleObservation>) -> Result<(), FeedError>;

    /// Tear down the current session and refuse new ones
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Frame compression used by a venue for binary messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Deflate,
}

/// Meaning of one decoded payload
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Candle closes to forward to the window
    Candles(Vec<CandleObservation>),
    /// Keep-alive answer to send back immediately
    Reply(String),
    /// Status, acknowledgement or snapshot frame
    Skip,
}

impl Frame {
    /// Wrap decoded candles, dropping any whose close is not a positive
    /// finite price or whose volume is not finite
    pub fn candles(observations: Vec<CandleObservation>) -> Self {
        let valid: Vec<CandleObservation> = observations
            .into_iter()
            .filter(|o| {
                let ok = o.closing_price > 0.0 && o.closing_price.is_finite() && o.volume.is_finite();
                if !ok {
                    tracing::warn!(
                        venue = %o.venue,
                        asset = %o.asset,
                        close = o.closing_price,
                        volume = o.volume,
                        "Dropping candle with invalid close"
                    );
                }
                ok
            })
            .collect();

        if valid.is_empty() {
            Frame::Skip
        } else {
            Frame::Candles(valid)
        }
    }
}

/// Venue-specific half of an adapter
#[async_trait]
pub trait VenueProtocol: Send + Sync {
    fn venue(&self) -> Exchange;

    /// URL to dial; may perform a REST bootstrap first
    async fn endpoint(&self, assets: &[String]) -> Result<String, FeedError>;

    /// Subscribe payloads sent right after connecting, one per asset
    fn subscribe_messages(&self, assets: &[String]) -> Vec<String>;

    fn compression(&self) -> Compression {
        Compression::None
    }

    /// Client-initiated keep-alive period and payload
    fn heartbeat(&self) -> Option<(Duration, String)> {
        None
    }

    fn decode(&self, payload: &str, observed_at: DateTime<Utc>) -> Result<Frame, FeedError>;
}

/// One persistent WebSocket session per venue
pub struct StreamingSession<P> {
    protocol: P,
    name: String,
    closed: watch::Sender<bool>,
}

impl<P: VenueProtocol> StreamingSession<P> {
    pub fn new(protocol: P) -> Self {
        let (closed, _) = watch::channel(false);
        let name = protocol.venue().to_string();
        Self {
            protocol,
            name,
            closed,
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    fn transport(&self, source: tokio_tungstenite::tungstenite::Error) -> FeedError {
        FeedError::Transport {
            venue: self.name.clone(),
            source,
        }
    }

    /// Decode one payload and act on it. Returns false once the queue is gone.
    async fn dispatch<W>(
        &self,
        payload: &str,
        write: &mut W,
        tx: &Sender<CandleObservation>,
    ) -> Result<bool, FeedError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        match self.protocol.decode(payload, Utc::now())? {
            Frame::Candles(observations) => {
                for observation in observations {
                    tracing::trace!(
                        venue = %self.name,
                        asset = %observation.asset,
                        close = observation.closing_price,
                        "Candle received"
                    );
                    if tx.send(observation).await.is_err() {
                        return Ok(false);
                    }
                }
            }
            Frame::Reply(reply) => {
                write
                    .send(Message::Text(reply))
                    .await
                    .map_err(|e| self.transport(e))?;
            }
            Frame::Skip => {}
        }
        Ok(true)
    }
}

#[async_trait]
impl<P: VenueProtocol> CandleSource for StreamingSession<P> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, assets: &[String], tx: &Sender<CandleObservation>) -> Result<(), FeedError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Ok(());
        }

        let url = self.protocol.endpoint(assets).await?;
        tracing::info!(
            venue = %self.name,
            url = %url.split('?').next().unwrap_or(url.as_str()),
            "Connecting to venue WebSocket..."
        );

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|source| FeedError::Connect {
                venue: self.name.clone(),
                source,
            })?;
        let (mut write, mut read) = ws_stream.split();

        for msg in self.protocol.subscribe_messages(assets) {
            write
                .send(Message::Text(msg))
                .await
                .map_err(|e| self.transport(e))?;
        }
        tracing::info!(venue = %self.name, assets = ?assets, "✅ Subscribed to 1m candles");

        let mut heartbeat = self.protocol.heartbeat().map(|(period, payload)| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            (ticker, payload)
        });

        loop {
            tokio::select! {
                _ = closed.changed() => {
                    tracing::info!(venue = %self.name, "Closing session");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::debug!(venue = %self.name, error = %e, "Close frame not delivered");
                    }
                    return Ok(());
                }
                payload = next_heartbeat(&mut heartbeat) => {
                    write
                        .send(Message::Text(payload))
                        .await
                        .map_err(|e| self.transport(e))?;
                }
                msg = read.next() => {
                    let payload = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Binary(bytes))) => {
                            decompress(self.protocol.compression(), &bytes).map_err(|source| {
                                FeedError::Decompress {
                                    venue: self.name.clone(),
                                    source,
                                }
                            })?
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write
                                .send(Message::Pong(data))
                                .await
                                .map_err(|e| self.transport(e))?;
                            continue;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::warn!(venue = %self.name, ?frame, "Connection closed by server");
                            return Err(FeedError::Closed { venue: self.name.clone() });
                        }
                        Some(Err(e)) => return Err(self.transport(e)),
                        None => return Err(FeedError::Closed { venue: self.name.clone() }),
                        Some(Ok(_)) => continue,
                    };

                    if !self.dispatch(&payload, &mut write, tx).await? {
                        tracing::warn!(venue = %self.name, "Observation queue closed, ending session");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

async fn next_heartbeat(heartbeat: &mut Option<(Interval, String)>) -> String {
    match heartbeat {
        Some((ticker, payload)) => {
            ticker.tick().await;
            payload.clone()
        }
        None => std::future::pending().await,
    }
}

/// Inflate a binary frame into its JSON text
pub fn decompress(compression: Compression, bytes: &[u8]) -> std::io::Result<String> {
    let mut text = String::new();
    match compression {
        Compression::Gzip => {
            GzDecoder::new(bytes).read_to_string(&mut text)?;
        }
        Compression::Deflate => {
            DeflateDecoder::new(bytes).read_to_string(&mut text)?;
        }
        Compression::None => {
            text = String::from_utf8(bytes.to_vec())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        }
    }
    Ok(text)
}

/// Build the adapter for one configured venue name.
///
/// A name no adapter exists for still gets a source; its `run` fails with
/// [`FeedError::UnknownVenue`] so the supervisor reports it and gives up.
pub fn build_source(
    venue: &str,
    endpoints: &EndpointsConfig,
) -> Result<Arc<dyn CandleSource>, FeedError> {
    let Some(exchange) = Exchange::from_str(venue) else {
        return Ok(Arc::new(UnknownVenueSource::new(venue)));
    };

    let source: Arc<dyn CandleSource> = match exchange {
        Exchange::Binance => Arc::new(StreamingSession::new(BinanceProtocol::new(
            &endpoints.binance,
        ))),
        Exchange::GateIO => Arc::new(StreamingSession::new(GateioProtocol::new(&endpoints.gateio))),
        Exchange::Kucoin => Arc::new(StreamingSession::new(KucoinProtocol::new(
            &endpoints.kucoin_token,
            &endpoints.kucoin,
        )?)),
        Exchange::Huobi => Arc::new(StreamingSession::new(HuobiProtocol::new(&endpoints.huobi))),
        Exchange::OKEx => Arc::new(StreamingSession::new(OkexProtocol::new(&endpoints.okex))),
        Exchange::HitBTC => Arc::new(StreamingSession::new(HitbtcProtocol::new(&endpoints.hitbtc))),
    };
    Ok(source)
}

/// Placeholder for a configured venue name without an adapter
pub struct UnknownVenueSource {
    name: String,
    closed: watch::Sender<bool>,
}

impl UnknownVenueSource {
    pub fn new(name: &str) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            name: name.trim().to_string(),
            closed,
        }
    }
}

#[async_trait]
impl CandleSource for UnknownVenueSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _assets: &[String], _tx: &Sender<CandleObservation>) -> Result<(), FeedError> {
        Err(FeedError::UnknownVenue(self.name.clone()))
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Parse a venue's decimal string field
pub(crate) fn parse_decimal(venue: Exchange, field: &str, raw: &str) -> Result<f64, FeedError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| FeedError::decode(venue.as_str(), format!("{field} = {raw:?}: {e}")))
}

pub(crate) fn from_millis(venue: Exchange, ms: i64) -> Result<DateTime<Utc>, FeedError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| FeedError::decode(venue.as_str(), format!("timestamp out of range: {ms}ms")))
}

pub(crate) fn from_secs(venue: Exchange, secs: i64) -> Result<DateTime<Utc>, FeedError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| FeedError::decode(venue.as_str(), format!("timestamp out of range: {secs}s")))
}

#[cfg(test)]
pub(crate) fn expect_candles(frame: Frame) -> Vec<CandleObservation> {
    match frame {
        Frame::Candles(candles) => candles,
        other => panic!("expected candles, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder};
    use std::io::Write;

    #[test]
    fn decompress_gzip_frame() {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(br#"{"ping":1}"#).unwrap();
        let bytes = encoder.finish().unwrap();

        assert_eq!(decompress(Compression::Gzip, &bytes).unwrap(), r#"{"ping":1}"#);
    }

    #[test]
    fn decompress_raw_deflate_frame() {
        let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(br#"{"table":"x"}"#).unwrap();
        let bytes = encoder.finish().unwrap();

        assert_eq!(
            decompress(Compression::Deflate, &bytes).unwrap(),
            r#"{"table":"x"}"#
        );
    }

    #[test]
    fn decompress_rejects_garbage() {
        assert!(decompress(Compression::Gzip, b"not gzip").is_err());
        assert!(decompress(Compression::None, &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn parse_decimal_reports_field() {
        let err = parse_decimal(Exchange::GateIO, "result.c", "abc").unwrap_err();
        assert!(err.to_string().contains("result.c"));
        assert_eq!(parse_decimal(Exchange::GateIO, "c", " 1.5 ").unwrap(), 1.5);
    }

    #[test]
    fn build_source_names_venue() {
        let endpoints = EndpointsConfig::default();
        for exchange in Exchange::ALL {
            let source = build_source(&exchange.as_str().to_lowercase(), &endpoints).unwrap();
            assert_eq!(source.name(), exchange.as_str());
            assert!(!source.is_closed());
        }
    }

    #[tokio::test]
    async fn unknown_venue_source_fails_without_retry() {
        let source = build_source(" Bitstamp ", &EndpointsConfig::default()).unwrap();
        assert_eq!(source.name(), "Bitstamp");

        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let err = source.run(&["BTC".to_string()], &tx).await.unwrap_err();
        assert!(matches!(err, FeedError::UnknownVenue(ref name) if name == "Bitstamp"));
        assert!(!err.is_retryable());
    }

    fn candle(close: f64, volume: f64) -> CandleObservation {
        CandleObservation {
            asset: "BTCUSDT".to_string(),
            closing_price: close,
            volume,
            candle_ts: Utc::now(),
            observed_at: Utc::now(),
            venue: "Binance".to_string(),
        }
    }

    #[test]
    fn candles_frame_drops_invalid_closes() {
        assert_eq!(Frame::candles(vec![candle(0.0, 1.0)]), Frame::Skip);
        assert_eq!(Frame::candles(vec![candle(-1.0, 1.0)]), Frame::Skip);
        assert_eq!(Frame::candles(vec![candle(f64::NAN, 1.0)]), Frame::Skip);
        assert_eq!(Frame::candles(vec![candle(f64::INFINITY, 1.0)]), Frame::Skip);
        assert_eq!(Frame::candles(vec![candle(100.0, f64::NAN)]), Frame::Skip);

        let kept = expect_candles(Frame::candles(vec![candle(0.0, 1.0), candle(100.0, 0.0)]));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].closing_price, 100.0);
        assert_eq!(kept[0].volume, 0.0);
    }

    #[test]
    fn closed_session_stays_closed() {
        let session = StreamingSession::new(HitbtcProtocol::default());
        session.close();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn run_on_closed_session_returns_immediately() {
        let session = StreamingSession::new(HitbtcProtocol::new("ws://127.0.0.1:1"));
        session.close();
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        assert!(session.run(&["BTC".to_string()], &tx).await.is_ok());
    }
}
