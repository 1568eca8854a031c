//! Core types used throughout refprice
//!
//! Defines the normalized observations every scraper produces and the
//! on-chain token/pair descriptors used by the DEX pair engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical quote suffix appended to every CEX asset identity.
pub const CANONICAL_QUOTE: &str = "USDT";

/// Quote suffixes stripped from venue symbols before canonicalization.
const QUOTE_SUFFIXES: [&str; 4] = ["USDT", "USDC", "BUSD", "USD"];

/// Supported centralized exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Binance,
    GateIO,
    Kucoin,
    Huobi,
    OKEx,
    HitBTC,
}

impl Exchange {
    pub const ALL: [Exchange; 6] = [
        Exchange::Binance,
        Exchange::GateIO,
        Exchange::Kucoin,
        Exchange::Huobi,
        Exchange::OKEx,
        Exchange::HitBTC,
    ];

    /// Parse from the venue names used on the command line / config
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "binance" => Some(Exchange::Binance),
            "gateio" => Some(Exchange::GateIO),
            "kucoin" => Some(Exchange::Kucoin),
            "huobi" => Some(Exchange::Huobi),
            "okex" | "okx" => Some(Exchange::OKEx),
            "hitbtc" => Some(Exchange::HitBTC),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Binance => "Binance",
            Exchange::GateIO => "GateIO",
            Exchange::Kucoin => "Kucoin",
            Exchange::Huobi => "Huobi",
            Exchange::OKEx => "OKEx",
            Exchange::HitBTC => "HitBTC",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical asset identity for a venue symbol.
///
/// `btcusdt`, `BTC-USDT`, `btc_usd` all map to `BTCUSDT`: uppercase, anything
/// after the first separator dropped, a known quote suffix stripped,
/// [`CANONICAL_QUOTE`] appended.
pub fn canonical_asset(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    let base = upper
        .split(|c: char| c == '-' || c == '_' || c == '/')
        .next()
        .unwrap_or_default();

    let stripped = QUOTE_SUFFIXES
        .iter()
        .find_map(|suffix| {
            base.strip_suffix(*suffix)
                .filter(|rest| !rest.is_empty())
        })
        .unwrap_or(base);

    format!("{}{}", stripped, CANONICAL_QUOTE)
}

/// One venue's latest 1-minute candle close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleObservation {
    /// Canonical asset identity (e.g. "BTCUSDT")
    pub asset: String,
    pub closing_price: f64,
    /// Unsigned for CEX candles, signed for forwarded on-chain trades
    pub volume: f64,
    pub candle_ts: DateTime<Utc>,
    /// When the scraper decoded the message (local clock)
    pub observed_at: DateTime<Utc>,
    pub venue: String,
}

impl CandleObservation {
    /// Dedup identity inside one aggregation window: `venue-asset`
    pub fn identity(&self) -> String {
        format!("{}-{}", self.venue, self.asset)
    }
}

/// Token descriptor shared by on-chain pairs and trades
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AssetRef {
    /// 0x-prefixed hex address, checksummed
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub chain: String,
}

/// On-chain liquidity pool with both tokens resolved
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TradingPair {
    /// token0 of the pool
    pub base: AssetRef,
    /// token1 of the pool
    pub quote: AssetRef,
    /// `BASE-QUOTE` symbols
    pub pair_identity: String,
    pub pool_address: String,
}

impl TradingPair {
    pub fn new(base: AssetRef, quote: AssetRef, pool_address: impl Into<String>) -> Self {
        let pair_identity = format!("{}-{}", base.symbol, quote.symbol);
        Self {
            base,
            quote,
            pair_identity,
            pool_address: pool_address.into(),
        }
    }

    pub fn refresh_identity(&mut self) {
        self.pair_identity = format!("{}-{}", self.base.symbol, self.quote.symbol);
    }
}

/// One normalized on-chain swap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Transaction hash
    pub trade_id: String,
    pub pair_identity: String,
    /// Price of `base` expressed in `quote`
    pub price: f64,
    /// Signed base amount: negative is a sell of the base asset
    pub volume: f64,
    pub base: AssetRef,
    pub quote: AssetRef,
    pub timestamp: DateTime<Utc>,
    pub venue: String,
    pub verified: bool,
}

impl TradeEvent {
    /// Exchange base and quote roles, re-expressing price and volume in the new base.
    ///
    /// Fails on a zero price since the inverse is undefined.
    pub fn swapped(&self) -> Option<TradeEvent> {
        if self.price == 0.0 {
            return None;
        }
        Some(TradeEvent {
            trade_id: self.trade_id.clone(),
            pair_identity: format!("{}-{}", self.quote.symbol, self.base.symbol),
            price: 1.0 / self.price,
            volume: -self.price * self.volume,
            base: self.quote.clone(),
            quote: self.base.clone(),
            timestamp: self.timestamp,
            venue: self.venue.clone(),
            verified: self.verified,
        })
    }

    /// Asset identity this trade contributes to in the cross-venue window.
    ///
    /// Trades quoted in a USD stable share the CEX identity (`ETHUSDT`), all
    /// others are keyed by their symbol pair.
    pub fn asset_identity(&self) -> String {
        let quote = self.quote.symbol.to_uppercase();
        if QUOTE_SUFFIXES.contains(&quote.as_str()) || quote == "DAI" {
            format!("{}{}", self.base.symbol.to_uppercase(), CANONICAL_QUOTE)
        } else {
            format!(
                "{}-{}",
                self.base.symbol.to_uppercase(),
                self.quote.symbol.to_uppercase()
            )
        }
    }

    /// Convert to a window observation, stamped with the local clock
    pub fn to_observation(&self, observed_at: DateTime<Utc>) -> CandleObservation {
        CandleObservation {
            asset: self.asset_identity(),
            closing_price: self.price,
            volume: self.volume,
            candle_ts: self.timestamp,
            observed_at,
            venue: self.venue.clone(),
        }
    }
}

/// Per-asset output of one aggregation tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub asset: String,
    pub vwap: f64,
    pub window_end: DateTime<Utc>,
}
