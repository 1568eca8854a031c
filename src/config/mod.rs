//! Configuration management for refprice
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::oracle::sources::{
    binance::BINANCE_WS_URL, gateio::GATEIO_WS_URL, hitbtc::HITBTC_WS_URL, huobi::HUOBI_WS_URL,
    kucoin::{KUCOIN_TOKEN_URL, KUCOIN_WS_URL},
    okex::OKEX_WS_URL,
};
use crate::types::Exchange;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub endpoints: EndpointsConfig,
    pub persistence: PersistenceConfig,
    pub dex: DexConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Comma-separated asset symbols (e.g. "BTC,ETH")
    pub assets: String,
    /// Comma-separated venue names
    pub exchanges: String,
    /// Aggregation tick in seconds
    pub tick_interval_secs: u64,
    /// Outlier threshold in basis points of the median
    pub outlier_basis_points: f64,
    /// Shared observation queue capacity
    pub queue_capacity: usize,
    /// Delay before restarting a failed venue session
    pub restart_cooldown_secs: u64,
}

/// Streaming endpoints of the centralized venues
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    pub binance: String,
    pub gateio: String,
    /// REST endpoint issuing the public WebSocket token
    pub kucoin_token: String,
    /// Fallback socket URL when the token response lists no server
    pub kucoin: String,
    pub huobi: String,
    pub okex: String,
    pub hitbtc: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            binance: BINANCE_WS_URL.to_string(),
            gateio: GATEIO_WS_URL.to_string(),
            kucoin_token: KUCOIN_TOKEN_URL.to_string(),
            kucoin: KUCOIN_WS_URL.to_string(),
            huobi: HUOBI_WS_URL.to_string(),
            okex: OKEX_WS_URL.to_string(),
            hitbtc: HITBTC_WS_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DexConfig {
    /// Start the on-chain pair engine
    pub enabled: bool,
    /// JSON document listing quote tokens whose pairs are reversed
    pub reverse_tokens_path: String,
    #[serde(default)]
    pub blacklist_symbols: Vec<String>,
    #[serde(default)]
    pub blacklist_addresses: Vec<String>,
    #[serde(default)]
    pub venues: Vec<DexVenueConfig>,
}

/// One UniswapV2-style venue on one chain
#[derive(Debug, Clone, Deserialize)]
pub struct DexVenueConfig {
    pub name: String,
    pub chain: String,
    /// Pair factory contract
    pub factory: String,
    /// WebSocket RPC for swap subscriptions
    pub ws_url: String,
    /// HTTP RPC for contract reads
    pub rest_url: String,
    /// Delay between pair resolution calls; venue default when unset
    #[serde(default)]
    pub wait_ms: Option<u64>,
    /// Wrapped native token rewritten to the native asset
    #[serde(default)]
    pub wrapped_native: Option<String>,
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
    /// Quote assets that keep native pairs unreversed
    #[serde(default)]
    pub main_quote_assets: Vec<String>,
    #[serde(default)]
    pub invert_native_pairs: bool,
    #[serde(default)]
    pub bootstrap_pairs: Vec<BootstrapPairConfig>,
}

fn default_native_symbol() -> String {
    "ETH".to_string()
}

impl DexVenueConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms.unwrap_or_else(|| default_wait_ms(&self.name)))
    }
}

/// Pair resolution delay per venue, tuned to the usual RPC rate limits
pub fn default_wait_ms(venue: &str) -> u64 {
    match venue.to_lowercase().as_str() {
        "uniswap" | "uniswapv2" => 25,
        "sushiswap" => 100,
        "pancakeswap" => 600,
        "dfyn" => 100,
        "quickswap" => 100,
        "ubeswap" => 200,
        "spookyswap" => 200,
        "solarbeam" => 400,
        "trisolaris" => 200,
        _ => 100,
    }
}

/// Statically configured pool
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapPairConfig {
    pub pool: String,
    pub token0: BootstrapTokenConfig,
    pub token1: BootstrapTokenConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapTokenConfig {
    pub address: String,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    pub decimals: u8,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let endpoints = EndpointsConfig::default();
        let config = Config::builder()
            // Feed defaults
            .set_default("feed.assets", "BTC,ETH")?
            .set_default("feed.exchanges", "Binance,GateIO,Kucoin,Huobi")?
            .set_default("feed.tick_interval_secs", 60)?
            .set_default("feed.outlier_basis_points", 30.0)?
            .set_default("feed.queue_capacity", 10_000)?
            .set_default("feed.restart_cooldown_secs", 30)?
            // Endpoint defaults
            .set_default("endpoints.binance", endpoints.binance)?
            .set_default("endpoints.gateio", endpoints.gateio)?
            .set_default("endpoints.kucoin_token", endpoints.kucoin_token)?
            .set_default("endpoints.kucoin", endpoints.kucoin)?
            .set_default("endpoints.huobi", endpoints.huobi)?
            .set_default("endpoints.okex", endpoints.okex)?
            .set_default("endpoints.hitbtc", endpoints.hitbtc)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            // DEX defaults
            .set_default("dex.enabled", false)?
            .set_default("dex.reverse_tokens_path", "config/reverse_tokens.json")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (REFPRICE__*)
            .add_source(Environment::with_prefix("REFPRICE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.apply_wait_overrides();

        Ok(app_config)
    }

    /// `<VENUE>_WAIT_TIME` (milliseconds) overrides a venue's discovery delay
    fn apply_wait_overrides(&mut self) {
        for venue in &mut self.dex.venues {
            let key = format!("{}_WAIT_TIME", venue.name.to_uppercase());
            let Ok(raw) = std::env::var(&key) else {
                continue;
            };
            match raw.trim().parse::<u64>() {
                Ok(ms) => venue.wait_ms = Some(ms),
                Err(e) => {
                    tracing::error!(key = %key, value = %raw, error = %e, "Could not parse wait time");
                }
            }
        }
    }

    /// Asset symbols to subscribe, uppercased
    pub fn asset_list(&self) -> Vec<String> {
        split_list(&self.feed.assets)
            .map(|s| s.to_uppercase())
            .collect()
    }

    /// Canonical identities of the tracked assets (e.g. "BTCUSDT")
    pub fn tracked_identities(&self) -> Vec<String> {
        self.asset_list()
            .iter()
            .map(|a| crate::types::canonical_asset(a))
            .collect()
    }

    /// Configured venue names, trimmed and deduplicated.
    ///
    /// Names are kept even when no adapter exists for them; the supervisor
    /// reports those when their session fails to start.
    pub fn venue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in split_list(&self.feed.exchanges) {
            let duplicate = names.iter().any(|seen| match (Exchange::from_str(seen), Exchange::from_str(name)) {
                (Some(a), Some(b)) => a == b,
                _ => seen.eq_ignore_ascii_case(name),
            });
            if !duplicate {
                names.push(name.to_string());
            }
        }
        names
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.feed.tick_interval_secs.max(1))
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.feed.restart_cooldown_secs)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "assets={:?} exchanges={} tick={}s outlier_bps={} queue={} dex_venues={}",
            self.asset_list(),
            self.feed.exchanges,
            self.feed.tick_interval_secs,
            self.feed.outlier_basis_points,
            self.feed.queue_capacity,
            if self.dex.enabled { self.dex.venues.len() } else { 0 },
        )
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
