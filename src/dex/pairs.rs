//! Pair discovery and health filtering
//!
//! Enumerates every pool of a UniswapV2-style factory, resolves both tokens'
//! metadata and decides which pools are worth subscribing to.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use ethers::utils::to_checksum;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::{BootstrapPairConfig, BootstrapTokenConfig};
use crate::dex::chain::ChainReader;
use crate::dex::swap::NATIVE_ADDRESS;
use crate::error::DexError;
use crate::types::{AssetRef, TradingPair};

/// Shortest symbol a healthy token may carry
const MIN_SYMBOL_LEN: usize = 2;
/// Resolved pairs buffered ahead of the subscriber
const PAIR_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
struct ReverseTokenFile {
    #[serde(rename = "Tokens", default)]
    tokens: Vec<ReverseToken>,
}

#[derive(Debug, Deserialize)]
struct ReverseToken {
    #[serde(rename = "Address")]
    address: String,
}

/// Parse a reverse-token document into its quote addresses
pub fn parse_reverse_tokens(json: &str) -> Result<Vec<String>, serde_json::Error> {
    let file: ReverseTokenFile = serde_json::from_str(json)?;
    Ok(file.tokens.into_iter().map(|t| t.address).collect())
}

/// Load the reverse-token list; an unreadable file degrades to an empty list
pub fn load_reverse_tokens(path: &Path) -> Vec<String> {
    let result = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|json| parse_reverse_tokens(&json).map_err(|e| e.to_string()));

    match result {
        Ok(tokens) => {
            tracing::info!(path = %path.display(), count = tokens.len(), "Loaded reverse tokens");
            tokens
        }
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Error getting tokens for which pairs should be reversed"
            );
            Vec::new()
        }
    }
}

/// Wrapped-native canonicalization plus blacklist health check
#[derive(Debug, Clone, Default)]
pub struct PairFilter {
    blacklist_symbols: HashSet<String>,
    blacklist_addresses: HashSet<String>,
    /// `(wrapped token address, native symbol)`
    wrapped_native: Option<(String, String)>,
}

impl PairFilter {
    pub fn new<S, A>(blacklist_symbols: S, blacklist_addresses: A) -> Self
    where
        S: IntoIterator<Item = String>,
        A: IntoIterator<Item = String>,
    {
        Self {
            blacklist_symbols: blacklist_symbols
                .into_iter()
                .map(|s| s.to_uppercase())
                .collect(),
            blacklist_addresses: blacklist_addresses
                .into_iter()
                .map(|a| a.to_lowercase())
                .collect(),
            wrapped_native: None,
        }
    }

    /// Treat `wrapped` as the chain's native asset named `native_symbol`
    pub fn with_wrapped_native(mut self, wrapped: &str, native_symbol: &str) -> Self {
        self.wrapped_native = Some((wrapped.to_lowercase(), native_symbol.to_string()));
        self
    }

    /// Rewrite a wrapped-native token to the native sentinel
    pub fn normalize(&self, pair: &mut TradingPair) {
        let Some((wrapped, native_symbol)) = &self.wrapped_native else {
            return;
        };
        let mut changed = false;
        for token in [&mut pair.base, &mut pair.quote] {
            if token.address.to_lowercase() == *wrapped {
                token.symbol = native_symbol.clone();
                token.address = NATIVE_ADDRESS.to_string();
                changed = true;
            }
        }
        if changed {
            pair.refresh_identity();
        }
    }

    pub fn is_healthy(&self, pair: &TradingPair) -> bool {
        for token in [&pair.base, &pair.quote] {
            if token.symbol.chars().count() < MIN_SYMBOL_LEN {
                tracing::info!(pair = %pair.pair_identity, "Skip pair: symbol too short");
                return false;
            }
            if self.blacklist_symbols.contains(&token.symbol.to_uppercase()) {
                tracing::info!(
                    pair = %pair.pair_identity,
                    symbol = %token.symbol,
                    "Skip pair: symbol is blacklisted"
                );
                return false;
            }
            if self.blacklist_addresses.contains(&token.address.to_lowercase()) {
                tracing::info!(pair = %pair.pair_identity, "Skip pair: address is blacklisted");
                return false;
            }
        }
        true
    }

    /// Normalize, then keep only healthy pairs
    pub fn admit(&self, mut pair: TradingPair) -> Option<TradingPair> {
        self.normalize(&mut pair);
        self.is_healthy(&pair).then_some(pair)
    }
}

/// Resolves factory indices and pool addresses into [`TradingPair`]s
#[derive(Clone)]
pub struct PairDiscovery {
    reader: Arc<dyn ChainReader>,
    /// Delay between two resolution tasks
    wait: Duration,
    chain: String,
}

impl PairDiscovery {
    pub fn new(reader: Arc<dyn ChainReader>, wait: Duration, chain: impl Into<String>) -> Self {
        Self {
            reader,
            wait,
            chain: chain.into(),
        }
    }

    pub async fn pair_count(&self) -> Result<u64, DexError> {
        self.reader.all_pairs_length().await
    }

    async fn token(&self, address: Address) -> Result<AssetRef, DexError> {
        let metadata = self.reader.token_metadata(address).await?;
        Ok(AssetRef {
            address: to_checksum(&address, None),
            symbol: metadata.symbol,
            name: metadata.name,
            decimals: metadata.decimals,
            chain: self.chain.clone(),
        })
    }

    pub async fn pair_by_address(&self, pool: Address) -> Result<TradingPair, DexError> {
        let (token0, token1) = self.reader.pair_tokens(pool).await?;
        let base = self.token(token0).await?;
        let quote = self.token(token1).await?;
        Ok(TradingPair::new(base, quote, to_checksum(&pool, None)))
    }

    pub async fn pair_by_index(&self, index: u64) -> Result<TradingPair, DexError> {
        tracing::debug!(index, "Get pair ID");
        let pool = self.reader.pair_address(index).await?;
        self.pair_by_address(pool).await
    }

    /// Resolve every factory index in the background, staggering the calls
    /// by `wait`, and hand each pair over as soon as it resolves.
    ///
    /// Only a failing pair count is returned as an error; failed indices are
    /// logged and skipped. Pairs arrive in completion order and the channel
    /// closes once every index has been tried. Dropping the receiver stops
    /// the resolution.
    pub async fn stream_pairs(&self) -> Result<mpsc::Receiver<(u64, TradingPair)>, DexError> {
        let count = self.pair_count().await?;
        tracing::info!(chain = %self.chain, count, "Found pairs");

        let (tx, rx) = mpsc::channel(PAIR_BUFFER);
        tokio::spawn(self.clone().resolve_indices(count, tx));
        Ok(rx)
    }

    async fn resolve_indices(self, count: u64, tx: mpsc::Sender<(u64, TradingPair)>) {
        let mut tasks = JoinSet::new();
        for index in 0..count {
            if !self.wait.is_zero() {
                tokio::time::sleep(self.wait).await;
            }
            if tx.is_closed() {
                tracing::debug!(chain = %self.chain, index, "Pair consumer gone, stop resolving");
                return;
            }
            let discovery = self.clone();
            let sink = tx.clone();
            tasks.spawn(async move {
                match discovery.pair_by_index(index).await {
                    Ok(pair) => {
                        if sink.send((index, pair)).await.is_err() {
                            tracing::debug!(index, "Resolved pair dropped, consumer gone");
                        }
                    }
                    Err(e) => tracing::error!(index, error = %e, "Error retrieving pair by ID"),
                }
            });
        }

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => tracing::error!(error = %e, "Pair resolution task failed"),
                    None => break,
                },
                _ = tx.closed() => {
                    tracing::debug!(chain = %self.chain, "Pair consumer gone, aborting resolution");
                    break;
                }
            }
        }
    }

    /// Resolve every factory index and return the pairs in factory order
    pub async fn discover_all(&self) -> Result<Vec<TradingPair>, DexError> {
        let mut resolved = self.stream_pairs().await?;
        let mut pairs = Vec::new();
        while let Some(item) = resolved.recv().await {
            pairs.push(item);
        }

        pairs.sort_by_key(|(index, _)| *index);
        Ok(pairs.into_iter().map(|(_, pair)| pair).collect())
    }

    /// Every healthy, normalized pair listed by the factory
    pub async fn fetch_available_pairs(&self, filter: &PairFilter) -> Result<Vec<TradingPair>, DexError> {
        let pairs = self.discover_all().await?;
        Ok(pairs.into_iter().filter_map(|p| filter.admit(p)).collect())
    }
}

fn bootstrap_token(cfg: &BootstrapTokenConfig, chain: &str) -> Result<AssetRef, DexError> {
    let address: Address = cfg
        .address
        .parse()
        .map_err(|_| DexError::InvalidAddress(cfg.address.clone()))?;
    Ok(AssetRef {
        address: to_checksum(&address, None),
        symbol: cfg.symbol.clone(),
        name: cfg.name.clone().unwrap_or_else(|| cfg.symbol.clone()),
        decimals: cfg.decimals,
        chain: chain.to_string(),
    })
}

/// Build a statically configured pool that is not (yet) listed by the factory
pub fn bootstrap_pair(cfg: &BootstrapPairConfig, chain: &str) -> Result<TradingPair, DexError> {
    let pool: Address = cfg
        .pool
        .parse()
        .map_err(|_| DexError::InvalidAddress(cfg.pool.clone()))?;
    Ok(TradingPair::new(
        bootstrap_token(&cfg.token0, chain)?,
        bootstrap_token(&cfg.token1, chain)?,
        to_checksum(&pool, None),
    ))
}
