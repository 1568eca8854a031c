//! On-chain AMM pair engine
//!
//! UniswapV2-style venues on any EVM chain: pool discovery through the
//! factory, health filtering, per-pool swap subscriptions and quote-direction
//! normalization. Trades on tracked assets are bridged into the aggregation
//! window.

pub mod bridge;
pub mod chain;
pub mod pairs;
pub mod scraper;
pub mod swap;

pub use bridge::forward_trades;
pub use chain::{ChainReader, RawSwap, RpcChain, SwapFeed, TokenMetadata};
pub use pairs::{load_reverse_tokens, PairDiscovery, PairFilter};
pub use scraper::{DexScraper, PairScraper};
pub use swap::{swap_price_volume, QuoteNormalizer, ScaledSwap, NATIVE_ADDRESS};

use std::sync::Arc;

use crate::config::{DexConfig, DexVenueConfig};
use crate::error::DexError;

/// Open both RPC connections of `venue` and build its scraper
pub async fn connect_venue(
    venue: &DexVenueConfig,
    dex: &DexConfig,
    reverse_tokens: Vec<String>,
) -> Result<DexScraper, DexError> {
    tracing::info!(venue = %venue.name, chain = %venue.chain, "Connecting AMM venue...");
    let chain = Arc::new(RpcChain::connect(&venue.rest_url, &venue.ws_url, &venue.factory).await?);

    let filter = PairFilter::new(
        dex.blacklist_symbols.iter().cloned(),
        dex.blacklist_addresses.iter().cloned(),
    );
    DexScraper::new(venue, reverse_tokens, filter, chain.clone(), chain)
}
