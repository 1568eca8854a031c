//! Swap normalization
//!
//! Turns raw pool amounts into a priced, signed [`TradeEvent`] expressed in
//! a consistent quote-asset convention.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use ethers::types::U256;

use crate::dex::chain::RawSwap;
use crate::error::DexError;
use crate::types::{TradeEvent, TradingPair};

/// Sentinel address standing for the chain's native asset
pub const NATIVE_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Swap amounts in whole token units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledSwap {
    pub amount0_in: f64,
    pub amount0_out: f64,
    pub amount1_in: f64,
    pub amount1_out: f64,
}

/// Divide a fixed-point integer amount by `10^decimals`.
///
/// The division is exact (decimal string) before the single conversion to
/// `f64`, so large raw amounts are not rounded twice.
pub fn scale_amount(amount: U256, decimals: u8) -> Result<f64, DexError> {
    let formatted = ethers::utils::format_units(amount, decimals as u32)
        .map_err(|e| DexError::Units(e.to_string()))?;
    formatted
        .parse::<f64>()
        .map_err(|e| DexError::Units(format!("{formatted}: {e}")))
}

pub fn scale_swap(raw: &RawSwap, pair: &TradingPair) -> Result<ScaledSwap, DexError> {
    let decimals0 = pair.base.decimals;
    let decimals1 = pair.quote.decimals;
    Ok(ScaledSwap {
        amount0_in: scale_amount(raw.amount0_in, decimals0)?,
        amount0_out: scale_amount(raw.amount0_out, decimals0)?,
        amount1_in: scale_amount(raw.amount1_in, decimals1)?,
        amount1_out: scale_amount(raw.amount1_out, decimals1)?,
    })
}

/// `(price, volume)` of token0 in token1.
///
/// Nothing of token0 flowed in means token0 was bought: positive volume.
/// Otherwise token0 was sold into the pool: negative volume.
pub fn swap_price_volume(swap: &ScaledSwap) -> (f64, f64) {
    if swap.amount0_in == 0.0 {
        (swap.amount1_in / swap.amount0_out, swap.amount0_out)
    } else {
        (swap.amount1_out / swap.amount0_in, -swap.amount0_in)
    }
}

/// Decides which trades get their base and quote roles exchanged
#[derive(Debug, Clone, Default)]
pub struct QuoteNormalizer {
    /// Lowercased quote-token addresses whose pairs are always reversed
    reverse_quotes: HashSet<String>,
    /// Lowercased addresses that stay the quote of a native pair
    main_quote_assets: HashSet<String>,
    invert_native_pairs: bool,
}

impl QuoteNormalizer {
    pub fn new<R, M>(reverse_quotes: R, main_quote_assets: M, invert_native_pairs: bool) -> Self
    where
        R: IntoIterator<Item = String>,
        M: IntoIterator<Item = String>,
    {
        Self {
            reverse_quotes: reverse_quotes.into_iter().map(|a| a.to_lowercase()).collect(),
            main_quote_assets: main_quote_assets
                .into_iter()
                .map(|a| a.to_lowercase())
                .collect(),
            invert_native_pairs,
        }
    }

    pub fn should_reverse(&self, pair: &TradingPair) -> bool {
        let quote = pair.quote.address.to_lowercase();
        if self.reverse_quotes.contains(&quote) {
            return true;
        }
        self.invert_native_pairs
            && pair.base.address.eq_ignore_ascii_case(NATIVE_ADDRESS)
            && !self.main_quote_assets.contains(&quote)
    }

    /// Build the trade for one swap, reversed where needed.
    ///
    /// Returns `None` when the derived price is not strictly positive.
    pub fn build_trade(
        &self,
        raw: &RawSwap,
        pair: &TradingPair,
        venue: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<TradeEvent>, DexError> {
        let scaled = scale_swap(raw, pair)?;
        let (price, volume) = swap_price_volume(&scaled);

        if !(price > 0.0 && price.is_finite()) {
            tracing::info!(
                tx_hash = %raw.tx_hash,
                pair = %pair.pair_identity,
                price,
                "Got zero trade"
            );
            return Ok(None);
        }

        let trade = TradeEvent {
            trade_id: raw.tx_hash.clone(),
            pair_identity: pair.pair_identity.clone(),
            price,
            volume,
            base: pair.base.clone(),
            quote: pair.quote.clone(),
            timestamp,
            venue: venue.to_string(),
            verified: true,
        };

        if self.should_reverse(pair) {
            Ok(trade.swapped())
        } else {
            Ok(Some(trade))
        }
    }
}
