//! RefPrice Library
//!
//! Cross-venue reference prices from CEX candle streams and on-chain AMM swaps

pub mod config;
pub mod dex;
pub mod error;
pub mod oracle;
pub mod persistence;
pub mod types;
