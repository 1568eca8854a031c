//! Error types shared across scrapers, the aggregation window and the DEX engine

use thiserror::Error;

/// Terminal failure of one venue adapter run.
///
/// Every variant ends the current session; the supervisor decides whether to
/// restart.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("{venue}: failed to connect: {source}")]
    Connect {
        venue: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("{venue}: transport error: {source}")]
    Transport {
        venue: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("{venue}: unexpected payload: {reason}")]
    Decode { venue: String, reason: String },

    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{venue}: failed to decompress frame: {source}")]
    Decompress {
        venue: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP bootstrap request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{venue}: session closed by server")]
    Closed { venue: String },

    #[error("unknown venue: {0}")]
    UnknownVenue(String),
}

impl FeedError {
    pub fn decode(venue: impl Into<String>, reason: impl Into<String>) -> Self {
        FeedError::Decode {
            venue: venue.into(),
            reason: reason.into(),
        }
    }

    /// Unknown venues can never succeed, so restarting them is pointless
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FeedError::UnknownVenue(_))
    }
}

/// Internal invariant violations of the aggregation math
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("number of prices ({prices}) does not equal number of volumes ({volumes})")]
    LengthMismatch { prices: usize, volumes: usize },
}

/// Failures of the on-chain pair engine
#[derive(Debug, Error)]
pub enum DexError {
    #[error("RPC provider error: {0}")]
    Provider(#[from] ethers::providers::ProviderError),

    #[error("contract call {call} failed: {reason}")]
    Contract { call: String, reason: String },

    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("cannot scale amount: {0}")]
    Units(String),

    #[error("{venue}: no pairs to scrape")]
    NoPairs { venue: String },

    #[error("scraper already closed")]
    AlreadyClosed,

    #[error("scrape_pair called on closed scraper")]
    Closed,

    #[error("{0}")]
    Scraper(String),
}

impl DexError {
    pub fn contract(call: impl Into<String>, reason: impl ToString) -> Self {
        DexError::Contract {
            call: call.into(),
            reason: reason.to_string(),
        }
    }
}
