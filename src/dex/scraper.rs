//! AMM venue scraper
//!
//! Discovers pools, subscribes to each healthy pool's swap log in its own
//! task and fans every normalized trade into one channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use ethers::types::Address;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinSet;

use crate::config::DexVenueConfig;
use crate::dex::chain::{ChainReader, RawSwap, SwapFeed};
use crate::dex::pairs::{bootstrap_pair, PairDiscovery, PairFilter};
use crate::dex::swap::QuoteNormalizer;
use crate::error::DexError;
use crate::types::{TradeEvent, TradingPair};

/// Buffered trades between pair tasks and the consumer
const TRADE_CHANNEL_CAPACITY: usize = 1_000;
/// Buffered raw logs per pool
const SWAP_BUFFER: usize = 64;

/// Subscription handle for one pool
#[derive(Clone)]
pub struct PairScraper {
    pair: TradingPair,
    stop: Arc<watch::Sender<bool>>,
}

impl PairScraper {
    fn new(pair: TradingPair) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            pair,
            stop: Arc::new(stop),
        }
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    /// Stop listening for this pool's trades
    pub fn close(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.stop.borrow()
    }

    fn stopped(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }
}

#[derive(Default)]
struct ScraperState {
    error: Option<String>,
    closed: bool,
    pair_scrapers: HashMap<String, PairScraper>,
}

/// One AMM venue on one chain
pub struct DexScraper {
    venue: String,
    discovery: PairDiscovery,
    feed: Arc<dyn SwapFeed>,
    normalizer: Arc<QuoteNormalizer>,
    filter: PairFilter,
    bootstrap: Vec<TradingPair>,
    trades_tx: mpsc::Sender<TradeEvent>,
    trades_rx: Mutex<Option<mpsc::Receiver<TradeEvent>>>,
    state: RwLock<ScraperState>,
    tasks: AsyncMutex<JoinSet<()>>,
}

impl DexScraper {
    pub fn new(
        cfg: &DexVenueConfig,
        reverse_tokens: Vec<String>,
        filter: PairFilter,
        reader: Arc<dyn ChainReader>,
        feed: Arc<dyn SwapFeed>,
    ) -> Result<Self, DexError> {
        let bootstrap = cfg
            .bootstrap_pairs
            .iter()
            .map(|p| bootstrap_pair(p, &cfg.chain))
            .collect::<Result<Vec<_>, _>>()?;

        let filter = match &cfg.wrapped_native {
            Some(wrapped) => filter.with_wrapped_native(wrapped, &cfg.native_symbol),
            None => filter,
        };

        let normalizer = QuoteNormalizer::new(
            reverse_tokens,
            cfg.main_quote_assets.iter().cloned(),
            cfg.invert_native_pairs,
        );

        let (trades_tx, trades_rx) = mpsc::channel(TRADE_CHANNEL_CAPACITY);

        Ok(Self {
            venue: cfg.name.clone(),
            discovery: PairDiscovery::new(reader, cfg.wait(), cfg.chain.clone()),
            feed,
            normalizer: Arc::new(normalizer),
            filter,
            bootstrap,
            trades_tx,
            trades_rx: Mutex::new(Some(trades_rx)),
            state: RwLock::new(ScraperState::default()),
            tasks: AsyncMutex::new(JoinSet::new()),
        })
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    /// Subscribe the bootstrap pools, then every healthy factory pool as
    /// soon as discovery resolves it.
    ///
    /// Returns how many pools were subscribed once discovery has tried every
    /// index. Zero subscribed pools is recorded as the scraper's error.
    pub async fn run(&self) -> Result<usize, DexError> {
        if self.state.read().await.closed {
            return Err(DexError::Closed);
        }

        let mut subscribed = 0usize;
        let mut refused = false;
        for pair in self.bootstrap.clone() {
            match self.subscribe(pair).await {
                Ok(added) => subscribed += usize::from(added),
                Err(e) => {
                    tracing::error!(venue = %self.venue, error = %e, "Cannot register pair scraper");
                    refused = true;
                    break;
                }
            }
        }

        if !refused {
            match self.discovery.stream_pairs().await {
                Ok(mut resolved) => {
                    while let Some((_, pair)) = resolved.recv().await {
                        match self.subscribe(pair).await {
                            Ok(added) => subscribed += usize::from(added),
                            Err(e) => {
                                tracing::error!(venue = %self.venue, error = %e, "Cannot register pair scraper");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(venue = %self.venue, error = %e, "Pair enumeration failed");
                }
            }
        }

        if subscribed == 0 {
            let err = DexError::NoPairs {
                venue: self.venue.clone(),
            };
            tracing::error!(venue = %self.venue, "{}", err);
            self.state.write().await.error = Some(err.to_string());
            return Err(err);
        }

        tracing::info!(venue = %self.venue, subscribed, "Pair scrapers running");
        Ok(subscribed)
    }

    /// Admit one candidate pool and start its consumer task.
    ///
    /// `Ok(false)` when the pool is filtered out; an error when the scraper
    /// no longer accepts pairs.
    async fn subscribe(&self, pair: TradingPair) -> Result<bool, DexError> {
        let Some(pair) = self.filter.admit(pair) else {
            return Ok(false);
        };
        let pool: Address = match pair.pool_address.parse() {
            Ok(pool) => pool,
            Err(_) => {
                tracing::error!(pair = %pair.pair_identity, pool = %pair.pool_address, "Invalid pool address");
                return Ok(false);
            }
        };

        let handle = self.scrape_pair(pair).await?;
        tracing::info!(
            venue = %self.venue,
            pair = %handle.pair().pair_identity,
            pool = %handle.pair().pool_address,
            "Add pair scraper"
        );
        self.tasks.lock().await.spawn(consume_pair(
            handle,
            pool,
            self.venue.clone(),
            self.feed.clone(),
            self.normalizer.clone(),
            self.trades_tx.clone(),
        ));
        Ok(true)
    }

    /// Register a pool for scraping.
    ///
    /// Refused once the scraper has failed or been closed.
    pub async fn scrape_pair(&self, pair: TradingPair) -> Result<PairScraper, DexError> {
        let mut state = self.state.write().await;
        if let Some(err) = &state.error {
            return Err(DexError::Scraper(err.clone()));
        }
        if state.closed {
            return Err(DexError::Closed);
        }

        let handle = PairScraper::new(pair);
        state
            .pair_scrapers
            .insert(handle.pair().pair_identity.clone(), handle.clone());
        Ok(handle)
    }

    /// Receiver of every emitted trade. Can only be taken once.
    pub fn channel(&self) -> Option<mpsc::Receiver<TradeEvent>> {
        self.trades_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// The error that stopped this scraper, if any
    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    /// Identities of every registered pair
    pub async fn pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self.state.read().await.pair_scrapers.keys().cloned().collect();
        pairs.sort();
        pairs
    }

    /// Stop every pair task. Returns the recorded error, if any.
    pub async fn close(&self) -> Result<(), DexError> {
        let recorded = {
            let mut state = self.state.write().await;
            if state.closed {
                return Err(DexError::AlreadyClosed);
            }
            state.closed = true;
            for handle in state.pair_scrapers.values() {
                handle.close();
            }
            state.error.clone()
        };

        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
        tracing::info!(venue = %self.venue, "Scraper closed");

        match recorded {
            Some(err) => Err(DexError::Scraper(err)),
            None => Ok(()),
        }
    }
}

/// Watch one pool and emit its normalized trades until stopped or the
/// subscription ends
async fn consume_pair(
    handle: PairScraper,
    pool: Address,
    venue: String,
    feed: Arc<dyn SwapFeed>,
    normalizer: Arc<QuoteNormalizer>,
    trades: mpsc::Sender<TradeEvent>,
) {
    let pair = handle.pair().clone();
    let mut stopped = handle.stopped();
    let (raw_tx, mut raw_rx) = mpsc::channel::<RawSwap>(SWAP_BUFFER);

    let subscription = feed.watch_swaps(pool, raw_tx);
    let consume = async {
        while let Some(raw) = raw_rx.recv().await {
            match normalizer.build_trade(&raw, &pair, &venue, Utc::now()) {
                Ok(Some(trade)) => {
                    tracing::debug!(
                        tx_hash = %trade.trade_id,
                        pair = %trade.pair_identity,
                        price = trade.price,
                        volume = trade.volume,
                        "Got trade"
                    );
                    if trades.send(trade).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(pair = %pair.pair_identity, error = %e, "Error normalizing swap");
                }
            }
        }
    };

    if handle.is_closed() {
        return;
    }
    tokio::select! {
        (watched, ()) = async { tokio::join!(subscription, consume) } => {
            if let Err(e) = watched {
                tracing::error!(pair = %pair.pair_identity, error = %e, "Swap subscription ended");
            }
        }
        _ = stopped.changed() => {
            tracing::debug!(pair = %pair.pair_identity, "Pair scraper stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BootstrapPairConfig, BootstrapTokenConfig};
    use crate::dex::chain::{MockChainReader, MockSwapFeed, TokenMetadata};
    use async_trait::async_trait;
    use ethers::types::U256;
    use std::time::Duration;

    const BUSD: &str = "0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56";

    fn venue_config(bootstrap: bool) -> DexVenueConfig {
        DexVenueConfig {
            name: "PancakeSwap".to_string(),
            chain: "BinanceSmartChain".to_string(),
            factory: "0xcA143Ce32Fe78f1f7019d7d551a6402fC5350c73".to_string(),
            ws_url: "ws://localhost:8546".to_string(),
            rest_url: "http://localhost:8545".to_string(),
            wait_ms: Some(0),
            wrapped_native: None,
            native_symbol: "BNB".to_string(),
            main_quote_assets: Vec::new(),
            invert_native_pairs: false,
            bootstrap_pairs: if bootstrap {
                vec![BootstrapPairConfig {
                    pool: "0xA99b9bCC6a196397DA87FA811aEd293B1b488f44".to_string(),
                    token0: BootstrapTokenConfig {
                        address: "0x4DA996C5Fe84755C80e108cf96Fe705174c5e36A".to_string(),
                        symbol: "WOW".to_string(),
                        name: None,
                        decimals: 0,
                    },
                    token1: BootstrapTokenConfig {
                        address: BUSD.to_string(),
                        symbol: "BUSD".to_string(),
                        name: None,
                        decimals: 0,
                    },
                }]
            } else {
                Vec::new()
            },
        }
    }

    fn empty_factory() -> MockChainReader {
        let mut reader = MockChainReader::new();
        reader.expect_all_pairs_length().returning(|| Ok(0));
        reader
    }

    fn factory_with_short_symbols() -> MockChainReader {
        let mut reader = MockChainReader::new();
        reader.expect_all_pairs_length().returning(|| Ok(1));
        reader
            .expect_pair_address()
            .returning(|_| Ok(Address::repeat_byte(1)));
        reader
            .expect_pair_tokens()
            .returning(|_| Ok((Address::repeat_byte(2), Address::repeat_byte(3))));
        reader.expect_token_metadata().returning(|_| {
            Ok(TokenMetadata {
                symbol: "X".to_string(),
                name: "X".to_string(),
                decimals: 18,
            })
        });
        reader
    }

    /// Two-pair factory whose second index never resolves
    struct StalledFactory;

    #[async_trait]
    impl ChainReader for StalledFactory {
        async fn all_pairs_length(&self) -> Result<u64, DexError> {
            Ok(2)
        }

        async fn pair_address(&self, index: u64) -> Result<Address, DexError> {
            if index > 0 {
                std::future::pending::<()>().await;
            }
            Ok(Address::repeat_byte(0x11))
        }

        async fn pair_tokens(&self, _pool: Address) -> Result<(Address, Address), DexError> {
            Ok((Address::repeat_byte(2), Address::repeat_byte(3)))
        }

        async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, DexError> {
            let symbol = if token == Address::repeat_byte(2) { "WOW" } else { "BUSD" };
            Ok(TokenMetadata {
                symbol: symbol.to_string(),
                name: symbol.to_string(),
                decimals: 0,
            })
        }
    }

    /// Emits one buy of 5 token0 for 100 token1, then keeps the subscription open
    fn one_swap_feed() -> MockSwapFeed {
        let mut feed = MockSwapFeed::new();
        feed.expect_watch_swaps().returning(|pool, sink| {
            let swap = RawSwap {
                tx_hash: "0xfeed".to_string(),
                pool,
                amount0_in: U256::zero(),
                amount1_in: U256::from(100u64),
                amount0_out: U256::from(5u64),
                amount1_out: U256::zero(),
            };
            tokio::spawn(async move {
                let _ = sink.send(swap).await;
                tokio::time::sleep(Duration::from_secs(3600)).await;
                drop(sink);
            });
            Ok(())
        });
        feed
    }

    #[tokio::test]
    async fn bootstrap_pair_emits_normalized_trade() {
        let scraper = DexScraper::new(
            &venue_config(true),
            Vec::new(),
            PairFilter::default(),
            Arc::new(empty_factory()),
            Arc::new(one_swap_feed()),
        )
        .unwrap();
        let mut trades = scraper.channel().unwrap();
        assert!(scraper.channel().is_none());

        assert_eq!(scraper.run().await.unwrap(), 1);
        assert_eq!(scraper.pairs().await, vec!["WOW-BUSD".to_string()]);

        let trade = trades.recv().await.unwrap();
        assert_eq!(trade.price, 20.0);
        assert_eq!(trade.volume, 5.0);
        assert_eq!(trade.venue, "PancakeSwap");
        assert_eq!(trade.base.chain, "BinanceSmartChain");

        assert!(scraper.close().await.is_ok());
        assert!(matches!(scraper.close().await, Err(DexError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn resolved_pair_streams_while_later_index_is_pending() {
        let scraper = Arc::new(
            DexScraper::new(
                &venue_config(false),
                Vec::new(),
                PairFilter::default(),
                Arc::new(StalledFactory),
                Arc::new(one_swap_feed()),
            )
            .unwrap(),
        );
        let mut trades = scraper.channel().unwrap();
        let runner = scraper.clone();
        let run = tokio::spawn(async move { runner.run().await });

        let trade = tokio::time::timeout(Duration::from_secs(5), trades.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trade.pair_identity, "WOW-BUSD");
        assert_eq!(trade.price, 20.0);
        assert_eq!(scraper.pairs().await, vec!["WOW-BUSD".to_string()]);
        assert!(!run.is_finished());

        run.abort();
        assert!(scraper.close().await.is_ok());
    }

    #[tokio::test]
    async fn reversed_quote_flips_emitted_trade() {
        let scraper = DexScraper::new(
            &venue_config(true),
            vec![BUSD.to_lowercase()],
            PairFilter::default(),
            Arc::new(empty_factory()),
            Arc::new(one_swap_feed()),
        )
        .unwrap();
        let mut trades = scraper.channel().unwrap();
        scraper.run().await.unwrap();

        let trade = trades.recv().await.unwrap();
        assert_eq!(trade.base.symbol, "BUSD");
        assert_eq!(trade.quote.symbol, "WOW");
        assert!((trade.price - 0.05).abs() < 1e-12);
        scraper.close().await.unwrap();
    }

    #[tokio::test]
    async fn zero_healthy_pairs_is_reported() {
        let scraper = DexScraper::new(
            &venue_config(false),
            Vec::new(),
            PairFilter::default(),
            Arc::new(factory_with_short_symbols()),
            Arc::new(MockSwapFeed::new()),
        )
        .unwrap();

        assert!(matches!(scraper.run().await, Err(DexError::NoPairs { .. })));
        assert!(scraper.error().await.unwrap().contains("no pairs"));

        // a failed scraper refuses new pairs and reports the error on close
        let pair = TradingPair::default();
        assert!(matches!(scraper.scrape_pair(pair).await, Err(DexError::Scraper(_))));
        assert!(matches!(scraper.close().await, Err(DexError::Scraper(_))));
    }

    #[tokio::test]
    async fn closed_scraper_refuses_pairs() {
        let scraper = DexScraper::new(
            &venue_config(false),
            Vec::new(),
            PairFilter::default(),
            Arc::new(empty_factory()),
            Arc::new(MockSwapFeed::new()),
        )
        .unwrap();
        scraper.close().await.unwrap();

        assert!(matches!(
            scraper.scrape_pair(TradingPair::default()).await,
            Err(DexError::Closed)
        ));
        assert!(matches!(scraper.run().await, Err(DexError::Closed)));
    }

    #[tokio::test]
    async fn closing_a_pair_scraper_marks_it_closed() {
        let scraper = DexScraper::new(
            &venue_config(false),
            Vec::new(),
            PairFilter::default(),
            Arc::new(empty_factory()),
            Arc::new(MockSwapFeed::new()),
        )
        .unwrap();
        let handle = scraper
            .scrape_pair(TradingPair::new(Default::default(), Default::default(), "0x01"))
            .await
            .unwrap();
        assert!(!handle.is_closed());
        handle.close();
        assert!(handle.is_closed());
    }
}
