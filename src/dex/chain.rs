//! Blockchain RPC access for AMM venues
//!
//! Two logical connections per venue: HTTP for synchronous contract reads
//! (pair enumeration, token metadata) and a WebSocket for swap log
//! subscriptions.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::{Abi, ParamType, Token};
use ethers::contract::Contract;
use ethers::providers::{Http, Middleware, Provider, Ws};
use ethers::types::{Address, Filter, Log, H256, U256};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::error::DexError;

/// Solidity signature of the UniswapV2 pair swap event
pub const SWAP_EVENT_SIGNATURE: &str = "Swap(address,uint256,uint256,uint256,uint256,address)";

const FACTORY_ABI: &[&str] = &[
    "function allPairsLength() external view returns (uint256)",
    "function allPairs(uint256) external view returns (address)",
];

const PAIR_ABI: &[&str] = &[
    "function token0() external view returns (address)",
    "function token1() external view returns (address)",
];

const ERC20_ABI: &[&str] = &[
    "function symbol() external view returns (string)",
    "function name() external view returns (string)",
    "function decimals() external view returns (uint8)",
];

/// ERC-20 metadata read from a token contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

/// Raw swap amounts as emitted by the pool, before decimal scaling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSwap {
    pub tx_hash: String,
    pub pool: Address,
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
}

impl RawSwap {
    /// Decode a `Swap` log: the four amounts are the non-indexed data words
    pub fn from_log(log: &Log) -> Result<Self, DexError> {
        let params = vec![ParamType::Uint(256); 4];
        let tokens = ethers::abi::decode(&params, log.data.as_ref())
            .map_err(|e| DexError::contract("Swap log", e))?;

        let mut amounts = tokens.into_iter().map(Token::into_uint);
        let mut next = |field: &str| {
            amounts
                .next()
                .flatten()
                .ok_or_else(|| DexError::contract("Swap log", format!("missing {field}")))
        };

        Ok(Self {
            tx_hash: log
                .transaction_hash
                .map(|h| format!("{h:#x}"))
                .unwrap_or_default(),
            pool: log.address,
            amount0_in: next("amount0In")?,
            amount1_in: next("amount1In")?,
            amount0_out: next("amount0Out")?,
            amount1_out: next("amount1Out")?,
        })
    }
}

/// Topic0 of the swap event
pub fn swap_topic() -> H256 {
    H256::from(ethers::utils::keccak256(SWAP_EVENT_SIGNATURE))
}

/// Synchronous contract reads used by pair discovery
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn all_pairs_length(&self) -> Result<u64, DexError>;

    async fn pair_address(&self, index: u64) -> Result<Address, DexError>;

    /// `(token0, token1)` of a pool
    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address), DexError>;

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, DexError>;
}

/// Streaming swap logs of one pool
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapFeed: Send + Sync {
    /// Forward every swap of `pool` into `sink` until the subscription ends
    async fn watch_swaps(&self, pool: Address, sink: mpsc::Sender<RawSwap>) -> Result<(), DexError>;
}

/// JSON-RPC backed implementation of [`ChainReader`] and [`SwapFeed`]
pub struct RpcChain {
    http: Arc<Provider<Http>>,
    ws: Arc<Provider<Ws>>,
    factory: Address,
    factory_abi: Abi,
    pair_abi: Abi,
    erc20_abi: Abi,
}

impl RpcChain {
    /// Open both connections. Failing here means the venue can never
    /// produce data.
    pub async fn connect(rest_url: &str, ws_url: &str, factory: &str) -> Result<Self, DexError> {
        let factory: Address = factory
            .parse()
            .map_err(|_| DexError::InvalidAddress(factory.to_string()))?;

        let http = Provider::<Http>::try_from(rest_url)
            .map_err(|e| DexError::contract("connect http", e))?;
        let ws = Provider::<Ws>::connect(ws_url).await?;

        let chain_id = http.get_chainid().await?;
        tracing::info!(chain_id = %chain_id, factory = ?factory, "Connected to chain RPC");

        Ok(Self {
            http: Arc::new(http),
            ws: Arc::new(ws),
            factory,
            factory_abi: parse_abi(FACTORY_ABI)?,
            pair_abi: parse_abi(PAIR_ABI)?,
            erc20_abi: parse_abi(ERC20_ABI)?,
        })
    }

    fn contract(&self, address: Address, abi: &Abi) -> Contract<Provider<Http>> {
        Contract::new(address, abi.clone(), self.http.clone())
    }

    async fn call<T>(&self, address: Address, abi: &Abi, method: &str, args: impl ethers::abi::Tokenize) -> Result<T, DexError>
    where
        T: ethers::abi::Detokenize,
    {
        self.contract(address, abi)
            .method::<_, T>(method, args)
            .map_err(|e| DexError::contract(method, e))?
            .call()
            .await
            .map_err(|e| DexError::contract(method, e))
    }
}

fn parse_abi(signatures: &[&str]) -> Result<Abi, DexError> {
    ethers::abi::parse_abi(signatures).map_err(|e| DexError::contract("parse abi", e))
}

#[async_trait]
impl ChainReader for RpcChain {
    async fn all_pairs_length(&self) -> Result<u64, DexError> {
        let count: U256 = self
            .call(self.factory, &self.factory_abi, "allPairsLength", ())
            .await?;
        Ok(count.low_u64())
    }

    async fn pair_address(&self, index: u64) -> Result<Address, DexError> {
        self.call(self.factory, &self.factory_abi, "allPairs", U256::from(index))
            .await
    }

    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address), DexError> {
        let token0: Address = self.call(pool, &self.pair_abi, "token0", ()).await?;
        let token1: Address = self.call(pool, &self.pair_abi, "token1", ()).await?;
        Ok((token0, token1))
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, DexError> {
        Ok(TokenMetadata {
            symbol: self.call(token, &self.erc20_abi, "symbol", ()).await?,
            name: self.call(token, &self.erc20_abi, "name", ()).await?,
            decimals: self.call(token, &self.erc20_abi, "decimals", ()).await?,
        })
    }
}

#[async_trait]
impl SwapFeed for RpcChain {
    async fn watch_swaps(&self, pool: Address, sink: mpsc::Sender<RawSwap>) -> Result<(), DexError> {
        let filter = Filter::new().address(pool).topic0(swap_topic());
        let mut stream = self.ws.subscribe_logs(&filter).await?;

        while let Some(log) = stream.next().await {
            let swap = RawSwap::from_log(&log)?;
            if sink.send(swap).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
