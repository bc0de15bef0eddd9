//! External swap aggregator capability

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use evm_client::TtlCache;
use yieldkit_core::{Result, Slippage, TokenAmount};
use yieldkit_tx::abi::SwapData;

/// A priced aggregator swap the router can execute as a token leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorQuote {
    pub amount_in: TokenAmount,
    pub amount_out: TokenAmount,
    /// Contract the router hands `calldata` to
    pub router: Address,
    pub calldata: Bytes,
}

impl AggregatorQuote {
    pub fn swap_data(&self) -> SwapData {
        SwapData {
            extRouter: self.router,
            extCalldata: self.calldata.clone(),
        }
    }
}

/// No external swap leg
pub fn empty_swap_data() -> SwapData {
    SwapData {
        extRouter: Address::ZERO,
        extCalldata: Bytes::new(),
    }
}

#[async_trait]
pub trait Aggregator: Send + Sync {
    /// Quote swapping `token_in` into `token_out`.
    ///
    /// `Ok(None)` means the aggregator has no route; that is a normal outcome.
    async fn quote(
        &self,
        token_in: TokenAmount,
        token_out: Address,
        slippage: Slippage,
    ) -> Result<Option<AggregatorQuote>>;

    /// Liquidity sources the aggregator may route through
    async fn liquidity_sources(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Aggregator that never has a route
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAggregator;

#[async_trait]
impl Aggregator for NoAggregator {
    async fn quote(
        &self,
        _token_in: TokenAmount,
        _token_out: Address,
        _slippage: Slippage,
    ) -> Result<Option<AggregatorQuote>> {
        Ok(None)
    }
}

/// Liquidity sources through a caller-owned cache
pub async fn cached_liquidity_sources(
    aggregator: &dyn Aggregator,
    cache: &TtlCache<(), Vec<String>>,
) -> Result<Vec<String>> {
    if let Some(sources) = cache.get(&()) {
        return Ok(sources);
    }
    let sources = aggregator.liquidity_sources().await?;
    cache.insert((), sources.clone());
    Ok(sources)
}
