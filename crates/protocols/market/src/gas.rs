//! Gas model and gas-price estimation

use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use evm_client::ChainClient;
use yieldkit_core::{GasCosts, Result};
use yieldkit_tx::classify;

use crate::route::{LegPath, TokenLeg};

/// Per-step gas units, summed over a route's simulated steps.
///
/// Used instead of `eth_estimateGas` during ranking so that simulation does
/// not depend on the caller's balances or approvals.
#[derive(Debug, Clone)]
pub struct GasModel {
    costs: GasCosts,
}

impl GasModel {
    pub fn new(costs: GasCosts) -> Self {
        Self { costs }
    }

    pub fn costs(&self) -> &GasCosts {
        &self.costs
    }

    pub fn base(&self) -> u64 {
        self.costs.base
    }

    /// Token into SY
    pub fn leg_in(&self, leg: &TokenLeg) -> u64 {
        match leg.path {
            LegPath::Identity => 0,
            LegPath::Native => self.costs.mint_sy,
            LegPath::Bulk(_) => self.costs.bulk,
            LegPath::Aggregator => self.costs.aggregator_swap + self.costs.mint_sy,
        }
    }

    /// SY into token
    pub fn leg_out(&self, leg: &TokenLeg) -> u64 {
        match leg.path {
            LegPath::Identity => 0,
            LegPath::Native => self.costs.redeem_sy,
            LegPath::Bulk(_) => self.costs.bulk,
            LegPath::Aggregator => self.costs.aggregator_swap + self.costs.redeem_sy,
        }
    }

    pub fn market_swaps(&self, count: u64) -> u64 {
        self.costs.market_swap * count
    }

    pub fn mint_py(&self) -> u64 {
        self.costs.mint_py
    }

    pub fn add_liquidity(&self) -> u64 {
        self.costs.add_liquidity
    }

    pub fn remove_liquidity(&self) -> u64 {
        self.costs.remove_liquidity
    }

    pub fn limit_fills(&self, count: usize) -> u64 {
        self.costs.limit_fill * count as u64
    }
}

impl Default for GasModel {
    fn default() -> Self {
        Self::new(GasCosts::default())
    }
}

/// Source of the gas price used to convert gas into output units
#[async_trait]
pub trait GasFeeEstimator: Send + Sync {
    /// Wei per gas unit
    async fn estimate_gas_price(&self) -> Result<U256>;
}

/// Reads `eth_gasPrice` from the chain client
pub struct RpcGasFeeEstimator {
    client: Arc<dyn ChainClient>,
}

impl RpcGasFeeEstimator {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GasFeeEstimator for RpcGasFeeEstimator {
    async fn estimate_gas_price(&self) -> Result<U256> {
        self.client.gas_price().await.map_err(classify)
    }
}

/// Fixed gas price
#[derive(Debug, Clone, Copy)]
pub struct ConstantGasFeeEstimator(pub U256);

#[async_trait]
impl GasFeeEstimator for ConstantGasFeeEstimator {
    async fn estimate_gas_price(&self) -> Result<U256> {
        Ok(self.0)
    }
}
