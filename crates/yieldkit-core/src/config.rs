//! Configuration types for yieldkit

use alloy::primitives::{address, Address, U256};
use serde::{Deserialize, Serialize};

use crate::errors::SdkError;
use crate::types::constants::WAD;
use crate::types::{ChainId, Slippage};

/// Canonical Multicall3 deployment (same address on every major EVM chain)
pub const MULTICALL3_ADDRESS: Address = address!("ca11bde05977b3631167028862be2a173976ca11");

/// RPC connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// RPC URL (e.g., "http://127.0.0.1:8545")
    pub url: String,

    /// Expected chain id
    pub chain_id: ChainId,

    /// Timeout applied to every read round trip
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Attempts for transient read failures (sends are never retried)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    /// Initial backoff between read retries, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Receipt polling interval while waiting for confirmations
    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_retry_attempts() -> usize {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_confirmation_poll_ms() -> u64 {
    2_000
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            chain_id: 1,
            request_timeout_ms: default_request_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            confirmation_poll_ms: default_confirmation_poll_ms(),
        }
    }
}

/// A bulk buffer that pre-holds `token` for deposits into / redemptions from `sy`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkBufferConfig {
    pub address: Address,
    pub token: Address,
    pub sy: Address,
}

/// Chain-specific contract addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractAddresses {
    /// Router (state-mutating entry point, also the bundle multicall target)
    pub router: Address,

    /// Static-query router used for simulation
    pub router_static: Address,

    /// Multicall3 used for batched reads
    #[serde(default = "default_multicall")]
    pub multicall: Address,

    /// Limit-order router (only needed when limit orders are enabled)
    #[serde(default)]
    pub limit_router: Option<Address>,

    /// Configured bulk buffers
    #[serde(default)]
    pub bulk_buffers: Vec<BulkBufferConfig>,
}

fn default_multicall() -> Address {
    MULTICALL3_ADDRESS
}

impl Default for ContractAddresses {
    fn default() -> Self {
        Self {
            router: Address::ZERO,
            router_static: Address::ZERO,
            multicall: MULTICALL3_ADDRESS,
            limit_router: None,
            bulk_buffers: Vec::new(),
        }
    }
}

/// Gas units charged per simulation step when ranking routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasCosts {
    #[serde(default = "default_base_gas")]
    pub base: u64,
    #[serde(default = "default_mint_sy_gas")]
    pub mint_sy: u64,
    #[serde(default = "default_redeem_sy_gas")]
    pub redeem_sy: u64,
    #[serde(default = "default_market_swap_gas")]
    pub market_swap: u64,
    #[serde(default = "default_add_liquidity_gas")]
    pub add_liquidity: u64,
    #[serde(default = "default_remove_liquidity_gas")]
    pub remove_liquidity: u64,
    #[serde(default = "default_mint_py_gas")]
    pub mint_py: u64,
    #[serde(default = "default_aggregator_gas")]
    pub aggregator_swap: u64,
    #[serde(default = "default_bulk_gas")]
    pub bulk: u64,
    #[serde(default = "default_limit_fill_gas")]
    pub limit_fill: u64,
}

fn default_base_gas() -> u64 {
    60_000
}
fn default_mint_sy_gas() -> u64 {
    90_000
}
fn default_redeem_sy_gas() -> u64 {
    80_000
}
fn default_market_swap_gas() -> u64 {
    180_000
}
fn default_add_liquidity_gas() -> u64 {
    220_000
}
fn default_remove_liquidity_gas() -> u64 {
    150_000
}
fn default_mint_py_gas() -> u64 {
    140_000
}
fn default_aggregator_gas() -> u64 {
    160_000
}
fn default_bulk_gas() -> u64 {
    40_000
}
fn default_limit_fill_gas() -> u64 {
    70_000
}

impl Default for GasCosts {
    fn default() -> Self {
        Self {
            base: default_base_gas(),
            mint_sy: default_mint_sy_gas(),
            redeem_sy: default_redeem_sy_gas(),
            market_swap: default_market_swap_gas(),
            add_liquidity: default_add_liquidity_gas(),
            remove_liquidity: default_remove_liquidity_gas(),
            mint_py: default_mint_py_gas(),
            aggregator_swap: default_aggregator_gas(),
            bulk: default_bulk_gas(),
            limit_fill: default_limit_fill_gas(),
        }
    }
}

/// Routing and simulation behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Slippage used when the caller supplies none
    #[serde(default)]
    pub default_slippage: Slippage,

    /// Per-route simulation budget; exceeding it fails only that route
    #[serde(default = "default_simulation_timeout_ms")]
    pub simulation_timeout_ms: u64,

    /// Enumerate aggregator paths
    #[serde(default = "default_true")]
    pub use_aggregator: bool,

    /// Consult the limit-order matcher during simulation
    #[serde(default = "default_true")]
    pub use_limit_orders: bool,

    /// TTL for cached token / market metadata
    #[serde(default = "default_metadata_ttl_secs")]
    pub metadata_ttl_secs: u64,

    /// Taker fee charged on limit-order fills (1e18 = 100%)
    #[serde(default)]
    pub limit_order_fee_wad: u128,

    #[serde(default)]
    pub gas: GasCosts,
}

fn default_simulation_timeout_ms() -> u64 {
    8_000
}

fn default_true() -> bool {
    true
}

fn default_metadata_ttl_secs() -> u64 {
    300
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_slippage: Slippage::default(),
            simulation_timeout_ms: default_simulation_timeout_ms(),
            use_aggregator: true,
            use_limit_orders: true,
            metadata_ttl_secs: default_metadata_ttl_secs(),
            limit_order_fee_wad: 0,
            gas: GasCosts::default(),
        }
    }
}

/// SDK configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SdkConfig {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub contracts: ContractAddresses,

    #[serde(default)]
    pub routing: RoutingConfig,
}

impl SdkConfig {
    pub fn from_json_str(json: &str) -> Result<Self, SdkError> {
        let config: SdkConfig =
            serde_json::from_str(json).map_err(|e| SdkError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that everything the router needs is configured.
    pub fn validate(&self) -> Result<(), SdkError> {
        if self.contracts.router.is_zero() {
            return Err(SdkError::Config("contracts.router is not set".to_string()));
        }
        if self.contracts.router_static.is_zero() {
            return Err(SdkError::Config(
                "contracts.router_static is not set".to_string(),
            ));
        }
        if self.contracts.multicall.is_zero() {
            return Err(SdkError::Config("contracts.multicall is not set".to_string()));
        }
        if self.routing.use_limit_orders && self.contracts.limit_router.is_none() {
            return Err(SdkError::Config(
                "routing.use_limit_orders requires contracts.limit_router".to_string(),
            ));
        }
        if self.rpc.request_timeout_ms == 0 || self.routing.simulation_timeout_ms == 0 {
            return Err(SdkError::Config("timeouts must be non-zero".to_string()));
        }
        if U256::from(self.routing.limit_order_fee_wad) >= WAD {
            return Err(SdkError::Config(
                "routing.limit_order_fee_wad must be below 1e18".to_string(),
            ));
        }
        if self.rpc.retry_attempts == 0 {
            return Err(SdkError::Config(
                "rpc.retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
