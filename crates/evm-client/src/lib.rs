//! evm-client: EVM chain boundary for yieldkit
//!
//! This crate defines the read/write RPC boundary the SDK runs against
//! (`ChainClient`, `TransactionSender`), an alloy-backed implementation, a
//! coalescing Multicall3 batcher with per-call failure isolation, bounded
//! retries for transient reads, and a caller-owned TTL cache.

pub mod abi;
pub mod batch;
pub mod cache;
pub mod queries;
pub mod retry;
pub mod rpc;

use std::fmt;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use yieldkit_core::ClientError;

pub use batch::{BatchConfig, CallBatcher, ReadCall};
pub use cache::TtlCache;
pub use queries::{fetch_allowances, fetch_balances, fetch_token_info, TokenInfo};
pub use retry::{retry_transient, timed_request, RetryPolicy};
pub use rpc::{RpcChainClient, WalletSender};

/// Result type for chain client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// One contract call, used for `eth_call`, `eth_estimateGas` and sends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    #[serde(default)]
    pub value: U256,
}

impl CallRequest {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from: None,
            to,
            data: data.into(),
            value: U256::ZERO,
        }
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// 4-byte function selector, if the calldata carries one
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.data.get(..4).and_then(|s| s.try_into().ok())
    }
}

/// Block to evaluate a read against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockRef {
    Latest,
    Number(u64),
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Number(n) => write!(f, "#{}", n),
        }
    }
}

/// Optional fee / nonce overrides for a send
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOverrides {
    pub gas_limit: Option<u64>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub nonce: Option<u64>,
}

/// Mined transaction summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptInfo {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
    pub gas_used: u64,
}

/// Read-side chain access
///
/// Implementations must never mutate chain state from any of these methods.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_call` against the given block
    async fn call(&self, request: &CallRequest, block: BlockRef) -> Result<Bytes>;

    /// `eth_estimateGas` against the latest block
    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64>;

    async fn block_number(&self) -> Result<u64>;

    async fn block_timestamp(&self, block: BlockRef) -> Result<u64>;

    /// Current gas price in wei
    async fn gas_price(&self) -> Result<U256>;

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<ReceiptInfo>>;
}

/// Signing, state-mutating side of the boundary
#[async_trait]
pub trait TransactionSender: Send + Sync {
    /// Account the sender signs for
    fn address(&self) -> Address;

    /// Sign and broadcast. Never retried by the SDK.
    async fn send_transaction(
        &self,
        request: &CallRequest,
        overrides: &TxOverrides,
    ) -> Result<TxHash>;
}
