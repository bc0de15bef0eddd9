//! alloy-backed implementations of the chain boundary

use std::str::FromStr;
use std::time::Duration;

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::TransportError;
use async_trait::async_trait;
use url::Url;
use yieldkit_core::{ClientError, RpcConfig, SdkError};

use crate::retry::timed_request;
use crate::{BlockRef, CallRequest, ChainClient, ReceiptInfo, Result, TransactionSender, TxOverrides};

fn parse_url(raw: &str) -> std::result::Result<Url, SdkError> {
    Url::parse(raw).map_err(|e| SdkError::Config(format!("Invalid RPC URL {}: {}", raw, e)))
}

fn block_id(block: BlockRef) -> BlockId {
    match block {
        BlockRef::Latest => BlockId::Number(BlockNumberOrTag::Latest),
        BlockRef::Number(n) => BlockId::Number(BlockNumberOrTag::Number(n)),
    }
}

fn to_transaction_request(request: &CallRequest) -> TransactionRequest {
    let mut tx = TransactionRequest::default()
        .with_to(request.to)
        .with_input(request.data.clone())
        .with_value(request.value);
    if let Some(from) = request.from {
        tx = tx.with_from(from);
    }
    tx
}

/// Map an alloy transport error onto the client taxonomy.
///
/// Error responses that carry revert data become `Reverted`; connection-level
/// failures are transient; everything else is surfaced with its RPC code.
pub(crate) fn map_transport_error(url: &str, err: TransportError) -> ClientError {
    if let Some(payload) = err.as_error_resp() {
        if let Some(data) = payload.as_revert_data() {
            return ClientError::Reverted {
                data,
                message: payload.message.to_string(),
            };
        }
        let message = payload.message.to_string();
        if message.to_lowercase().contains("execution reverted") {
            return ClientError::Reverted {
                data: Bytes::new(),
                message,
            };
        }
        return ClientError::Rpc {
            code: payload.code,
            message,
        };
    }

    if err.is_transport_error() {
        let message = err.to_string();
        if message.contains("Connection refused") || message.contains("dns error") {
            return ClientError::Unreachable {
                url: url.to_string(),
            };
        }
        return ClientError::Transient { message };
    }

    ClientError::Decode(err.to_string())
}

/// Read-only chain client over an HTTP JSON-RPC endpoint
#[derive(Clone)]
pub struct RpcChainClient {
    provider: DynProvider,
    url: String,
    timeout: Duration,
}

impl RpcChainClient {
    pub fn new(config: &RpcConfig) -> std::result::Result<Self, SdkError> {
        let url = parse_url(&config.url)?;
        let provider = RootProvider::new_http(url).erased();
        Ok(Self {
            provider,
            url: config.url.clone(),
            timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    /// Wrap an existing provider (e.g. one with custom layers)
    pub fn from_provider(provider: DynProvider, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            url: url.into(),
            timeout,
        }
    }

    /// Confirm the endpoint serves the configured chain.
    pub async fn verify_chain_id(&self, expected: u64) -> std::result::Result<(), SdkError> {
        let actual = timed_request(self.timeout, "eth_chainId", async {
            self.provider
                .get_chain_id()
                .await
                .map_err(|e| map_transport_error(&self.url, e))
        })
        .await
        .map_err(|e| SdkError::Config(e.to_string()))?;

        if actual != expected {
            return Err(SdkError::Config(format!(
                "RPC at {} serves chain {}, expected {}",
                self.url, actual, expected
            )));
        }
        Ok(())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn call(&self, request: &CallRequest, block: BlockRef) -> Result<Bytes> {
        let tx = to_transaction_request(request);
        timed_request(self.timeout, "eth_call", async {
            self.provider
                .call(tx)
                .block(block_id(block))
                .await
                .map_err(|e| map_transport_error(&self.url, e))
        })
        .await
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
        let tx = to_transaction_request(request);
        timed_request(self.timeout, "eth_estimateGas", async {
            self.provider
                .estimate_gas(tx)
                .await
                .map_err(|e| map_transport_error(&self.url, e))
        })
        .await
    }

    async fn block_number(&self) -> Result<u64> {
        timed_request(self.timeout, "eth_blockNumber", async {
            self.provider
                .get_block_number()
                .await
                .map_err(|e| map_transport_error(&self.url, e))
        })
        .await
    }

    async fn block_timestamp(&self, block: BlockRef) -> Result<u64> {
        let tag = match block {
            BlockRef::Latest => BlockNumberOrTag::Latest,
            BlockRef::Number(n) => BlockNumberOrTag::Number(n),
        };
        let header = timed_request(self.timeout, "eth_getBlockByNumber", async {
            self.provider
                .get_block_by_number(tag)
                .await
                .map_err(|e| map_transport_error(&self.url, e))
        })
        .await?;

        header
            .map(|b| b.header.timestamp)
            .ok_or_else(|| ClientError::Decode(format!("block {} not found", block)))
    }

    async fn gas_price(&self) -> Result<U256> {
        let price = timed_request(self.timeout, "eth_gasPrice", async {
            self.provider
                .get_gas_price()
                .await
                .map_err(|e| map_transport_error(&self.url, e))
        })
        .await?;
        Ok(U256::from(price))
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<ReceiptInfo>> {
        let receipt = timed_request(self.timeout, "eth_getTransactionReceipt", async {
            self.provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| map_transport_error(&self.url, e))
        })
        .await?;

        // Pending receipts without a block number are treated as not yet mined.
        Ok(receipt.and_then(|r| {
            r.block_number.map(|block_number| ReceiptInfo {
                tx_hash: r.transaction_hash,
                block_number,
                success: r.status(),
                gas_used: r.gas_used,
            })
        }))
    }
}

/// Signing sender over a wallet-filled provider
#[derive(Clone)]
pub struct WalletSender {
    provider: DynProvider,
    address: Address,
    url: String,
    timeout: Duration,
}

impl WalletSender {
    /// Build from a hex private key. Key handling beyond this is the caller's concern.
    pub fn from_private_key(
        config: &RpcConfig,
        private_key: &str,
    ) -> std::result::Result<Self, SdkError> {
        let signer = PrivateKeySigner::from_str(private_key.trim())
            .map_err(|e| SdkError::invalid("private_key", e.to_string()))?;
        let address = signer.address();
        let url = parse_url(&config.url)?;
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        Ok(Self {
            provider,
            address,
            url: config.url.clone(),
            timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }
}

#[async_trait]
impl TransactionSender for WalletSender {
    fn address(&self) -> Address {
        self.address
    }

    async fn send_transaction(
        &self,
        request: &CallRequest,
        overrides: &TxOverrides,
    ) -> Result<TxHash> {
        let mut tx = to_transaction_request(request).with_from(self.address);
        if let Some(gas) = overrides.gas_limit {
            tx = tx.with_gas_limit(gas);
        }
        if let Some(nonce) = overrides.nonce {
            tx = tx.with_nonce(nonce);
        }
        if let Some(max_fee) = overrides.max_fee_per_gas {
            tx = tx.with_max_fee_per_gas(max_fee);
        }
        if let Some(tip) = overrides.max_priority_fee_per_gas {
            tx = tx.with_max_priority_fee_per_gas(tip);
        }

        tracing::info!(to = %request.to, value = %request.value, "sending transaction");

        // A timeout here does not mean the transaction was dropped; callers must
        // not resend blindly.
        let pending = timed_request(self.timeout, "eth_sendRawTransaction", async {
            self.provider
                .send_transaction(tx)
                .await
                .map_err(|e| map_transport_error(&self.url, e))
        })
        .await?;

        Ok(*pending.tx_hash())
    }
}
