//! Pending calls: one bound contract call with static, estimate and send modes

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use evm_client::{
    retry_transient, BlockRef, CallRequest, ChainClient, ReceiptInfo, RetryPolicy,
    TransactionSender, TxOverrides,
};
use serde::{Deserialize, Serialize};
use yieldkit_core::{RevertReason, Result, SdkError};

use crate::revert::classify;

/// Decodes a call's raw return data
pub type Decoder<T> = Arc<dyn Fn(&Bytes) -> Result<T> + Send + Sync>;

/// Values whose primary amount can be checked against a minimum-output guard
pub trait QuotedOutput {
    fn output(&self) -> U256;
}

/// Descriptive data carried alongside the call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMeta {
    /// Short human label, e.g. `swapExactTokenForPt`
    pub label: String,
    /// Output the route simulation expected
    pub expected_output: Option<U256>,
    /// Guard embedded in the calldata
    pub min_output: Option<U256>,
}

/// A contract call bound to its arguments.
///
/// `static_call` and `estimate_gas` are read-only and may be repeated;
/// `send` submits a transaction and is never retried.
pub struct PendingCall<T> {
    client: Arc<dyn ChainClient>,
    request: CallRequest,
    simulation_data: Option<Bytes>,
    decoder: Decoder<T>,
    meta: CallMeta,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl<T> Clone for PendingCall<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            request: self.request.clone(),
            simulation_data: self.simulation_data.clone(),
            decoder: self.decoder.clone(),
            meta: self.meta.clone(),
            retry: self.retry,
            poll_interval: self.poll_interval,
        }
    }
}

impl<T> fmt::Debug for PendingCall<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("request", &self.request)
            .field("meta", &self.meta)
            .finish()
    }
}

impl<T> PendingCall<T> {
    pub fn new(
        client: Arc<dyn ChainClient>,
        request: CallRequest,
        decoder: impl Fn(&Bytes) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            client,
            request,
            simulation_data: None,
            decoder: Arc::new(decoder),
            meta: CallMeta::default(),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_meta(mut self, meta: CallMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Account the call is simulated and estimated from
    pub fn with_from(mut self, from: Address) -> Self {
        self.request.from = Some(from);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Use different calldata for `static_call` than for `estimate_gas`/`send`.
    pub fn with_simulation_data(mut self, data: impl Into<Bytes>) -> Self {
        self.simulation_data = Some(data.into());
        self
    }

    pub fn request(&self) -> &CallRequest {
        &self.request
    }

    pub fn target(&self) -> Address {
        self.request.to
    }

    pub fn calldata(&self) -> &Bytes {
        &self.request.data
    }

    pub fn value(&self) -> U256 {
        self.request.value
    }

    pub fn meta(&self) -> &CallMeta {
        &self.meta
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Execute as a state query at the latest block and decode the result.
    pub async fn static_call(&self) -> Result<T> {
        self.static_call_at(BlockRef::Latest).await
    }

    pub async fn static_call_at(&self, block: BlockRef) -> Result<T> {
        let mut request = self.request.clone();
        if let Some(data) = &self.simulation_data {
            request.data = data.clone();
        }
        let raw = retry_transient(|_| self.client.call(&request, block), self.retry)
            .await
            .map_err(classify)?;
        (self.decoder)(&raw)
    }

    /// Gas units the call would consume; reverts surface as decoded `ContractRevert`.
    pub async fn estimate_gas(&self) -> Result<u64> {
        retry_transient(|_| self.client.estimate_gas(&self.request), self.retry)
            .await
            .map_err(|e| {
                let err = classify(e);
                tracing::debug!(label = %self.meta.label, error = %err, "gas estimation failed");
                err
            })
    }

    /// Sign and submit. Never retried.
    pub async fn send(
        &self,
        sender: &dyn TransactionSender,
        overrides: Option<TxOverrides>,
    ) -> Result<TxHandle> {
        let mut request = self.request.clone();
        request.from = Some(sender.address());
        let overrides = overrides.unwrap_or_default();

        let hash = sender
            .send_transaction(&request, &overrides)
            .await
            .map_err(classify)?;

        tracing::info!(label = %self.meta.label, tx = %hash, "transaction submitted");

        Ok(TxHandle {
            hash,
            client: self.client.clone(),
            request,
            retry: self.retry,
            poll_interval: self.poll_interval,
        })
    }
}

impl<T: QuotedOutput> PendingCall<T> {
    /// Re-run the call against fresh state and check it still clears the guard.
    pub async fn revalidate(&self) -> Result<T> {
        let fresh = match self.static_call().await {
            Ok(fresh) => fresh,
            Err(SdkError::ContractRevert(reason)) if is_min_out_revert(&reason) => {
                let min_output = self.meta.min_output.unwrap_or_default();
                return Err(SdkError::StaleQuote {
                    quoted_output: self.meta.expected_output.unwrap_or_default(),
                    min_output,
                    current_output: U256::ZERO,
                });
            }
            Err(e) => return Err(e),
        };

        if let Some(min_output) = self.meta.min_output {
            let current_output = fresh.output();
            if current_output < min_output {
                return Err(SdkError::StaleQuote {
                    quoted_output: self.meta.expected_output.unwrap_or_default(),
                    min_output,
                    current_output,
                });
            }
        }
        Ok(fresh)
    }

    /// `revalidate`, then `send`.
    pub async fn send_checked(
        &self,
        sender: &dyn TransactionSender,
        overrides: Option<TxOverrides>,
    ) -> Result<TxHandle> {
        self.revalidate().await?;
        self.send(sender, overrides).await
    }
}

fn is_min_out_revert(reason: &RevertReason) -> bool {
    reason
        .name
        .as_deref()
        .is_some_and(|n| n.starts_with("RouterInsufficient"))
}

/// Handle to a submitted transaction. Dropping it abandons nothing on chain.
#[derive(Clone)]
pub struct TxHandle {
    hash: TxHash,
    client: Arc<dyn ChainClient>,
    request: CallRequest,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle").field("hash", &self.hash).finish()
    }
}

impl TxHandle {
    pub fn hash(&self) -> TxHash {
        self.hash
    }

    /// Poll until the transaction has `confirmations` blocks (including its own).
    ///
    /// Transient RPC failures are retried per poll. A mined-but-failed
    /// transaction resolves to `ContractRevert`, decoded by replaying the call
    /// against the parent block when the node reports revert data.
    pub async fn wait(&self, confirmations: u64) -> Result<ReceiptInfo> {
        let confirmations = confirmations.max(1);
        loop {
            let receipt = retry_transient(
                |_| self.client.transaction_receipt(self.hash),
                self.retry,
            )
            .await
            .map_err(classify)?;

            if let Some(receipt) = receipt {
                if !receipt.success {
                    return Err(self.failure(receipt.block_number).await);
                }
                let head = retry_transient(|_| self.client.block_number(), self.retry)
                    .await
                    .map_err(classify)?;
                if head + 1 >= receipt.block_number + confirmations {
                    return Ok(receipt);
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn failure(&self, block: u64) -> SdkError {
        let replay = self
            .client
            .call(&self.request, BlockRef::Number(block.saturating_sub(1)))
            .await;
        match replay {
            Err(e) if e.revert_data().is_some_and(|d| !d.is_empty()) => classify(e),
            _ => {
                tracing::warn!(tx = %self.hash, block, "reverted transaction left no reason");
                SdkError::ContractRevert(RevertReason {
                    name: None,
                    message: format!("transaction {} reverted in block {}", self.hash, block),
                    data: Bytes::new(),
                })
            }
        }
    }
}
