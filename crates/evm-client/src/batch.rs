//! Coalescing batched reads over Multicall3
//!
//! Reads issued concurrently from the same task are queued, then flushed
//! together as one `aggregate3` round trip per block. Every call is sent with
//! `allowFailure = true`, so one call's revert never fails its siblings.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes};
use alloy::sol_types::SolCall;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use yieldkit_core::{ClientError, MULTICALL3_ADDRESS};

use crate::abi::IMulticall3;
use crate::retry::{retry_transient, RetryPolicy};
use crate::{BlockRef, CallRequest, ChainClient, Result};

/// One independent read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCall {
    pub target: Address,
    pub data: Bytes,
}

impl ReadCall {
    pub fn new(target: Address, data: impl Into<Bytes>) -> Self {
        Self {
            target,
            data: data.into(),
        }
    }

    /// Build from a typed `sol!` call
    pub fn typed<C: SolCall>(target: Address, call: &C) -> Self {
        Self::new(target, call.abi_encode())
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub multicall: Address,
    /// Upper bound on calls per `aggregate3`
    pub max_batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            multicall: MULTICALL3_ADDRESS,
            max_batch_size: 200,
            retry: RetryPolicy::default(),
        }
    }
}

struct Queued {
    call: ReadCall,
    block: BlockRef,
    reply: oneshot::Sender<Result<Bytes>>,
}

/// Batched-read capability shared by everything that reads chain state
pub struct CallBatcher {
    client: Arc<dyn ChainClient>,
    config: BatchConfig,
    queue: Mutex<Vec<Queued>>,
}

impl CallBatcher {
    pub fn new(client: Arc<dyn ChainClient>, config: BatchConfig) -> Self {
        Self {
            client,
            config,
            queue: Mutex::new(Vec::new()),
        }
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Execute independent reads; one result per call, in input order.
    ///
    /// Reads enqueued by sibling futures before the flush ride the same round
    /// trip.
    pub async fn batch(&self, calls: Vec<ReadCall>, block: BlockRef) -> Vec<Result<Bytes>> {
        if calls.is_empty() {
            return Vec::new();
        }

        let receivers: Vec<_> = {
            let mut queue = self.queue.lock();
            calls
                .into_iter()
                .map(|call| {
                    let (reply, rx) = oneshot::channel();
                    queue.push(Queued { call, block, reply });
                    rx
                })
                .collect()
        };

        // Let sibling futures enqueue before draining.
        tokio::task::yield_now().await;
        self.flush();

        join_all(receivers.into_iter().map(|rx| async move {
            rx.await.unwrap_or_else(|_| {
                Err(ClientError::Transient {
                    message: "batched read abandoned before completion".to_string(),
                })
            })
        }))
        .await
    }

    /// Single read through the batch queue
    pub async fn read(&self, call: ReadCall, block: BlockRef) -> Result<Bytes> {
        self.batch(vec![call], block)
            .await
            .pop()
            .unwrap_or_else(|| Err(ClientError::Decode("empty batch result".to_string())))
    }

    /// Typed read: encode, batch, decode the return value.
    pub async fn read_typed<C: SolCall>(
        &self,
        target: Address,
        call: &C,
        block: BlockRef,
    ) -> Result<C::Return> {
        let raw = self.read(ReadCall::typed(target, call), block).await?;
        C::abi_decode_returns(&raw).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Drain whatever is queued and execute it on its own task.
    ///
    /// The round trip runs to completion even if the future that drained the
    /// queue is dropped, so siblings still get their results.
    fn flush(&self) {
        let drained: Vec<Queued> = std::mem::take(&mut *self.queue.lock());
        if drained.is_empty() {
            return;
        }
        let flush = Flush {
            client: self.client.clone(),
            config: self.config.clone(),
        };
        tokio::spawn(async move { flush.run(drained).await });
    }
}

/// One drained queue, owned by the task that executes it
struct Flush {
    client: Arc<dyn ChainClient>,
    config: BatchConfig,
}

impl Flush {
    async fn run(&self, drained: Vec<Queued>) {
        let mut chunks: Vec<(BlockRef, Vec<Queued>)> = Vec::new();
        for item in drained {
            let open = chunks
                .iter_mut()
                .rev()
                .find(|(b, c)| *b == item.block && c.len() < self.config.max_batch_size.max(1));
            match open {
                Some((_, chunk)) => chunk.push(item),
                None => chunks.push((item.block, vec![item])),
            }
        }

        tracing::debug!(
            chunks = chunks.len(),
            calls = chunks.iter().map(|(_, c)| c.len()).sum::<usize>(),
            "flushing batched reads"
        );

        join_all(
            chunks
                .into_iter()
                .map(|(block, chunk)| self.execute_chunk(block, chunk)),
        )
        .await;
    }

    async fn execute_chunk(&self, block: BlockRef, chunk: Vec<Queued>) {
        let (calls, replies): (Vec<ReadCall>, Vec<_>) =
            chunk.into_iter().map(|q| (q.call, q.reply)).unzip();

        let results = if calls.len() == 1 {
            vec![self.direct(&calls[0], block).await]
        } else {
            self.aggregate(&calls, block).await
        };

        for (reply, result) in replies.into_iter().zip(results) {
            // Receiver gone means the caller stopped waiting.
            let _ = reply.send(result);
        }
    }

    async fn direct(&self, call: &ReadCall, block: BlockRef) -> Result<Bytes> {
        let request = CallRequest::new(call.target, call.data.clone());
        retry_transient(|_| self.client.call(&request, block), self.config.retry).await
    }

    async fn aggregate(&self, calls: &[ReadCall], block: BlockRef) -> Vec<Result<Bytes>> {
        let encoded = IMulticall3::aggregate3Call {
            calls: calls
                .iter()
                .map(|c| IMulticall3::Call3 {
                    target: c.target,
                    allowFailure: true,
                    callData: c.data.clone(),
                })
                .collect(),
        }
        .abi_encode();
        let request = CallRequest::new(self.config.multicall, encoded);

        let raw = match retry_transient(|_| self.client.call(&request, block), self.config.retry)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, calls = calls.len(), %block, "multicall round trip failed");
                return calls.iter().map(|_| Err(e.clone())).collect();
            }
        };

        let decoded = match IMulticall3::aggregate3Call::abi_decode_returns(&raw) {
            Ok(decoded) if decoded.len() == calls.len() => decoded,
            Ok(decoded) => {
                let err = ClientError::Decode(format!(
                    "multicall returned {} results for {} calls",
                    decoded.len(),
                    calls.len()
                ));
                return calls.iter().map(|_| Err(err.clone())).collect();
            }
            Err(e) => {
                let err = ClientError::Decode(e.to_string());
                return calls.iter().map(|_| Err(err.clone())).collect();
            }
        };

        decoded
            .into_iter()
            .map(|r| {
                if r.success {
                    Ok(r.returnData)
                } else {
                    Err(ClientError::Reverted {
                        data: r.returnData,
                        message: "call reverted inside multicall".to_string(),
                    })
                }
            })
            .collect()
    }
}
