//! Atomic bundles of pending calls via the router's self-multicall

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use evm_client::{CallRequest, ChainClient, RetryPolicy};
use serde::{Deserialize, Serialize};
use yieldkit_core::{Result, SdkError};

use crate::abi::IRouter;
use crate::pending::{CallMeta, PendingCall};

/// Per-sub-call status from a bundle static call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCallResult {
    pub success: bool,
    pub return_data: Bytes,
}

pub type BundleReturn = Vec<SubCallResult>;

struct BundledCall {
    label: String,
    target: Address,
    data: Bytes,
    value: U256,
    from: Option<Address>,
}

/// Accumulates pending calls for one atomic submission.
///
/// The combined call's `static_call` runs every sub-call with failures
/// allowed and reports each status in insertion order; `estimate_gas` and
/// `send` disallow failures so any sub-call revert reverts the whole bundle.
///
/// Retry and confirmation polling follow the first added call unless set
/// explicitly.
#[derive(Default)]
pub struct Bundler {
    client: Option<Arc<dyn ChainClient>>,
    calls: Vec<BundledCall>,
    retry: Option<RetryPolicy>,
    poll_interval: Option<Duration>,
}

impl Bundler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn add_call<T>(&mut self, call: &PendingCall<T>) -> &mut Self {
        if self.client.is_none() {
            self.client = Some(call.client().clone());
        }
        self.retry.get_or_insert(call.retry());
        self.poll_interval.get_or_insert(call.poll_interval());
        self.calls.push(BundledCall {
            label: call.meta().label.clone(),
            target: call.target(),
            data: call.calldata().clone(),
            value: call.value(),
            from: call.request().from,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn encode(&self, allow_failure: bool) -> Bytes {
        IRouter::multicallCall {
            calls: self
                .calls
                .iter()
                .map(|c| IRouter::RouterCall {
                    allowFailure: allow_failure,
                    callData: c.data.clone(),
                })
                .collect(),
        }
        .abi_encode()
        .into()
    }

    /// Combine the accumulated calls into one pending call on the shared router.
    pub fn execute(&self) -> Result<PendingCall<BundleReturn>> {
        let (Some(first), Some(client)) = (self.calls.first(), self.client.as_ref()) else {
            return Err(SdkError::invalid("bundle", "no calls added"));
        };

        if let Some(other) = self.calls.iter().find(|c| c.target != first.target) {
            return Err(SdkError::invalid(
                "bundle",
                format!(
                    "`{}` targets {} but the bundle targets {}",
                    other.label, other.target, first.target
                ),
            ));
        }

        let value = self
            .calls
            .iter()
            .try_fold(U256::ZERO, |acc, c| acc.checked_add(c.value))
            .ok_or_else(|| SdkError::invalid("bundle", "total value overflows"))?;

        let mut request = CallRequest::new(first.target, self.encode(false)).with_value(value);
        request.from = self.calls.iter().find_map(|c| c.from);

        let label = format!(
            "multicall[{}]",
            self.calls
                .iter()
                .map(|c| c.label.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );

        let mut bundle = PendingCall::new(client.clone(), request, decode_bundle_return)
            .with_simulation_data(self.encode(true))
            .with_meta(CallMeta {
                label,
                expected_output: None,
                min_output: None,
            });
        if let Some(retry) = self.retry {
            bundle = bundle.with_retry(retry);
        }
        if let Some(interval) = self.poll_interval {
            bundle = bundle.with_poll_interval(interval);
        }
        Ok(bundle)
    }
}

fn decode_bundle_return(raw: &Bytes) -> Result<BundleReturn> {
    let results = IRouter::multicallCall::abi_decode_returns(raw)
        .map_err(|e| SdkError::Serialization(e.to_string()))?;
    Ok(results
        .into_iter()
        .map(|r| SubCallResult {
            success: r.success,
            return_data: r.returnData,
        })
        .collect())
}
