//! Timeouts and bounded retries for reads

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use yieldkit_core::{ClientError, RpcConfig};

/// Retry settings for transient read failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RpcConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RpcConfig::default())
    }
}

/// Retry an async read with exponential backoff while the error is transient.
///
/// Non-transient errors (reverts, RPC errors) return immediately.
pub async fn retry_transient<F, Fut, T>(mut op: F, policy: RetryPolicy) -> Result<T, ClientError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut delay = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                tracing::debug!(attempt, error = %e, "transient read failure, retrying");
                sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Bound a request by `limit`; elapsed requests become `ClientError::Timeout`.
pub async fn timed_request<T>(
    limit: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, ClientError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ClientError::Timeout {
            operation: operation.to_string(),
            after_ms: limit.as_millis() as u64,
        })?
}
