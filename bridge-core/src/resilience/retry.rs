//! Exponential-backoff retry wrapper around a fallible async operation.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::BridgeError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_millis() as u64
            * self.backoff_multiplier.pow(attempt.saturating_sub(1)) as u64;
        Duration::from_millis(scaled).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, exhausts `policy.max_attempts`, or returns a
/// non-retryable error. Only `BridgeError::is_retryable` errors are retried;
/// anything else returns immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, BridgeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BridgeError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    op_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    ?delay,
                    "operation failed, retrying"
                );
                sleep(delay).await;
            }
            Err(err) if err.is_retryable() => {
                debug!(op_name, attempt, "retry attempts exhausted");
                return Err(BridgeError::RetryExhausted {
                    attempts: attempt,
                    last_error: Box::new(err),
                });
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chain;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let result: Result<u32, BridgeError> =
            retry_with_backoff(&policy, "test_op", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2,
        };
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&policy, "test_op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BridgeError::ChainUnavailable {
                        chain: Chain::A,
                        reason: "down".into(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn exhausts_and_wraps_last_error() {
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2,
        };
        let result: Result<u32, BridgeError> = retry_with_backoff(&policy, "test_op", || async {
            Err(BridgeError::Timeout {
                op_name: "rpc".into(),
                elapsed_ms: 5,
            })
        })
        .await;
        assert!(matches!(
            result,
            Err(BridgeError::RetryExhausted { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, BridgeError> = retry_with_backoff(&policy, "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BridgeError::InvalidPreimage) }
        })
        .await;
        assert!(matches!(result, Err(BridgeError::InvalidPreimage)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
