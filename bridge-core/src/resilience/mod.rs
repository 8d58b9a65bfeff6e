//! Resilience primitives composed in the fixed order
//! `queue -> breaker -> retry -> timeout -> adapter`, so every chain call
//! is concurrency-bounded, breaker-gated, retried with backoff and
//! individually time-boxed before it ever reaches a `ChainAdapter` method.

pub mod breaker;
pub mod queue;
pub mod retry;

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::warn;

use crate::config::ResilienceConfig;
use crate::error::BridgeError;
use crate::metrics;
use crate::types::Chain;

pub use breaker::CircuitBreaker;
pub use queue::OperationQueue;
pub use retry::{retry_with_backoff, RetryPolicy};

/// Bundles one breaker per chain and the process-wide shared queue, so a
/// resilient call site only needs to hold one of these.
pub struct Resilience {
    pub breaker_a: CircuitBreaker,
    pub breaker_b: CircuitBreaker,
    pub queue: OperationQueue,
    pub retry_policy: RetryPolicy,
    pub call_timeout_a: Duration,
    pub call_timeout_b: Duration,
}

impl Resilience {
    pub fn new(cfg: &ResilienceConfig, call_timeout_a: Duration, call_timeout_b: Duration) -> Self {
        Self {
            breaker_a: CircuitBreaker::new(cfg.breaker_failure_threshold, cfg.breaker_open_timeout),
            breaker_b: CircuitBreaker::new(cfg.breaker_failure_threshold, cfg.breaker_open_timeout),
            queue: OperationQueue::new(cfg.operation_queue_size),
            retry_policy: RetryPolicy {
                max_attempts: cfg.max_retries,
                initial_delay: cfg.initial_delay,
                max_delay: cfg.max_delay,
                backoff_multiplier: cfg.backoff_multiplier,
            },
            call_timeout_a,
            call_timeout_b,
        }
    }

    fn breaker(&self, chain: Chain) -> &CircuitBreaker {
        match chain {
            Chain::A => &self.breaker_a,
            Chain::B => &self.breaker_b,
        }
    }

    fn call_timeout(&self, chain: Chain) -> Duration {
        match chain {
            Chain::A => self.call_timeout_a,
            Chain::B => self.call_timeout_b,
        }
    }

    pub async fn breaker_open(&self, chain: Chain) -> bool {
        self.breaker(chain).is_open().await
    }

    /// Run `op` for `chain` through the full composed pipeline: acquire a
    /// queue slot, check the breaker, retry with backoff, time-box each
    /// attempt, and feed the outcome back into the breaker.
    pub async fn call<T, F, Fut>(
        &self,
        chain: Chain,
        op_name: &str,
        mut op: F,
    ) -> Result<T, BridgeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let _permit = self.queue.acquire().await;
        let breaker = self.breaker(chain);

        if !breaker.allow().await {
            metrics::CIRCUIT_BREAKER_OPEN
                .with_label_values(&[&chain.to_string()])
                .set(1);
            return Err(BridgeError::CircuitOpen { chain });
        }

        let call_timeout = self.call_timeout(chain);
        let breaker_ref = breaker;
        let start = Instant::now();
        let result = retry_with_backoff(&self.retry_policy, op_name, || {
            let fut = op();
            async move {
                match timeout(call_timeout, fut).await {
                    Ok(inner) => inner,
                    Err(_) => Err(BridgeError::timeout(op_name, call_timeout)),
                }
            }
        })
        .await;

        metrics::CHAIN_CALL_LATENCY
            .with_label_values(&[&chain.to_string(), op_name])
            .observe(start.elapsed().as_secs_f64());

        match &result {
            Ok(_) => breaker_ref.record_success().await,
            Err(err) if err.counts_toward_breaker() => breaker_ref.record_failure().await,
            Err(err) => {
                warn!(op_name, %err, "error does not count toward breaker");
            }
        }

        if result.is_err() {
            metrics::CHAIN_CALL_ERRORS
                .with_label_values(&[&chain.to_string(), op_name])
                .inc();
        }
        metrics::CIRCUIT_BREAKER_OPEN
            .with_label_values(&[&chain.to_string()])
            .set(if breaker_ref.is_open().await { 1 } else { 0 });

        result
    }
}
