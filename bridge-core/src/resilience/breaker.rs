//! Per-chain circuit breaker: closed -> open -> half-open -> closed.

use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    failure_threshold: u32,
    opened_at: Option<Instant>,
    open_timeout: Duration,
    half_open_successes: u32,
    half_open_success_threshold: u32,
}

/// A circuit breaker guarding a single chain's adapter calls. `record_success`
/// and `record_failure` are driven by the retry layer above it; `allow` gates
/// whether a call should even be attempted.
pub struct CircuitBreaker {
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                failure_threshold,
                opened_at: None,
                open_timeout,
                half_open_successes: 0,
                half_open_success_threshold: 2,
            }),
        }
    }

    /// Whether a call should be let through right now. Transitions
    /// open -> half-open once `open_timeout` has elapsed.
    pub async fn allow(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= inner.open_timeout {
                    info!("circuit entering half-open state");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= inner.half_open_success_threshold {
                    info!("circuit closing, chain recovered");
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.half_open_successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= inner.failure_threshold {
                    warn!("circuit opening after {} failures", inner.failure_count);
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit reopening, chain still failing");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_successes = 0;
            }
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    pub async fn is_open(&self) -> bool {
        matches!(self.inner.read().await.state, CircuitState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.allow().await);
        breaker.record_failure().await;
        breaker.record_failure().await;
        assert!(!breaker.is_open().await);
        breaker.record_failure().await;
        assert!(breaker.is_open().await);
        assert!(!breaker.allow().await);
    }

    #[tokio::test]
    async fn half_open_closes_after_enough_successes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure().await;
        assert!(breaker.is_open().await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.allow().await);
        breaker.record_success().await;
        breaker.record_success().await;
        assert!(!breaker.is_open().await);
    }

    #[tokio::test]
    async fn half_open_reopens_on_renewed_failure() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.allow().await);
        breaker.record_failure().await;
        assert!(breaker.is_open().await);
    }
}
