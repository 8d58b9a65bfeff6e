//! Typed error kinds for the bridge orchestrator.
//!
//! Every error that crosses a component boundary (adapter -> resilience layer
//! -> monitor/relayer -> orchestrator) is a `BridgeError` variant. Retry and
//! circuit-breaker logic dispatch on variant, never on message text.

use std::time::Duration;
use thiserror::Error;

use crate::types::Chain;

/// Result type alias used throughout the crate.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("chain {chain:?} unavailable: {reason}")]
    ChainUnavailable { chain: Chain, reason: String },

    #[error("chain {chain:?} rate limited: {reason}")]
    RateLimited { chain: Chain, reason: String },

    #[error("operation {op_name} timed out after {elapsed_ms}ms")]
    Timeout { op_name: String, elapsed_ms: u64 },

    #[error("circuit breaker open for chain {chain:?}")]
    CircuitOpen { chain: Chain },

    #[error("already in requested state: {0}")]
    AlreadyInState(String),

    #[error("secret does not hash to the escrow's lock")]
    InvalidPreimage,

    #[error("timelock not yet expired, retry after {retry_after_secs}s")]
    TimelockNotExpired { retry_after_secs: u64 },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: Box<BridgeError>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Whether this error should be retried by the resilience layer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::ChainUnavailable { .. }
                | BridgeError::RateLimited { .. }
                | BridgeError::Timeout { .. }
        )
    }

    /// Whether this error should count as a failure toward the circuit breaker.
    /// Rate limiting is a throttling signal, not a health signal, so it is
    /// excluded per spec: "does not count toward breaker".
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self,
            BridgeError::ChainUnavailable { .. } | BridgeError::Timeout { .. }
        )
    }

    /// Whether this error is fatal to the swap (vs. recoverable locally).
    pub fn is_fatal_to_swap(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidPreimage
                | BridgeError::InvariantViolation(_)
                | BridgeError::RetryExhausted { .. }
                | BridgeError::Internal(_)
        )
    }

    /// Whether this error should cancel all other pending tasks for the swap.
    pub fn is_critical(&self) -> bool {
        matches!(self, BridgeError::InvariantViolation(_))
    }

    pub fn timeout(op_name: impl Into<String>, elapsed: Duration) -> Self {
        BridgeError::Timeout {
            op_name: op_name.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Internal(format!("malformed JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_unavailable_is_retryable_and_counts_toward_breaker() {
        let e = BridgeError::ChainUnavailable {
            chain: Chain::A,
            reason: "connection refused".into(),
        };
        assert!(e.is_retryable());
        assert!(e.counts_toward_breaker());
        assert!(!e.is_fatal_to_swap());
    }

    #[test]
    fn rate_limited_is_retryable_but_does_not_count_toward_breaker() {
        let e = BridgeError::RateLimited {
            chain: Chain::B,
            reason: "throttled".into(),
        };
        assert!(e.is_retryable());
        assert!(!e.counts_toward_breaker());
    }

    #[test]
    fn invariant_violation_is_fatal_and_critical() {
        let e = BridgeError::InvariantViolation("hash lock mismatch".into());
        assert!(e.is_fatal_to_swap());
        assert!(e.is_critical());
        assert!(!e.is_retryable());
    }

    #[test]
    fn circuit_open_is_neither_retryable_nor_fatal() {
        let e = BridgeError::CircuitOpen { chain: Chain::A };
        assert!(!e.is_retryable());
        assert!(!e.is_fatal_to_swap());
        assert!(!e.is_critical());
    }
}
