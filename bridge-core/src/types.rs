//! Core data model: `Swap`, `Escrow`, `RelayTask` and their status enums.
//!
//! Amounts are decimal strings backed by `rust_decimal` so no floating point
//! ever enters the swap ledger.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::{HashLock, Secret};

/// The two chains a swap can move between. The system never settles across
/// more than two chains per swap (non-goal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    A,
    B,
}

impl Chain {
    pub fn other(self) -> Chain {
        match self {
            Chain::A => Chain::B,
            Chain::B => Chain::A,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::A => write!(f, "chain_a"),
            Chain::B => write!(f, "chain_b"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Initiated,
    EscrowsCreated,
    EscrowsLocked,
    SecretsRevealed,
    Completed,
    Failed,
    Refunded,
    TimedOut,
}

impl SwapStatus {
    /// Terminal statuses from which no further transition is permitted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapStatus::Completed | SwapStatus::Failed | SwapStatus::Refunded
        )
    }

    /// Whether `self -> next` is a legal edge in the swap status DAG.
    ///
    /// ```text
    /// initiated -> escrows_created -> escrows_locked -> secrets_revealed -> completed
    ///      |              |                 |                   |
    ///      v              v                 v                   |
    ///   failed <----- timed_out ------------+-----------> refunded
    /// ```
    pub fn can_transition_to(self, next: SwapStatus) -> bool {
        use SwapStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Initiated, EscrowsCreated)
                | (Initiated, Failed)
                | (Initiated, TimedOut)
                | (EscrowsCreated, EscrowsLocked)
                | (EscrowsCreated, Failed)
                | (EscrowsCreated, TimedOut)
                | (EscrowsLocked, SecretsRevealed)
                | (EscrowsLocked, Failed)
                | (EscrowsLocked, TimedOut)
                | (SecretsRevealed, Completed)
                | (SecretsRevealed, Failed)
                | (SecretsRevealed, TimedOut)
                | (TimedOut, Refunded)
                | (TimedOut, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Created,
    Locked,
    Completed,
    Refunded,
}

/// One leg of an HTLC, living on a single chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escrow {
    pub id: String,
    pub chain: Chain,
    pub contract_address: String,
    pub amount: Decimal,
    pub asset: String,
    pub hash_lock: HashLock,
    pub withdrawal_deadline: DateTime<Utc>,
    pub refund_deadline: DateTime<Utc>,
    pub status: EscrowStatus,
    pub tx_hash: Option<String>,
    pub block_height: Option<u64>,
}

impl Escrow {
    /// Invariant 3: `withdrawal_deadline < refund_deadline`.
    pub fn deadlines_ordered(&self) -> bool {
        self.withdrawal_deadline < self.refund_deadline
    }
}

/// The primary aggregate: a single cross-chain atomic swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swap {
    pub swap_id: Uuid,
    pub from_chain: Chain,
    pub to_chain: Chain,
    pub from_token: String,
    pub to_token: String,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub user_address: String,
    pub counterparty_address: String,
    /// Cleared once the retention TTL after completion expires.
    pub secret: Option<Secret>,
    pub secret_hash: HashLock,
    pub timelock_sec: u32,
    pub status: SwapStatus,
    pub escrow_a: Option<Escrow>,
    pub escrow_b: Option<Escrow>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Swap {
    pub fn escrow_for(&self, chain: Chain) -> Option<&Escrow> {
        match chain {
            c if c == self.from_chain => self.escrow_a.as_ref(),
            c if c == self.to_chain => self.escrow_b.as_ref(),
            _ => None,
        }
    }

    pub fn escrow_for_mut(&mut self, chain: Chain) -> Option<&mut Escrow> {
        match chain {
            c if c == self.from_chain => self.escrow_a.as_mut(),
            c if c == self.to_chain => self.escrow_b.as_mut(),
            _ => None,
        }
    }

    /// Invariant 7: age beyond `2 * timelock_sec` while non-terminal.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let age = now.signed_duration_since(self.created_at);
        age.num_seconds() > i64::from(self.timelock_sec) * 2
    }

    /// Invariant 1: both legs' hash locks agree with the swap's secret hash.
    pub fn hash_locks_consistent(&self) -> bool {
        let a_ok = self
            .escrow_a
            .as_ref()
            .map(|e| crate::hash::locks_equal(&e.hash_lock, &self.secret_hash))
            .unwrap_or(true);
        let b_ok = self
            .escrow_b
            .as_ref()
            .map(|e| crate::hash::locks_equal(&e.hash_lock, &self.secret_hash))
            .unwrap_or(true);
        a_ok && b_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CreateEscrow,
    LockEscrow,
    RevealSecret,
    CompleteEscrow,
    RefundEscrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Type-specific payload carried by a `RelayTask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub escrow_id: Option<String>,
    pub amount: Option<Decimal>,
    pub asset: Option<String>,
    pub hash_lock: Option<HashLock>,
    pub secret: Option<Secret>,
    pub resolver: Option<String>,
}

impl Default for TaskPayload {
    fn default() -> Self {
        Self {
            escrow_id: None,
            amount: None,
            asset: None,
            hash_lock: None,
            secret: None,
            resolver: None,
        }
    }
}

/// A unit of deferred on-chain work dispatched by the relayer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayTask {
    pub id: Uuid,
    pub swap_id: Uuid,
    pub chain: Chain,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub payload: TaskPayload,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RelayTask {
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_at <= now
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Normalized on-chain event emitted by a chain monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub chain: Chain,
    pub kind: EventKind,
    pub escrow_id: String,
    pub maker: String,
    pub amount: Decimal,
    pub asset: String,
    pub hash_lock: Option<HashLock>,
    pub timelock_sec: Option<u32>,
    pub tx_hash: String,
    pub block_height: u64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EscrowCreated,
    EscrowLocked,
    EscrowCompleted,
    EscrowRefunded,
    BridgeInitiated,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn status_dag_forbids_reverse_transitions() {
        assert!(SwapStatus::Initiated.can_transition_to(SwapStatus::EscrowsCreated));
        assert!(!SwapStatus::EscrowsCreated.can_transition_to(SwapStatus::Initiated));
    }

    #[test]
    fn terminal_statuses_accept_no_further_transition() {
        assert!(!SwapStatus::Completed.can_transition_to(SwapStatus::Failed));
        assert!(!SwapStatus::Refunded.can_transition_to(SwapStatus::Completed));
        assert!(!SwapStatus::Failed.can_transition_to(SwapStatus::Refunded));
    }

    #[test]
    fn timed_out_can_only_reach_refunded_or_failed() {
        assert!(SwapStatus::TimedOut.can_transition_to(SwapStatus::Refunded));
        assert!(SwapStatus::TimedOut.can_transition_to(SwapStatus::Failed));
        assert!(!SwapStatus::TimedOut.can_transition_to(SwapStatus::Completed));
    }

    #[test]
    fn chain_other_is_involutive() {
        assert_eq!(Chain::A.other(), Chain::B);
        assert_eq!(Chain::A.other().other(), Chain::A);
    }

    fn sample_swap() -> Swap {
        let secret = crate::hash::generate_secret();
        let secret_hash = crate::hash::hash_lock(&secret);
        Swap {
            swap_id: Uuid::new_v4(),
            from_chain: Chain::A,
            to_chain: Chain::B,
            from_token: "TA".into(),
            to_token: "TB".into(),
            from_amount: Decimal::new(100, 0),
            to_amount: Decimal::new(98, 0),
            user_address: "UA".into(),
            counterparty_address: "CB".into(),
            secret: Some(secret),
            secret_hash,
            timelock_sec: 3600,
            status: SwapStatus::Initiated,
            escrow_a: None,
            escrow_b: None,
            created_at: now(),
            completed_at: None,
            last_updated_at: now(),
            error: None,
        }
    }

    #[test]
    fn fresh_swap_is_not_expired() {
        let swap = sample_swap();
        assert!(!swap.is_expired(now()));
    }

    #[test]
    fn swap_expires_after_twice_timelock() {
        let mut swap = sample_swap();
        swap.created_at = now() - chrono::Duration::seconds(2 * 3600 + 1);
        assert!(swap.is_expired(now()));
    }

    #[test]
    fn terminal_swap_is_never_expired() {
        let mut swap = sample_swap();
        swap.status = SwapStatus::Completed;
        swap.created_at = now() - chrono::Duration::seconds(100_000);
        assert!(!swap.is_expired(now()));
    }

    #[test]
    fn empty_legs_are_trivially_consistent() {
        let swap = sample_swap();
        assert!(swap.hash_locks_consistent());
    }
}
