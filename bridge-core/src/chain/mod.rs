//! Uniform RPC facade over each chain's native client, so the monitor,
//! relayer and orchestrator never branch on which chain they're talking to.

pub mod evm;
pub mod soroban;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::BridgeResult;
use crate::hash::{HashLock, Secret};
use crate::types::{Chain, NormalizedEvent};

/// On-chain escrow state as reported by a chain's contract, independent of
/// the local `Escrow` record kept in a `Swap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowOnChainStatus {
    NotFound,
    Created,
    Locked,
    Completed,
    Refunded,
}

#[derive(Debug, Clone)]
pub struct EscrowRecord {
    pub escrow_id: String,
    pub chain: Chain,
    pub status: EscrowOnChainStatus,
    pub hash_lock: Option<HashLock>,
    pub block_height: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterStats {
    pub calls_total: u64,
    pub calls_failed: u64,
    pub last_block_height: u64,
}

/// The uniform surface both chain-specific adapters implement. All calls
/// are expected to be wrapped by the resilience pipeline before dispatch;
/// adapters themselves never retry or circuit-break internally.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain(&self) -> Chain;

    /// Current chain head, used by the monitor to detect new blocks.
    async fn latest_block_height(&self) -> BridgeResult<u64>;

    /// Create an HTLC escrow locking `amount` of `asset` under `hash_lock`,
    /// releasable to `counterparty_address` before `refund_deadline_unix`.
    /// Returns `(escrow_id, tx_hash)`: the contract-assigned escrow id later
    /// matched against event logs, distinct from the submitting tx's hash.
    async fn create_escrow(
        &self,
        counterparty_address: &str,
        amount: Decimal,
        asset: &str,
        hash_lock: HashLock,
        withdrawal_deadline_unix: i64,
        refund_deadline_unix: i64,
    ) -> BridgeResult<(String, String)>;

    /// Confirm `escrow_id` on-chain, naming `resolver` as the party entitled
    /// to complete it. Returns the lock transaction's hash.
    async fn lock_escrow(&self, escrow_id: &str, resolver: &str) -> BridgeResult<String>;

    /// Fetch the on-chain status of a previously created escrow.
    async fn get_escrow(&self, escrow_id: &str) -> BridgeResult<EscrowRecord>;

    /// Reveal `secret` to claim an escrow, releasing funds to the claimer.
    async fn complete_escrow(&self, escrow_id: &str, secret: Secret) -> BridgeResult<String>;

    /// Reclaim funds from an expired, unclaimed escrow.
    async fn refund_escrow(&self, escrow_id: &str) -> BridgeResult<String>;

    /// Poll for escrow lifecycle events at or after `from_block`, normalized
    /// to the chain-agnostic shape the monitor consumes.
    async fn poll_events(&self, from_block: u64) -> BridgeResult<Vec<NormalizedEvent>>;

    /// Snapshot of this adapter's own call counters, for health/diagnostics.
    fn get_stats(&self) -> AdapterStats;
}
