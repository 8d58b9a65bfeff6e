//! The core per-swap state machine. Drives a swap from `initiated` through
//! to `completed`/`refunded`/`failed`, dispatching on-chain work through the
//! relayer and reacting to normalized events from both chain monitors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chain::ChainAdapter;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::hash::{generate_secret, hash_lock};
use crate::metrics;
use crate::relayer::{Relayer, TaskExecutor};
use crate::repository::SwapRepository;
use crate::resilience::Resilience;
use crate::types::{
    Chain, Escrow, EscrowStatus, EventKind, NormalizedEvent, RelayTask, Swap, SwapStatus,
    TaskPayload, TaskPriority, TaskStatus, TaskType,
};

#[derive(Debug, Clone, Deserialize)]
pub struct InitiateRequest {
    pub from_chain: Chain,
    pub to_chain: Chain,
    pub from_token: String,
    pub to_token: String,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub user_address: String,
    pub counterparty_address: String,
    pub timelock_sec: Option<u32>,
}

pub struct Orchestrator {
    repository: Arc<SwapRepository>,
    relayer: Arc<Relayer>,
    adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
    resilience: Arc<Resilience>,
    config: BridgeConfig,
    swap_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl Orchestrator {
    pub fn new(
        repository: Arc<SwapRepository>,
        relayer: Arc<Relayer>,
        adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
        resilience: Arc<Resilience>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            repository,
            relayer,
            adapters,
            resilience,
            config,
            swap_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, swap_id: Uuid) -> Arc<Mutex<()>> {
        self.swap_locks
            .entry(swap_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Validate and admit a new swap; returns the new swap's id.
    pub async fn initiate(&self, req: InitiateRequest) -> BridgeResult<Uuid> {
        if req.from_chain == req.to_chain {
            return Err(BridgeError::Validation("from_chain must differ from to_chain".into()));
        }
        if req.user_address.is_empty() || req.counterparty_address.is_empty() {
            return Err(BridgeError::Validation("addresses must not be empty".into()));
        }
        if req.from_amount <= Decimal::ZERO || req.to_amount <= Decimal::ZERO {
            return Err(BridgeError::Validation("amounts must be positive".into()));
        }
        let timelock_sec = req.timelock_sec.unwrap_or(self.config.default_timelock_sec);
        crate::config::BridgeConfig::validate_timelock(timelock_sec)
            .map_err(|e| BridgeError::Validation(e.to_string()))?;

        let secret = generate_secret();
        let secret_hash = hash_lock(&secret);
        let now = Utc::now();

        let swap = Swap {
            swap_id: Uuid::new_v4(),
            from_chain: req.from_chain,
            to_chain: req.to_chain,
            from_token: req.from_token,
            to_token: req.to_token,
            from_amount: req.from_amount,
            to_amount: req.to_amount,
            user_address: req.user_address,
            counterparty_address: req.counterparty_address,
            secret: Some(secret),
            secret_hash,
            timelock_sec,
            status: SwapStatus::Initiated,
            escrow_a: None,
            escrow_b: None,
            created_at: now,
            completed_at: None,
            last_updated_at: now,
            error: None,
        };

        let swap_id = swap.swap_id;
        self.repository.insert(swap);
        metrics::SWAPS_INITIATED.inc();
        metrics::ACTIVE_SWAPS.inc();

        for chain in [req.from_chain, req.to_chain] {
            self.enqueue(swap_id, chain, TaskType::CreateEscrow, TaskPriority::High, TaskPayload::default())
                .await;
        }

        Ok(swap_id)
    }

    async fn enqueue(
        &self,
        swap_id: Uuid,
        chain: Chain,
        task_type: TaskType,
        priority: TaskPriority,
        payload: TaskPayload,
    ) {
        let now = Utc::now();
        let task = RelayTask {
            id: Uuid::new_v4(),
            swap_id,
            chain,
            task_type,
            priority,
            attempts: 0,
            max_attempts: 5,
            created_at: now,
            scheduled_at: now,
            status: TaskStatus::Pending,
            payload,
            finished_at: None,
        };
        self.relayer.enqueue(task).await;
    }

    fn transition(&self, swap_id: Uuid, next: SwapStatus, error: Option<String>) -> bool {
        let applied = self
            .repository
            .update(swap_id, |swap| {
                if !swap.status.can_transition_to(next) {
                    return false;
                }
                swap.status = next;
                swap.last_updated_at = Utc::now();
                if next == SwapStatus::Completed {
                    swap.completed_at = Some(Utc::now());
                }
                if let Some(msg) = &error {
                    swap.error = Some(msg.clone());
                }
                true
            })
            .unwrap_or(false);

        if applied {
            metrics::SWAPS_BY_STATUS
                .with_label_values(&[&format!("{next:?}")])
                .inc();
            if next.is_terminal() {
                metrics::ACTIVE_SWAPS.dec();
            }
            match next {
                SwapStatus::Completed => {
                    metrics::SWAPS_COMPLETED.inc();
                    if let Some(swap) = self.repository.get(swap_id) {
                        if let Some(completed_at) = swap.completed_at {
                            let secs = (completed_at - swap.created_at).num_milliseconds() as f64 / 1000.0;
                            metrics::SWAP_DURATION.observe(secs.max(0.0));
                        }
                    }
                }
                SwapStatus::Failed => metrics::SWAPS_FAILED.with_label_values(&["transition"]).inc(),
                SwapStatus::Refunded => {
                    if let Some(swap) = self.repository.get(swap_id) {
                        metrics::SWAPS_REFUNDED
                            .with_label_values(&[&swap.from_chain.to_string()])
                            .inc();
                    }
                }
                _ => {}
            }
        }
        applied
    }

    fn fail_swap(&self, swap_id: Uuid, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%swap_id, reason, "swap failing");
        if self.transition(swap_id, SwapStatus::Failed, Some(reason)) {
            self.relayer.cancel_swap(swap_id);
        }
    }

    /// React to a normalized event delivered by either chain monitor. Safe
    /// to call more than once for the same event (idempotent transitions).
    pub async fn handle_event(&self, event: NormalizedEvent) {
        let candidates: Vec<Swap> = self
            .repository
            .list_all()
            .into_iter()
            .filter(|s| {
                s.escrow_for(event.chain)
                    .map(|e| e.id == event.escrow_id)
                    .unwrap_or(false)
            })
            .collect();

        for swap in candidates {
            let lock = self.lock_for(swap.swap_id);
            let _guard = lock.lock().await;
            self.apply_event(swap.swap_id, &event).await;
        }
    }

    async fn apply_event(&self, swap_id: Uuid, event: &NormalizedEvent) {
        match event.kind {
            EventKind::EscrowLocked => self.on_leg_locked(swap_id, event).await,
            EventKind::EscrowCompleted => self.on_leg_completed(swap_id, event).await,
            EventKind::EscrowRefunded => self.on_leg_refunded(swap_id, event).await,
            _ => {}
        }
    }

    async fn on_leg_locked(&self, swap_id: Uuid, event: &NormalizedEvent) {
        self.repository.update(swap_id, |swap| {
            if let Some(escrow) = swap.escrow_for_mut(event.chain) {
                escrow.status = EscrowStatus::Locked;
            }
        });

        let Some(swap) = self.repository.get(swap_id) else { return };
        let both_locked = [swap.escrow_a.as_ref(), swap.escrow_b.as_ref()]
            .into_iter()
            .all(|e| e.map(|e| e.status == EscrowStatus::Locked).unwrap_or(false));
        if !both_locked {
            return;
        }

        if !swap.hash_locks_consistent() {
            self.fail_swap(swap_id, "hash lock disagreement between legs");
            self.schedule_refunds(swap_id).await;
            return;
        }

        if self.transition(swap_id, SwapStatus::EscrowsLocked, None) {
            self.begin_reveal(swap_id).await;
        }
    }

    async fn begin_reveal(&self, swap_id: Uuid) {
        let Some(swap) = self.repository.get(swap_id) else { return };
        let reveal_chain = swap.to_chain;
        let payload = TaskPayload {
            secret: swap.secret,
            ..TaskPayload::default()
        };
        self.enqueue(swap_id, reveal_chain, TaskType::RevealSecret, TaskPriority::High, payload)
            .await;
    }

    async fn on_leg_completed(&self, swap_id: Uuid, event: &NormalizedEvent) {
        self.repository.update(swap_id, |swap| {
            if let Some(escrow) = swap.escrow_for_mut(event.chain) {
                escrow.status = EscrowStatus::Completed;
            }
        });

        let Some(swap) = self.repository.get(swap_id) else { return };

        if swap.status == SwapStatus::EscrowsLocked && event.chain == swap.to_chain {
            self.transition(swap_id, SwapStatus::SecretsRevealed, None);
            let payload = TaskPayload {
                secret: swap.secret,
                ..TaskPayload::default()
            };
            self.enqueue(swap_id, swap.from_chain, TaskType::CompleteEscrow, TaskPriority::High, payload)
                .await;
            return;
        }

        let both_completed = [swap.escrow_a.as_ref(), swap.escrow_b.as_ref()]
            .into_iter()
            .all(|e| e.map(|e| e.status == EscrowStatus::Completed).unwrap_or(false));
        if both_completed {
            self.transition(swap_id, SwapStatus::Completed, None);
        }
    }

    async fn on_leg_refunded(&self, swap_id: Uuid, event: &NormalizedEvent) {
        self.repository.update(swap_id, |swap| {
            if let Some(escrow) = swap.escrow_for_mut(event.chain) {
                escrow.status = EscrowStatus::Refunded;
            }
        });

        let Some(swap) = self.repository.get(swap_id) else { return };
        let both_done = [swap.escrow_a.as_ref(), swap.escrow_b.as_ref()].into_iter().all(|e| {
            e.map(|e| matches!(e.status, EscrowStatus::Refunded | EscrowStatus::Completed))
                .unwrap_or(true)
        });
        if both_done {
            self.transition(swap_id, SwapStatus::Refunded, None);
        }
    }

    async fn schedule_refunds(&self, swap_id: Uuid) {
        let Some(swap) = self.repository.get(swap_id) else { return };
        for chain in [swap.from_chain, swap.to_chain] {
            let already_done = swap
                .escrow_for(chain)
                .map(|e| matches!(e.status, EscrowStatus::Refunded | EscrowStatus::Completed))
                .unwrap_or(true);
            if !already_done {
                self.enqueue(swap_id, chain, TaskType::RefundEscrow, TaskPriority::Medium, TaskPayload::default())
                    .await;
            }
        }
    }

    /// Background sweep: transition any non-terminal swap older than
    /// `2 * timelock_sec` to `timed_out` and trigger refunds.
    pub async fn scan_timeouts(&self) {
        let now = Utc::now();
        for swap in self.repository.list_non_terminal() {
            if swap.is_expired(now) {
                if self.transition(swap.swap_id, SwapStatus::TimedOut, Some("swap lifetime exceeded 2x timelock".into())) {
                    self.schedule_refunds(swap.swap_id).await;
                }
            }
        }
    }

    /// Operator-triggered force-complete (test/dev): enqueues a
    /// `CompleteEscrow` task for each leg not already completed. Does not
    /// itself verify timelock or event state; the queued task performs the
    /// usual preimage check before touching the chain.
    pub async fn force_complete(&self, swap_id: Uuid) -> BridgeResult<()> {
        let swap = self
            .repository
            .get(swap_id)
            .ok_or_else(|| BridgeError::Validation("swap not found".into()))?;
        if swap.status.is_terminal() {
            return Err(BridgeError::AlreadyInState(format!("{:?}", swap.status)));
        }
        for chain in [swap.from_chain, swap.to_chain] {
            let already_done = swap
                .escrow_for(chain)
                .map(|e| e.status == EscrowStatus::Completed)
                .unwrap_or(false);
            if !already_done {
                let payload = TaskPayload {
                    secret: swap.secret,
                    ..TaskPayload::default()
                };
                self.enqueue(swap_id, chain, TaskType::CompleteEscrow, TaskPriority::High, payload)
                    .await;
            }
        }
        Ok(())
    }

    /// Operator-initiated refund: schedules refunds for every leg not
    /// already refunded or completed.
    pub async fn force_refund(&self, swap_id: Uuid) -> BridgeResult<()> {
        let swap = self
            .repository
            .get(swap_id)
            .ok_or_else(|| BridgeError::Validation("swap not found".into()))?;
        if swap.status.is_terminal() {
            return Err(BridgeError::AlreadyInState(format!("{:?}", swap.status)));
        }
        self.schedule_refunds(swap_id).await;
        Ok(())
    }

    pub fn repository(&self) -> &Arc<SwapRepository> {
        &self.repository
    }

    pub fn relayer(&self) -> &Arc<Relayer> {
        &self.relayer
    }

    fn withdrawal_and_refund_deadlines(&self, timelock_sec: u32, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let withdrawal = now + ChronoDuration::seconds(i64::from(timelock_sec));
        let refund = now + ChronoDuration::seconds(i64::from(timelock_sec) * 2);
        (withdrawal, refund)
    }
}

#[async_trait]
impl TaskExecutor for Orchestrator {
    async fn execute(&self, task: &RelayTask) -> Result<(), BridgeError> {
        let Some(swap) = self.repository.get(task.swap_id) else {
            return Err(BridgeError::Internal("swap not found for task".into()));
        };
        let adapter = self
            .adapters
            .get(&task.chain)
            .ok_or_else(|| BridgeError::Internal(format!("no adapter registered for {:?}", task.chain)))?
            .clone();

        match task.task_type {
            TaskType::CreateEscrow => {
                let (withdrawal, refund) =
                    self.withdrawal_and_refund_deadlines(swap.timelock_sec, Utc::now());
                let (amount, asset, counterparty) = if task.chain == swap.from_chain {
                    (swap.from_amount, swap.from_token.clone(), swap.counterparty_address.clone())
                } else {
                    (swap.to_amount, swap.to_token.clone(), swap.user_address.clone())
                };
                let secret_hash = swap.secret_hash;
                let chain = task.chain;
                let resilience = self.resilience.clone();
                let adapter2 = adapter.clone();
                let (escrow_id, tx_hash) = resilience
                    .call(chain, "create_escrow", || {
                        let adapter2 = adapter2.clone();
                        let counterparty = counterparty.clone();
                        let asset = asset.clone();
                        async move {
                            adapter2
                                .create_escrow(
                                    &counterparty,
                                    amount,
                                    &asset,
                                    secret_hash,
                                    withdrawal.timestamp(),
                                    refund.timestamp(),
                                )
                                .await
                        }
                    })
                    .await?;

                self.repository.update(task.swap_id, |s| {
                    let escrow = Escrow {
                        id: escrow_id.clone(),
                        chain,
                        contract_address: String::new(),
                        amount,
                        asset: asset.clone(),
                        hash_lock: secret_hash,
                        withdrawal_deadline: withdrawal,
                        refund_deadline: refund,
                        status: EscrowStatus::Created,
                        tx_hash: Some(tx_hash.clone()),
                        block_height: None,
                    };
                    if chain == s.from_chain {
                        s.escrow_a = Some(escrow);
                    } else {
                        s.escrow_b = Some(escrow);
                    }
                });

                let both_created = self
                    .repository
                    .get(task.swap_id)
                    .map(|s| s.escrow_a.is_some() && s.escrow_b.is_some())
                    .unwrap_or(false);
                if both_created {
                    self.transition(task.swap_id, SwapStatus::EscrowsCreated, None);
                    for chain in [swap.from_chain, swap.to_chain] {
                        self.enqueue(task.swap_id, chain, TaskType::LockEscrow, TaskPriority::High, TaskPayload::default())
                            .await;
                    }
                }
                Ok(())
            }
            TaskType::LockEscrow => {
                let Some(escrow) = swap.escrow_for(task.chain) else {
                    return Err(BridgeError::Internal("escrow missing for lock task".into()));
                };
                let escrow_id = escrow.id.clone();
                let resolver = if task.chain == swap.from_chain {
                    swap.counterparty_address.clone()
                } else {
                    swap.user_address.clone()
                };
                let chain = task.chain;
                let resilience = self.resilience.clone();
                let tx_hash = resilience
                    .call(chain, "lock_escrow", || {
                        let adapter = adapter.clone();
                        let escrow_id = escrow_id.clone();
                        let resolver = resolver.clone();
                        async move { adapter.lock_escrow(&escrow_id, &resolver).await }
                    })
                    .await?;

                self.repository.update(task.swap_id, |s| {
                    if let Some(escrow) = s.escrow_for_mut(chain) {
                        escrow.tx_hash = Some(tx_hash.clone());
                    }
                });
                Ok(())
            }
            TaskType::RevealSecret | TaskType::CompleteEscrow => {
                let Some(escrow) = swap.escrow_for(task.chain) else {
                    return Err(BridgeError::Internal("escrow missing for complete task".into()));
                };
                let Some(secret) = task.payload.secret.or(swap.secret) else {
                    return Err(BridgeError::Internal("no secret available to reveal".into()));
                };
                if !crate::hash::verify_preimage(&secret, &swap.secret_hash) {
                    return Err(BridgeError::InvalidPreimage);
                }
                let escrow_id = escrow.id.clone();
                let chain = task.chain;
                let resilience = self.resilience.clone();
                match resilience
                    .call(chain, "complete_escrow", || {
                        let adapter = adapter.clone();
                        let escrow_id = escrow_id.clone();
                        async move { adapter.complete_escrow(&escrow_id, secret).await }
                    })
                    .await
                {
                    Ok(_) | Err(BridgeError::AlreadyInState(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            TaskType::RefundEscrow => {
                let Some(escrow) = swap.escrow_for(task.chain) else {
                    return Ok(());
                };
                if matches!(escrow.status, EscrowStatus::Refunded | EscrowStatus::Completed) {
                    return Ok(());
                }
                if Utc::now() < escrow.refund_deadline {
                    let retry_after = (escrow.refund_deadline - Utc::now()).num_seconds().max(1) as u64;
                    return Err(BridgeError::TimelockNotExpired {
                        retry_after_secs: retry_after,
                    });
                }
                let escrow_id = escrow.id.clone();
                let chain = task.chain;
                let resilience = self.resilience.clone();
                match resilience
                    .call(chain, "refund_escrow", || {
                        let adapter = adapter.clone();
                        let escrow_id = escrow_id.clone();
                        async move { adapter.refund_escrow(&escrow_id).await }
                    })
                    .await
                {
                    Ok(_) | Err(BridgeError::AlreadyInState(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
        }
    }
}
