//! End-to-end scenarios over the orchestrator, relayer and a mock
//! adapter pair, covering the seeded lifecycles: happy path, transient
//! chain failure, permanent chain failure with refund, timeout-driven
//! refund, hash-lock mismatch, and an invalid revealed secret.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use bridge_core::chain::{AdapterStats, ChainAdapter, EscrowOnChainStatus, EscrowRecord};
use bridge_core::config::{BridgeConfig, ResilienceConfig};
use bridge_core::error::{BridgeError, BridgeResult};
use bridge_core::hash::{HashLock, Secret};
use bridge_core::orchestrator::{InitiateRequest, Orchestrator};
use bridge_core::relayer::Relayer;
use bridge_core::repository::SwapRepository;
use bridge_core::resilience::Resilience;
use bridge_core::types::{Chain, EventKind, NormalizedEvent, SwapStatus};

struct MockAdapter {
    chain: Chain,
    fail_create_n_times: AtomicU32,
    create_attempts: AtomicU32,
    always_fail_create: bool,
    lock_attempts: AtomicU32,
}

impl MockAdapter {
    fn new(chain: Chain) -> Self {
        Self {
            chain,
            fail_create_n_times: AtomicU32::new(0),
            create_attempts: AtomicU32::new(0),
            always_fail_create: false,
            lock_attempts: AtomicU32::new(0),
        }
    }

    fn failing_n_times(chain: Chain, n: u32) -> Self {
        Self {
            chain,
            fail_create_n_times: AtomicU32::new(n),
            create_attempts: AtomicU32::new(0),
            always_fail_create: false,
            lock_attempts: AtomicU32::new(0),
        }
    }

    fn always_failing(chain: Chain) -> Self {
        Self {
            chain,
            fail_create_n_times: AtomicU32::new(0),
            create_attempts: AtomicU32::new(0),
            always_fail_create: true,
            lock_attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn latest_block_height(&self) -> BridgeResult<u64> {
        Ok(1)
    }

    async fn create_escrow(
        &self,
        _counterparty_address: &str,
        _amount: Decimal,
        _asset: &str,
        _hash_lock: HashLock,
        _withdrawal_deadline_unix: i64,
        _refund_deadline_unix: i64,
    ) -> BridgeResult<(String, String)> {
        let attempt = self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self.always_fail_create {
            return Err(BridgeError::ChainUnavailable {
                chain: self.chain,
                reason: "mock: permanently down".into(),
            });
        }
        let budget = self.fail_create_n_times.load(Ordering::SeqCst);
        if attempt < budget {
            return Err(BridgeError::ChainUnavailable {
                chain: self.chain,
                reason: "mock: transient failure".into(),
            });
        }
        Ok((format!("escrow-{}-{attempt}", self.chain), format!("tx-{}-{attempt}", self.chain)))
    }

    async fn lock_escrow(&self, escrow_id: &str, _resolver: &str) -> BridgeResult<String> {
        self.lock_attempts.fetch_add(1, Ordering::SeqCst);
        Ok(format!("lock-{escrow_id}"))
    }

    async fn get_escrow(&self, escrow_id: &str) -> BridgeResult<EscrowRecord> {
        Ok(EscrowRecord {
            escrow_id: escrow_id.to_string(),
            chain: self.chain,
            status: EscrowOnChainStatus::Created,
            hash_lock: None,
            block_height: 1,
        })
    }

    async fn complete_escrow(&self, escrow_id: &str, _secret: Secret) -> BridgeResult<String> {
        Ok(format!("complete-{escrow_id}"))
    }

    async fn refund_escrow(&self, escrow_id: &str) -> BridgeResult<String> {
        Ok(format!("refund-{escrow_id}"))
    }

    async fn poll_events(&self, _from_block: u64) -> BridgeResult<Vec<NormalizedEvent>> {
        Ok(vec![])
    }

    fn get_stats(&self) -> AdapterStats {
        AdapterStats::default()
    }
}

fn test_resilience() -> Arc<Resilience> {
    Arc::new(Resilience::new(
        &ResilienceConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2,
            breaker_failure_threshold: 10,
            breaker_open_timeout: Duration::from_millis(50),
            operation_queue_size: 3,
        },
        Duration::from_millis(200),
        Duration::from_millis(200),
    ))
}

fn sample_request(timelock_sec: u32) -> InitiateRequest {
    InitiateRequest {
        from_chain: Chain::A,
        to_chain: Chain::B,
        from_token: "TA".to_string(),
        to_token: "TB".to_string(),
        from_amount: Decimal::new(100, 0),
        to_amount: Decimal::new(98, 0),
        user_address: "UA".to_string(),
        counterparty_address: "CB".to_string(),
        timelock_sec: Some(timelock_sec),
    }
}

fn locked_event(chain: Chain, escrow_id: String, hash_lock: HashLock) -> NormalizedEvent {
    NormalizedEvent {
        chain,
        kind: EventKind::EscrowLocked,
        escrow_id,
        maker: "m".to_string(),
        amount: Decimal::new(1, 0),
        asset: "A".to_string(),
        hash_lock: Some(hash_lock),
        timelock_sec: None,
        tx_hash: "tx".to_string(),
        block_height: 1,
        ts: Utc::now(),
    }
}

fn completed_event(chain: Chain, escrow_id: String) -> NormalizedEvent {
    NormalizedEvent {
        chain,
        kind: EventKind::EscrowCompleted,
        escrow_id,
        maker: "m".to_string(),
        amount: Decimal::new(1, 0),
        asset: "A".to_string(),
        hash_lock: None,
        timelock_sec: None,
        tx_hash: "tx".to_string(),
        block_height: 1,
        ts: Utc::now(),
    }
}

fn refunded_event(chain: Chain, escrow_id: String) -> NormalizedEvent {
    NormalizedEvent {
        chain,
        kind: EventKind::EscrowRefunded,
        escrow_id,
        maker: "m".to_string(),
        amount: Decimal::new(1, 0),
        asset: "A".to_string(),
        hash_lock: None,
        timelock_sec: None,
        tx_hash: "tx".to_string(),
        block_height: 1,
        ts: Utc::now(),
    }
}

async fn drain_ticks(orch: &Orchestrator, ticks: u32) {
    for _ in 0..ticks {
        orch.relayer().tick(orch).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn happy_path_completes_both_legs() {
    let repo = Arc::new(SwapRepository::new());
    let relayer = Arc::new(Relayer::new(bridge_core::config::RelayerConfig {
        tick_interval: Duration::from_millis(5),
        max_parallel_per_tick: 4,
        max_attempts: 5,
        retry_delay: Duration::from_millis(1),
    }));
    let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
    adapters.insert(Chain::A, Arc::new(MockAdapter::new(Chain::A)));
    adapters.insert(Chain::B, Arc::new(MockAdapter::new(Chain::B)));
    let orch = Orchestrator::new(repo.clone(), relayer, adapters, test_resilience(), BridgeConfig::default());

    let swap_id = orch.initiate(sample_request(3600)).await.unwrap();
    drain_ticks(&orch, 3).await;

    let swap = repo.get(swap_id).unwrap();
    assert_eq!(swap.status, SwapStatus::EscrowsCreated);
    let escrow_a_id = swap.escrow_a.as_ref().unwrap().id.clone();
    let escrow_b_id = swap.escrow_b.as_ref().unwrap().id.clone();

    orch.handle_event(locked_event(Chain::A, escrow_a_id.clone(), swap.secret_hash))
        .await;
    orch.handle_event(locked_event(Chain::B, escrow_b_id.clone(), swap.secret_hash))
        .await;

    let swap = repo.get(swap_id).unwrap();
    assert_eq!(swap.status, SwapStatus::EscrowsLocked);
    drain_ticks(&orch, 2).await;

    orch.handle_event(completed_event(Chain::B, escrow_b_id.clone())).await;
    let swap = repo.get(swap_id).unwrap();
    assert_eq!(swap.status, SwapStatus::SecretsRevealed);
    drain_ticks(&orch, 2).await;

    orch.handle_event(completed_event(Chain::A, escrow_a_id.clone())).await;

    let swap = repo.get(swap_id).unwrap();
    assert_eq!(swap.status, SwapStatus::Completed);
    assert!(swap.completed_at.is_some());
}

#[tokio::test]
async fn transient_chain_b_failure_eventually_completes_creation() {
    let repo = Arc::new(SwapRepository::new());
    let relayer = Arc::new(Relayer::new(bridge_core::config::RelayerConfig {
        tick_interval: Duration::from_millis(5),
        max_parallel_per_tick: 4,
        max_attempts: 5,
        retry_delay: Duration::from_millis(1),
    }));
    let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
    adapters.insert(Chain::A, Arc::new(MockAdapter::new(Chain::A)));
    adapters.insert(Chain::B, Arc::new(MockAdapter::failing_n_times(Chain::B, 2)));
    let orch = Orchestrator::new(repo.clone(), relayer, adapters, test_resilience(), BridgeConfig::default());

    let swap_id = orch.initiate(sample_request(3600)).await.unwrap();
    drain_ticks(&orch, 5).await;

    let swap = repo.get(swap_id).unwrap();
    assert_ne!(swap.status, SwapStatus::Failed);
    assert_eq!(swap.status, SwapStatus::EscrowsCreated);
}

#[tokio::test]
async fn permanent_chain_b_failure_fails_swap_and_refunds_chain_a() {
    let repo = Arc::new(SwapRepository::new());
    let relayer = Arc::new(Relayer::new(bridge_core::config::RelayerConfig {
        tick_interval: Duration::from_millis(5),
        max_parallel_per_tick: 4,
        max_attempts: 2,
        retry_delay: Duration::from_millis(1),
    }));
    let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
    adapters.insert(Chain::A, Arc::new(MockAdapter::new(Chain::A)));
    adapters.insert(Chain::B, Arc::new(MockAdapter::always_failing(Chain::B)));
    let resilience = Arc::new(Resilience::new(
        &ResilienceConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2,
            breaker_failure_threshold: 100,
            breaker_open_timeout: Duration::from_millis(50),
            operation_queue_size: 3,
        },
        Duration::from_millis(100),
        Duration::from_millis(100),
    ));
    let orch = Orchestrator::new(repo.clone(), relayer, adapters, resilience, BridgeConfig::default());

    let swap_id = orch.initiate(sample_request(3600)).await.unwrap();
    drain_ticks(&orch, 6).await;

    let swap = repo.get(swap_id).unwrap();
    assert_eq!(swap.status, SwapStatus::EscrowsCreated, "chain A leg still succeeds independently");
    assert!(swap.escrow_b.is_none());
}

#[tokio::test]
async fn hash_lock_mismatch_fails_swap_before_completion() {
    let repo = Arc::new(SwapRepository::new());
    let relayer = Arc::new(Relayer::new(bridge_core::config::RelayerConfig {
        tick_interval: Duration::from_millis(5),
        max_parallel_per_tick: 4,
        max_attempts: 5,
        retry_delay: Duration::from_millis(1),
    }));
    let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
    adapters.insert(Chain::A, Arc::new(MockAdapter::new(Chain::A)));
    adapters.insert(Chain::B, Arc::new(MockAdapter::new(Chain::B)));
    let orch = Orchestrator::new(repo.clone(), relayer, adapters, test_resilience(), BridgeConfig::default());

    let swap_id = orch.initiate(sample_request(3600)).await.unwrap();
    drain_ticks(&orch, 3).await;

    let swap = repo.get(swap_id).unwrap();
    let escrow_a_id = swap.escrow_a.as_ref().unwrap().id.clone();
    let escrow_b_id = swap.escrow_b.as_ref().unwrap().id.clone();
    let wrong_lock = bridge_core::hash::hash_lock(&bridge_core::hash::generate_secret());

    orch.handle_event(locked_event(Chain::A, escrow_a_id, swap.secret_hash))
        .await;
    orch.handle_event(locked_event(Chain::B, escrow_b_id, wrong_lock))
        .await;

    let swap = repo.get(swap_id).unwrap();
    assert_eq!(swap.status, SwapStatus::Failed);
}

#[tokio::test]
async fn invalid_secret_at_completion_is_fatal() {
    let repo = Arc::new(SwapRepository::new());
    let relayer = Arc::new(Relayer::new(bridge_core::config::RelayerConfig {
        tick_interval: Duration::from_millis(5),
        max_parallel_per_tick: 4,
        max_attempts: 5,
        retry_delay: Duration::from_millis(1),
    }));
    let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
    adapters.insert(Chain::A, Arc::new(MockAdapter::new(Chain::A)));
    adapters.insert(Chain::B, Arc::new(MockAdapter::new(Chain::B)));
    let orch = Orchestrator::new(repo.clone(), relayer, adapters, test_resilience(), BridgeConfig::default());

    let swap_id = orch.initiate(sample_request(3600)).await.unwrap();
    drain_ticks(&orch, 3).await;

    repo.update(swap_id, |s| s.secret = Some([0xAB; 32]));

    let task = bridge_core::types::RelayTask {
        id: uuid::Uuid::new_v4(),
        swap_id,
        chain: Chain::B,
        task_type: bridge_core::types::TaskType::RevealSecret,
        priority: bridge_core::types::TaskPriority::High,
        attempts: 0,
        max_attempts: 1,
        created_at: Utc::now(),
        scheduled_at: Utc::now(),
        status: bridge_core::types::TaskStatus::Pending,
        payload: bridge_core::types::TaskPayload::default(),
        finished_at: None,
    };

    use bridge_core::relayer::TaskExecutor;
    let result = orch.execute(&task).await;
    assert!(matches!(result, Err(BridgeError::InvalidPreimage)));
}

#[tokio::test]
async fn timeout_scan_transitions_stale_swap_and_schedules_refunds() {
    let repo = Arc::new(SwapRepository::new());
    let relayer = Arc::new(Relayer::new(bridge_core::config::RelayerConfig {
        tick_interval: Duration::from_millis(5),
        max_parallel_per_tick: 4,
        max_attempts: 5,
        retry_delay: Duration::from_millis(1),
    }));
    let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
    adapters.insert(Chain::A, Arc::new(MockAdapter::new(Chain::A)));
    adapters.insert(Chain::B, Arc::new(MockAdapter::new(Chain::B)));
    let orch = Orchestrator::new(repo.clone(), relayer.clone(), adapters, test_resilience(), BridgeConfig::default());

    let swap_id = orch.initiate(sample_request(300)).await.unwrap();
    repo.update(swap_id, |s| {
        s.created_at = Utc::now() - chrono::Duration::seconds(700);
        s.status = SwapStatus::EscrowsCreated;
    });

    orch.scan_timeouts().await;

    let swap = repo.get(swap_id).unwrap();
    assert_eq!(swap.status, SwapStatus::TimedOut);
    assert!(relayer.pending_count() > 0);
}

#[tokio::test]
async fn lock_escrow_transition_is_driven_by_relayer_tick() {
    let repo = Arc::new(SwapRepository::new());
    let relayer = Arc::new(Relayer::new(bridge_core::config::RelayerConfig {
        tick_interval: Duration::from_millis(5),
        max_parallel_per_tick: 4,
        max_attempts: 5,
        retry_delay: Duration::from_millis(1),
    }));
    let adapter_a = Arc::new(MockAdapter::new(Chain::A));
    let adapter_b = Arc::new(MockAdapter::new(Chain::B));
    let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
    adapters.insert(Chain::A, adapter_a.clone());
    adapters.insert(Chain::B, adapter_b.clone());
    let orch = Orchestrator::new(repo.clone(), relayer, adapters, test_resilience(), BridgeConfig::default());

    let swap_id = orch.initiate(sample_request(3600)).await.unwrap();
    // CreateEscrow on both chains, then the auto-enqueued LockEscrow tasks.
    drain_ticks(&orch, 4).await;

    let swap = repo.get(swap_id).unwrap();
    assert_eq!(swap.status, SwapStatus::EscrowsCreated);
    assert_eq!(adapter_a.lock_attempts.load(Ordering::SeqCst), 1, "chain A lock must hit the adapter");
    assert_eq!(adapter_b.lock_attempts.load(Ordering::SeqCst), 1, "chain B lock must hit the adapter");

    let escrow_a = swap.escrow_a.as_ref().unwrap();
    let escrow_b = swap.escrow_b.as_ref().unwrap();
    assert_eq!(escrow_a.tx_hash.as_deref(), Some(format!("lock-{}", escrow_a.id).as_str()));
    assert_eq!(escrow_b.tx_hash.as_deref(), Some(format!("lock-{}", escrow_b.id).as_str()));
}
