//! Bridge node binary-side wiring: configuration, chain adapter
//! construction, component startup, the HTTP surface and graceful
//! shutdown. The domain logic itself (resilience, monitor, relayer,
//! orchestrator) lives in `bridge_core`.

#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), warn(clippy::panic))]
#![cfg_attr(not(test), warn(clippy::unimplemented))]
#![cfg_attr(not(test), warn(clippy::todo))]
#![cfg_attr(not(test), warn(clippy::unreachable))]

pub mod api;
pub mod shutdown;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use bridge_core::chain::{evm::EvmAdapter, soroban::SorobanAdapter, ChainAdapter};
use bridge_core::config::BridgeConfig;
use bridge_core::monitor::ChainMonitor;
use bridge_core::orchestrator::Orchestrator;
use bridge_core::relayer::Relayer;
use bridge_core::repository::SwapRepository;
use bridge_core::resilience::Resilience;
use bridge_core::types::{Chain, NormalizedEvent};

/// All wired-up components for a running bridge process.
pub struct BridgeNode {
    pub orchestrator: Arc<Orchestrator>,
    pub relayer: Arc<Relayer>,
    pub repository: Arc<SwapRepository>,
    pub resilience: Arc<Resilience>,
    pub monitors: HashMap<Chain, Arc<ChainMonitor>>,
    pub config: BridgeConfig,
    event_receivers: StdMutex<Vec<(Chain, mpsc::UnboundedReceiver<NormalizedEvent>)>>,
}

impl BridgeNode {
    pub fn new(config: BridgeConfig) -> Self {
        let resilience = Arc::new(Resilience::new(
            &config.resilience,
            config.chain_a.call_timeout,
            config.chain_b.call_timeout,
        ));

        let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
        adapters.insert(Chain::A, Arc::new(EvmAdapter::new(&config.chain_a)));
        adapters.insert(Chain::B, Arc::new(SorobanAdapter::new(&config.chain_b)));

        let repository = Arc::new(SwapRepository::new());
        let relayer = Arc::new(Relayer::new(config.relayer.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            repository.clone(),
            relayer.clone(),
            adapters.clone(),
            resilience.clone(),
            config.clone(),
        ));

        let mut monitors = HashMap::new();
        let mut event_receivers = Vec::new();
        for chain in [Chain::A, Chain::B] {
            let adapter = adapters.get(&chain).expect("adapter registered for both chains").clone();
            let (monitor, events) = ChainMonitor::new(chain, adapter, resilience.clone(), config.monitor.clone());
            monitors.insert(chain, Arc::new(monitor));
            event_receivers.push((chain, events));
        }

        Self {
            orchestrator,
            relayer,
            repository,
            resilience,
            monitors,
            config,
            event_receivers: StdMutex::new(event_receivers),
        }
    }

    pub fn for_shutdown_test() -> Self {
        Self::new(BridgeConfig::default())
    }

    /// Spawn the per-chain monitor loops, the event-forwarding tasks, the
    /// relayer tick loop and the timeout scanner. Returns their join
    /// handles so the caller can await them during shutdown drain.
    pub fn spawn_background_tasks(self: &Arc<Self>, stop_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let receivers = std::mem::take(&mut *self.event_receivers.lock().expect("event receiver lock poisoned"));
        for (chain, mut events) in receivers {
            let monitor = self.monitors.get(&chain).expect("monitor registered for both chains").clone();

            let monitor_stop = stop_rx.clone();
            handles.push(tokio::spawn(async move {
                monitor.run(monitor_stop).await;
            }));

            let orchestrator = self.orchestrator.clone();
            let mut forward_stop = stop_rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(event) = events.recv() => {
                            orchestrator.handle_event(event).await;
                        }
                        _ = forward_stop.changed() => {
                            if *forward_stop.borrow() {
                                break;
                            }
                        }
                        else => break,
                    }
                }
            }));
        }

        let orchestrator = self.orchestrator.clone();
        let relayer = self.relayer.clone();
        let tick_interval = self.config.relayer.tick_interval;
        let mut relayer_stop = stop_rx.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        relayer.tick(orchestrator.as_ref()).await;
                    }
                    _ = relayer_stop.changed() => {
                        if *relayer_stop.borrow() {
                            info!("relayer tick loop stopping");
                            break;
                        }
                    }
                }
            }
        }));

        let orchestrator = self.orchestrator.clone();
        let mut scanner_stop = stop_rx.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        orchestrator.scan_timeouts().await;
                    }
                    _ = scanner_stop.changed() => {
                        if *scanner_stop.borrow() {
                            info!("timeout scanner stopping");
                            break;
                        }
                    }
                }
            }
        }));

        let repository = self.repository.clone();
        let retention_ttl = self.config.swap_retention_ttl;
        let mut cleaner_stop = stop_rx;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let before = chrono::Utc::now() - chrono::Duration::from_std(retention_ttl)
                            .unwrap_or_else(|_| chrono::Duration::seconds(0));
                        let removed = repository.cleanup_older_than(before);
                        if removed > 0 {
                            info!(removed, "swept terminal swaps past retention ttl");
                        }
                    }
                    _ = cleaner_stop.changed() => {
                        if *cleaner_stop.borrow() {
                            info!("swap retention cleaner stopping");
                            break;
                        }
                    }
                }
            }
        }));

        handles
    }
}
