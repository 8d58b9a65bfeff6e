//! Per-chain polling monitor: pulls new blocks from a `ChainAdapter`,
//! normalizes events, drops duplicates already seen, and forwards fresh
//! events to listeners over a broadcast channel.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{watch, RwLock};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::chain::ChainAdapter;
use crate::config::MonitorConfig;
use crate::metrics;
use crate::resilience::Resilience;
use crate::types::{Chain, NormalizedEvent};

/// Health snapshot for a single chain monitor, surfaced through the
/// aggregate health endpoint.
#[derive(Debug, Clone)]
pub struct MonitorHealth {
    pub chain: Chain,
    pub last_polled_block: u64,
    pub last_poll_succeeded: bool,
    pub consecutive_poll_failures: u32,
}

struct State {
    last_block: u64,
    last_poll_succeeded: bool,
    consecutive_failures: u32,
}

/// Polls one chain on a fixed interval and republishes normalized events
/// that have not been seen before, identified by `(tx_hash, kind)`.
pub struct ChainMonitor {
    chain: Chain,
    adapter: Arc<dyn ChainAdapter>,
    resilience: Arc<Resilience>,
    config: MonitorConfig,
    seen: RwLock<LruCache<(String, &'static str), ()>>,
    state: RwLock<State>,
    event_tx: tokio::sync::mpsc::UnboundedSender<NormalizedEvent>,
}

impl ChainMonitor {
    pub fn new(
        chain: Chain,
        adapter: Arc<dyn ChainAdapter>,
        resilience: Arc<Resilience>,
        config: MonitorConfig,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<NormalizedEvent>) {
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        let monitor = Self {
            chain,
            adapter,
            resilience,
            config,
            seen: RwLock::new(LruCache::new(NonZeroUsize::new(4096).unwrap())),
            state: RwLock::new(State {
                last_block: 0,
                last_poll_succeeded: true,
                consecutive_failures: 0,
            }),
            event_tx,
        };
        (monitor, event_rx)
    }

    /// Run the poll loop until `stop` fires. Intended to be spawned as its
    /// own task per chain.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.polling_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(chain = %self.chain, error = %e, "poll cycle failed");
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        info!(chain = %self.chain, "monitor stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn poll_once(&self) -> Result<(), crate::error::BridgeError> {
        let from_block = self.state.read().await.last_block;
        let adapter = self.adapter.clone();
        let chain = self.chain;
        let result = self
            .resilience
            .call(chain, "poll_events", || {
                let adapter = adapter.clone();
                async move { adapter.poll_events(from_block).await }
            })
            .await;

        let mut state = self.state.write().await;
        match result {
            Ok(events) => {
                state.last_poll_succeeded = true;
                state.consecutive_failures = 0;
                drop(state);
                self.publish_fresh(events).await;
                metrics::MONITOR_LAST_BLOCK
                    .with_label_values(&[&self.chain.to_string()])
                    .set(self.state.read().await.last_block as i64);
                Ok(())
            }
            Err(e) => {
                state.last_poll_succeeded = false;
                state.consecutive_failures += 1;
                Err(e)
            }
        }
    }

    async fn publish_fresh(&self, events: Vec<NormalizedEvent>) {
        let mut seen = self.seen.write().await;
        let mut state = self.state.write().await;
        for event in events {
            let key = (event.tx_hash.clone(), event.kind.as_dedup_tag());
            if seen.put(key, ()).is_some() {
                debug!(chain = %self.chain, tx_hash = %event.tx_hash, "duplicate event dropped");
                continue;
            }
            state.last_block = state.last_block.max(event.block_height);
            if self.event_tx.send(event).is_err() {
                error!(chain = %self.chain, "event receiver dropped, monitor has no listener");
            }
        }
    }

    pub async fn health(&self) -> MonitorHealth {
        let state = self.state.read().await;
        MonitorHealth {
            chain: self.chain,
            last_polled_block: state.last_block,
            last_poll_succeeded: state.last_poll_succeeded,
            consecutive_poll_failures: state.consecutive_failures,
        }
    }
}

impl crate::types::EventKind {
    fn as_dedup_tag(&self) -> &'static str {
        match self {
            Self::EscrowCreated => "escrow_created",
            Self::EscrowLocked => "escrow_locked",
            Self::EscrowCompleted => "escrow_completed",
            Self::EscrowRefunded => "escrow_refunded",
            Self::BridgeInitiated => "bridge_initiated",
        }
    }
}
