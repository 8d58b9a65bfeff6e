//! Phased, timeout-bounded graceful shutdown: stop accepting new swaps,
//! let monitors and the relayer drain in-flight work up to a deadline,
//! then persist a status snapshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::BridgeNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownSignal {
    User,
    System,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownPhase {
    Preparing,
    Stopping,
    Flushing,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownStatus {
    pub phase: ShutdownPhase,
    pub signal: Option<ShutdownSignal>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_components: Vec<String>,
    pub pending_components: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl Default for ShutdownStatus {
    fn default() -> Self {
        Self {
            phase: ShutdownPhase::Preparing,
            signal: None,
            started_at: chrono::Utc::now(),
            completed_components: Vec::new(),
            pending_components: Vec::new(),
            success: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    pub max_shutdown_time: Duration,
    pub component_timeout: Duration,
    pub persist_state: bool,
    pub status_file_path: PathBuf,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            max_shutdown_time: Duration::from_secs(30),
            component_timeout: Duration::from_secs(5),
            persist_state: true,
            status_file_path: PathBuf::from("./data/shutdown_status.json"),
        }
    }
}

pub struct ShutdownCoordinator {
    node: Arc<BridgeNode>,
    config: ShutdownConfig,
    status: Arc<RwLock<ShutdownStatus>>,
    stop_tx: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    pub fn new(node: Arc<BridgeNode>, config: ShutdownConfig, stop_tx: watch::Sender<bool>) -> Self {
        Self {
            node,
            config,
            status: Arc::new(RwLock::new(ShutdownStatus::default())),
            stop_tx,
        }
    }

    pub async fn shutdown(&self, signal: ShutdownSignal) -> Result<(), String> {
        {
            let mut status = self.status.write().await;
            status.signal = Some(signal);
            status.phase = ShutdownPhase::Preparing;
        }

        match timeout(self.config.max_shutdown_time, self.shutdown_internal()).await {
            Ok(Ok(())) => {
                let mut status = self.status.write().await;
                status.phase = ShutdownPhase::Complete;
                status.success = true;
                drop(status);
                self.maybe_persist().await;
                Ok(())
            }
            Ok(Err(e)) => {
                let mut status = self.status.write().await;
                status.success = false;
                status.error = Some(e.clone());
                drop(status);
                self.maybe_persist().await;
                Err(e)
            }
            Err(_) => {
                warn!("shutdown exceeded {:?}, forcing stop", self.config.max_shutdown_time);
                let _ = self.stop_tx.send(true);
                let mut status = self.status.write().await;
                status.success = false;
                status.error = Some("shutdown timed out".to_string());
                drop(status);
                self.maybe_persist().await;
                Err("shutdown timed out".to_string())
            }
        }
    }

    async fn shutdown_internal(&self) -> Result<(), String> {
        self.status.write().await.phase = ShutdownPhase::Stopping;

        self.shutdown_component("monitors", async {
            let _ = self.stop_tx.send(true);
            Ok(())
        })
        .await?;

        self.status.write().await.phase = ShutdownPhase::Flushing;

        self.shutdown_component("relayer_drain", async {
            let deadline = tokio::time::Instant::now() + self.config.component_timeout;
            while self.node.relayer.pending_count() > 0 && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(())
        })
        .await?;

        self.shutdown_component("metrics_snapshot", async {
            info!(
                active_swaps = self.node.repository.list_non_terminal().len(),
                "final metrics snapshot before exit"
            );
            Ok(())
        })
        .await?;

        Ok(())
    }

    async fn shutdown_component<F>(&self, name: &str, fut: F) -> Result<(), String>
    where
        F: std::future::Future<Output = Result<(), String>>,
    {
        self.status.write().await.pending_components.push(name.to_string());
        match timeout(self.config.component_timeout, fut).await {
            Ok(Ok(())) => {
                let mut status = self.status.write().await;
                status.pending_components.retain(|c| c != name);
                status.completed_components.push(name.to_string());
                Ok(())
            }
            Ok(Err(e)) => {
                error!(component = name, error = %e, "component shutdown failed");
                Err(e)
            }
            Err(_) => {
                error!(component = name, "component shutdown timed out");
                Err(format!("{name} timed out"))
            }
        }
    }

    async fn maybe_persist(&self) {
        if !self.config.persist_state {
            return;
        }
        let status = self.status.read().await.clone();
        if let Some(parent) = self.config.status_file_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_string_pretty(&status) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(&self.config.status_file_path, json).await {
                    error!("failed to persist shutdown status: {e}");
                }
            }
            Err(e) => error!("failed to serialize shutdown status: {e}"),
        }
    }

    pub async fn status(&self) -> ShutdownStatus {
        self.status.read().await.clone()
    }
}

/// Spawn platform signal listeners and return a receiver fired once per
/// received signal. `tx` is retained by the spawned task(s); Ctrl+C is
/// handled separately by the caller via `tokio::signal::ctrl_c()`.
pub fn register_signal_handlers() -> tokio::sync::mpsc::Receiver<ShutdownSignal> {
    let (tx, rx) = tokio::sync::mpsc::channel(4);

    #[cfg(unix)]
    {
        let tx_term = tx.clone();
        tokio::spawn(async move {
            if let Ok(mut term) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                term.recv().await;
                let _ = tx_term.send(ShutdownSignal::System).await;
            }
        });
    }

    rx
}
