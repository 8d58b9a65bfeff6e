// Bridge Node Binary
// Main entry point for the cross-chain atomic swap bridge orchestrator and relayer.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(clippy::unimplemented)]
#![warn(clippy::todo)]
#![warn(clippy::unreachable)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bridge_core::config::BridgeConfig;
use bridge_node::shutdown::{register_signal_handlers, ShutdownConfig, ShutdownCoordinator, ShutdownSignal};
use bridge_node::{api, BridgeNode};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Cross-chain atomic swap bridge node", long_about = None)]
struct Args {
    /// Directory containing config.toml (and optional environment overlays)
    #[arg(short, long, default_value = ".")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let log_level = if args.debug { "debug" } else { "info" };
        EnvFilter::new(log_level)
    });
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = BridgeConfig::load(&PathBuf::from(&args.config)).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    info!(environment = ?config.environment, "starting bridge node");

    let bind_address = config.server.bind_address.clone();
    let port = config.server.port;

    let node = Arc::new(BridgeNode::new(config));

    let (stop_tx, stop_rx) = watch::channel(false);
    let background_tasks = node.spawn_background_tasks(stop_rx);

    let listener = tokio::net::TcpListener::bind((bind_address.as_str(), port)).await?;
    info!("API server listening on {bind_address}:{port}");
    let router = api::router(node.clone());
    let mut server_stop_rx = stop_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = server_stop_rx.changed().await;
        };
        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal).await {
            error!("API server error: {e}");
        }
    });

    let shutdown_config = ShutdownConfig {
        max_shutdown_time: Duration::from_secs(30),
        component_timeout: Duration::from_secs(5),
        persist_state: true,
        status_file_path: PathBuf::from("./data/shutdown_status.json"),
    };
    let shutdown_coordinator = ShutdownCoordinator::new(node.clone(), shutdown_config, stop_tx);

    let mut shutdown_rx = register_signal_handlers();

    info!("bridge node started, press Ctrl+C to stop");

    let signal = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received (Ctrl+C)");
            ShutdownSignal::User
        }
        received = shutdown_rx.recv() => {
            let sig = received.unwrap_or(ShutdownSignal::System);
            info!(?sig, "shutdown signal received");
            sig
        }
    };

    info!("initiating graceful shutdown...");
    match shutdown_coordinator.shutdown(signal).await {
        Ok(()) => info!("bridge node stopped successfully"),
        Err(e) => {
            error!("shutdown failed: {e}");
            std::process::exit(1);
        }
    }

    server_handle.abort();
    for task in background_tasks {
        task.abort();
    }

    Ok(())
}
