//! Core library for the cross-chain atomic swap bridge: data model,
//! resilience primitives, chain adapters, monitors, relayer, orchestrator,
//! repository, metrics and health rollup. The binary crate wires these
//! together with configuration, an HTTP surface and process lifecycle.

pub mod chain;
pub mod config;
pub mod error;
pub mod hash;
pub mod health;
pub mod metrics;
pub mod monitor;
pub mod orchestrator;
pub mod relayer;
pub mod repository;
pub mod resilience;
pub mod types;

pub use error::{BridgeError, BridgeResult};
