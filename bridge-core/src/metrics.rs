//! Prometheus collectors for swap lifecycle, relayer throughput and chain
//! health. Registered into their own `Registry` kept separate from the
//! structured log stream.

use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

lazy_static! {
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref SWAPS_INITIATED: IntCounter = IntCounter::new(
        "bridge_swaps_initiated_total",
        "Total number of swaps initiated"
    )
    .unwrap();

    pub static ref SWAPS_BY_STATUS: IntCounterVec = IntCounterVec::new(
        Opts::new("bridge_swaps_by_status_total", "Swaps transitioned into a given status"),
        &["status"]
    )
    .unwrap();

    pub static ref SWAPS_COMPLETED: IntCounter = IntCounter::new(
        "bridge_swaps_completed_total",
        "Total number of swaps completed successfully"
    )
    .unwrap();

    pub static ref SWAPS_FAILED: IntCounterVec = IntCounterVec::new(
        Opts::new("bridge_swaps_failed_total", "Swaps that ended in failed state"),
        &["reason"]
    )
    .unwrap();

    pub static ref SWAPS_REFUNDED: IntCounterVec = IntCounterVec::new(
        Opts::new("bridge_swaps_refunded_total", "Swaps that ended in refunded state"),
        &["chain"]
    )
    .unwrap();

    pub static ref ACTIVE_SWAPS: IntGauge = IntGauge::new(
        "bridge_active_swaps",
        "Swaps currently in a non-terminal state"
    )
    .unwrap();

    pub static ref RELAYER_PENDING_TASKS: IntGauge = IntGauge::new(
        "bridge_relayer_pending_tasks",
        "Tasks currently pending dispatch in the relayer queue"
    )
    .unwrap();

    pub static ref RELAYER_TASK_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        Opts::new("bridge_relayer_task_attempts_total", "Relay task dispatch attempts"),
        &["task_type", "outcome"]
    )
    .unwrap();

    pub static ref CHAIN_CALL_LATENCY: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new("bridge_chain_call_latency_seconds", "Chain adapter call latency"),
        &["chain", "operation"]
    )
    .unwrap();

    pub static ref CHAIN_CALL_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("bridge_chain_call_errors_total", "Chain adapter call errors"),
        &["chain", "operation"]
    )
    .unwrap();

    pub static ref CIRCUIT_BREAKER_OPEN: IntGaugeVec = IntGaugeVec::new(
        Opts::new("bridge_circuit_breaker_open", "1 if the breaker for a chain is open"),
        &["chain"]
    )
    .unwrap();

    pub static ref MONITOR_LAST_BLOCK: IntGaugeVec = IntGaugeVec::new(
        Opts::new("bridge_monitor_last_block", "Last block height observed by a chain monitor"),
        &["chain"]
    )
    .unwrap();

    pub static ref SWAP_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("bridge_swap_duration_seconds", "Time from initiation to completion")
    )
    .unwrap();
}

/// Register every collector into [`METRICS_REGISTRY`]. Called once at
/// startup; a second call would fail on duplicate registration, so callers
/// should guard with e.g. `std::sync::Once` if invoked more than once.
pub fn register_all() -> Result<(), prometheus::Error> {
    METRICS_REGISTRY.register(Box::new(SWAPS_INITIATED.clone()))?;
    METRICS_REGISTRY.register(Box::new(SWAPS_BY_STATUS.clone()))?;
    METRICS_REGISTRY.register(Box::new(SWAPS_COMPLETED.clone()))?;
    METRICS_REGISTRY.register(Box::new(SWAPS_FAILED.clone()))?;
    METRICS_REGISTRY.register(Box::new(SWAPS_REFUNDED.clone()))?;
    METRICS_REGISTRY.register(Box::new(ACTIVE_SWAPS.clone()))?;
    METRICS_REGISTRY.register(Box::new(RELAYER_PENDING_TASKS.clone()))?;
    METRICS_REGISTRY.register(Box::new(RELAYER_TASK_ATTEMPTS.clone()))?;
    METRICS_REGISTRY.register(Box::new(CHAIN_CALL_LATENCY.clone()))?;
    METRICS_REGISTRY.register(Box::new(CHAIN_CALL_ERRORS.clone()))?;
    METRICS_REGISTRY.register(Box::new(CIRCUIT_BREAKER_OPEN.clone()))?;
    METRICS_REGISTRY.register(Box::new(MONITOR_LAST_BLOCK.clone()))?;
    METRICS_REGISTRY.register(Box::new(SWAP_DURATION.clone()))?;
    Ok(())
}

/// Render the registry in Prometheus text exposition format.
pub fn gather_as_text() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}
