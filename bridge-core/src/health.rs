//! Health rollup: combines per-chain monitor health and circuit breaker
//! state into a single status the `/health` endpoint reports.

use serde::Serialize;

use crate::monitor::MonitorHealth;
use crate::types::Chain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainHealth {
    pub chain: Chain,
    pub monitor: MonitorHealthView,
    pub breaker_open: bool,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorHealthView {
    pub last_polled_block: u64,
    pub last_poll_succeeded: bool,
    pub consecutive_poll_failures: u32,
}

impl From<MonitorHealth> for MonitorHealthView {
    fn from(h: MonitorHealth) -> Self {
        Self {
            last_polled_block: h.last_polled_block,
            last_poll_succeeded: h.last_poll_succeeded,
            consecutive_poll_failures: h.consecutive_poll_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub chains: Vec<ChainHealth>,
    pub active_swaps: usize,
    pub relayer_pending_tasks: usize,
}

/// A chain is unhealthy if its breaker is open, degraded if its last poll
/// failed (but the breaker has not yet tripped), and healthy otherwise.
pub fn chain_status(monitor: &MonitorHealth, breaker_open: bool) -> HealthStatus {
    if breaker_open {
        HealthStatus::Unhealthy
    } else if !monitor.last_poll_succeeded || monitor.consecutive_poll_failures > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Overall status is the worst of the two chains': any chain unhealthy
/// makes the whole bridge unhealthy, any chain degraded makes it degraded.
pub fn overall_status(chains: &[ChainHealth]) -> HealthStatus {
    if chains.iter().any(|c| c.status == HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else if chains.iter().any(|c| c.status == HealthStatus::Degraded) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_monitor_health(succeeded: bool, failures: u32) -> MonitorHealth {
        MonitorHealth {
            chain: Chain::A,
            last_polled_block: 10,
            last_poll_succeeded: succeeded,
            consecutive_poll_failures: failures,
        }
    }

    #[test]
    fn healthy_when_polling_clean_and_breaker_closed() {
        let status = chain_status(&sample_monitor_health(true, 0), false);
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[test]
    fn degraded_on_poll_failure_without_open_breaker() {
        let status = chain_status(&sample_monitor_health(false, 1), false);
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn unhealthy_when_breaker_open_even_if_last_poll_succeeded() {
        let status = chain_status(&sample_monitor_health(true, 0), true);
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[test]
    fn overall_status_takes_the_worst_of_both_chains() {
        let chains = vec![
            ChainHealth {
                chain: Chain::A,
                monitor: sample_monitor_health(true, 0).into(),
                breaker_open: false,
                status: HealthStatus::Healthy,
            },
            ChainHealth {
                chain: Chain::B,
                monitor: sample_monitor_health(false, 2).into(),
                breaker_open: false,
                status: HealthStatus::Degraded,
            },
        ];
        assert_eq!(overall_status(&chains), HealthStatus::Degraded);
    }
}
