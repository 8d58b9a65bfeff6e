//! Priority task queue that drives on-chain follow-up actions (escrow
//! creation, locking, secret reveal, completion, refund) to completion with
//! per-task retry/backoff, independent of the resilience pipeline used for
//! individual chain calls.

use std::cmp::Reverse;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use priority_queue::PriorityQueue;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayerConfig;
use crate::error::BridgeError;
use crate::metrics;
use crate::types::{RelayTask, TaskStatus, TaskType};

fn task_type_label(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::CreateEscrow => "create_escrow",
        TaskType::LockEscrow => "lock_escrow",
        TaskType::RevealSecret => "reveal_secret",
        TaskType::CompleteEscrow => "complete_escrow",
        TaskType::RefundEscrow => "refund_escrow",
    }
}

/// Aggregate relayer throughput, surfaced through the node's HTTP metrics
/// endpoint.
#[derive(Debug, Clone, Default)]
pub struct RelayerStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub success_rate: f64,
    pub avg_execution_ms: f64,
    pub last_processed_at: Option<DateTime<Utc>>,
}

/// Executes the on-chain side effect of a single task. Implemented by the
/// orchestrator, which knows which `ChainAdapter` and `Resilience` pipeline
/// a task's chain maps to.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &RelayTask) -> Result<(), BridgeError>;
}

/// `(priority, Reverse(enqueued_at))` so higher priority always wins, and
/// within a priority tier, earlier-enqueued tasks are served first.
type QueueKey = (crate::types::TaskPriority, Reverse<i64>);

pub struct Relayer {
    config: RelayerConfig,
    tasks: DashMap<Uuid, RelayTask>,
    queue: Mutex<PriorityQueue<Uuid, QueueKey>>,
    cancelled_swaps: DashMap<Uuid, ()>,
}

impl Relayer {
    pub fn new(config: RelayerConfig) -> Self {
        Self {
            config,
            tasks: DashMap::new(),
            queue: Mutex::new(PriorityQueue::new()),
            cancelled_swaps: DashMap::new(),
        }
    }

    pub async fn enqueue(&self, task: RelayTask) {
        let key = (task.priority, Reverse(task.created_at.timestamp_nanos_opt().unwrap_or(0)));
        let id = task.id;
        self.tasks.insert(id, task);
        self.queue.lock().await.push(id, key);
        self.update_pending_gauge();
    }

    fn update_pending_gauge(&self) {
        metrics::RELAYER_PENDING_TASKS.set(self.pending_count() as i64);
    }

    /// Snapshot of task counts, success rate and execution latency across
    /// every task this relayer has ever tracked.
    pub fn stats(&self) -> RelayerStats {
        let mut stats = RelayerStats::default();
        let mut total_execution_ms = 0i64;
        let mut executed = 0u64;
        for entry in self.tasks.iter() {
            stats.total += 1;
            match entry.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
            if let Some(finished_at) = entry.finished_at {
                if stats.last_processed_at.map(|t| finished_at > t).unwrap_or(true) {
                    stats.last_processed_at = Some(finished_at);
                }
                if entry.status == TaskStatus::Completed {
                    total_execution_ms += (finished_at - entry.created_at).num_milliseconds();
                    executed += 1;
                }
            }
        }
        let terminal = stats.completed + stats.failed;
        stats.success_rate = if terminal > 0 {
            stats.completed as f64 / terminal as f64
        } else {
            0.0
        };
        stats.avg_execution_ms = if executed > 0 {
            total_execution_ms as f64 / executed as f64
        } else {
            0.0
        };
        stats
    }

    /// Cancel every pending task belonging to `swap_id`. Already-dispatched
    /// tasks finish their in-flight attempt but are not rescheduled.
    pub fn cancel_swap(&self, swap_id: Uuid) {
        self.cancelled_swaps.insert(swap_id, ());
        for mut entry in self.tasks.iter_mut() {
            if entry.swap_id == swap_id && entry.status == TaskStatus::Pending {
                entry.status = TaskStatus::Failed;
            }
        }
    }

    pub fn task(&self, id: Uuid) -> Option<RelayTask> {
        self.tasks.get(&id).map(|r| r.clone())
    }

    pub fn tasks_for_swap(&self, swap_id: Uuid) -> Vec<RelayTask> {
        self.tasks
            .iter()
            .filter(|t| t.swap_id == swap_id)
            .map(|t| t.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }

    /// One dispatch cycle: pop up to `max_parallel_per_tick` ready tasks and
    /// run them concurrently through `executor`. Failures are rescheduled
    /// with a fixed retry delay until `max_attempts` is reached.
    pub async fn tick(&self, executor: &dyn TaskExecutor) {
        let now = Utc::now();
        let ready_ids = self.pop_ready(now).await;
        if ready_ids.is_empty() {
            return;
        }

        let results = futures_join_all(ready_ids.iter().map(|id| async move {
            let task = match self.tasks.get(id).map(|r| r.clone()) {
                Some(t) => t,
                None => return,
            };
            if self.cancelled_swaps.contains_key(&task.swap_id) {
                return;
            }
            self.mark_processing(*id);
            match executor.execute(&task).await {
                Ok(()) => self.mark_completed(*id),
                Err(err) => self.mark_failed_and_maybe_reschedule(*id, err).await,
            }
        }))
        .await;
        let _ = results;
        self.update_pending_gauge();
    }

    async fn pop_ready(&self, now: chrono::DateTime<Utc>) -> Vec<Uuid> {
        let mut queue = self.queue.lock().await;
        let mut ready = Vec::new();
        let mut deferred = Vec::new();

        while ready.len() < self.config.max_parallel_per_tick {
            let Some((id, key)) = queue.pop() else { break };
            let is_ready = self
                .tasks
                .get(&id)
                .map(|t| t.is_ready(now) && !t.exhausted())
                .unwrap_or(false);
            if is_ready {
                ready.push(id);
            } else if self.tasks.get(&id).map(|t| t.status == TaskStatus::Pending).unwrap_or(false) {
                deferred.push((id, key));
            }
        }
        for (id, key) in deferred {
            queue.push(id, key);
        }
        ready
    }

    fn mark_processing(&self, id: Uuid) {
        if let Some(mut task) = self.tasks.get_mut(&id) {
            task.status = TaskStatus::Processing;
            task.attempts += 1;
            metrics::RELAYER_TASK_ATTEMPTS
                .with_label_values(&[task_type_label(task.task_type), "attempt"])
                .inc();
        }
    }

    fn mark_completed(&self, id: Uuid) {
        if let Some(mut task) = self.tasks.get_mut(&id) {
            task.status = TaskStatus::Completed;
            task.finished_at = Some(Utc::now());
            metrics::RELAYER_TASK_ATTEMPTS
                .with_label_values(&[task_type_label(task.task_type), "success"])
                .inc();
            debug!(task_id = %id, "task completed");
        }
    }

    async fn mark_failed_and_maybe_reschedule(&self, id: Uuid, err: BridgeError) {
        let should_retry = {
            let task = match self.tasks.get(&id) {
                Some(t) => t,
                None => return,
            };
            err.is_retryable() && !task.exhausted()
        };

        if should_retry {
            let mut task = self.tasks.get_mut(&id).unwrap();
            task.status = TaskStatus::Pending;
            task.scheduled_at = Utc::now() + chrono::Duration::from_std(self.config.retry_delay).unwrap_or_default();
            warn!(task_id = %id, attempts = task.attempts, error = %err, "task failed, rescheduling");
            metrics::RELAYER_TASK_ATTEMPTS
                .with_label_values(&[task_type_label(task.task_type), "retry"])
                .inc();
            let key = (
                task.priority,
                Reverse(task.scheduled_at.timestamp_nanos_opt().unwrap_or(0)),
            );
            drop(task);
            self.queue.lock().await.push(id, key);
        } else {
            if let Some(mut task) = self.tasks.get_mut(&id) {
                task.status = TaskStatus::Failed;
                task.finished_at = Some(Utc::now());
                metrics::RELAYER_TASK_ATTEMPTS
                    .with_label_values(&[task_type_label(task.task_type), "failed"])
                    .inc();
            }
            info!(task_id = %id, error = %err, "task permanently failed");
        }
    }
}

/// Minimal inline replacement for `futures::future::join_all` so the crate
/// does not need to pull in the full `futures` dependency for one call site.
async fn futures_join_all<I, Fut>(iter: I) -> Vec<Fut::Output>
where
    I: IntoIterator<Item = Fut>,
    Fut: std::future::Future,
{
    let handles: Vec<_> = iter.into_iter().collect();
    let mut out = Vec::with_capacity(handles.len());
    for fut in handles {
        out.push(fut.await);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskPriority, TaskType};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn test_config() -> RelayerConfig {
        RelayerConfig {
            tick_interval: Duration::from_millis(10),
            max_parallel_per_tick: 2,
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn sample_task(priority: TaskPriority) -> RelayTask {
        RelayTask {
            id: Uuid::new_v4(),
            swap_id: Uuid::new_v4(),
            chain: crate::types::Chain::A,
            task_type: TaskType::CreateEscrow,
            priority,
            attempts: 0,
            max_attempts: 3,
            created_at: Utc::now(),
            scheduled_at: Utc::now(),
            status: TaskStatus::Pending,
            payload: crate::types::TaskPayload::default(),
            finished_at: None,
        }
    }

    struct AlwaysOk;
    #[async_trait]
    impl TaskExecutor for AlwaysOk {
        async fn execute(&self, _task: &RelayTask) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    struct CountingFailThenOk {
        calls: AtomicU32,
    }
    #[async_trait]
    impl TaskExecutor for CountingFailThenOk {
        async fn execute(&self, _task: &RelayTask) -> Result<(), BridgeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(BridgeError::ChainUnavailable {
                    chain: crate::types::Chain::A,
                    reason: "down".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn high_priority_task_completes() {
        let relayer = Relayer::new(test_config());
        let task = sample_task(TaskPriority::High);
        let id = task.id;
        relayer.enqueue(task).await;
        relayer.tick(&AlwaysOk).await;
        assert_eq!(relayer.task(id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn failed_retryable_task_is_rescheduled_then_succeeds() {
        let relayer = Relayer::new(test_config());
        let task = sample_task(TaskPriority::Medium);
        let id = task.id;
        relayer.enqueue(task).await;

        let executor = CountingFailThenOk {
            calls: AtomicU32::new(0),
        };
        relayer.tick(&executor).await;
        assert_eq!(relayer.task(id).unwrap().status, TaskStatus::Pending);

        tokio::time::sleep(Duration::from_millis(5)).await;
        relayer.tick(&executor).await;
        assert_eq!(relayer.task(id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn cancelling_a_swap_fails_its_pending_tasks() {
        let relayer = Relayer::new(test_config());
        let task = sample_task(TaskPriority::Low);
        let id = task.id;
        let swap_id = task.swap_id;
        relayer.enqueue(task).await;
        relayer.cancel_swap(swap_id);
        assert_eq!(relayer.task(id).unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn respects_max_parallel_per_tick() {
        let relayer = Relayer::new(test_config());
        for _ in 0..5 {
            relayer.enqueue(sample_task(TaskPriority::High)).await;
        }
        relayer.tick(&AlwaysOk).await;
        let completed = relayer
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        assert_eq!(completed, 2);
    }
}
