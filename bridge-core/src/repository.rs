//! In-memory swap repository. Reads (status/health queries) and writes
//! (orchestrator state transitions) interleave across many independent
//! swap keys, so a sharded concurrent map is used instead of a single
//! `RwLock<HashMap>`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::types::{Swap, SwapStatus};

#[derive(Default)]
pub struct SwapRepository {
    swaps: DashMap<Uuid, Swap>,
}

impl SwapRepository {
    pub fn new() -> Self {
        Self {
            swaps: DashMap::new(),
        }
    }

    pub fn insert(&self, swap: Swap) {
        self.swaps.insert(swap.swap_id, swap);
    }

    pub fn get(&self, id: Uuid) -> Option<Swap> {
        self.swaps.get(&id).map(|r| r.clone())
    }

    /// Apply `f` to the swap under its per-key lock, returning `None` if it
    /// does not exist. `f` is responsible for respecting the status DAG.
    pub fn update<F, T>(&self, id: Uuid, f: F) -> Option<T>
    where
        F: FnOnce(&mut Swap) -> T,
    {
        let mut entry = self.swaps.get_mut(&id)?;
        Some(f(&mut entry))
    }

    pub fn list_all(&self) -> Vec<Swap> {
        self.swaps.iter().map(|r| r.clone()).collect()
    }

    pub fn list_by_status(&self, status: SwapStatus) -> Vec<Swap> {
        self.swaps
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.clone())
            .collect()
    }

    pub fn list_non_terminal(&self) -> Vec<Swap> {
        self.swaps
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.swaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.swaps.is_empty()
    }

    /// Drop terminal swaps whose `completed_at`/`last_updated_at` predates
    /// `before`, enforcing the configured retention TTL.
    pub fn cleanup_older_than(&self, before: DateTime<Utc>) -> usize {
        let stale: Vec<Uuid> = self
            .swaps
            .iter()
            .filter(|r| r.status.is_terminal() && r.last_updated_at < before)
            .map(|r| r.swap_id)
            .collect();
        for id in &stale {
            self.swaps.remove(id);
        }
        stale.len()
    }
}
