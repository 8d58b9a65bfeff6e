//! Bounded-concurrency operation queue shared across both chains.
//!
//! A single `Semaphore` caps the number of in-flight chain operations at
//! `capacity` regardless of which chain they target, so one noisy chain
//! cannot starve the other of call slots.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

pub struct OperationQueue {
    semaphore: Arc<Semaphore>,
}

impl OperationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    /// Acquire a slot, blocking until one is free.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("operation queue semaphore never closes")
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn limits_concurrent_holders_to_capacity() {
        let queue = Arc::new(OperationQueue::new(1));
        let _first = queue.acquire().await;
        assert_eq!(queue.available_permits(), 0);

        let queue2 = queue.clone();
        let handle = tokio::spawn(async move {
            let _second = queue2.acquire().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
    }

    #[tokio::test]
    async fn releases_slot_when_permit_drops() {
        let queue = OperationQueue::new(2);
        {
            let _p = queue.acquire().await;
            assert_eq!(queue.available_permits(), 1);
        }
        assert_eq!(queue.available_permits(), 2);
    }
}
