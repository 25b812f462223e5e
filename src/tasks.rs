//! Supervised registry for background work.
//!
//! Archive builds are tracked by job id so shutdown and crash recovery can
//! tell which Pending jobs still have a live task. Periodic workers observe a
//! `watch` shutdown signal between cycles.
//!
//! `parking_lot::Mutex` guards the handle maps; it is never held across
//! `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::types::ArchiveJobId;

/// Tracks archive build tasks by job id and periodic workers.
#[derive(Debug)]
pub struct TaskRegistry {
    shutdown_tx: watch::Sender<bool>,
    jobs: Arc<Mutex<HashMap<ArchiveJobId, JoinHandle<()>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Whether [`TaskRegistry::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Spawns a job-scoped task. Returns `false` after shutdown started.
    pub fn spawn_job<F>(&self, id: ArchiveJobId, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutting_down() {
            return false;
        }
        let jobs = Arc::clone(&self.jobs);
        let key = id.clone();
        // Held across spawn so the completion hook cannot remove the entry
        // before it is inserted.
        let mut guard = self.jobs.lock();
        let handle = tokio::spawn(async move {
            fut.await;
            jobs.lock().remove(&key);
        });
        guard.insert(id, handle);
        true
    }

    /// Whether a task for `id` is still alive.
    pub fn is_running(&self, id: &ArchiveJobId) -> bool {
        self.jobs
            .lock()
            .get(id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Ids of jobs whose tasks are still alive.
    pub fn running_jobs(&self) -> Vec<ArchiveJobId> {
        self.jobs
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Runs `f` on every tick until shutdown or until `f` returns `false`.
    ///
    /// Shutdown is observed between ticks, so a running cycle completes.
    /// Returns `false`, without spawning, after shutdown started.
    pub fn spawn_interval<F, Fut>(&self, interval: Duration, mut f: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        // Subscribe first: a signal sent after this point wakes `changed()`.
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return false;
        }
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if !f().await {
                            break;
                        }
                    }
                }
            }
        });
        self.workers.lock().push(handle);
        true
    }

    /// Signals shutdown, aborts job tasks and waits for periodic workers.
    ///
    /// Returns the ids of jobs whose tasks were still running.
    pub async fn shutdown(&self) -> Vec<ArchiveJobId> {
        let _ = self.shutdown_tx.send(true);
        let aborted: Vec<ArchiveJobId> = {
            let mut jobs = self.jobs.lock();
            jobs.drain()
                .filter(|(_, handle)| !handle.is_finished())
                .map(|(id, handle)| {
                    handle.abort();
                    id
                })
                .collect()
        };
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(error) = worker.await
                && error.is_panic()
            {
                tracing::error!(%error, "background worker panicked");
            }
        }
        if !aborted.is_empty() {
            tracing::info!(count = aborted.len(), "aborted running jobs");
        }
        aborted
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for (_, handle) in self.jobs.lock().drain() {
            handle.abort();
        }
        for handle in self.workers.lock().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn finished_job_leaves_registry() {
        let registry = TaskRegistry::new();
        let id = ArchiveJobId::generate();
        let (tx, rx) = oneshot::channel();

        assert!(registry.spawn_job(id.clone(), async move {
            let _ = tx.send(());
        }));
        rx.await.unwrap();
        for _ in 0..50 {
            if !registry.is_running(&id) && registry.running_jobs().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!registry.is_running(&id));
    }

    #[tokio::test]
    async fn shutdown_aborts_running_jobs_and_refuses_new_ones() {
        let registry = TaskRegistry::new();
        let id = ArchiveJobId::generate();
        registry.spawn_job(id.clone(), std::future::pending());

        assert!(registry.is_running(&id));
        assert_eq!(registry.shutdown().await, vec![id]);
        assert!(!registry.spawn_job(ArchiveJobId::generate(), async {}));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_worker_stops_on_shutdown() {
        let registry = TaskRegistry::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        assert!(registry.spawn_interval(Duration::from_secs(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }
        }));

        tokio::time::sleep(Duration::from_secs(25)).await;
        registry.shutdown().await;
        let seen = ticks.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_worker_is_refused_after_shutdown() {
        let registry = TaskRegistry::new();
        registry.shutdown().await;

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let spawned = registry.spawn_interval(Duration::from_secs(1), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }
        });

        assert!(!spawned);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        assert!(registry.workers.lock().is_empty());
    }
}
