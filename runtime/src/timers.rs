//! Per-entity timer table.
//!
//! Each scheduled job runs on its own tokio task and is keyed by a string unique
//! within the entity. Rescheduling a key replaces the pending job. A generation
//! number distinguishes a job from the one that replaced it, so a late delivery
//! of a replaced job can be recognised and dropped.
//!
//! Dropping the registry cancels everything, so no timer outlives the entity
//! instance that scheduled it.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Handle to one scheduled job.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    key: String,
    generation: u64,
    abort: AbortHandle,
}

impl TimerHandle {
    /// Cancel the job. Has no effect once it ran.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Timer key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Generation of this job.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the job finished or was cancelled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Table of scheduled one-shot jobs.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: HashMap<String, TimerHandle>,
    next_generation: u64,
}

impl TimerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the job built by `job` after `after`.
    ///
    /// `job` receives the generation assigned to this schedule. A pending job
    /// under the same key is cancelled.
    ///
    /// Must be called within a tokio runtime.
    pub fn schedule<F, J>(&mut self, key: impl Into<String>, after: Duration, job: J) -> TimerHandle
    where
        J: FnOnce(u64) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        self.next_generation += 1;
        let generation = self.next_generation;
        let work = job(generation);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            work.await;
        });

        let handle = TimerHandle {
            key: key.clone(),
            generation,
            abort: task.abort_handle(),
        };
        if let Some(previous) = self.timers.insert(key, handle.clone()) {
            previous.cancel();
        }
        handle
    }

    /// Cancel the job under `key`. Returns whether one was pending.
    pub fn cancel(&mut self, key: &str) -> bool {
        self.timers.remove(key).is_some_and(|handle| {
            handle.cancel();
            true
        })
    }

    /// Cancel every job. Returns how many were pending.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        for (_, handle) in self.timers.drain() {
            handle.cancel();
        }
        count
    }

    /// Mark the job `(key, generation)` as delivered.
    ///
    /// Returns `false` for a job that was cancelled or replaced meanwhile.
    pub fn complete(&mut self, key: &str, generation: u64) -> bool {
        match self.timers.get(key) {
            Some(handle) if handle.generation == generation => {
                self.timers.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Whether a job is pending under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.timers.contains_key(key)
    }

    /// Number of pending jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether no job is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tokio::sync::mpsc;

    fn sender_job(tx: mpsc::UnboundedSender<(&'static str, u64)>, label: &'static str) -> impl FnOnce(u64) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> {
        move |generation| {
            Box::pin(async move {
                let _ = tx.send((label, generation));
            })
        }
    }

    #[tokio::test]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new();
        let handle = timers.schedule("t", Duration::from_millis(10), sender_job(tx, "t"));

        let (label, generation) = rx.recv().await.unwrap();
        assert_eq!(label, "t");
        assert_eq!(generation, handle.generation());
        assert!(timers.complete("t", generation));
        assert!(timers.is_empty());
    }

    #[tokio::test]
    async fn rescheduling_replaces_previous_job() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new();
        let first = timers.schedule("t", Duration::from_millis(20), sender_job(tx.clone(), "first"));
        let second = timers.schedule("t", Duration::from_millis(10), sender_job(tx, "second"));

        assert_eq!(timers.len(), 1);
        let (label, generation) = rx.recv().await.unwrap();
        assert_eq!(label, "second");
        assert!(!timers.complete("t", first.generation()));
        assert!(timers.complete("t", second.generation()));
        assert_eq!(generation, second.generation());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_jobs_never_run() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new();
        timers.schedule("a", Duration::from_millis(10), sender_job(tx.clone(), "a"));
        timers.schedule("b", Duration::from_millis(10), sender_job(tx.clone(), "b"));
        timers.schedule("c", Duration::from_millis(10), sender_job(tx, "c"));

        assert!(timers.cancel("a"));
        assert!(!timers.cancel("a"));
        assert_eq!(timers.cancel_all(), 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_the_registry_cancels_jobs() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new();
        let handle = timers.schedule("t", Duration::from_millis(10), sender_job(tx, "t"));
        drop(timers);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
        assert!(handle.is_finished());
    }
}
