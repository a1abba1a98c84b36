//! Deduplicating work queue with per-key exponential backoff.
//!
//! A key is handed to at most one worker at a time. Adding a key that is
//! already queued is a no-op; adding a key that is in flight marks it dirty
//! so it runs once more after the current run finishes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use kubemirror_core::{BackoffConfig, ObjectKey};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    shutdown: bool,
}

impl QueueState {
    fn enqueue(&mut self, key: ObjectKey) -> bool {
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        if self.queued.insert(key.clone()) {
            self.ready.push_back(key);
            return true;
        }
        false
    }
}

/// Delay before the `failures`-th retry: `base * 2^(failures - 1)`, capped.
pub fn backoff_delay(config: &BackoffConfig, failures: u32) -> Duration {
    let factor = 1u32
        .checked_shl(failures.saturating_sub(1))
        .unwrap_or(u32::MAX);
    config.base().saturating_mul(factor).min(config.max())
}

/// Work queue shared by the event pumps and the workers.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: BackoffConfig,
}

impl WorkQueue {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
        }
    }

    pub fn new_arc(backoff: BackoffConfig) -> Arc<Self> {
        Arc::new(Self::new(backoff))
    }

    /// Enqueue a key for processing.
    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutdown {
            return;
        }
        if state.enqueue(key) {
            self.notify.notify_one();
        }
    }

    /// Enqueue a key once `delay` has passed.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.ready.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    if !state.ready.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key's run as finished. A key added during the run is queued
    /// again.
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(key);
        if state.dirty.remove(key) && !state.shutdown && state.enqueue(key.clone()) {
            self.notify.notify_one();
        }
    }

    /// Schedule a retry with exponential backoff; returns the delay used.
    pub async fn retry(self: &Arc<Self>, key: &ObjectKey) -> Duration {
        let failures = {
            let mut state = self.state.lock().await;
            let count = state.failures.entry(key.clone()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        let delay = backoff_delay(&self.backoff, failures);
        debug!(key = %key, failures, delay_ms = delay.as_millis(), "Scheduling retry");
        self.add_after(key.clone(), delay);
        delay
    }

    /// Reset a key's failure count.
    pub async fn forget(&self, key: &ObjectKey) {
        self.state.lock().await.failures.remove(key);
    }

    /// Consecutive failures recorded for a key.
    pub async fn failures(&self, key: &ObjectKey) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Number of keys waiting to be picked up.
    pub async fn len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop handing out keys and wake every waiting worker.
    pub async fn shut_down(&self) {
        self.state.lock().await.shutdown = true;
        self.notify.notify_waiters();
    }

    pub async fn is_shut_down(&self) -> bool {
        self.state.lock().await.shutdown
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("team-a", name)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = BackoffConfig::default();
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(5));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(10));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(40));
        assert_eq!(backoff_delay(&config, 40), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_add_deduplicates() {
        let queue = WorkQueue::new(BackoffConfig::default());
        queue.add(key("a")).await;
        queue.add(key("a")).await;
        queue.add(key("b")).await;
        assert_eq!(queue.len().await, 2);

        assert_eq!(queue.next().await, Some(key("a")));
        assert_eq!(queue.next().await, Some(key("b")));
    }

    #[tokio::test]
    async fn test_in_flight_key_is_requeued_after_done() {
        let queue = WorkQueue::new(BackoffConfig::default());
        queue.add(key("a")).await;
        let taken = queue.next().await.unwrap();

        queue.add(key("a")).await;
        queue.add(key("a")).await;
        assert!(queue.is_empty().await);

        queue.done(&taken).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.next().await, Some(key("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_backoff() {
        let queue = WorkQueue::new_arc(BackoffConfig::default());
        queue.add(key("a")).await;
        let taken = queue.next().await.unwrap();

        assert_eq!(queue.retry(&taken).await, Duration::from_millis(5));
        queue.done(&taken).await;
        assert!(queue.is_empty().await);

        tokio::time::sleep(Duration::from_millis(6)).await;
        assert_eq!(queue.next().await, Some(key("a")));

        assert_eq!(queue.retry(&taken).await, Duration::from_millis(10));
        assert_eq!(queue.failures(&taken).await, 2);
        queue.forget(&taken).await;
        assert_eq!(queue.failures(&taken).await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let queue = WorkQueue::new_arc(BackoffConfig::default());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;

        queue.shut_down().await;
        assert_eq!(waiter.await.unwrap(), None);

        queue.add(key("a")).await;
        assert!(queue.is_empty().await);
        assert!(queue.is_shut_down().await);
    }

    #[tokio::test]
    async fn test_waiting_worker_receives_key() {
        let queue = WorkQueue::new_arc(BackoffConfig::default());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;

        queue.add(key("a")).await;
        assert_eq!(waiter.await.unwrap(), Some(key("a")));
    }
}
