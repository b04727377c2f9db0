//! Per-key coalescing retry queue
//!
//! A key is handed to at most one worker at a time. Adding a key that is
//! already pending is a no-op; adding a key that is being processed marks
//! it dirty so it is queued again once the worker calls [`RetryQueue::done`].
//! Failed keys come back through [`RetryQueue::add_rate_limited`] after a
//! delay chosen by the queue's [`RateLimiter`].

mod rate_limiter;

pub use rate_limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ItemExponentialRateLimiter,
    MaxOfRateLimiter, RateLimiter,
};

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Bounds every queue key has to satisfy
pub trait QueueKey: Clone + Eq + Hash + std::fmt::Debug + Send + Sync + 'static {}

impl<T> QueueKey for T where T: Clone + Eq + Hash + std::fmt::Debug + Send + Sync + 'static {}

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    /// Earliest time a delayed key becomes eligible again
    waiting: HashMap<K, Instant>,
    shutting_down: bool,
}

struct Shared<K> {
    name: String,
    state: Mutex<State<K>>,
    notify: Notify,
    limiter: Box<dyn RateLimiter<K>>,
}

/// Work queue of keys with per-key rate-limited retries
pub struct RetryQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for RetryQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K: QueueKey> RetryQueue<K> {
    /// Queue using [`default_controller_rate_limiter`]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_rate_limiter(name, Box::new(default_controller_rate_limiter()))
    }

    pub fn with_rate_limiter(name: impl Into<String>, limiter: Box<dyn RateLimiter<K>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    waiting: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                limiter,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        // A panic while holding the lock cannot leave the sets half-updated
        // in a way that matters more than stopping the agent would
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `key` for processing
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(queue = %self.shared.name, ?key, "Key in flight, deferring");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Queue `key` once `delay` has passed. When the key is already waiting,
    /// the earlier of the two deadlines wins.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let deadline = Instant::now() + delay;
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            match state.waiting.get(&key) {
                Some(existing) if *existing <= deadline => return,
                _ => {
                    state.waiting.insert(key.clone(), deadline);
                }
            }
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let due = {
                let mut state = queue.state();
                match state.waiting.get(&key) {
                    Some(at) if *at == deadline => {
                        state.waiting.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if due {
                queue.add(key);
            }
        });
    }

    /// Queue `key` after the delay its failure history calls for
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.shared.limiter.when(&key);
        debug!(queue = %self.shared.name, ?key, ?delay, "Requeuing with backoff");
        self.add_after(key, delay);
    }

    /// Clear the failure history of `key`
    pub fn forget(&self, key: &K) {
        self.shared.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.shared.limiter.num_requeues(key)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down and
    /// every remaining key has been handed out.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.shared.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark the processing of `key` finished. A key re-added meanwhile is
    /// queued again now.
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting keys and wake every waiting worker. Keys already queued
    /// are still handed out; delayed keys are dropped.
    pub fn shut_down(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            state.waiting.clear();
        }
        debug!(queue = %self.shared.name, "Queue shutting down");
        self.shared.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> RetryQueue<String> {
        RetryQueue::with_rate_limiter(
            "test",
            Box::new(ItemExponentialRateLimiter::new(
                Duration::from_millis(100),
                Duration::from_secs(10),
            )),
        )
    }

    #[tokio::test]
    async fn test_add_coalesces_pending_keys() {
        let q = queue();
        q.add("eip-1".to_string());
        q.add("eip-1".to_string());
        q.add("eip-2".to_string());
        assert_eq!(q.len(), 2);

        assert_eq!(q.get().await.as_deref(), Some("eip-1"));
        assert_eq!(q.get().await.as_deref(), Some("eip-2"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_key_in_flight_is_deferred_until_done() {
        let q = queue();
        q.add("eip-1".to_string());
        let key = q.get().await.unwrap();

        // Re-added while processing: not handed to a second worker
        q.add("eip-1".to_string());
        assert_eq!(q.len(), 0);

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await.as_deref(), Some("eip-1"));
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_stops() {
        let q = queue();
        q.add("eip-1".to_string());
        q.shut_down();
        q.add("eip-2".to_string());

        assert_eq!(q.get().await.as_deref(), Some("eip-1"));
        assert_eq!(q.get().await, None);
        assert!(q.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiting_workers() {
        let q = queue();
        let worker = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shut_down();
        assert_eq!(worker.await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_requeue_backs_off() {
        let q = queue();
        let key = "eip-1".to_string();

        q.add_rate_limited(key.clone());
        assert!(q.is_empty());
        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(q.is_empty());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(q.len(), 1);
        assert_eq!(q.num_requeues(&key), 1);

        let got = q.get().await.unwrap();
        q.done(&got);
        q.add_rate_limited(got.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(q.is_empty());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(q.len(), 1);

        q.forget(&key);
        assert_eq!(q.num_requeues(&key), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_keeps_earliest_deadline() {
        let q = queue();
        q.add_after("eip-1".to_string(), Duration::from_secs(5));
        q.add_after("eip-1".to_string(), Duration::from_secs(1));
        q.add_after("eip-1".to_string(), Duration::from_secs(3));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(q.len(), 1);
        let key = q.get().await.unwrap();
        q.done(&key);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_workers_never_share_a_key() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let q = queue();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            workers.push(tokio::spawn(async move {
                while let Some(key) = q.get().await {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    q.done(&key);
                }
            }));
        }

        for _ in 0..50 {
            q.add("eip-1".to_string());
            tokio::task::yield_now().await;
        }
        q.shut_down();
        for worker in workers {
            worker.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
