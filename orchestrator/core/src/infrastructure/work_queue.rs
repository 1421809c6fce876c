// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Work Queue
//!
//! Deduplicating reconcile queue with the client-go processing semantics:
//!
//! - an item already pending is not queued twice;
//! - an item added while a worker holds it is marked dirty and re-queued
//!   when that worker calls [`WorkQueue::done`], so one identity is never
//!   processed by two workers at once;
//! - [`WorkQueue::add_after`] schedules a delayed add (retries, periodic
//!   refresh).
//!
//! [`ExponentialBackoff`] tracks per-item failure counts for retry delays.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct QueueState<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Queue an item. Returns false when it was already pending or the
    /// queue is shut down.
    pub fn add(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return false;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            // Re-queued by done()
            return true;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Queue an item once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Wait for the next item. `None` once the queue is shut down and empty.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking variant of [`WorkQueue::get`].
    pub fn try_get(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.queue.pop_front()?;
        state.dirty.remove(&item);
        state.processing.insert(item.clone());
        Some(item)
    }

    /// Release an item taken with `get`; re-queues it if it went dirty.
    pub fn done(&self, item: &T) {
        let mut state = self.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Items waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Per-item exponential retry delays: `initial * multiplier^failures`,
/// capped at `max`.
pub struct ExponentialBackoff<T> {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T: Eq + Hash + Clone> ExponentialBackoff<T> {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1.0),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next_delay(&self, item: &T) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(item.clone()).or_insert(0);
        let exponent = (*count).min(63) as i32;
        *count = count.saturating_add(1);

        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Clear the failure history after a success.
    pub fn forget(&self, item: &T) {
        self.failures.lock().remove(item);
    }

    pub fn failures(&self, item: &T) -> u32 {
        self.failures.lock().get(item).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_pending_items() {
        let queue = WorkQueue::new();
        assert!(queue.add("a"));
        assert!(!queue.add("a"));
        assert!(queue.add("b"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_add_while_processing_requeues_on_done() {
        let queue = WorkQueue::new();
        queue.add("a");
        let item = queue.try_get().unwrap();
        assert!(queue.try_get().is_none());

        // Not handed to a second worker while held.
        queue.add("a");
        assert!(queue.try_get().is_none());

        queue.done(&item);
        assert_eq!(queue.try_get(), Some("a"));
    }

    #[test]
    fn test_get_returns_pending_item_immediately() {
        let queue = WorkQueue::new();
        queue.add("ready");
        assert_eq!(tokio_test::block_on(queue.get()), Some("ready"));

        queue.shutdown();
        assert_eq!(tokio_test::block_on(queue.get()), None);
    }

    #[tokio::test]
    async fn test_get_wakes_on_add_and_shutdown() {
        let queue = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add(7u32);
        assert_eq!(consumer.await.unwrap(), Some(7));

        let waiting = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();
        assert_eq!(waiting.await.unwrap(), None);
        assert!(!queue.add(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays_item() {
        let queue = Arc::new(WorkQueue::new());
        queue.add_after("later", Duration::from_secs(30));
        tokio::task::yield_now().await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(queue.try_get(), Some("later"));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1), 2.0);
        assert_eq!(backoff.next_delay(&"a"), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(&"a"), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(&"a"), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(&"a"), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(&"a"), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(&"b"), Duration::from_millis(100));

        backoff.forget(&"a");
        assert_eq!(backoff.failures(&"a"), 0);
        assert_eq!(backoff.next_delay(&"a"), Duration::from_millis(100));
    }
}
