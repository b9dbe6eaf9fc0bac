//! Rate-limited, de-duplicating work queue.
//!
//! Semantics follow the classic controller work queue:
//! - an item that is already pending is not queued twice
//! - while a key is being processed, items for that key stay queued until
//!   the worker calls [`WorkQueue::done`], so no two workers hold one key
//! - failed items come back after a per-item exponential delay until
//!   [`WorkQueue::forget`] resets it
//! - after [`WorkQueue::shut_down`] pending items are dropped and `get`
//!   returns `None`

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, trace};

/// Base delay of the per-item back-off.
pub const BACKOFF_BASE: Duration = Duration::from_millis(5);

/// Upper bound of the per-item back-off.
pub const BACKOFF_MAX: Duration = Duration::from_secs(1000);

/// What a queued item asks the reconciler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Add,
    Modify,
    PeriodicSync,
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Add => "add",
            Operation::Modify => "modify",
            Operation::PeriodicSync => "sync",
            Operation::Destroy => "destroy",
        };
        f.write_str(s)
    }
}

/// A unit of work: resource key plus operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueItem {
    /// `namespace/name`, or `name` for cluster-scoped kinds.
    pub key: String,
    pub operation: Operation,
}

impl QueueItem {
    pub fn new(key: impl Into<String>, operation: Operation) -> Self {
        Self {
            key: key.into(),
            operation,
        }
    }
}

/// Serialisation key of a queued item.
pub trait Keyed {
    fn queue_key(&self) -> &str;
}

impl Keyed for QueueItem {
    fn queue_key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.operation)
    }
}

// ============================================================================
// Back-off
// ============================================================================

/// Per-item exponential back-off: `base * 2^failures`, capped at `max`.
pub struct ExponentialBackoff<T> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T: Eq + Hash + Clone> ExponentialBackoff<T> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before the next retry of `item`; counts one more failure.
    pub fn when(&self, item: &T) -> Duration {
        let mut failures = lock(&self.failures);
        let count = failures.entry(item.clone()).or_insert(0);
        let exp = *count;
        *count = count.saturating_add(1);

        2u32.checked_pow(exp)
            .and_then(|factor| self.base.checked_mul(factor))
            .map(|d| d.min(self.max))
            .unwrap_or(self.max)
    }

    pub fn forget(&self, item: &T) {
        lock(&self.failures).remove(item);
    }

    pub fn retries(&self, item: &T) -> u32 {
        lock(&self.failures).get(item).copied().unwrap_or(0)
    }
}

impl<T: Eq + Hash + Clone> Default for ExponentialBackoff<T> {
    fn default() -> Self {
        Self::new(BACKOFF_BASE, BACKOFF_MAX)
    }
}

// ============================================================================
// Queue
// ============================================================================

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<String>,
    shutting_down: bool,
}

impl<T: Keyed> State<T> {
    fn is_ready(&self, item: &T) -> bool {
        !self.processing.contains(item.queue_key())
    }
}

/// Multi-producer, multi-consumer work queue.
pub struct WorkQueue<T> {
    name: String,
    state: Mutex<State<T>>,
    notify: Notify,
    backoff: ExponentialBackoff<T>,
}

impl<T> WorkQueue<T>
where
    T: Keyed + Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_backoff(name, ExponentialBackoff::default())
    }

    pub fn with_backoff(name: impl Into<String>, backoff: ExponentialBackoff<T>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            backoff,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue an item unless it is already pending.
    pub fn add(&self, item: T) {
        let mut state = lock(&self.state);
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        let ready = state.is_ready(&item);
        if !ready {
            trace!(queue = %self.name, item = %item, "Key in flight, deferring");
        }
        state.queue.push_back(item);
        if !ready {
            return;
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.state);
                let next = state.queue.iter().position(|item| state.is_ready(item));
                if let Some(item) = next.and_then(|i| state.queue.remove(i)) {
                    state.dirty.remove(&item);
                    state.processing.insert(item.queue_key().to_string());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release an item taken with [`WorkQueue::get`].
    pub fn done(&self, item: &T) {
        let mut state = lock(&self.state);
        let key = item.queue_key();
        state.processing.remove(key);
        let waiting = state.queue.iter().any(|queued| queued.queue_key() == key);
        drop(state);
        if waiting {
            self.notify.notify_one();
        }
    }

    /// Queue `item` after `delay`.
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
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

    /// Queue `item` after its current back-off delay.
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.backoff.when(&item);
        debug!(queue = %self.name, item = %item, delay_ms = delay.as_millis() as u64, "Requeue with back-off");
        self.add_after(item, delay);
    }

    /// Reset the back-off of `item`.
    pub fn forget(&self, item: &T) {
        self.backoff.forget(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.backoff.retries(item)
    }

    /// Stop accepting items, drop pending ones and wake all waiters.
    pub fn shut_down(&self) {
        let mut state = lock(&self.state);
        state.shutting_down = true;
        state.queue.clear();
        state.dirty.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        lock(&self.state).shutting_down
    }

    /// Pending items whose key is not in flight.
    pub fn len(&self) -> usize {
        let state = lock(&self.state);
        state.queue.iter().filter(|item| state.is_ready(item)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str) -> QueueItem {
        QueueItem::new(key, Operation::Add)
    }

    #[tokio::test]
    async fn test_duplicates_collapse() {
        let queue = WorkQueue::new("test");
        queue.add(item("a"));
        queue.add(item("a"));
        queue.add(QueueItem::new("a", Operation::Destroy));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_item_is_deferred_until_done() {
        let queue = WorkQueue::new("test");
        queue.add(item("a"));
        let held = queue.get().await.unwrap();

        queue.add(item("a"));
        assert_eq!(queue.len(), 0);

        queue.done(&held);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.unwrap(), item("a"));
    }

    #[tokio::test]
    async fn test_other_operation_on_held_key_waits() {
        let queue = WorkQueue::new("test");
        queue.add(item("a"));
        queue.add(QueueItem::new("a", Operation::Modify));
        queue.add(item("b"));

        let first = queue.get().await.unwrap();
        assert_eq!(first, item("a"));
        // The modify for "a" is skipped while "a" is held.
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.unwrap(), item("b"));

        queue.done(&first);
        assert_eq!(queue.get().await.unwrap(), QueueItem::new("a", Operation::Modify));
    }

    #[tokio::test]
    async fn test_shutdown_drops_pending_and_wakes_getters() {
        let queue = Arc::new(WorkQueue::<QueueItem>::new("test"));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.shut_down();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add(item("late"));
        assert!(queue.is_empty());
        assert_eq!(queue.get().await, None);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));
        let key = item("a");
        assert_eq!(backoff.when(&key), Duration::from_millis(5));
        assert_eq!(backoff.when(&key), Duration::from_millis(10));
        assert_eq!(backoff.when(&key), Duration::from_millis(20));
        assert_eq!(backoff.retries(&key), 3);

        for _ in 0..60 {
            backoff.when(&key);
        }
        assert_eq!(backoff.when(&key), Duration::from_secs(1000));

        backoff.forget(&key);
        assert_eq!(backoff.when(&key), Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_add_arrives_after_delay() {
        let queue = Arc::new(WorkQueue::new("test"));
        queue.add_rate_limited(item("a"));
        assert!(queue.is_empty());

        let got = tokio::time::timeout(Duration::from_secs(1), queue.get()).await.unwrap();
        assert_eq!(got, Some(item("a")));
        assert_eq!(queue.num_requeues(&item("a")), 1);

        queue.forget(&item("a"));
        assert_eq!(queue.num_requeues(&item("a")), 0);
    }
}
