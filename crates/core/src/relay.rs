//! Bounded cross-thread relay queue.
//!
//! A [`RelayQueue`] is the only state shared between the worker context
//! (graph callbacks push) and the application context (pulls). The guard is
//! held only long enough to move a single item; neither side ever blocks on
//! the other.
//!
//! ```text
//!  graph thread ──push──▶ ┌───────────────┐ ──pop──▶ application
//!                         │ VecDeque<T>   │
//!                         │ len ≤ capacity│ ◀─pop_timeout── streaming thread
//!                         └───────────────┘
//!                                │ empty → non-empty
//!                                ▼
//!                           on_available()
//! ```
//!
//! Overflow is resolved by a per-instance [`OverflowPolicy`] and counted in
//! [`RelayStats`]. An optional warm-up skip discards the first `n` arrivals
//! before anything is queued.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

/// What happens to a push when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the incoming item; the queue keeps its oldest entries.
    #[default]
    DropNewest,
    /// Evict the front entry to make room for the incoming item.
    DropOldest,
}

/// Result of a [`RelayQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// Queue full under [`OverflowPolicy::DropNewest`]: the pushed item was discarded.
    DroppedNewest,
    /// Queue full under [`OverflowPolicy::DropOldest`]: the pushed item was
    /// queued and the front entry discarded.
    DroppedOldest,
    /// Discarded by the warm-up skip.
    WarmupSkipped,
}

impl PushOutcome {
    /// Whether the pushed item ended up in the queue.
    pub fn is_queued(&self) -> bool {
        matches!(self, PushOutcome::Accepted | PushOutcome::DroppedOldest)
    }
}

/// Snapshot of a queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub accepted: u64,
    pub dropped_newest: u64,
    pub dropped_oldest: u64,
    pub warmup_skipped: u64,
    pub popped: u64,
    /// Items queued at the time of the snapshot.
    pub queued: usize,
}

impl RelayStats {
    /// Items lost to overflow, either end.
    pub fn dropped(&self) -> u64 {
        self.dropped_newest + self.dropped_oldest
    }
}

impl fmt::Display for RelayStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted={} popped={} dropped={} skipped={} queued={}",
            self.accepted,
            self.popped,
            self.dropped(),
            self.warmup_skipped,
            self.queued
        )
    }
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    dropped_newest: AtomicU64,
    dropped_oldest: AtomicU64,
    warmup_skipped: AtomicU64,
    popped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    skip_remaining: usize,
}

type Notifier = Box<dyn Fn() + Send + Sync>;

/// Bounded, thread-safe FIFO with an explicit overflow policy.
///
/// Invariant: `len() <= capacity()` at every observable point.
pub struct RelayQueue<T> {
    capacity: usize,
    policy: OverflowPolicy,
    warmup_skip: usize,
    inner: Mutex<Inner<T>>,
    available: Condvar,
    notifier: RwLock<Option<Notifier>>,
    counters: Counters,
}

impl<T> RelayQueue<T> {
    /// Create a queue with the default [`OverflowPolicy::DropNewest`].
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            policy: OverflowPolicy::default(),
            warmup_skip: 0,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                skip_remaining: 0,
            }),
            available: Condvar::new(),
            notifier: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    pub fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Discard the first `count` arrivals before accepting any push.
    pub fn with_warmup_skip(mut self, count: usize) -> Self {
        self.warmup_skip = count;
        self.inner.get_mut().skip_remaining = count;
        self
    }

    /// Register the edge-triggered "item available" callback.
    ///
    /// It runs on the pushing thread, outside the guard, each time the queue
    /// goes from empty to non-empty. Consumers should drain until
    /// [`pop`](Self::pop) returns `None`.
    pub fn set_notifier(&self, notifier: impl Fn() + Send + Sync + 'static) {
        *self.notifier.write() = Some(Box::new(notifier));
    }

    pub fn clear_notifier(&self) {
        *self.notifier.write() = None;
    }

    pub fn push(&self, item: T) -> PushOutcome {
        let (outcome, became_available) = {
            let mut inner = self.inner.lock();
            if inner.skip_remaining > 0 {
                inner.skip_remaining -= 1;
                Counters::bump(&self.counters.warmup_skipped);
                return PushOutcome::WarmupSkipped;
            }

            if inner.items.len() < self.capacity {
                let was_empty = inner.items.is_empty();
                inner.items.push_back(item);
                Counters::bump(&self.counters.accepted);
                (PushOutcome::Accepted, was_empty)
            } else {
                match self.policy {
                    OverflowPolicy::DropNewest => {
                        Counters::bump(&self.counters.dropped_newest);
                        return PushOutcome::DroppedNewest;
                    }
                    OverflowPolicy::DropOldest => {
                        inner.items.pop_front();
                        inner.items.push_back(item);
                        Counters::bump(&self.counters.dropped_oldest);
                        (PushOutcome::DroppedOldest, false)
                    }
                }
            }
        };

        self.available.notify_one();
        if became_available {
            if let Some(notify) = self.notifier.read().as_ref() {
                notify();
            }
        }
        outcome
    }

    /// Remove the oldest item without blocking.
    pub fn pop(&self) -> Option<T> {
        let item = self.inner.lock().items.pop_front();
        if item.is_some() {
            Counters::bump(&self.counters.popped);
        }
        item
    }

    /// Remove the oldest item, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                Counters::bump(&self.counters.popped);
                return Some(item);
            }
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                let item = inner.items.pop_front();
                if item.is_some() {
                    Counters::bump(&self.counters.popped);
                }
                return item;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Drop every queued item and re-arm the warm-up skip.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.items.clear();
        inner.skip_remaining = self.warmup_skip;
    }

    pub fn stats(&self) -> RelayStats {
        let queued = self.len();
        RelayStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped_newest: self.counters.dropped_newest.load(Ordering::Relaxed),
            dropped_oldest: self.counters.dropped_oldest.load(Ordering::Relaxed),
            warmup_skipped: self.counters.warmup_skipped.load(Ordering::Relaxed),
            popped: self.counters.popped.load(Ordering::Relaxed),
            queued,
        }
    }
}

impl<T> fmt::Debug for RelayQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayQueue")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn drain<T>(q: &RelayQueue<T>) -> Vec<T> {
        std::iter::from_fn(|| q.pop()).collect()
    }

    #[test]
    fn drop_newest_keeps_first_items() {
        let q = RelayQueue::new(3);
        let outcomes: Vec<_> = (0..5).map(|i| q.push(i)).collect();
        assert_eq!(
            outcomes,
            vec![
                PushOutcome::Accepted,
                PushOutcome::Accepted,
                PushOutcome::Accepted,
                PushOutcome::DroppedNewest,
                PushOutcome::DroppedNewest,
            ]
        );
        assert_eq!(q.len(), 3);
        assert_eq!(drain(&q), vec![0, 1, 2]);
        assert_eq!(q.stats().dropped_newest, 2);
    }

    #[test]
    fn drop_oldest_keeps_latest_items() {
        let q = RelayQueue::new(2).with_policy(OverflowPolicy::DropOldest);
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(drain(&q), vec![3, 4]);
        assert_eq!(q.stats().dropped_oldest, 3);
    }

    #[test]
    fn warmup_skip_discards_earliest() {
        let q = RelayQueue::new(3).with_warmup_skip(2);
        let outcomes: Vec<_> = (1..=7).map(|i| q.push(i)).collect();
        assert_eq!(outcomes[0], PushOutcome::WarmupSkipped);
        assert_eq!(outcomes[1], PushOutcome::WarmupSkipped);
        assert!(outcomes[2].is_queued());
        assert_eq!(drain(&q), vec![3, 4, 5]);

        let stats = q.stats();
        assert_eq!(stats.warmup_skipped, 2);
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.dropped_newest, 2);
        assert_eq!(stats.popped, 3);
    }

    #[test]
    fn clear_rearms_warmup() {
        let q = RelayQueue::new(4).with_warmup_skip(1);
        q.push('a');
        q.push('b');
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.push('c'), PushOutcome::WarmupSkipped);
        assert_eq!(q.push('d'), PushOutcome::Accepted);
    }

    #[test]
    fn pop_on_empty_returns_none() {
        let q: RelayQueue<u8> = RelayQueue::new(1);
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop_timeout(Duration::from_millis(5)), None);
    }

    #[test]
    fn zero_capacity_is_raised() {
        let q = RelayQueue::new(0);
        assert_eq!(q.capacity(), 1);
        assert!(q.push(1).is_queued());
    }

    #[test]
    fn notifier_fires_on_empty_to_non_empty_edge() {
        let q = RelayQueue::new(4);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        q.set_notifier(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        q.push(1);
        q.push(2);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        drain(&q);
        q.push(3);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pop_timeout_wakes_on_push() {
        let q = Arc::new(RelayQueue::new(4));
        let producer = q.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(42);
        });
        assert_eq!(q.pop_timeout(Duration::from_secs(5)), Some(42));
        handle.join().unwrap();
    }

    #[test]
    fn concurrent_pushes_respect_capacity() {
        let q = Arc::new(RelayQueue::new(16));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = q.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        q.push(t * 100 + i);
                        assert!(q.len() <= 16);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = q.stats();
        assert_eq!(stats.queued, 16);
        assert_eq!(stats.accepted + stats.dropped_newest, 400);
    }
}
