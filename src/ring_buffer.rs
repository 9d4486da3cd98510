//! Fixed-capacity drop-oldest queue
//!
//! Used for the per-camera capture queues and for the per-session write
//! buffer. When full, a push evicts the oldest item, so a stalled consumer
//! bounds memory and latency instead of growing a backlog.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Result of pushing into a [`DropOldestQueue`]
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    /// Stored without eviction
    Queued,
    /// Stored; the returned oldest item was evicted to make room
    Replaced(T),
    /// Queue is closed; the item was not stored
    Rejected(T),
}

/// Returned by blocking pops once the queue is closed and drained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

struct QueueInner<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
    pushed: u64,
    closed: bool,
}

/// Single-producer/single-consumer ring with overwrite-on-full
pub struct DropOldestQueue<T> {
    inner: Mutex<QueueInner<T>>,
    cv: Condvar,
}

impl<T> DropOldestQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                dropped: 0,
                pushed: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) -> PushOutcome<T> {
        let mut g = self.lock();
        if g.closed {
            return PushOutcome::Rejected(item);
        }

        let evicted = if g.items.len() >= g.capacity {
            g.dropped = g.dropped.saturating_add(1);
            g.items.pop_front()
        } else {
            None
        };
        g.items.push_back(item);
        g.pushed = g.pushed.saturating_add(1);
        self.cv.notify_one();

        match evicted {
            Some(old) => PushOutcome::Replaced(old),
            None => PushOutcome::Queued,
        }
    }

    /// Non-blocking pop of the oldest item
    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Pop the oldest item, waiting up to `timeout`.
    ///
    /// Remaining items are still returned after `close`; `QueueClosed` is
    /// reported only once the queue is closed and empty.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, QueueClosed> {
        let mut g = self.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = g.items.pop_front() {
                return Ok(Some(item));
            }
            if g.closed {
                return Err(QueueClosed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (ng, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }

    /// Inspect the oldest item without removing it
    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.lock().items.front().map(f)
    }

    /// Pop the oldest item only if it still satisfies `pred`. Guards against
    /// the head being evicted between a peek and the pop.
    pub fn pop_if(&self, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut g = self.lock();
        if g.items.front().map_or(false, pred) {
            g.items.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Items evicted by overflow since creation
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Items accepted since creation
    pub fn pushed(&self) -> u64 {
        self.lock().pushed
    }

    /// Reject further pushes and wake blocked consumers
    pub fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        self.cv.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_overflow_keeps_most_recent() {
        let q = DropOldestQueue::new(2);
        for i in 1..=5 {
            q.push(i);
        }
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 3);
        assert_eq!(q.try_pop(), Some(4));
        assert_eq!(q.try_pop(), Some(5));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_push_reports_eviction() {
        let q = DropOldestQueue::new(1);
        assert_eq!(q.push("a"), PushOutcome::Queued);
        assert_eq!(q.push("b"), PushOutcome::Replaced("a"));
        q.close();
        assert_eq!(q.push("c"), PushOutcome::Rejected("c"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let q = DropOldestQueue::new(0);
        assert_eq!(q.capacity(), 1);
        q.push(1);
        q.push(2);
        assert_eq!(q.try_pop(), Some(2));
    }

    #[test]
    fn test_close_drains_before_reporting_closed() {
        let q = DropOldestQueue::new(4);
        q.push(1);
        q.push(2);
        q.close();
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Ok(Some(1)));
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Ok(Some(2)));
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Err(QueueClosed));
    }

    #[test]
    fn test_pop_timeout_expires() {
        let q: DropOldestQueue<u8> = DropOldestQueue::new(2);
        let start = Instant::now();
        assert_eq!(q.pop_timeout(Duration::from_millis(20)), Ok(None));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_blocked_consumer_wakes_on_push() {
        let q = Arc::new(DropOldestQueue::new(2));
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.pop_timeout(Duration::from_secs(2)))
        };
        thread::sleep(Duration::from_millis(20));
        q.push(7u32);
        assert_eq!(consumer.join().expect("join"), Ok(Some(7)));
    }

    #[test]
    fn test_peek_does_not_remove() {
        let q = DropOldestQueue::new(2);
        q.push(10);
        assert_eq!(q.peek_with(|v| *v * 2), Some(20));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pushed(), 1);
    }

    #[test]
    fn test_pop_if_checks_head() {
        let q = DropOldestQueue::new(2);
        q.push(3);
        assert_eq!(q.pop_if(|v| *v == 4), None);
        assert_eq!(q.pop_if(|v| *v == 3), Some(3));
        assert_eq!(q.pop_if(|_| true), None);
    }
}
