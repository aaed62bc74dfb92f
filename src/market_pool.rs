//! The global push path: a bounded, drop-oldest-on-overflow stream of
//! `Quote`s shared by every `Worker`.
//!
//! A writer-side `parking_lot::Mutex` serializes the "is it full, drop the
//! oldest, push the newest" sequence — the three steps are not atomic
//! without it. Per REDESIGN FLAGS §9, this deliberately does *not* reproduce
//! the source's idiom of racing a timer against a receive on the same
//! delivery channel; the drop step is explicit and synchronous. `MarketStream`
//! consumes directly from this same deque (via `pop`), so the overflow
//! discipline a saturated writer applies — drop the oldest, keep the newest —
//! is the only discipline a reader ever sees.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::quote::Quote;

struct Inner {
    capacity: usize,
    deque: Mutex<VecDeque<Quote>>,
    notify: Notify,
}

/// Shared handle to the bounded push stream. Cheap to clone.
#[derive(Clone)]
pub struct MarketPool {
    inner: Arc<Inner>,
}

impl MarketPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                deque: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
            }),
        }
    }

    /// Push a `Quote`, dropping the oldest undelivered one if the pool is
    /// already at capacity. Never blocks on a reader. Wakes one waiting
    /// `MarketStream::next`, if any.
    pub fn push(&self, quote: Quote) {
        {
            let mut deque = self.inner.deque.lock();
            if deque.len() >= self.inner.capacity {
                deque.pop_front();
            }
            deque.push_back(quote);
        }
        self.inner.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.deque.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Drain up to `max` oldest-first entries without removing them from
    /// the pool. Mainly useful for tests and diagnostics.
    pub fn peek_front(&self, max: usize) -> Vec<Quote> {
        self.inner.deque.lock().iter().take(max).cloned().collect()
    }

    /// Pop the oldest entry, if any. `MarketStream::next` is built on this —
    /// consuming a `Quote` removes it from the pool, matching the data
    /// model's "removed when consumed or displaced".
    pub fn pop(&self) -> Option<Quote> {
        self.inner.deque.lock().pop_front()
    }

    /// A push-path subscription over this pool: pulls directly from the
    /// same drop-oldest deque `push` writes into, so a reader that falls
    /// behind misses the oldest queued quotes, never the newest ones.
    pub fn stream(&self) -> MarketStream {
        MarketStream { pool: self.clone() }
    }
}

/// A push-path consumer. Reads are just `MarketPool::pop` calls, woken by a
/// `Notify` rather than polled — a slow or absent reader never blocks the
/// writer, and under saturation it is the oldest elements that are lost,
/// never the newest (§4.4's observable guarantee).
pub struct MarketStream {
    pool: MarketPool,
}

impl MarketStream {
    pub async fn next(&mut self) -> Option<Quote> {
        loop {
            // Register interest before checking, so a push racing between
            // the check and the wait isn't missed: `Notify` stores the
            // permit from a `notify_one` that arrives with nobody waiting
            // yet, and `notified()` consumes it immediately next time.
            let notified = self.pool.inner.notify.notified();
            if let Some(quote) = self.pool.pop() {
                return Some(quote);
            }
            notified.await;
        }
    }
}

/// Fan-out side kept by whoever owns the `MarketPool` — today just a thin
/// wrapper so `Manager`/`decode_pool` don't reach into `MarketPool` directly.
pub struct MarketPoolHub {
    pool: MarketPool,
}

impl MarketPoolHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: MarketPool::new(capacity),
        }
    }

    pub fn pool(&self) -> MarketPool {
        self.pool.clone()
    }

    /// Push into the bounded pool. This is the only way a `Quote` reaches
    /// the push path; every `MarketStream` reads from the same deque.
    pub fn push(&self, quote: Quote) {
        self.pool.push(quote);
    }

    pub fn subscribe(&self) -> MarketStream {
        self.pool.stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::Venue;

    fn quote(n: i64) -> Quote {
        Quote::new(
            Venue::Huobi,
            "ethusdt",
            vec![(n.to_string(), "1".into())],
            vec![(n.to_string(), "1".into())],
            n,
        )
        .unwrap()
    }

    #[test]
    fn push_never_exceeds_capacity() {
        let pool = MarketPool::new(3);
        for n in 0..10 {
            pool.push(quote(n));
        }
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn overflow_drops_oldest_first() {
        let pool = MarketPool::new(2);
        pool.push(quote(0));
        pool.push(quote(1));
        pool.push(quote(2));

        let remaining = pool.peek_front(2);
        assert_eq!(remaining[0].timestamp_ms, 1);
        assert_eq!(remaining[1].timestamp_ms, 2);
    }

    #[test]
    fn size_equals_min_of_writes_and_capacity() {
        let pool = MarketPool::new(5);
        for n in 0..3 {
            pool.push(quote(n));
        }
        assert_eq!(pool.len(), 3);
        for n in 3..20 {
            pool.push(quote(n));
        }
        assert_eq!(pool.len(), 5);
    }

    #[tokio::test]
    async fn market_stream_receives_pushed_quotes_in_order() {
        let hub = MarketPoolHub::new(10);
        let mut stream = hub.subscribe();

        hub.push(quote(1));
        hub.push(quote(2));

        assert_eq!(stream.next().await.unwrap().timestamp_ms, 1);
        assert_eq!(stream.next().await.unwrap().timestamp_ms, 2);
        assert!(hub.pool().is_empty());
    }

    #[tokio::test]
    async fn market_stream_waits_for_a_push_that_has_not_happened_yet() {
        let hub = MarketPoolHub::new(10);
        let mut stream = hub.subscribe();

        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(30), stream.next())
                .await
                .is_err()
        );

        hub.push(quote(7));
        assert_eq!(stream.next().await.unwrap().timestamp_ms, 7);
    }

    #[tokio::test]
    async fn saturation_drops_the_oldest_quote_not_the_newest() {
        // §4.4: "Under saturation, readers miss the oldest N elements, never
        // the newest." A reader that only starts consuming after the writer
        // has already overflowed the pool must see the newest entries, not
        // drop-newest leftovers from an overflowed side channel.
        let hub = MarketPoolHub::new(2);
        for n in 0..5 {
            hub.push(quote(n));
        }

        let mut stream = hub.subscribe();
        assert_eq!(stream.next().await.unwrap().timestamp_ms, 3);
        assert_eq!(stream.next().await.unwrap().timestamp_ms, 4);
    }

    #[tokio::test]
    async fn absent_reader_never_blocks_writer() {
        let hub = MarketPoolHub::new(10);
        for n in 0..100 {
            hub.push(quote(n));
        }
        assert_eq!(hub.pool().len(), 10);
    }
}
