//! Per-`Worker` keyed index of latest `Quote`s, with TTL eviction.
//!
//! Multi-reader / single-writer: reads (`find`) take a shared lock, writes
//! (`add`, `del`, `gc`) take an exclusive lock. `find` never exposes the
//! internal map — it returns a freshly allocated one containing only the
//! keys that were present.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;

use crate::quote::Quote;

#[derive(Default)]
pub struct Lister {
    inner: RwLock<HashMap<String, Quote>>,
}

impl Lister {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, symbol: impl Into<String>, quote: Quote) {
        self.inner.write().insert(symbol.into(), quote);
    }

    pub fn del(&self, symbol: &str) {
        self.inner.write().remove(symbol);
    }

    /// Snapshot lookup: returns only the symbols that are currently present.
    pub fn find(&self, symbols: &[String]) -> HashMap<String, Quote> {
        let guard = self.inner.read();
        symbols
            .iter()
            .filter_map(|s| guard.get(s).map(|q| (s.clone(), q.clone())))
            .collect()
    }

    /// Returns a copy of every entry currently held.
    pub fn snapshot(&self) -> HashMap<String, Quote> {
        self.inner.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts every entry whose `timestamp_ms` is more than `ttl` older than
    /// `now_ms`. Both `now_ms` and `ttl` are in milliseconds, per the spec's
    /// resolution of the source's second/millisecond ambiguity (§9).
    pub fn gc(&self, now_ms: i64, ttl: Duration) {
        let ttl_ms = ttl.as_millis() as i64;
        self.inner
            .write()
            .retain(|_, q| now_ms.saturating_sub(q.timestamp_ms) <= ttl_ms);
    }
}
