//! Tunables for the aggregator, with environment-variable overrides.
//!
//! Mirrors the teacher's `SessionConfig::default()` / `SessionConfig::from_env()`
//! split: sane defaults first, then an explicit env-var pass.

use std::time::Duration;

/// Process-wide configuration for the aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// WebSocket handshake timeout for `Worker::run`'s dial loop.
    pub dial_timeout: Duration,
    /// Sleep between failed dial attempts (the dial loop retries forever).
    pub dial_retry_delay: Duration,
    /// Minimum time between the *starts* of two reconnect attempts.
    pub reconnect_debounce: Duration,
    /// Period of the per-worker resubscribe sweep (resends still-pending frames).
    pub resubscribe_sweep_interval: Duration,
    /// Period of the per-worker `Lister` GC sweep.
    pub gc_sweep_interval: Duration,
    /// Entries in a `Lister` older than this (relative to the sweep's wall
    /// clock) are evicted. Same unit and, per spec, same value as
    /// `gc_sweep_interval`.
    pub gc_ttl: Duration,
    /// Capacity of the global `MarketPool`.
    pub market_pool_capacity: usize,
    /// Capacity of the subscribe intake queue.
    pub intake_queue_capacity: usize,
    /// Concurrent decode tasks in the decode pool.
    pub decode_pool_capacity: usize,
    /// Job buffer depth of the decode pool.
    pub decode_pool_buffer: usize,
    /// Optional HTTP(S) proxy for the WebSocket dialer.
    pub proxy_url: Option<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            dial_retry_delay: Duration::from_secs(3),
            reconnect_debounce: Duration::from_secs(10),
            resubscribe_sweep_interval: Duration::from_secs(7),
            gc_sweep_interval: Duration::from_millis(2_000),
            gc_ttl: Duration::from_millis(2_000),
            market_pool_capacity: 1_000,
            intake_queue_capacity: 2,
            decode_pool_capacity: 20,
            decode_pool_buffer: 500,
            proxy_url: None,
        }
    }
}

impl AggregatorConfig {
    /// Load defaults, then apply `MARKET_AGG_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("MARKET_AGG_DIAL_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                config.dial_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("MARKET_AGG_RECONNECT_DEBOUNCE_MS") {
            if let Ok(ms) = v.parse() {
                config.reconnect_debounce = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("MARKET_AGG_GC_TTL_MS") {
            if let Ok(ms) = v.parse() {
                config.gc_ttl = Duration::from_millis(ms);
                config.gc_sweep_interval = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("MARKET_AGG_MARKET_POOL_CAPACITY") {
            if let Ok(n) = v.parse() {
                config.market_pool_capacity = n;
            }
        }
        for var in ["MARKET_AGG_PROXY_URL", "HTTPS_PROXY", "ALL_PROXY"] {
            if let Ok(v) = std::env::var(var) {
                if !v.trim().is_empty() {
                    config.proxy_url = Some(v);
                    break;
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = AggregatorConfig::default();
        assert_eq!(c.market_pool_capacity, 1_000);
        assert_eq!(c.intake_queue_capacity, 2);
        assert_eq!(c.decode_pool_capacity, 20);
        assert_eq!(c.decode_pool_buffer, 500);
        assert_eq!(c.gc_ttl, c.gc_sweep_interval);
    }

    #[test]
    fn from_env_falls_back_to_all_proxy_when_others_are_unset() {
        std::env::remove_var("MARKET_AGG_PROXY_URL");
        std::env::remove_var("HTTPS_PROXY");
        std::env::set_var("ALL_PROXY", "socks5://127.0.0.1:1080");

        let config = AggregatorConfig::from_env();
        assert_eq!(config.proxy_url.as_deref(), Some("socks5://127.0.0.1:1080"));

        std::env::remove_var("ALL_PROXY");
    }
}
