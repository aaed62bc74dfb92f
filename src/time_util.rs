//! Millisecond wall-clock helper, centralized so every TTL/timeout
//! comparison in the crate uses the same clock source.

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
