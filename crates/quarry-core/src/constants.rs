//! Tuning constants and magic numbers shared across the library internals.

/// Microsecond timebase used for scheduling and metrics.
pub type HttpTime = u64;

// Debug/informational tracing.  Used both as a global option and in
// per-request traces.
pub const TRACE_OFF: i64 = 0;
pub const TRACE_CURL_HEADERS: i64 = 2;
pub const TRACE_CURL_BODIES: i64 = 3;

pub const TRACE_MIN: i64 = TRACE_OFF;
pub const TRACE_MAX: i64 = TRACE_CURL_BODIES;

// Request retry limits and backoff window (microseconds).
pub const RETRY_COUNT_DEFAULT: u32 = 8;
pub const RETRY_COUNT_MIN: u32 = 0;
pub const RETRY_COUNT_MAX: u32 = 100;

pub const RETRY_BACKOFF_MIN_DEFAULT: HttpTime = 1_000_000;
pub const RETRY_BACKOFF_MAX_DEFAULT: HttpTime = 5_000_000;
pub const RETRY_BACKOFF_MAX: HttpTime = 20_000_000;

// A server-supplied Retry-After inside this window (exclusive bounds,
// seconds) overrides the computed backoff for that attempt.
pub const RETRY_AFTER_OVERRIDE_MIN: u32 = 0;
pub const RETRY_AFTER_OVERRIDE_MAX: u32 = 30;

pub const REDIRECTS_DEFAULT: u32 = 10;

// Timeout values used for both connect and protocol exchange, seconds.
// Retries and time-on-queue are not included and aren't accounted for.
pub const TIMEOUT_DEFAULT: u64 = 30;
pub const TIMEOUT_MIN: u64 = 0;
pub const TIMEOUT_MAX: u64 = 3600;

// Maximum number of policy classes that can be defined, default class
// included.
pub const POLICY_CLASS_LIMIT: usize = 32;

// Limits on connection counts.
pub const CONNECTION_LIMIT_DEFAULT: i64 = 8;
pub const CONNECTION_LIMIT_MIN: i64 = 1;
pub const CONNECTION_LIMIT_MAX: i64 = 256;

pub const PIPELINING_DEFAULT: i64 = 0;
pub const PIPELINING_MAX: i64 = 20;

pub const THROTTLE_RATE_DEFAULT: i64 = 0;
pub const THROTTLE_RATE_MAX: i64 = 1_000_000;
pub const THROTTLE_WINDOW_USECS: HttpTime = 1_000_000;

// Time the worker thread sleeps after a pass through the request, ready
// and active queues when anything was busy.
pub const LOOP_SLEEP_NORMAL_MS: u64 = 2;

// Upper bound on a single blocking wait against the request queue when
// every component reported it could sleep.
pub const REQUEST_WAIT_MAX_MS: u64 = 2000;

// Free easy-handle cache is capped rather than grown without bound.
pub const HANDLE_CACHE_LIMIT: usize = 50;

use std::sync::OnceLock;
use std::time::Instant;

/// Monotonic microseconds since the first call in this process.
pub fn now_usecs() -> HttpTime {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_micros() as HttpTime
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let a = now_usecs();
        let b = now_usecs();
        assert!(b >= a);
    }
}
