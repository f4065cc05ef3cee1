//! General-purpose retry policy for application code layered on the
//! request facade.
//!
//! The core's internal retry machinery only honors delta-seconds
//! `Retry-After` values; this helper is the fuller treatment for
//! callers managing their own retry loops: geometric backoff between a
//! floor and ceiling, a retry budget, server `Retry-After` hints in
//! either delta-seconds or HTTP-date form, and 5xx-only retries unless
//! told otherwise.

use std::time::{Duration, Instant};

use chrono::Utc;
use log::debug;

use crate::headers::HeaderList;
use crate::response::HttpResponse;

pub struct AdaptiveRetryPolicy {
    min_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    max_retries: u32,
    retry_on_4xx: bool,

    delay: Duration,
    retry_count: u32,
    should_retry: bool,
    retry_at: Option<Instant>,
}

impl AdaptiveRetryPolicy {
    pub fn new(
        min_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        max_retries: u32,
    ) -> AdaptiveRetryPolicy {
        AdaptiveRetryPolicy {
            min_delay,
            max_delay,
            backoff_factor,
            max_retries,
            retry_on_4xx: false,
            delay: min_delay,
            retry_count: 0,
            should_retry: true,
            retry_at: None,
        }
    }

    /// Also retry client-error (4xx) statuses.  Normally only server
    /// errors are worth another attempt.
    pub fn retry_on_4xx(mut self) -> AdaptiveRetryPolicy {
        self.retry_on_4xx = true;
        self
    }

    /// Call after a success to reset retry state.
    pub fn on_success(&mut self) {
        self.reset();
    }

    pub fn reset(&mut self) {
        self.delay = self.min_delay;
        self.retry_count = 0;
        self.should_retry = true;
        self.retry_at = None;
    }

    /// Record one failure and update the schedule.  `status` is the
    /// HTTP response status; headers, when given, are consulted for
    /// `Retry-After`.
    pub fn on_failure(&mut self, status: u16, headers: Option<&HeaderList>) {
        if self.retry_count > 0 {
            self.delay = clamp_duration(
                self.delay.mul_f64(self.backoff_factor),
                self.min_delay,
                self.max_delay,
            );
        }

        // Honor a server Retry-After hint over the computed delay.
        let mut wait = self.delay;
        if let Some(hint) = headers
            .and_then(|h| h.find("retry-after"))
            .and_then(seconds_until_retry_after)
        {
            wait = hint;
        }

        if self.retry_count >= self.max_retries {
            debug!("too many retries ({}), will not retry", self.retry_count);
            self.should_retry = false;
        }
        let server_error = (500..=599).contains(&status);
        let client_error = (400..=499).contains(&status);
        if !server_error && !(self.retry_on_4xx && client_error) {
            debug!("status {} not retryable, will not retry", status);
            self.should_retry = false;
        }
        if self.should_retry {
            debug!(
                "retry count {}, next attempt in {:?}",
                self.retry_count, wait
            );
            self.retry_at = Some(Instant::now() + wait);
        }
        self.retry_count += 1;
    }

    /// Failure entry point taking a finished response from the facade.
    pub fn on_failure_response(&mut self, response: &HttpResponse) {
        let status = response.status().http_status().unwrap_or(499);
        self.on_failure(status, response.headers());
    }

    /// Whether to try again, and how long to wait first (zero once the
    /// scheduled moment has passed).  Meaningful only after at least
    /// one `on_failure`.
    pub fn should_retry(&self) -> Option<Duration> {
        debug_assert!(self.retry_count > 0, "call on_failure before should_retry");
        if !self.should_retry {
            return None;
        }
        let at = self.retry_at?;
        Some(at.saturating_duration_since(Instant::now()))
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
}

fn clamp_duration(value: Duration, min: Duration, max: Duration) -> Duration {
    value.max(min).min(max)
}

/// Interpret a `Retry-After` value as a wait from now.  Accepts both
/// delta-seconds and HTTP-date (RFC 1123) forms; dates already past
/// yield a zero wait.
pub fn seconds_until_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - Utc::now();
    match delta.to_std() {
        Ok(wait) => Some(wait),
        Err(_) => Some(Duration::ZERO),
    }
}
