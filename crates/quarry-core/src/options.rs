//! Per-request options and the policy-option enumeration.

use crate::constants::*;

/// Index of a policy class.  Requests are submitted into a class and
/// inherit its connection, pipelining and throttle configuration.
pub type PolicyClassId = u32;

/// The default, catch-all policy class that guarantees eventual service
/// for any request.
pub const DEFAULT_POLICY_ID: PolicyClassId = 0;
/// Returned when a policy class could not be created.
pub const INVALID_POLICY_ID: PolicyClassId = u32::MAX;
/// Pseudo-class addressing the global option block.
pub const GLOBAL_POLICY_ID: PolicyClassId = u32::MAX - 1;

/// Tunable policy parameters, global and/or per-class.  Options marked
/// static must be set before the worker thread starts; dynamic options
/// may also be changed at runtime via `HttpRequest::set_policy_option`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PolicyOption {
    /// Long.  Global and per-class: maximum concurrent connections.
    /// Somewhat soft; the transport may cache a few extra per class.
    ConnectionLimit,
    /// Long.  Per-class: connections per literal host/port pair, used
    /// with pipelining.
    PerHostConnectionLimit,
    /// String.  Global: directory where TLS certs are stored.
    CaPath,
    /// String.  Global: full path to a TLS cert bundle file.
    CaFile,
    /// String.  Global: host/port of a static HTTP proxy.
    HttpProxy,
    /// Long.  Global: non-zero routes connections through the
    /// application-supplied proxy provider, overriding `HttpProxy`.
    UseExternalProxy,
    /// Long.  Global: library trace verbosity, 0..=3.
    Trace,
    /// Long.  Per-class: 0/1 disables pipelining; >= 2 enables it with
    /// that many outstanding requests per connection.
    PipeliningDepth,
    /// Long.  Per-class: requests-per-second ceiling; 0 disables.
    ThrottleRate,
    /// Callback.  Global: per-request SSL certificate verification.
    SslVerifyCallback,
}

/// Options modifying a single HTTP request.
///
/// Intended to be built once and shared across requests via `Arc`: once
/// attached to a submitted request the instance is shared-read between
/// the consumer and worker threads and must not be mutated.
#[derive(Clone, Debug)]
pub struct HttpOptions {
    /// Deliver response headers with the response.
    pub want_headers: bool,
    /// Per-request trace level, 0..=3.  The effective level is the max
    /// of this and the global trace setting.
    pub trace: i64,
    /// Connect timeout, seconds.
    pub timeout: u64,
    /// Transfer timeout, seconds.  Zero mirrors the connect timeout.
    pub transfer_timeout: u64,
    /// Retry attempts before the request fails.
    pub retries: u32,
    /// Minimum retry backoff, microseconds.
    pub min_backoff: HttpTime,
    /// Maximum retry backoff, microseconds.
    pub max_backoff: HttpTime,
    /// Honor a server-supplied Retry-After when scheduling retries.
    pub use_retry_after: bool,
    /// Follow 3xx redirects.
    pub follow_redirects: bool,
    /// Verify the peer certificate chain.
    pub ssl_verify_peer: bool,
    /// Verify the certificate's host name matches the contacted host.
    pub ssl_verify_host: bool,
    /// DNS cache TTL, seconds.  Negative leaves the transport default.
    pub dns_cache_timeout: i64,
    /// Fetch status and headers only, no body.
    pub headers_only: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        HttpOptions {
            want_headers: false,
            trace: TRACE_OFF,
            timeout: TIMEOUT_DEFAULT,
            transfer_timeout: 0,
            retries: RETRY_COUNT_DEFAULT,
            min_backoff: RETRY_BACKOFF_MIN_DEFAULT,
            max_backoff: RETRY_BACKOFF_MAX_DEFAULT,
            use_retry_after: true,
            follow_redirects: false,
            ssl_verify_peer: false,
            ssl_verify_host: false,
            dns_cache_timeout: -1,
            headers_only: false,
        }
    }
}

impl HttpOptions {
    pub fn new() -> HttpOptions {
        HttpOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let opts = HttpOptions::default();
        assert!(!opts.want_headers);
        assert_eq!(opts.trace, 0);
        assert_eq!(opts.timeout, 30);
        assert_eq!(opts.transfer_timeout, 0);
        assert_eq!(opts.retries, 8);
        assert!(opts.use_retry_after);
        assert!(!opts.follow_redirects);
        assert!(!opts.ssl_verify_peer);
        assert!(!opts.ssl_verify_host);
        assert_eq!(opts.dns_cache_timeout, -1);
        assert!(!opts.headers_only);
    }
}
