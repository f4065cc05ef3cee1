//! Unified status type covering libcurl easy/multi failures, library
//! errors and raw HTTP response codes, with the retryability classifier
//! used by the policy engine.

use std::fmt;

/// Errors raised by the library itself, as distinct from libcurl (or any
/// other transport provider).  Discriminants are stable; they appear in
/// the hex and terse log encodings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum LibraryError {
    /// Successful value compatible with the libcurl codes.
    Success = 0,
    /// An HTTP reply in 100..=999 that the application treats as an error.
    ReplyError = 1,
    /// Service is shutting down; the operation will not be queued.
    ShuttingDown = 2,
    /// Operation was canceled by request.
    OpCanceled = 3,
    /// Invalid Content-Range header received.
    InvContentRangeHdr = 4,
    /// Request handle not found.
    HandleNotFound = 5,
    /// Invalid datatype for option/setting.
    InvalidArg = 6,
    /// Option hasn't been explicitly set.
    OptNotSet = 7,
    /// Option not dynamic, must be set during the init phase.
    OptNotDynamic = 8,
    /// Invalid HTTP status code returned by the server.
    InvalidHttpStatus = 9,
    /// Couldn't allocate a resource, typically a libcurl handle.
    BadAlloc = 10,
}

impl LibraryError {
    fn as_str(self) -> &'static str {
        match self {
            LibraryError::Success => "",
            LibraryError::ReplyError => "HTTP error reply status",
            LibraryError::ShuttingDown => "Services shutting down",
            LibraryError::OpCanceled => "Operation canceled",
            LibraryError::InvContentRangeHdr => "Invalid Content-Range header encountered",
            LibraryError::HandleNotFound => "Request handle not found",
            LibraryError::InvalidArg => "Invalid datatype for argument or option",
            LibraryError::OptNotSet => "Option has not been explicitly set",
            LibraryError::OptNotDynamic => "Option is not dynamic and must be set early",
            LibraryError::InvalidHttpStatus => "Invalid HTTP status code received from server",
            LibraryError::BadAlloc => "Could not allocate required resource",
        }
    }

    fn from_code(code: u32) -> Option<LibraryError> {
        Some(match code {
            0 => LibraryError::Success,
            1 => LibraryError::ReplyError,
            2 => LibraryError::ShuttingDown,
            3 => LibraryError::OpCanceled,
            4 => LibraryError::InvContentRangeHdr,
            5 => LibraryError::HandleNotFound,
            6 => LibraryError::InvalidArg,
            7 => LibraryError::OptNotSet,
            8 => LibraryError::OptNotDynamic,
            9 => LibraryError::InvalidHttpStatus,
            10 => LibraryError::BadAlloc,
            _ => return None,
        })
    }
}

/// Where a status code came from.  HTTP statuses carry the response code
/// itself; the other domains carry a code in the status value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatusDomain {
    /// Error from a `curl_easy_*()`-level operation.
    TransportEasy,
    /// Error from a `curl_multi_*()`-level operation.
    TransportMulti,
    /// One of the `LibraryError` codes.
    Library,
    /// An HTTP response status in 100..=999.
    Http(u16),
}

// Numeric domain tags used by the u32/hex encoding.  HTTP statuses use
// the response code itself as the tag, which is unambiguous because the
// fixed tags are all below 100.
const TAG_EASY: u32 = 0;
const TAG_MULTI: u32 = 1;
const TAG_LIBRARY: u32 = 2;

/// Status of an operation: `(domain, code)` plus an optional message.
///
/// Success or failure is carried by the code: zero is success in the
/// transport and library domains; for HTTP the code slot holds the
/// reply-error flag so that an application can elect to treat any
/// response status as success (a 2xx range isn't assumed definitive,
/// it's only the constructor default).
///
/// Equality compares domain and code only; messages are advisory.
#[derive(Clone, Debug)]
pub struct HttpStatus {
    domain: StatusDomain,
    code: u32,
    message: Option<String>,
}

impl PartialEq for HttpStatus {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain && self.code == other.code
    }
}

impl Eq for HttpStatus {}

impl Default for HttpStatus {
    fn default() -> Self {
        HttpStatus::success()
    }
}

impl HttpStatus {
    /// A default, successful status.
    pub fn success() -> HttpStatus {
        HttpStatus {
            domain: StatusDomain::Library,
            code: LibraryError::Success as u32,
            message: None,
        }
    }

    /// A library-domain status.  `LibraryError::Success` yields success.
    pub fn library(err: LibraryError) -> HttpStatus {
        HttpStatus {
            domain: StatusDomain::Library,
            code: err as u32,
            message: None,
        }
    }

    /// A curl easy-domain status from a raw CURLcode.
    pub fn easy(code: u32) -> HttpStatus {
        HttpStatus {
            domain: StatusDomain::TransportEasy,
            code,
            message: None,
        }
    }

    /// A curl multi-domain status from a raw CURLMcode.
    pub fn multi(code: u32) -> HttpStatus {
        HttpStatus {
            domain: StatusDomain::TransportMulti,
            code,
            message: None,
        }
    }

    /// An HTTP response status.  2xx constructs as success, everything
    /// else as a reply error; use `from_http_with_success` to override.
    pub fn from_http(status: u16) -> HttpStatus {
        debug_assert!((100..=999).contains(&status));
        let code = if (200..=299).contains(&status) {
            LibraryError::Success as u32
        } else {
            LibraryError::ReplyError as u32
        };
        HttpStatus {
            domain: StatusDomain::Http(status),
            code,
            message: None,
        }
    }

    /// An HTTP response status with an explicit success/failure election.
    pub fn from_http_with_success(status: u16, success: bool) -> HttpStatus {
        debug_assert!((100..=999).contains(&status));
        HttpStatus {
            domain: StatusDomain::Http(status),
            code: if success {
                LibraryError::Success as u32
            } else {
                LibraryError::ReplyError as u32
            },
            message: None,
        }
    }

    /// Attach an advisory message (e.g. the 499 catch-all text).
    pub fn with_message(mut self, message: impl Into<String>) -> HttpStatus {
        self.message = Some(message.into());
        self
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn domain(&self) -> StatusDomain {
        self.domain
    }

    /// Raw code slot.  For HTTP statuses this is the reply-error flag,
    /// not the response code; see `http_status()`.
    pub fn code(&self) -> u32 {
        self.code
    }

    /// The HTTP response code, when this is an HTTP-domain status.
    pub fn http_status(&self) -> Option<u16> {
        match self.domain {
            StatusDomain::Http(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn is_http_status(&self) -> bool {
        matches!(self.domain, StatusDomain::Http(_))
    }

    /// True for statuses that might actually be cleared by a retry.
    /// Library failures, calling problems, etc. aren't going to be fixed
    /// by squirting bits all over the net.  Only failed statuses return
    /// true; success always classifies false.
    ///
    /// The invalid-HTTP-status case is included: response processing in
    /// some libcurl versions can corrupt the response and read the
    /// status as 0, and a retry tends to clear it.
    pub fn is_retryable(&self) -> bool {
        if self.is_success() {
            return false;
        }
        match self.domain {
            // 5xx plus the 499 catch-all used by upstream services.
            StatusDomain::Http(n) => (499..=599).contains(&n),
            StatusDomain::TransportEasy => matches!(
                self.code,
                curl_sys::CURLE_COULDNT_CONNECT
                    | curl_sys::CURLE_COULDNT_RESOLVE_PROXY
                    | curl_sys::CURLE_COULDNT_RESOLVE_HOST
                    | curl_sys::CURLE_SEND_ERROR
                    | curl_sys::CURLE_RECV_ERROR
                    | curl_sys::CURLE_UPLOAD_FAILED
                    | curl_sys::CURLE_OPERATION_TIMEDOUT
                    | curl_sys::CURLE_HTTP_POST_ERROR
                    | curl_sys::CURLE_PARTIAL_FILE
            ),
            StatusDomain::TransportMulti => false,
            StatusDomain::Library => matches!(
                LibraryError::from_code(self.code),
                Some(LibraryError::InvContentRangeHdr) | Some(LibraryError::InvalidHttpStatus)
            ),
        }
    }

    /// Concatenated `(domain << 16) | code` form used by the hex
    /// encoding.  HTTP statuses use the response code as the domain tag.
    pub fn to_u32(&self) -> u32 {
        let tag = match self.domain {
            StatusDomain::TransportEasy => TAG_EASY,
            StatusDomain::TransportMulti => TAG_MULTI,
            StatusDomain::Library => TAG_LIBRARY,
            StatusDomain::Http(n) => u32::from(n),
        };
        (tag << 16) | (self.code & 0xffff)
    }

    /// Eight-hex-digit machine-parseable encoding.
    pub fn to_hex(&self) -> String {
        format!("{:08x}", self.to_u32())
    }

    /// Inverse of `to_hex`/`to_u32`.  Unknown domain tags yield `None`.
    pub fn from_u32(value: u32) -> Option<HttpStatus> {
        let tag = value >> 16;
        let code = value & 0xffff;
        match tag {
            TAG_EASY => Some(HttpStatus::easy(code)),
            TAG_MULTI => Some(HttpStatus::multi(code)),
            TAG_LIBRARY => LibraryError::from_code(code).map(HttpStatus::library),
            100..=999 => Some(HttpStatus {
                domain: StatusDomain::Http(tag as u16),
                code,
                message: None,
            }),
            _ => None,
        }
    }

    pub fn from_hex(hex: &str) -> Option<HttpStatus> {
        u32::from_str_radix(hex, 16).ok().and_then(HttpStatus::from_u32)
    }

    /// Compact `<domain>_<value>` form: `Easy_7`, `Multi_3`, `Core_9`,
    /// `Http_404`.  Easily searched in logs.
    pub fn to_terse_string(&self) -> String {
        match self.domain {
            StatusDomain::TransportEasy => format!("Easy_{}", self.code),
            StatusDomain::TransportMulti => format!("Multi_{}", self.code),
            StatusDomain::Library => format!("Core_{}", self.code),
            StatusDomain::Http(n) => format!("Http_{}", n),
        }
    }
}

// Keep sorted by code, this list is binary searched.
static HTTP_REASONS: &[(u16, &str)] = &[
    (100, "Continue"),
    (101, "Switching Protocols"),
    (200, "OK"),
    (201, "Created"),
    (202, "Accepted"),
    (203, "Non-Authoritative Information"),
    (204, "No Content"),
    (205, "Reset Content"),
    (206, "Partial Content"),
    (300, "Multiple Choices"),
    (301, "Moved Permanently"),
    (302, "Found"),
    (303, "See Other"),
    (304, "Not Modified"),
    (305, "Use Proxy"),
    (307, "Temporary Redirect"),
    (400, "Bad Request"),
    (401, "Unauthorized"),
    (402, "Payment Required"),
    (403, "Forbidden"),
    (404, "Not Found"),
    (405, "Method Not Allowed"),
    (406, "Not Acceptable"),
    (407, "Proxy Authentication Required"),
    (408, "Request Time-out"),
    (409, "Conflict"),
    (410, "Gone"),
    (411, "Length Required"),
    (412, "Precondition Failed"),
    (413, "Request Entity Too Large"),
    (414, "Request-URI Too Large"),
    (415, "Unsupported Media Type"),
    (416, "Requested range not satisfiable"),
    (417, "Expectation Failed"),
    (499, "Catch-All"),
    (500, "Internal Server Error"),
    (501, "Not Implemented"),
    (502, "Bad Gateway"),
    (503, "Service Unavailable"),
    (504, "Gateway Time-out"),
    (505, "HTTP Version not supported"),
];

impl fmt::Display for HttpStatus {
    /// Human-oriented text: empty for success, otherwise a message
    /// appropriate to the source of the code.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            return Ok(());
        }
        match self.domain {
            StatusDomain::TransportEasy => {
                write!(f, "{}", curl::Error::new(self.code))
            }
            StatusDomain::TransportMulti => {
                write!(f, "{}", curl::MultiError::new(self.code as i32))
            }
            StatusDomain::Library => match LibraryError::from_code(self.code) {
                Some(err) => write!(f, "{}", err.as_str()),
                None => write!(f, "Unknown error"),
            },
            StatusDomain::Http(n) => {
                // 499 is a catch-all; prefer any message supplied with it.
                if n == 499 {
                    if let Some(msg) = &self.message {
                        return write!(f, "{}", msg);
                    }
                }
                match HTTP_REASONS.binary_search_by_key(&n, |&(code, _)| code) {
                    Ok(at) => write!(f, "{}", HTTP_REASONS[at].1),
                    Err(_) => write!(f, "Unknown error"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_defaults() {
        let status = HttpStatus::success();
        assert!(status.is_success());
        assert!(!status.is_failure());
        assert!(!status.is_http_status());
        assert!(!status.is_retryable());
        assert_eq!(status.to_string(), "");
    }

    #[test]
    fn http_success_window() {
        assert!(HttpStatus::from_http(200).is_success());
        assert!(HttpStatus::from_http(204).is_success());
        assert!(HttpStatus::from_http(206).is_success());
        assert!(HttpStatus::from_http(301).is_failure());
        assert!(HttpStatus::from_http(404).is_failure());
        assert!(HttpStatus::from_http_with_success(301, true).is_success());
    }

    #[test]
    fn terse_forms() {
        assert_eq!(HttpStatus::from_http(404).to_terse_string(), "Http_404");
        assert_eq!(
            HttpStatus::easy(curl_sys::CURLE_COULDNT_CONNECT).to_terse_string(),
            "Easy_7"
        );
        assert_eq!(HttpStatus::multi(3).to_terse_string(), "Multi_3");
        assert_eq!(
            HttpStatus::library(LibraryError::InvalidHttpStatus).to_terse_string(),
            "Core_9"
        );
    }

    #[test]
    fn hex_round_trip() {
        let samples = [
            HttpStatus::success(),
            HttpStatus::from_http(200),
            HttpStatus::from_http(404),
            HttpStatus::from_http(503),
            HttpStatus::easy(curl_sys::CURLE_OPERATION_TIMEDOUT),
            HttpStatus::multi(2),
            HttpStatus::library(LibraryError::OpCanceled),
        ];
        for status in samples {
            let hex = status.to_hex();
            assert_eq!(hex.len(), 8);
            let parsed = HttpStatus::from_hex(&hex).expect("parseable");
            assert_eq!(parsed, status);
        }
        assert!(HttpStatus::from_hex("zzzz").is_none());
        // Domain tag 50 is unassigned.
        assert!(HttpStatus::from_u32(50 << 16).is_none());
    }

    #[test]
    fn retryable_classification() {
        // Retryable HTTP: 5xx plus the 499 catch-all.
        assert!(HttpStatus::from_http(499).is_retryable());
        assert!(HttpStatus::from_http(500).is_retryable());
        assert!(HttpStatus::from_http(503).is_retryable());
        assert!(HttpStatus::from_http(599).is_retryable());
        // 4xx are fatal by default.
        assert!(!HttpStatus::from_http(400).is_retryable());
        assert!(!HttpStatus::from_http(404).is_retryable());
        // Success never retries, even 2xx.
        assert!(!HttpStatus::from_http(200).is_retryable());

        for code in [
            curl_sys::CURLE_COULDNT_CONNECT,
            curl_sys::CURLE_COULDNT_RESOLVE_PROXY,
            curl_sys::CURLE_COULDNT_RESOLVE_HOST,
            curl_sys::CURLE_SEND_ERROR,
            curl_sys::CURLE_RECV_ERROR,
            curl_sys::CURLE_UPLOAD_FAILED,
            curl_sys::CURLE_OPERATION_TIMEDOUT,
            curl_sys::CURLE_HTTP_POST_ERROR,
            curl_sys::CURLE_PARTIAL_FILE,
        ] {
            assert!(HttpStatus::easy(code).is_retryable(), "code {}", code);
        }
        assert!(!HttpStatus::easy(curl_sys::CURLE_URL_MALFORMAT).is_retryable());

        assert!(HttpStatus::library(LibraryError::InvContentRangeHdr).is_retryable());
        assert!(HttpStatus::library(LibraryError::InvalidHttpStatus).is_retryable());
        assert!(!HttpStatus::library(LibraryError::OpCanceled).is_retryable());
        assert!(!HttpStatus::library(LibraryError::ShuttingDown).is_retryable());
    }

    #[test]
    fn classification_is_pure() {
        let status = HttpStatus::from_http(503);
        let first = status.is_retryable();
        for _ in 0..10 {
            assert_eq!(status.is_retryable(), first);
        }
    }

    #[test]
    fn equality_ignores_message() {
        let plain = HttpStatus::from_http(499);
        let tagged = HttpStatus::from_http(499).with_message("LLSD parse failure");
        assert_eq!(plain, tagged);
        assert_eq!(tagged.to_string(), "LLSD parse failure");
    }
}
