//! Response data delivered to completion handlers.

use crate::buffer::BufferArray;
use crate::headers::HeaderList;
use crate::status::HttpStatus;

/// Transfer metrics captured from the transport at completion.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransferStats {
    /// Bytes of body data downloaded.
    pub size_download: u64,
    /// Total transfer time, seconds.
    pub total_time: f64,
    /// Mean download speed, bytes per second.
    pub speed_download: f64,
}

/// Byte-range description parsed from a `Content-Range` header:
/// offset, length, and the resource's full length (0 when the server
/// reported `*`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseRange {
    pub offset: u64,
    pub length: u64,
    pub full_length: u64,
}

/// Value returned by a dynamic policy-option get or set.
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Long(i64),
    Str(String),
}

/// Everything the library has to say about a completed operation.
///
/// Owned exclusively by the consumer once delivered through the
/// handler; the worker retains nothing.
#[derive(Default)]
pub struct HttpResponse {
    status: HttpStatus,
    url: String,
    body: Option<BufferArray>,
    headers: Option<HeaderList>,
    range: Option<ResponseRange>,
    content_type: String,
    retries: u32,
    retries_503: u32,
    stats: Option<TransferStats>,
    option_value: Option<OptionValue>,
}

impl HttpResponse {
    /// Final status of the operation.
    pub fn status(&self) -> &HttpStatus {
        &self.status
    }

    /// URL of the original request, when the operation had one.
    pub fn request_url(&self) -> &str {
        &self.url
    }

    /// Response body.  May be present even on failure statuses.
    pub fn body(&self) -> Option<&BufferArray> {
        self.body.as_ref()
    }

    /// Take ownership of the body, leaving the response without one.
    pub fn take_body(&mut self) -> Option<BufferArray> {
        self.body.take()
    }

    /// Response headers, present when the request asked for them.
    pub fn headers(&self) -> Option<&HeaderList> {
        self.headers.as_ref()
    }

    pub fn take_headers(&mut self) -> Option<HeaderList> {
        self.headers.take()
    }

    /// Byte-range triple when the response carried a usable
    /// `Content-Range` header.
    pub fn range(&self) -> Option<ResponseRange> {
        self.range
    }

    /// `Content-Type` of the response, empty when unreported.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// `(retries, retries_503)` performed for this request.
    pub fn retries(&self) -> (u32, u32) {
        (self.retries, self.retries_503)
    }

    pub fn transfer_stats(&self) -> Option<TransferStats> {
        self.stats
    }

    /// Result of a dynamic policy-option operation.
    pub fn option_value(&self) -> Option<&OptionValue> {
        self.option_value.as_ref()
    }

    // Builder-side methods, used by the worker when finalizing.

    pub(crate) fn set_status(&mut self, status: HttpStatus) {
        self.status = status;
    }

    pub(crate) fn set_request_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub(crate) fn set_body(&mut self, body: BufferArray) {
        self.body = Some(body);
    }

    pub(crate) fn set_headers(&mut self, headers: HeaderList) {
        self.headers = Some(headers);
    }

    pub(crate) fn set_range(&mut self, offset: u64, length: u64, full_length: u64) {
        self.range = Some(ResponseRange {
            offset,
            length,
            full_length,
        });
    }

    pub(crate) fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = content_type.into();
    }

    pub(crate) fn set_retries(&mut self, retries: u32, retries_503: u32) {
        self.retries = retries;
        self.retries_503 = retries_503;
    }

    pub(crate) fn set_transfer_stats(&mut self, stats: TransferStats) {
        self.stats = Some(stats);
    }

    pub(crate) fn set_option_value(&mut self, value: OptionValue) {
        self.option_value = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::LibraryError;

    #[test]
    fn default_is_bare_success() {
        let response = HttpResponse::default();
        assert!(response.status().is_success());
        assert!(response.body().is_none());
        assert!(response.headers().is_none());
        assert!(response.range().is_none());
        assert_eq!(response.retries(), (0, 0));
    }

    #[test]
    fn builder_round_trip() {
        let mut response = HttpResponse::default();
        response.set_status(HttpStatus::library(LibraryError::OpCanceled));
        response.set_request_url("http://example.invalid/a");
        response.set_body(BufferArray::from_bytes(b"abc"));
        response.set_range(0, 3, 10);
        response.set_retries(2, 1);
        response.set_content_type("text/plain");

        assert!(response.status().is_failure());
        assert_eq!(response.request_url(), "http://example.invalid/a");
        assert_eq!(response.body().unwrap().len(), 3);
        assert_eq!(
            response.range(),
            Some(ResponseRange {
                offset: 0,
                length: 3,
                full_length: 10
            })
        );
        assert_eq!(response.retries(), (2, 1));
        assert_eq!(response.content_type(), "text/plain");

        let body = response.take_body().unwrap();
        assert_eq!(body.to_vec(), b"abc");
        assert!(response.body().is_none());
    }
}
