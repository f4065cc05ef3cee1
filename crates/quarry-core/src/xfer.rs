//! Per-transfer callback state: the bridge between libcurl's easy-handle
//! callbacks and a request operation.
//!
//! The transfer object lives inside the easy handle for the duration of
//! one attempt.  Callbacks accumulate reply data here; at completion the
//! transport drains the state back into the owning request operation.
//! Everything runs on the worker thread.

use std::io::SeekFrom;
use std::sync::Arc;

use curl::easy::{Handler, InfoType, ReadError, SeekResult, WriteError};
use log::{info, warn};

use crate::buffer::BufferArray;
use crate::constants::{TRACE_CURL_BODIES, TRACE_CURL_HEADERS};
use crate::handle::HttpHandle;
use crate::handler::{HandlerPtr, PolicyCallback};
use crate::headers::HeaderList;
use crate::status::{HttpStatus, LibraryError};

// Request processing flags.
pub const PF_SCAN_RANGE_HEADER: u8 = 1 << 0;
pub const PF_SAVE_HEADERS: u8 = 1 << 1;
pub const PF_USE_RETRY_AFTER: u8 = 1 << 2;

/// Callback state for one transfer attempt.
#[derive(Default)]
pub(crate) struct Transfer {
    /// Operation handle, carried for log tagging.
    pub op_handle: HttpHandle,
    pub tracing: i64,
    pub proc_flags: u8,

    // Upload side: shared-read request body plus a cursor.
    pub req_body: Option<Arc<BufferArray>>,
    pub body_cursor: usize,

    /// Total body bytes received across the attempt, for transfer stats.
    pub bytes_received: u64,

    // Download side, reset whenever a new status line arrives so the
    // final header stanza wins across redirect chains.
    pub reply_body: Option<BufferArray>,
    pub reply_offset: u64,
    pub reply_length: u64,
    pub reply_full_length: u64,
    pub reply_retry_after: u32,
    pub reply_headers: Option<HeaderList>,
    /// Failure noticed during header processing; overrides the
    /// transport completion code.
    pub status_override: Option<HttpStatus>,

    // SSL verification plumbing.
    pub url: String,
    pub ssl_verify: Option<PolicyCallback>,
    pub user_handler: Option<HandlerPtr>,
}

impl Transfer {
    /// Clear reply-side accumulation for a fresh header stanza.
    fn reset_reply_state(&mut self) {
        self.reply_offset = 0;
        self.reply_length = 0;
        self.reply_full_length = 0;
        self.reply_retry_after = 0;
        self.status_override = None;
        if let Some(headers) = self.reply_headers.as_mut() {
            headers.clear();
        }
    }
}

impl Handler for Transfer {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        let body = self.reply_body.get_or_insert_with(BufferArray::new);
        let stored = body.append(data);
        self.bytes_received += stored as u64;
        Ok(stored)
    }

    fn read(&mut self, into: &mut [u8]) -> Result<usize, ReadError> {
        let Some(body) = self.req_body.as_ref() else {
            return Ok(0);
        };
        let body_size = body.len();
        if body_size <= self.body_cursor {
            if body_size < self.body_cursor {
                warn!(
                    "request body position beyond body size, truncating upload, handle {}",
                    self.op_handle
                );
            }
            return Ok(0);
        }
        let n = body.read_at(self.body_cursor, into);
        self.body_cursor += n;
        Ok(n)
    }

    fn seek(&mut self, whence: SeekFrom) -> SeekResult {
        let Some(body) = self.req_body.as_ref() else {
            return SeekResult::Ok;
        };
        let size = body.len() as i64;
        let target = match whence {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(delta) => size + delta,
            SeekFrom::Current(delta) => self.body_cursor as i64 + delta,
        };
        if target < 0 || target >= size {
            warn!(
                "attempt to seek outside request body, handle {}",
                self.op_handle
            );
            return SeekResult::CantSeek;
        }
        self.body_cursor = target as usize;
        SeekResult::Ok
    }

    fn header(&mut self, data: &[u8]) -> bool {
        let line = strip_crlf(data);

        if line.starts_with(b"HTTP/") {
            // One of possibly several status lines.  Forget what we know
            // and take results from the last stanza we receive.
            self.reset_reply_state();
            return true;
        }

        let (name, value) = split_header(line);
        if name.is_empty() {
            // Blank separator or garbage; nothing to do with it.
            return true;
        }

        if self.proc_flags & PF_SAVE_HEADERS != 0 {
            self.reply_headers
                .get_or_insert_with(HeaderList::new)
                .append(name.as_str(), value);
        }

        if self.proc_flags & PF_SCAN_RANGE_HEADER != 0
            && !value.is_empty()
            && name == "content-range"
        {
            match parse_content_range(value) {
                ContentRange::Valid {
                    first,
                    last,
                    length,
                } => {
                    self.reply_offset = first;
                    self.reply_length = last - first + 1;
                    self.reply_full_length = length;
                }
                ContentRange::Unparsable => {
                    info!(
                        "problem parsing odd Content-Range header: '{}', ignoring",
                        value
                    );
                }
                ContentRange::Invalid => {
                    self.status_override =
                        Some(HttpStatus::library(LibraryError::InvContentRangeHdr));
                }
            }
        }

        if self.proc_flags & PF_USE_RETRY_AFTER != 0
            && !value.is_empty()
            && name == "retry-after"
        {
            if let Some(seconds) = parse_retry_after(value) {
                self.reply_retry_after = seconds;
            }
        }

        true
    }

    fn ssl_ctx(&mut self, _ctx: *mut std::ffi::c_void) -> Result<(), curl::Error> {
        let Some(verify) = self.ssl_verify.clone() else {
            return Ok(());
        };
        let status = verify(&self.url, self.user_handler.as_ref());
        if status.is_success() {
            Ok(())
        } else {
            self.status_override = Some(status);
            Err(curl::Error::new(curl_sys::CURLE_PEER_FAILED_VERIFICATION))
        }
    }

    fn debug(&mut self, kind: InfoType, data: &[u8]) {
        if self.tracing < TRACE_CURL_HEADERS {
            return;
        }
        // Keep things reasonable in all cases.
        let shown = &data[..data.len().min(256)];
        let (tag, line) = match kind {
            InfoType::Text => ("TEXT", escape_debug_data(shown, true)),
            InfoType::HeaderIn => ("HEADERIN", escape_debug_data(shown, true)),
            InfoType::HeaderOut => ("HEADEROUT", escape_debug_data(shown, true)),
            InfoType::DataIn => (
                "DATAIN",
                if self.tracing >= TRACE_CURL_BODIES {
                    escape_debug_data(shown, false)
                } else {
                    format!("{} Bytes", data.len())
                },
            ),
            InfoType::DataOut => (
                "DATAOUT",
                if self.tracing >= TRACE_CURL_BODIES {
                    escape_debug_data(shown, false)
                } else {
                    format!("{} Bytes", data.len())
                },
            ),
            _ => return,
        };
        info!(
            "TRACE, LibcurlDebug, Handle:  {}, Type:  {}, Data:  {}",
            self.op_handle, tag, line
        );
    }
}

/// Trim at most one trailing CR/LF pair.
fn strip_crlf(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    if end > 0 && data[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && data[end - 1] == b'\r' {
            end -= 1;
        }
    }
    &data[..end]
}

/// Split a raw header line on the first colon.  The name comes back
/// lower-cased and trimmed, the value left-trimmed.  Lines without a
/// colon yield the whole line as a name and an empty value.
fn split_header(line: &[u8]) -> (String, &str) {
    let text = String::from_utf8_lossy(line);
    match text.find(':') {
        Some(at) => {
            let name = text[..at].trim().to_ascii_lowercase();
            // Value borrows from the original bytes only when they were
            // valid UTF-8; fall back to empty on mixed content.
            match std::str::from_utf8(line) {
                Ok(valid) => (name, valid[at + 1..].trim_start()),
                Err(_) => (name, ""),
            }
        }
        None => (text.trim_start().to_string(), ""),
    }
}

/// Result of examining a `Content-Range` value.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ContentRange {
    /// `bytes F-L/LEN` parsed; `length` is zero when the server sent `*`.
    Valid { first: u64, last: u64, length: u64 },
    /// Recognizably a range we don't understand; log and ignore.
    Unparsable,
    /// Badly formed; the response should not be accepted.
    Invalid,
}

/// Parse a `Content-Range: bytes <first>-<last>/<length|*>` value.
pub(crate) fn parse_content_range(value: &str) -> ContentRange {
    let value = value.trim();
    let Some(rest) = value
        .strip_prefix("bytes")
        .or_else(|| value.strip_prefix("Bytes"))
        .or_else(|| value.strip_prefix("BYTES"))
    else {
        return ContentRange::Invalid;
    };
    let rest = rest.trim_start();
    let Some((range_part, length_part)) = rest.split_once('/') else {
        return ContentRange::Invalid;
    };
    let Some((first_text, last_text)) = range_part.split_once('-') else {
        // An unsatisfied-range form ("*/123") is legal but carries no
        // position for us; pass on it.
        return ContentRange::Unparsable;
    };
    let first: u64 = match first_text.trim().parse() {
        Ok(n) => n,
        Err(_) => return ContentRange::Unparsable,
    };
    let last: u64 = match last_text.trim().parse() {
        Ok(n) => n,
        Err(_) => return ContentRange::Unparsable,
    };
    if last < first {
        return ContentRange::Invalid;
    }
    let length_text = length_part.trim();
    let length: u64 = if length_text == "*" {
        0
    } else {
        match length_text.parse() {
            Ok(n) => n,
            Err(_) => return ContentRange::Unparsable,
        }
    };
    ContentRange::Valid {
        first,
        last,
        length,
    }
}

/// Parse a `Retry-After` delta-seconds value.  HTTP-date forms aren't
/// interesting on this path; the adaptive retry helper handles those.
pub(crate) fn parse_retry_after(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}

/// Escape payload bytes for a one-line log entry.  With `scrub`,
/// non-printing and non-ascii bytes become spaces; otherwise they're
/// `%XX`-escaped.
fn escape_debug_data(data: &[u8], scrub: bool) -> String {
    let mut out = String::with_capacity(data.len());
    for &byte in data {
        match byte {
            0x20..=0x7e => out.push(byte as char),
            _ if scrub => out.push(' '),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
