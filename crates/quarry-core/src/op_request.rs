//! The queued HTTP request operation.
//!
//! Carries everything needed to issue (and re-issue, on retry) one HTTP
//! transaction: method, URL, body, headers, per-request options and the
//! retry/backoff state, plus the reply data absorbed from the transfer
//! when an attempt completes.

use std::sync::Arc;
use std::time::Duration;

use curl::easy::{Easy2, IpResolve, List};
use log::warn;

use crate::buffer::BufferArray;
use crate::constants::*;
use crate::headers::HeaderList;
use crate::operation::{OpCommon, Operation};
use crate::options::{HttpOptions, PolicyClassId};
use crate::policy_class::PolicyClass;
use crate::policy_global::PolicyGlobal;
use crate::response::{HttpResponse, TransferStats};
use crate::status::{HttpStatus, LibraryError};
use crate::xfer::{Transfer, PF_SAVE_HEADERS, PF_SCAN_RANGE_HEADER, PF_USE_RETRY_AFTER};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Copy,
    Move,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Copy => "COPY",
            Method::Move => "MOVE",
        }
    }
}

pub(crate) struct RequestOp {
    pub common: OpCommon,

    // Request data, shared-read once submitted.
    pub method: Method,
    pub url: String,
    pub body: Option<Arc<BufferArray>>,
    pub req_offset: u64,
    pub req_length: u64,
    pub req_headers: Option<Arc<HeaderList>>,
    pub req_options: Option<Arc<HttpOptions>>,
    pub proc_flags: u8,

    // Retry scheduling state, owned by the policy engine.
    pub retries: u32,
    pub retries_503: u32,
    pub retry_at: HttpTime,
    pub retry_limit: u32,
    pub min_backoff: HttpTime,
    pub max_backoff: HttpTime,

    // Reply data, absorbed from the transfer at completion.
    pub reply_body: Option<BufferArray>,
    pub reply_offset: u64,
    pub reply_length: u64,
    pub reply_full_length: u64,
    pub reply_headers: Option<HeaderList>,
    pub reply_retry_after: u32,
    pub reply_content_type: String,
    pub stats: Option<TransferStats>,

    /// True while the transport has this request on a multi handle.
    pub transport_active: bool,
}

impl RequestOp {
    fn new(method: Method) -> RequestOp {
        RequestOp {
            common: OpCommon::new(),
            method,
            url: String::new(),
            body: None,
            req_offset: 0,
            req_length: 0,
            req_headers: None,
            req_options: None,
            proc_flags: 0,
            retries: 0,
            retries_503: 0,
            retry_at: 0,
            retry_limit: RETRY_COUNT_DEFAULT,
            min_backoff: RETRY_BACKOFF_MIN_DEFAULT,
            max_backoff: RETRY_BACKOFF_MAX_DEFAULT,
            reply_body: None,
            reply_offset: 0,
            reply_length: 0,
            reply_full_length: 0,
            reply_headers: None,
            reply_retry_after: 0,
            reply_content_type: String::new(),
            stats: None,
            transport_active: false,
        }
    }

    fn setup_common(
        &mut self,
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        body: Option<Arc<BufferArray>>,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
    ) {
        self.common.policy_id = policy_id;
        self.common.priority = priority;
        self.url = url.to_string();
        self.body = body;
        self.req_headers = headers;
        if let Some(options) = options {
            if options.want_headers {
                self.proc_flags |= PF_SAVE_HEADERS;
            }
            if options.use_retry_after {
                self.proc_flags |= PF_USE_RETRY_AFTER;
            }
            self.retry_limit = options.retries.clamp(RETRY_COUNT_MIN, RETRY_COUNT_MAX);
            self.common.tracing = self
                .common
                .tracing
                .max(options.trace.clamp(TRACE_MIN, TRACE_MAX));
            self.min_backoff = options.min_backoff.min(RETRY_BACKOFF_MAX);
            self.max_backoff = options
                .max_backoff
                .clamp(self.min_backoff, RETRY_BACKOFF_MAX);
            self.req_options = Some(options);
        }
    }

    pub fn setup_get(
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
    ) -> Box<RequestOp> {
        let mut op = Box::new(RequestOp::new(Method::Get));
        op.setup_common(policy_id, priority, url, None, options, headers);
        op
    }

    pub fn setup_get_byte_range(
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        offset: u64,
        length: u64,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
    ) -> Box<RequestOp> {
        let mut op = Box::new(RequestOp::new(Method::Get));
        op.setup_common(policy_id, priority, url, None, options, headers);
        op.req_offset = offset;
        op.req_length = length;
        if offset != 0 || length != 0 {
            op.proc_flags |= PF_SCAN_RANGE_HEADER;
        }
        op
    }

    pub fn setup_post(
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        body: Arc<BufferArray>,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
    ) -> Box<RequestOp> {
        let mut op = Box::new(RequestOp::new(Method::Post));
        op.setup_common(policy_id, priority, url, Some(body), options, headers);
        op
    }

    pub fn setup_put(
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        body: Arc<BufferArray>,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
    ) -> Box<RequestOp> {
        let mut op = Box::new(RequestOp::new(Method::Put));
        op.setup_common(policy_id, priority, url, Some(body), options, headers);
        op
    }

    pub fn setup_patch(
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        body: Arc<BufferArray>,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
    ) -> Box<RequestOp> {
        let mut op = Box::new(RequestOp::new(Method::Patch));
        op.setup_common(policy_id, priority, url, Some(body), options, headers);
        op
    }

    pub fn setup_delete(
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
    ) -> Box<RequestOp> {
        let mut op = Box::new(RequestOp::new(Method::Delete));
        op.setup_common(policy_id, priority, url, None, options, headers);
        op
    }

    pub fn setup_copy(
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
    ) -> Box<RequestOp> {
        let mut op = Box::new(RequestOp::new(Method::Copy));
        op.setup_common(policy_id, priority, url, None, options, headers);
        op
    }

    pub fn setup_move(
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
    ) -> Box<RequestOp> {
        let mut op = Box::new(RequestOp::new(Method::Move));
        op.setup_common(policy_id, priority, url, None, options, headers);
        op
    }

    /// Configure an easy handle and its transfer state for one attempt.
    ///
    /// Used both for the initial issue and to reload for a retry,
    /// generally with a different handle; reply-side junk left from a
    /// failed attempt is scrubbed first.
    pub fn prepare(
        &mut self,
        easy: &mut Easy2<Transfer>,
        global: &PolicyGlobal,
        class: &PolicyClass,
    ) -> Result<(), HttpStatus> {
        self.transport_active = false;
        self.reply_body = None;
        self.reply_offset = 0;
        self.reply_length = 0;
        self.reply_full_length = 0;
        self.reply_headers = None;
        self.reply_retry_after = 0;
        self.reply_content_type.clear();
        self.stats = None;

        let tracing = self.common.tracing.max(global.trace);

        *easy.get_mut() = Transfer {
            op_handle: self.common.handle,
            tracing,
            proc_flags: self.proc_flags,
            req_body: self.body.clone(),
            url: self.url.clone(),
            ssl_verify: global.ssl_ctx_callback.clone(),
            user_handler: self.common.handler.clone(),
            ..Transfer::default()
        };

        check(easy.ip_resolve(IpResolve::V4), "IPRESOLVE");
        check(easy.signal(false), "NOSIGNAL");
        check(easy.progress(false), "NOPROGRESS");
        check(easy.url(&self.url), "URL");
        check(easy.accept_encoding(""), "ACCEPT_ENCODING");
        check(easy.autoreferer(true), "AUTOREFERER");
        check(easy.max_redirections(REDIRECTS_DEFAULT), "MAXREDIRS");
        check(easy.cookie_file(""), "COOKIEFILE");

        let mut follow_redirect = true;
        let mut ssl_peer = false;
        let mut ssl_host = false;
        let mut dns_cache_timeout = -1i64;
        let mut nobody = false;
        if let Some(options) = self.req_options.as_deref() {
            follow_redirect = options.follow_redirects;
            ssl_peer = options.ssl_verify_peer;
            ssl_host = options.ssl_verify_host;
            dns_cache_timeout = options.dns_cache_timeout;
            nobody = options.headers_only;
        }
        check(easy.follow_location(follow_redirect), "FOLLOWLOCATION");
        check(easy.ssl_verify_peer(ssl_peer), "SSL_VERIFYPEER");
        check(easy.ssl_verify_host(ssl_host), "SSL_VERIFYHOST");
        check(easy.nobody(nobody), "NOBODY");
        if dns_cache_timeout >= 0 {
            check(
                easy.dns_cache_timeout(Duration::from_secs(dns_cache_timeout as u64)),
                "DNS_CACHE_TIMEOUT",
            );
        }

        if global.use_external_proxy != 0 {
            // The application asked for its own proxy provider; nothing
            // is wired into the library itself.
            warn!("external proxy requested but no provider is installed");
        } else if !global.http_proxy.is_empty() {
            check(easy.proxy(&global.http_proxy), "PROXY");
        }
        if !global.ca_path.is_empty() {
            check(easy.capath(&global.ca_path), "CAPATH");
        }
        if !global.ca_file.is_empty() {
            check(easy.cainfo(&global.ca_file), "CAINFO");
        }

        let mut headers = List::new();
        let body_size = self.body.as_ref().map_or(0, |b| b.len()) as u64;
        match self.method {
            Method::Get => {
                if !nobody {
                    check(easy.get(true), "HTTPGET");
                }
            }
            Method::Post => {
                check(easy.post(true), "POST");
                check(easy.post_field_size(body_size), "POSTFIELDSIZE");
                // Suppress the 100-Continue dance.
                check(headers.append("Expect:"), "header Expect");
            }
            Method::Put => {
                check(easy.upload(true), "UPLOAD");
                check(easy.in_filesize(body_size), "INFILESIZE");
                check(headers.append("Expect:"), "header Expect");
            }
            Method::Patch => {
                check(easy.custom_request("PATCH"), "CUSTOMREQUEST");
                check(easy.upload(true), "UPLOAD");
                check(easy.in_filesize(body_size), "INFILESIZE");
                check(headers.append("Expect:"), "header Expect");
            }
            Method::Delete | Method::Copy | Method::Move => {
                check(easy.custom_request(self.method.as_str()), "CUSTOMREQUEST");
            }
        }

        check(headers.append("Connection: keep-alive"), "header Connection");
        check(headers.append("Keep-alive: 300"), "header Keep-alive");

        if tracing >= TRACE_CURL_HEADERS {
            check(easy.verbose(true), "VERBOSE");
        }

        if (self.req_offset != 0 || self.req_length != 0) && self.method == Method::Get {
            let range_line = if self.req_length != 0 {
                format!(
                    "Range: bytes={}-{}",
                    self.req_offset,
                    self.req_offset + self.req_length - 1
                )
            } else {
                format!("Range: bytes={}-", self.req_offset)
            };
            check(headers.append(&range_line), "header Range");
        }

        check(headers.append("Pragma:"), "header Pragma");

        // Caller's headers last so they override ours.
        if let Some(extra) = self.req_headers.as_deref() {
            for (name, value) in extra.iter() {
                check(
                    headers.append(&format!("{}: {}", name, value)),
                    "caller header",
                );
            }
        }
        check(easy.http_headers(headers), "HTTPHEADER");

        let mut timeout = TIMEOUT_DEFAULT;
        let mut xfer_timeout = 0;
        if let Some(options) = self.req_options.as_deref() {
            timeout = options.timeout.clamp(TIMEOUT_MIN, TIMEOUT_MAX);
            xfer_timeout = options.transfer_timeout.clamp(TIMEOUT_MIN, TIMEOUT_MAX);
        }
        if xfer_timeout == 0 {
            xfer_timeout = timeout;
        }
        if class.is_pipelined() {
            // Pipelined requests have effectively completed their
            // connection when queued, but transfers can sit behind the
            // requests ahead of them on the wire.  Give them headroom.
            xfer_timeout *= 2;
        }
        check(easy.timeout(Duration::from_secs(xfer_timeout)), "TIMEOUT");
        check(
            easy.connect_timeout(Duration::from_secs(timeout)),
            "CONNECTTIMEOUT",
        );

        Ok(())
    }

    /// Pull reply data out of the transfer state after an attempt.
    /// Returns a failure noticed during header or SSL processing, which
    /// takes precedence over the transport completion code.
    pub fn absorb_transfer(&mut self, xfer: &mut Transfer) -> Option<HttpStatus> {
        self.reply_body = xfer.reply_body.take();
        self.reply_offset = xfer.reply_offset;
        self.reply_length = xfer.reply_length;
        self.reply_full_length = xfer.reply_full_length;
        self.reply_headers = xfer.reply_headers.take();
        self.reply_retry_after = xfer.reply_retry_after;
        xfer.status_override.take()
    }

    /// Final staging step: validate what the transfer claimed against
    /// what it delivered, then hand the operation to its reply queue.
    pub fn stage_from_active(mut self: Box<Self>) {
        if self.reply_length > 0 {
            // A Content-Range was received and parsed.  There may be no
            // body at all (HEAD requests, protocol violations); when
            // there is one, it has to agree with the header.
            let body_size = self.reply_body.as_ref().map_or(0, |b| b.len()) as u64;
            if body_size != 0 && body_size != self.reply_length {
                self.common.status = HttpStatus::library(LibraryError::InvContentRangeHdr);
            }
        }
        Operation::Request(self).deliver_as_reply();
    }

    /// Cancellation path shared by the policy engine, transport and
    /// shutdown: stamp the canceled status and deliver.
    pub fn cancel_and_deliver(mut self: Box<Self>) {
        self.common.status = HttpStatus::library(LibraryError::OpCanceled);
        Operation::Request(self).deliver_as_reply();
    }

    /// Move reply data into a response for the consumer.
    pub fn fill_response(&mut self, response: &mut HttpResponse) {
        response.set_request_url(std::mem::take(&mut self.url));
        if let Some(body) = self.reply_body.take() {
            response.set_body(body);
        }
        if let Some(headers) = self.reply_headers.take() {
            response.set_headers(headers);
        }
        if self.reply_offset != 0 || self.reply_length != 0 {
            response.set_range(self.reply_offset, self.reply_length, self.reply_full_length);
        }
        response.set_content_type(std::mem::take(&mut self.reply_content_type));
        response.set_retries(self.retries, self.retries_503);
        if let Some(stats) = self.stats {
            response.set_transfer_stats(stats);
        }
    }

}

fn check(result: Result<(), curl::Error>, what: &str) {
    if let Err(err) = result {
        warn!("libcurl error setting {}:  {}", what, err);
    }
}
