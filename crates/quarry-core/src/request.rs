//! Consumer-side entry point into the request services.
//!
//! An instance may only be used by one application thread, but a thread
//! may have as many instances as it likes.  Global setup is a few
//! calls: `create_service()`, policy configuration, `start_thread()`.
//! After that, requests queue to the worker and complete
//! asynchronously; consumers pump `update()` to receive handler
//! callbacks.

use std::sync::Arc;

use crate::buffer::BufferArray;
use crate::constants::now_usecs;
use crate::handle::{self, HttpHandle, OpStage, INVALID_HANDLE};
use crate::handler::{HandlerPtr, PolicyCallback};
use crate::headers::HeaderList;
use crate::op_request::RequestOp;
use crate::operation::Operation;
use crate::options::{HttpOptions, PolicyClassId, PolicyOption, INVALID_POLICY_ID};
use crate::reply_queue::ReplyQueue;
use crate::request_queue::RequestQueue;
use crate::response::OptionValue;
use crate::service::{self, HttpService};
use crate::status::{HttpStatus, LibraryError};

/// Portal into runtime services for one consumer.
///
/// Some calls expect to succeed as the normal part of operation and
/// return a handle rather than a status; when such a call returns
/// `INVALID_HANDLE`, the failure detail is available from
/// `get_status()`.
pub struct HttpRequest {
    reply_queue: Arc<ReplyQueue>,
    last_status: HttpStatus,
}

impl Default for HttpRequest {
    fn default() -> Self {
        HttpRequest::new()
    }
}

impl HttpRequest {
    pub fn new() -> HttpRequest {
        HttpRequest {
            reply_queue: Arc::new(ReplyQueue::new()),
            last_status: HttpStatus::success(),
        }
    }

    // ---- process-wide lifecycle ----

    /// Initialization to be called before queueing any requests.
    /// Doesn't start the worker thread; policy setup happens after
    /// this and before `start_thread`.
    pub fn create_service() -> Result<(), HttpStatus> {
        HttpService::init()
    }

    /// Mostly-clean shutdown of services prior to exit.  A running
    /// worker is stopped and joined first.
    pub fn destroy_service() -> Result<(), HttpStatus> {
        HttpService::term()
    }

    /// Called once after `create_service` to launch the worker.
    pub fn start_thread() -> Result<(), HttpStatus> {
        HttpService::start_thread()
    }

    /// Create a new policy class for requests.  All class creation must
    /// occur before the worker starts; afterwards (or past the class
    /// limit) `INVALID_POLICY_ID` is returned and the caller must fall
    /// back to the default class.
    pub fn create_policy_class() -> PolicyClassId {
        HttpService::with_instance(|svc| svc.create_policy_class())
            .unwrap_or(INVALID_POLICY_ID)
    }

    /// Set a long policy option at startup time (prior to thread
    /// start).  Returns the effective value after clamping.
    pub fn set_static_policy_option(
        opt: PolicyOption,
        pclass: PolicyClassId,
        value: i64,
    ) -> Result<i64, HttpStatus> {
        service::warn_if_running("set_static_policy_option");
        HttpService::with_instance(|svc| svc.set_option_long(None, opt, pclass, value))?
    }

    /// String flavor of `set_static_policy_option`.
    pub fn set_static_policy_option_string(
        opt: PolicyOption,
        pclass: PolicyClassId,
        value: &str,
    ) -> Result<String, HttpStatus> {
        service::warn_if_running("set_static_policy_option_string");
        HttpService::with_instance(|svc| svc.set_option_string(opt, pclass, value))?
    }

    /// Callback flavor of `set_static_policy_option`, for the SSL
    /// verification hook.
    pub fn set_static_policy_option_callback(
        opt: PolicyOption,
        pclass: PolicyClassId,
        value: PolicyCallback,
    ) -> Result<(), HttpStatus> {
        service::warn_if_running("set_static_policy_option_callback");
        HttpService::with_instance(|svc| svc.set_option_callback(opt, pclass, value))?
    }

    /// Dynamically change a policy option on the running service.  The
    /// set executes on the worker; completion arrives via the handler.
    /// Only options marked dynamic are honored.
    pub fn set_policy_option(
        &mut self,
        opt: PolicyOption,
        pclass: PolicyClassId,
        value: OptionValue,
        handler: Option<HandlerPtr>,
    ) -> HttpHandle {
        self.queue_op(Operation::new_set(opt, pclass, value), handler)
    }

    /// Dynamically read a policy option; the value is delivered on the
    /// completion's `HttpResponse::option_value`.
    pub fn get_policy_option(
        &mut self,
        opt: PolicyOption,
        pclass: PolicyClassId,
        handler: Option<HandlerPtr>,
    ) -> HttpHandle {
        self.queue_op(Operation::new_get(opt, pclass), handler)
    }

    // ---- request methods ----

    /// Status of the most recent failing method invocation on this
    /// instance.
    pub fn get_status(&self) -> HttpStatus {
        self.last_status.clone()
    }

    /// Queue a full HTTP GET for an entire entity.
    pub fn request_get(
        &mut self,
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
        handler: Option<HandlerPtr>,
    ) -> HttpHandle {
        if !self.check_class(policy_id) {
            return INVALID_HANDLE;
        }
        let op = RequestOp::setup_get(policy_id, priority, url, options, headers);
        self.queue_op(Operation::Request(op), handler)
    }

    /// Queue an HTTP GET with a `Range` header covering `[offset,
    /// offset+len)`; a zero `len` means from `offset` to the end.
    pub fn request_get_byte_range(
        &mut self,
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        offset: u64,
        len: u64,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
        handler: Option<HandlerPtr>,
    ) -> HttpHandle {
        if !self.check_class(policy_id) {
            return INVALID_HANDLE;
        }
        let op =
            RequestOp::setup_get_byte_range(policy_id, priority, url, offset, len, options, headers);
        self.queue_op(Operation::Request(op), handler)
    }

    /// Queue a full HTTP POST.  Caller is responsible for escaping and
    /// encoding and communicating the content types.
    pub fn request_post(
        &mut self,
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        body: Arc<BufferArray>,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
        handler: Option<HandlerPtr>,
    ) -> HttpHandle {
        if !self.check_class(policy_id) {
            return INVALID_HANDLE;
        }
        let op = RequestOp::setup_post(policy_id, priority, url, body, options, headers);
        self.queue_op(Operation::Request(op), handler)
    }

    /// Queue a full HTTP PUT.
    pub fn request_put(
        &mut self,
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        body: Arc<BufferArray>,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
        handler: Option<HandlerPtr>,
    ) -> HttpHandle {
        if !self.check_class(policy_id) {
            return INVALID_HANDLE;
        }
        let op = RequestOp::setup_put(policy_id, priority, url, body, options, headers);
        self.queue_op(Operation::Request(op), handler)
    }

    /// Queue a full HTTP PATCH.
    pub fn request_patch(
        &mut self,
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        body: Arc<BufferArray>,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
        handler: Option<HandlerPtr>,
    ) -> HttpHandle {
        if !self.check_class(policy_id) {
            return INVALID_HANDLE;
        }
        let op = RequestOp::setup_patch(policy_id, priority, url, body, options, headers);
        self.queue_op(Operation::Request(op), handler)
    }

    /// Queue a full HTTP DELETE.
    pub fn request_delete(
        &mut self,
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
        handler: Option<HandlerPtr>,
    ) -> HttpHandle {
        if !self.check_class(policy_id) {
            return INVALID_HANDLE;
        }
        let op = RequestOp::setup_delete(policy_id, priority, url, options, headers);
        self.queue_op(Operation::Request(op), handler)
    }

    /// Queue a WebDAV-style COPY.
    pub fn request_copy(
        &mut self,
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
        handler: Option<HandlerPtr>,
    ) -> HttpHandle {
        if !self.check_class(policy_id) {
            return INVALID_HANDLE;
        }
        let op = RequestOp::setup_copy(policy_id, priority, url, options, headers);
        self.queue_op(Operation::Request(op), handler)
    }

    /// Queue a WebDAV-style MOVE.
    pub fn request_move(
        &mut self,
        policy_id: PolicyClassId,
        priority: u32,
        url: &str,
        options: Option<Arc<HttpOptions>>,
        headers: Option<Arc<HeaderList>>,
        handler: Option<HandlerPtr>,
    ) -> HttpHandle {
        if !self.check_class(policy_id) {
            return INVALID_HANDLE;
        }
        let op = RequestOp::setup_move(policy_id, priority, url, options, headers);
        self.queue_op(Operation::Request(op), handler)
    }

    // ---- request management ----

    /// Ask that a previously issued request be canceled, whether
    /// queued or mid-transaction.  Two completions follow: one for the
    /// target (canceled status, if the cancel won the race) and one for
    /// this operation.
    pub fn request_cancel(&mut self, target: HttpHandle, handler: Option<HandlerPtr>) -> HttpHandle {
        self.queue_op(Operation::new_cancel(target), handler)
    }

    /// Ask that a previously issued request be reprioritized.  Whether
    /// the change took effect arrives via notification.
    pub fn request_set_priority(
        &mut self,
        target: HttpHandle,
        priority: u32,
        handler: Option<HandlerPtr>,
    ) -> HttpHandle {
        self.queue_op(Operation::new_set_priority(target, priority), handler)
    }

    /// Queue a no-op; the worker bounces it straight back.  Useful for
    /// synchronization and testing.
    pub fn request_no_op(&mut self, handler: Option<HandlerPtr>) -> HttpHandle {
        self.queue_op(Operation::new_noop(), handler)
    }

    /// Ask the worker thread to stop processing and exit.  It drains
    /// what it holds (delivering cancels), releases shared resources
    /// and returns to the OS; a reply for this operation is queued
    /// first.
    pub fn request_stop_thread(&mut self, handler: Option<HandlerPtr>) -> HttpHandle {
        self.queue_op(Operation::new_stop(), handler)
    }

    /// DEBUG/TESTING ONLY.  Put the worker into a CPU spin: mode 0
    /// spins hard, mode 1 requeues itself continuously.
    pub fn request_spin(&mut self, mode: u32) -> HttpHandle {
        self.queue_op(Operation::new_spin(mode), None)
    }

    /// Pump completion notifications on the consumer thread.  Handlers
    /// for completed operations run synchronously inside this call.
    /// `usecs` soft-bounds the wallclock spent; `0` runs until the
    /// queue is drained.
    pub fn update(&mut self, usecs: u64) -> HttpStatus {
        let deadline = if usecs > 0 {
            Some(now_usecs() + usecs)
        } else {
            None
        };
        while let Some(op) = self.reply_queue.fetch_op() {
            op.visit_notifier();
            if let Some(deadline) = deadline {
                if now_usecs() >= deadline {
                    break;
                }
            }
        }
        HttpStatus::success()
    }

    // ---- internals ----

    fn check_class(&mut self, policy_id: PolicyClassId) -> bool {
        if service::is_known_class(policy_id) {
            true
        } else {
            self.last_status = HttpStatus::library(LibraryError::InvalidArg);
            false
        }
    }

    fn queue_op(&mut self, mut op: Operation, handler: Option<HandlerPtr>) -> HttpHandle {
        op.common_mut()
            .set_reply_path(Arc::clone(&self.reply_queue), handler);
        let queued_handle = op.handle();
        let Some(queue) = RequestQueue::instance() else {
            self.last_status = HttpStatus::library(LibraryError::ShuttingDown);
            return INVALID_HANDLE;
        };
        handle::relocate(queued_handle, OpStage::RequestQueue);
        match queue.add_op(op) {
            Ok(()) => {
                self.last_status = HttpStatus::success();
                queued_handle
            }
            Err(_rejected) => {
                // The op dies here; its handle dies with it.
                self.last_status = HttpStatus::library(LibraryError::ShuttingDown);
                INVALID_HANDLE
            }
        }
    }
}
