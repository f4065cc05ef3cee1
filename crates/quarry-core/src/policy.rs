//! Policy engine: per-class admission, throttling, retry scheduling and
//! completion dispatch.
//!
//! Threading: worker thread only, except construction and pre-start
//! configuration which happen before the worker exists.

use log::{debug, info, warn};

use crate::constants::*;
use crate::handle::{self, HttpHandle, OpStage};
use crate::op_request::RequestOp;
use crate::options::{PolicyClassId, INVALID_POLICY_ID};
use crate::policy_class::PolicyClass;
use crate::policy_global::PolicyGlobal;
use crate::service::LoopSpeed;
use crate::status::HttpStatus;
use crate::transport::Transport;

/// Runtime state for one policy class: its queues, options and
/// throttle accounting.
pub(crate) struct ClassState {
    pub ready: crate::ready_queue::ReadyQueue,
    pub retry: crate::retry_queue::RetryQueue,
    pub options: PolicyClass,
    throttle_end: HttpTime,
    throttle_left: i64,
    request_count: i64,
    stall_staging: bool,
}

impl ClassState {
    fn new() -> ClassState {
        ClassState {
            ready: crate::ready_queue::ReadyQueue::new(),
            retry: crate::retry_queue::RetryQueue::new(),
            options: PolicyClass::default(),
            throttle_end: 0,
            throttle_left: 0,
            request_count: 0,
            stall_staging: false,
        }
    }
}

pub(crate) struct Policy {
    pub global: PolicyGlobal,
    classes: Vec<ClassState>,
}

impl Policy {
    /// Created with the default catch-all class in place.
    pub fn new() -> Policy {
        Policy {
            global: PolicyGlobal::new(),
            classes: vec![ClassState::new()],
        }
    }

    pub fn create_policy_class(&mut self) -> PolicyClassId {
        if self.classes.len() >= POLICY_CLASS_LIMIT {
            return INVALID_POLICY_ID;
        }
        self.classes.push(ClassState::new());
        (self.classes.len() - 1) as PolicyClassId
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn is_valid_class(&self, policy_id: PolicyClassId) -> bool {
        (policy_id as usize) < self.classes.len()
    }

    pub fn class_options(&self, policy_id: PolicyClassId) -> &PolicyClass {
        &self.classes[policy_id as usize].options
    }

    pub fn class_options_mut(&mut self, policy_id: PolicyClassId) -> &mut PolicyClass {
        &mut self.classes[policy_id as usize].options
    }

    /// Queued requests pending for a class, across ready and retry.
    pub fn ready_count(&self, policy_id: PolicyClassId) -> usize {
        let state = &self.classes[policy_id as usize];
        state.ready.len() + state.retry.len()
    }

    /// Accept a freshly submitted request into its class's ready queue.
    pub fn add_op(&mut self, mut op: Box<RequestOp>) {
        let class = op.common.policy_id as usize;
        if class >= self.classes.len() {
            // The facade validates class ids; reaching here means a
            // broken invariant, but fail the request rather than the
            // worker.
            warn!(
                "request {} submitted into unknown policy class {}",
                op.common.handle, class
            );
            op.common.status = HttpStatus::library(crate::status::LibraryError::InvalidArg);
            crate::operation::Operation::Request(op).deliver_as_reply();
            return;
        }
        op.retries = 0;
        op.retries_503 = 0;
        handle::relocate(op.common.handle, OpStage::Ready);
        self.classes[class].ready.push(op);
    }

    /// Schedule a failed request for another attempt with geometric
    /// backoff, the server's Retry-After overriding when it falls in
    /// the sanity window.
    pub fn retry_op(&mut self, mut op: Box<RequestOp>) {
        let now = now_usecs();
        let class = op.common.policy_id as usize;

        let factor: u64 = if op.retries <= 10 { 1 << op.retries } else { 1024 };
        let mut delta = op.min_backoff.saturating_mul(factor).min(op.max_backoff);
        let external = op.reply_retry_after > RETRY_AFTER_OVERRIDE_MIN
            && op.reply_retry_after < RETRY_AFTER_OVERRIDE_MAX;
        if external {
            delta = u64::from(op.reply_retry_after) * 1_000_000;
        }
        op.retry_at = now + delta;
        op.retries += 1;
        if op.common.status == HttpStatus::from_http(503) {
            op.retries_503 += 1;
        }
        debug!(
            "HTTP request {} retry {} scheduled in {} mS ({}).  Status:  {}",
            op.common.handle,
            op.retries,
            delta / 1000,
            if external { "external" } else { "internal" },
            op.common.status.to_terse_string()
        );
        if op.common.tracing > TRACE_OFF {
            info!(
                "TRACE, ToRetryQueue, Handle:  {}, Delta:  {}, Retries:  {}",
                op.common.handle,
                delta / 1000,
                op.retries
            );
        }
        handle::relocate(op.common.handle, OpStage::Retry);
        self.classes[class].retry.push(op);
    }

    /// Attempt to deliver requests to the transport layer.
    ///
    /// Serves each policy class with available capacity, retry queue
    /// first for requests that have waited long enough, then the ready
    /// queue.  Implements the client-side request-rate throttle.  When
    /// every queue is empty the worker may sleep hard; otherwise normal
    /// polling continues.
    pub fn process_ready_queue(&mut self, transport: &mut Transport) -> LoopSpeed {
        let now = now_usecs();
        let mut result = LoopSpeed::RequestSleep;
        let Policy { global, classes } = self;

        for (class_id, state) in classes.iter_mut().enumerate() {
            if state.stall_staging {
                // Stalling, but don't sleep: transport options are
                // waiting to be applied and we need to keep servicing
                // completions to get there.
                result = LoopSpeed::Normal;
                continue;
            }
            if state.retry.is_empty() && state.ready.is_empty() {
                continue;
            }

            let throttle_enabled = state.options.throttle_rate > 0;
            if throttle_enabled && now < state.throttle_end && state.throttle_left <= 0 {
                // Window exhausted; revisit this class after rollover.
                result = LoopSpeed::Normal;
                continue;
            }

            let active = i64::from(transport.active_count_in_class(class_id as PolicyClassId));
            let mut needed = state.options.active_limit() - active;

            while needed > 0 {
                let op = match state.retry.pop_ready(now) {
                    Some(op) => op,
                    None => match state.ready.pop() {
                        Some(op) => op,
                        None => break,
                    },
                };
                transport.add_op(op, global, &state.options);
                state.request_count += 1;
                needed -= 1;

                if throttle_enabled {
                    if now >= state.throttle_end {
                        debug!(
                            "throttle window rolled with {} requests to go and {} issued",
                            state.throttle_left, state.request_count
                        );
                        state.throttle_left = state.options.throttle_rate;
                        state.throttle_end = now + THROTTLE_WINDOW_USECS;
                    }
                    state.throttle_left -= 1;
                    if state.throttle_left <= 0 {
                        break;
                    }
                }
            }

            if !state.ready.is_empty() || !state.retry.is_empty() {
                result = LoopSpeed::Normal;
            }
        }

        result
    }

    /// Retry or finalize a request the transport just completed.
    /// Returns true when the request went back on a retry queue and is
    /// therefore still live inside the service.
    pub fn stage_after_completion(&mut self, op: Box<RequestOp>) -> bool {
        if op.common.status.is_failure()
            && op.retries < op.retry_limit
            && op.common.status.is_retryable()
        {
            self.retry_op(op);
            return true;
        }

        if op.common.status.is_failure() {
            warn!(
                "HTTP request {} failed after {} retries.  Reason:  {} ({})",
                op.common.handle,
                op.retries,
                op.common.status,
                op.common.status.to_terse_string()
            );
        } else if op.retries > 0 {
            debug!(
                "HTTP request {} succeeded on retry {}.",
                op.common.handle, op.retries
            );
        }

        op.stage_from_active();
        false
    }

    /// Relocate a queued request under a new priority.  Retry queues
    /// aren't scanned: those are ordered by time, priority is moot.
    pub fn change_priority(&mut self, target: HttpHandle, priority: u32) -> bool {
        for state in self.classes.iter_mut() {
            if let Some(mut op) = state.ready.remove(target) {
                op.common.priority = priority;
                state.ready.push(op);
                return true;
            }
        }
        false
    }

    /// Cancel a request still waiting on a retry or ready queue.
    pub fn cancel(&mut self, target: HttpHandle) -> bool {
        for state in self.classes.iter_mut() {
            if let Some(op) = state.retry.remove(target) {
                op.cancel_and_deliver();
                return true;
            }
            if let Some(op) = state.ready.remove(target) {
                op.cancel_and_deliver();
                return true;
            }
        }
        false
    }

    /// Toggle promotion for a class while transport options are being
    /// changed.  Returns the previous setting.
    pub fn stall_class(&mut self, policy_id: PolicyClassId, stall: bool) -> bool {
        let class = policy_id as usize;
        if class < self.classes.len() {
            let prior = self.classes[class].stall_staging;
            self.classes[class].stall_staging = stall;
            prior
        } else {
            false
        }
    }

    /// Cancel everything still queued.  Runs on worker exit before the
    /// transport's own shutdown.
    pub fn shutdown(&mut self) {
        for state in self.classes.iter_mut() {
            while let Some(op) = state.retry.pop() {
                op.cancel_and_deliver();
            }
            while let Some(op) = state.ready.pop() {
                op.cancel_and_deliver();
            }
        }
    }
}
