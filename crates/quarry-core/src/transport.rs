//! Transport driver: one libcurl multi handle per policy class, the
//! per-class active sets, and a cache of reset easy handles.
//!
//! Threading: worker thread only.

use std::collections::HashMap;

use curl::easy::Easy2;
use curl::multi::{Easy2Handle, Multi};
use log::{info, warn};

use crate::constants::*;
use crate::handle::{self, HttpHandle, OpStage};
use crate::op_request::RequestOp;
use crate::operation::Operation;
use crate::options::PolicyClassId;
use crate::policy::Policy;
use crate::policy_class::PolicyClass;
use crate::policy_global::PolicyGlobal;
use crate::response::TransferStats;
use crate::service::LoopSpeed;
use crate::status::{HttpStatus, LibraryError};
use crate::xfer::Transfer;

/// A request currently attached to a multi handle.
struct ActiveXfer {
    easy: Easy2Handle<Transfer>,
    op: Box<RequestOp>,
}

struct ClassTransport {
    multi: Multi,
    /// Active requests keyed by their operation handle, which doubles
    /// as the per-transfer token on the easy handle.
    active: HashMap<u64, ActiveXfer>,
    /// Option changes arrived while requests were in flight; apply on
    /// quiescence.
    dirty_options: bool,
}

/// Bounded cache of reset easy handles, saving handle setup costs
/// across the request stream.
#[derive(Default)]
struct HandleCache {
    free: Vec<Easy2<Transfer>>,
}

impl HandleCache {
    fn get(&mut self) -> Easy2<Transfer> {
        match self.free.pop() {
            Some(easy) => easy,
            None => Easy2::new(Transfer::default()),
        }
    }

    fn put(&mut self, mut easy: Easy2<Transfer>) {
        easy.reset();
        *easy.get_mut() = Transfer::default();
        if self.free.len() < HANDLE_CACHE_LIMIT {
            self.free.push(easy);
        }
    }
}

pub(crate) struct Transport {
    classes: Vec<ClassTransport>,
    cache: HandleCache,
}

impl Transport {
    pub fn new() -> Transport {
        Transport {
            classes: Vec::new(),
            cache: HandleCache::default(),
        }
    }

    /// One-time start: create a multi handle per policy class and apply
    /// each class's initial options.
    pub fn start(&mut self, policy_count: usize, policy: &mut Policy) {
        assert!(self.classes.is_empty(), "transport started twice");
        for _ in 0..policy_count {
            self.classes.push(ClassTransport {
                multi: Multi::new(),
                active: HashMap::new(),
                dirty_options: false,
            });
        }
        for policy_id in 0..policy_count {
            self.policy_updated(policy_id as PolicyClassId, policy);
        }
    }

    pub fn active_count_in_class(&self, policy_id: PolicyClassId) -> u32 {
        self.classes
            .get(policy_id as usize)
            .map_or(0, |ct| ct.active.len() as u32)
    }

    /// Issue a request: prepare an easy handle, attach it to the
    /// class's multi handle and track it in the active set.  Failures
    /// finalize the request immediately with a failure status.
    pub fn add_op(
        &mut self,
        mut op: Box<RequestOp>,
        global: &PolicyGlobal,
        class_options: &PolicyClass,
    ) {
        let class = op.common.policy_id as usize;
        debug_assert!(class < self.classes.len());

        let mut easy = self.cache.get();
        if let Err(status) = op.prepare(&mut easy, global, class_options) {
            self.cache.put(easy);
            op.common.status = status;
            Operation::Request(op).deliver_as_reply();
            return;
        }

        let token = op.common.handle.as_u64();
        match self.classes[class].multi.add2(easy) {
            Ok(mut easy_handle) => {
                if let Err(err) = easy_handle.set_token(token as usize) {
                    warn!("failed to set transfer token:  {}", err);
                }
                op.transport_active = true;
                handle::relocate(op.common.handle, OpStage::Active);
                if op.common.tracing > TRACE_OFF {
                    info!(
                        "TRACE, ToActiveQueue, Handle:  {}, Actives:  {}",
                        op.common.handle,
                        self.classes[class].active.len() + 1
                    );
                }
                self.classes[class].active.insert(
                    token,
                    ActiveXfer {
                        easy: easy_handle,
                        op,
                    },
                );
            }
            Err(err) => {
                warn!("failed to attach request to multi handle:  {}", err);
                op.common.status = HttpStatus::multi(err.code() as u32);
                Operation::Request(op).deliver_as_reply();
            }
        }
    }

    /// Transport side of cancellation: if the target is active, detach
    /// it, recycle its handle and deliver it canceled.
    pub fn cancel(&mut self, target: HttpHandle) -> bool {
        let raw = target.as_u64();
        let Transport { classes, cache } = self;
        for ct in classes.iter_mut() {
            if let Some(active) = ct.active.remove(&raw) {
                cancel_request(ct, cache, active);
                return true;
            }
        }
        false
    }

    /// Give libcurl cycles, reap completed transfers and dispatch them
    /// through the policy engine.  Applies deferred option changes for
    /// classes that have drained.
    pub fn process(&mut self, policy: &mut Policy) -> LoopSpeed {
        let mut ret = LoopSpeed::RequestSleep;
        let Transport { classes, cache } = self;

        for (class_id, ct) in classes.iter_mut().enumerate() {
            if ct.active.is_empty() {
                // Quiet class: a dirty update can be applied now.
                if ct.dirty_options {
                    apply_or_defer_options(ct, class_id as PolicyClassId, policy);
                }
                continue;
            }

            if let Err(err) = ct.multi.perform() {
                warn!("libcurl multi error during perform:  {}", err);
            }

            let mut done: Vec<(u64, Result<(), curl::Error>)> = Vec::new();
            ct.multi.messages(|msg| match msg.token() {
                Ok(token) => {
                    if let Some(result) = msg.result() {
                        done.push((token as u64, result));
                    }
                }
                Err(err) => {
                    warn!("unable to read completion token from libcurl:  {}", err);
                }
            });

            for (token, result) in done {
                let Some(active) = ct.active.remove(&token) else {
                    warn!(
                        "libcurl completion for request not on active list.  Continuing.  Token:  {:#x}",
                        token
                    );
                    continue;
                };
                complete_request(ct, cache, policy, active, result);
                // Anything completing may free a slot; turning around
                // quickly shrinks the connection gap noticeably.
                ret = LoopSpeed::Normal;
            }
        }

        if classes.iter().any(|ct| !ct.active.is_empty()) {
            ret = LoopSpeed::Normal;
        }
        ret
    }

    /// Apply a class's connection/pipelining options to its multi
    /// handle, or defer until the class drains.  Changing pipelining on
    /// a multi handle with live requests is not tolerated by the
    /// transport, hence the stall protocol: mark dirty, stall staging,
    /// and re-enter here from `process` once the active set is empty.
    pub fn policy_updated(&mut self, policy_id: PolicyClassId, policy: &mut Policy) {
        let class = policy_id as usize;
        if class >= self.classes.len() {
            return;
        }
        apply_or_defer_options(&mut self.classes[class], policy_id, policy);
    }

    /// Cancel every active request and release transport resources.
    pub fn shutdown(&mut self) {
        let Transport { classes, cache } = self;
        for ct in classes.iter_mut() {
            let tokens: Vec<u64> = ct.active.keys().copied().collect();
            for token in tokens {
                if let Some(active) = ct.active.remove(&token) {
                    cancel_request(ct, cache, active);
                }
            }
        }
        classes.clear();
        cache.free.clear();
    }
}

fn apply_or_defer_options(ct: &mut ClassTransport, policy_id: PolicyClassId, policy: &mut Policy) {
    if ct.active.is_empty() {
        let options = policy.class_options(policy_id).clone();
        policy.stall_class(policy_id, false);
        ct.dirty_options = false;

        if options.is_pipelined() {
            check_multi(ct.multi.pipelining(true, false), "PIPELINING");
            check_multi(
                ct.multi.set_pipeline_length(options.pipelining_depth as usize),
                "MAX_PIPELINE_LENGTH",
            );
            check_multi(
                ct.multi
                    .set_max_host_connections(options.per_host_connection_limit as usize),
                "MAX_HOST_CONNECTIONS",
            );
            check_multi(
                ct.multi
                    .set_max_total_connections(options.connection_limit as usize),
                "MAX_TOTAL_CONNECTIONS",
            );
        } else {
            check_multi(ct.multi.pipelining(false, false), "PIPELINING");
            check_multi(ct.multi.set_max_host_connections(0), "MAX_HOST_CONNECTIONS");
            check_multi(
                ct.multi
                    .set_max_total_connections(options.connection_limit as usize),
                "MAX_TOTAL_CONNECTIONS",
            );
        }
    } else if !ct.dirty_options {
        // Mark dirty and stall promotion; once the class runs dry,
        // `process` re-invokes and the idle branch applies the change.
        ct.dirty_options = true;
        policy.stall_class(policy_id, true);
    }
}

/// Detach a canceled request from its multi handle, recycle the easy
/// handle and deliver the operation with a canceled status.  Parallels
/// `complete_request`; keep the two in step.
fn cancel_request(ct: &mut ClassTransport, cache: &mut HandleCache, active: ActiveXfer) {
    let ActiveXfer { easy, mut op } = active;
    op.transport_active = false;

    match ct.multi.remove2(easy) {
        Ok(mut easy) => {
            // Partial reply data still travels with the canceled op.
            let _ = op.absorb_transfer(easy.get_mut());
            cache.put(easy);
        }
        Err(err) => {
            warn!("failed to detach canceled request from multi handle:  {}", err);
        }
    }

    if op.common.tracing > TRACE_OFF {
        info!(
            "TRACE, RequestCanceled, Handle:  {}, Status:  {}",
            op.common.handle,
            HttpStatus::library(LibraryError::OpCanceled).to_terse_string()
        );
    }

    op.cancel_and_deliver();
}

/// Finish one transfer: recover the easy handle, settle the terminal
/// status, recycle the handle and hand the request to the policy
/// engine for retry or delivery.
fn complete_request(
    ct: &mut ClassTransport,
    cache: &mut HandleCache,
    policy: &mut Policy,
    active: ActiveXfer,
    result: Result<(), curl::Error>,
) {
    let ActiveXfer { easy, mut op } = active;

    if !op.transport_active {
        warn!(
            "libcurl handle and request operation in disagreement or inactive request.  Handle:  {}",
            op.common.handle
        );
    }
    debug_assert_eq!(handle::resolve(op.common.handle), Some(OpStage::Active));
    op.transport_active = false;

    match ct.multi.remove2(easy) {
        Ok(mut easy) => {
            let header_status = op.absorb_transfer(easy.get_mut());
            let bytes = easy.get_ref().bytes_received;

            // Settle the terminal status.  A failure noticed during
            // header processing wins; then the transport result; then
            // the HTTP response code, validated before acceptance.
            if op.common.status.is_success() {
                let mut status = header_status.unwrap_or_default();
                if status.is_success() {
                    status = match result {
                        Err(err) => HttpStatus::easy(err.code()),
                        Ok(()) => match easy.response_code() {
                            Ok(code) if (100..=999).contains(&code) => {
                                if let Ok(Some(content_type)) = easy.content_type() {
                                    op.reply_content_type = content_type.to_string();
                                }
                                HttpStatus::from_http(code as u16)
                            }
                            Ok(code) => {
                                warn!(
                                    "invalid HTTP response code ({}) received from server",
                                    code
                                );
                                HttpStatus::library(LibraryError::InvalidHttpStatus)
                            }
                            Err(_) => HttpStatus::library(LibraryError::InvalidHttpStatus),
                        },
                    };
                }
                op.common.status = status;
            }

            let total_time = easy
                .total_time()
                .map(|t| t.as_secs_f64())
                .unwrap_or_default();
            op.stats = Some(TransferStats {
                size_download: bytes,
                total_time,
                speed_download: if total_time > 0.0 {
                    bytes as f64 / total_time
                } else {
                    0.0
                },
            });

            cache.put(easy);
        }
        Err(err) => {
            warn!("failed to detach completed request from multi handle:  {}", err);
            if op.common.status.is_success() {
                op.common.status = HttpStatus::multi(err.code() as u32);
            }
        }
    }

    if op.common.tracing > TRACE_OFF {
        info!(
            "TRACE, RequestComplete, Handle:  {}, Status:  {}, Elapsed:  {} uS",
            op.common.handle,
            op.common.status.to_terse_string(),
            now_usecs() - op.common.created
        );
    }

    policy.stage_after_completion(op);
}

fn check_multi(result: Result<(), curl::MultiError>, what: &str) {
    if let Err(err) = result {
        warn!("libcurl multi error setting {}:  {}", what, err);
    }
}
