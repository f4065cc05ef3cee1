//! The unit of work moving through the request pipeline.
//!
//! Operations come in two kinds.  Immediate operations (no-op, stop,
//! cancel, set-priority, set/get-option, spin) are executed by the
//! worker straight off the request queue and bounce directly to the
//! reply queue.  Queued operations (HTTP requests) progress through the
//! ready queue, the transport's active set and then the reply queue.
//!
//! Each stage transition transfers ownership: the outgoing container
//! gives the operation up, the incoming one takes it.  The operation's
//! registry entry dies with the operation itself.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::constants::{now_usecs, HttpTime, TRACE_OFF};
use crate::handle::{self, HttpHandle, OpStage};
use crate::handler::HandlerPtr;
use crate::op_request::RequestOp;
use crate::options::{PolicyClassId, PolicyOption, DEFAULT_POLICY_ID};
use crate::reply_queue::ReplyQueue;
use crate::request_queue::RequestQueue;
use crate::response::{HttpResponse, OptionValue};
use crate::service::HttpService;
use crate::status::{HttpStatus, LibraryError};
use crate::transport::Transport;

/// State common to every operation variant.
pub(crate) struct OpCommon {
    pub handle: HttpHandle,
    pub policy_id: PolicyClassId,
    pub priority: u32,
    pub reply_queue: Option<Arc<ReplyQueue>>,
    pub handler: Option<HandlerPtr>,
    pub status: HttpStatus,
    pub tracing: i64,
    pub created: HttpTime,
}

impl OpCommon {
    pub fn new() -> OpCommon {
        OpCommon {
            handle: handle::mint(),
            policy_id: DEFAULT_POLICY_ID,
            priority: 0,
            reply_queue: None,
            handler: None,
            status: HttpStatus::success(),
            tracing: TRACE_OFF,
            created: now_usecs(),
        }
    }

    /// Bind the reply queue and optional completion handler.  Called on
    /// the consumer thread before the operation is enqueued; the worker
    /// carries the handler but never invokes it.
    pub fn set_reply_path(&mut self, reply_queue: Arc<ReplyQueue>, handler: Option<HandlerPtr>) {
        self.reply_queue = Some(reply_queue);
        self.handler = handler;
    }
}

impl Drop for OpCommon {
    fn drop(&mut self) {
        handle::release(self.handle);
    }
}

/// Cancel a previously issued request, active or queued.  A completed
/// request can't be canceled; this operation then finishes with
/// `HandleNotFound` while the target delivers its original result.
pub(crate) struct CancelOp {
    pub common: OpCommon,
    pub target: HttpHandle,
}

/// Relocate a queued request under a new priority.
pub(crate) struct SetPriorityOp {
    pub common: OpCommon,
    pub target: HttpHandle,
    pub priority: u32,
}

/// Set or get a dynamic policy option on the worker thread.
pub(crate) struct SetGetOp {
    pub common: OpCommon,
    pub option: PolicyOption,
    pub pclass: PolicyClassId,
    pub do_set: bool,
    pub long_value: Option<i64>,
    pub str_value: Option<String>,
    pub reply_value: Option<OptionValue>,
}

/// Ask the worker to finish current work, release shared resources and
/// exit.  Does generate a reply.
pub(crate) struct StopOp {
    pub common: OpCommon,
}

/// Do-nothing loopback used for synchronization and testing.
pub(crate) struct NoOp {
    pub common: OpCommon,
}

/// Test-only: put the worker into a spin.  Mode 0 spins hard in place,
/// mode 1 requeues itself continuously.
pub(crate) struct SpinOp {
    pub common: OpCommon,
    pub mode: u32,
}

pub(crate) enum Operation {
    Request(Box<RequestOp>),
    Cancel(CancelOp),
    SetPriority(SetPriorityOp),
    SetGet(SetGetOp),
    Stop(StopOp),
    NoOp(NoOp),
    Spin(SpinOp),
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Operation::Request(_) => "Request",
            Operation::Cancel(_) => "Cancel",
            Operation::SetPriority(_) => "SetPriority",
            Operation::SetGet(_) => "SetGet",
            Operation::Stop(_) => "Stop",
            Operation::NoOp(_) => "NoOp",
            Operation::Spin(_) => "Spin",
        };
        f.debug_tuple(variant).finish()
    }
}

impl Operation {
    pub fn new_noop() -> Operation {
        Operation::NoOp(NoOp {
            common: OpCommon::new(),
        })
    }

    pub fn new_stop() -> Operation {
        Operation::Stop(StopOp {
            common: OpCommon::new(),
        })
    }

    pub fn new_cancel(target: HttpHandle) -> Operation {
        Operation::Cancel(CancelOp {
            common: OpCommon::new(),
            target,
        })
    }

    pub fn new_set_priority(target: HttpHandle, priority: u32) -> Operation {
        Operation::SetPriority(SetPriorityOp {
            common: OpCommon::new(),
            target,
            priority,
        })
    }

    pub fn new_spin(mode: u32) -> Operation {
        Operation::Spin(SpinOp {
            common: OpCommon::new(),
            mode,
        })
    }

    pub fn new_set(option: PolicyOption, pclass: PolicyClassId, value: OptionValue) -> Operation {
        let (long_value, str_value) = match value {
            OptionValue::Long(v) => (Some(v), None),
            OptionValue::Str(v) => (None, Some(v)),
        };
        Operation::SetGet(SetGetOp {
            common: OpCommon::new(),
            option,
            pclass,
            do_set: true,
            long_value,
            str_value,
            reply_value: None,
        })
    }

    pub fn new_get(option: PolicyOption, pclass: PolicyClassId) -> Operation {
        Operation::SetGet(SetGetOp {
            common: OpCommon::new(),
            option,
            pclass,
            do_set: false,
            long_value: None,
            str_value: None,
            reply_value: None,
        })
    }

    pub fn common(&self) -> &OpCommon {
        match self {
            Operation::Request(op) => &op.common,
            Operation::Cancel(op) => &op.common,
            Operation::SetPriority(op) => &op.common,
            Operation::SetGet(op) => &op.common,
            Operation::Stop(op) => &op.common,
            Operation::NoOp(op) => &op.common,
            Operation::Spin(op) => &op.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut OpCommon {
        match self {
            Operation::Request(op) => &mut op.common,
            Operation::Cancel(op) => &mut op.common,
            Operation::SetPriority(op) => &mut op.common,
            Operation::SetGet(op) => &mut op.common,
            Operation::Stop(op) => &mut op.common,
            Operation::NoOp(op) => &mut op.common,
            Operation::Spin(op) => &mut op.common,
        }
    }

    pub fn handle(&self) -> HttpHandle {
        self.common().handle
    }

    /// First staging step, on the worker thread, straight off the
    /// request queue.  Requests head for the policy ready queues;
    /// everything else executes inline and replies immediately.
    pub fn stage_from_request(self, svc: &mut HttpService, transport: &mut Transport) {
        match self {
            Operation::Request(op) => {
                svc.policy_mut().add_op(op);
            }
            Operation::Cancel(mut op) => {
                if !svc.cancel_by_handle(transport, op.target) {
                    op.common.status = HttpStatus::library(LibraryError::HandleNotFound);
                }
                Operation::Cancel(op).deliver_as_reply();
            }
            Operation::SetPriority(mut op) => {
                if !svc.policy_mut().change_priority(op.target, op.priority) {
                    op.common.status = HttpStatus::library(LibraryError::HandleNotFound);
                }
                Operation::SetPriority(op).deliver_as_reply();
            }
            Operation::SetGet(mut op) => {
                svc.execute_set_get(transport, &mut op);
                Operation::SetGet(op).deliver_as_reply();
            }
            Operation::Stop(op) => {
                svc.request_exit();
                Operation::Stop(op).deliver_as_reply();
            }
            Operation::NoOp(op) => {
                Operation::NoOp(op).deliver_as_reply();
            }
            Operation::Spin(op) => match op.mode {
                1 => {
                    if let Some(queue) = RequestQueue::instance() {
                        let _ = queue.add_op(Operation::Spin(op));
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                _ => loop {
                    std::hint::spin_loop();
                },
            },
        }
    }

    /// Hand the finished operation to its reply queue.  Without a reply
    /// path the operation simply dies here, releasing its handle.
    pub fn deliver_as_reply(mut self) {
        handle::relocate(self.handle(), OpStage::Reply);
        if self.common().tracing > TRACE_OFF {
            info!(
                "TRACE, ToReplyQueue, Handle:  {}, Status:  {}",
                self.handle(),
                self.common().status.to_terse_string()
            );
        }
        if let Some(queue) = self.common_mut().reply_queue.take() {
            queue.add_op(self);
        }
    }

    /// Consumer-side completion dispatch, called from
    /// `HttpRequest::update()`.  Builds the response and invokes the
    /// handler; afterwards the operation (and its handle) is gone.
    pub fn visit_notifier(mut self) {
        let op_handle = self.handle();
        let Some(handler) = self.common_mut().handler.take() else {
            return;
        };
        let mut response = HttpResponse::default();
        response.set_status(self.common().status.clone());
        match &mut self {
            Operation::Request(op) => op.fill_response(&mut response),
            Operation::SetGet(op) => {
                if let Some(value) = op.reply_value.take() {
                    response.set_option_value(value);
                }
            }
            _ => {}
        }
        handler.on_completed(op_handle, &mut response);
    }
}
