//! The worker behind the request queue: pulls requests, executes
//! immediates inline, stages the rest through policy and transport, and
//! owns the process-wide service lifecycle.
//!
//! Service, policy and transport exist in a 1:1:1 relationship.  The
//! service owns the policy; the transport is built inside the worker
//! thread and never leaves it.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::warn;

use crate::constants::*;
use crate::handle::HttpHandle;
use crate::handler::PolicyCallback;
use crate::operation::{Operation, SetGetOp};
use crate::options::{PolicyClassId, PolicyOption, GLOBAL_POLICY_ID, INVALID_POLICY_ID};
use crate::policy::Policy;
use crate::request_queue::RequestQueue;
use crate::response::OptionValue;
use crate::status::{HttpStatus, LibraryError};
use crate::transport::Transport;

/// Idling strategies available to the worker loop, ordered so that the
/// minimum of several components' requests is the most conservative.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum LoopSpeed {
    /// Continuous polling of the request, ready and active queues.
    Normal,
    /// Nothing anywhere; may block waiting on the request queue.
    RequestSleep,
}

/// Observable lifecycle of the service.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServiceState {
    NotInitialized,
    /// `create_service` has been called.
    Initialized,
    /// Worker thread created and running.
    Running,
    /// Worker thread has committed to exiting.
    Stopped,
}

const STATE_NOT_INITIALIZED: i32 = -1;
const STATE_INITIALIZED: i32 = 0;
const STATE_RUNNING: i32 = 1;
const STATE_STOPPED: i32 = 2;

static STATE: AtomicI32 = AtomicI32::new(STATE_NOT_INITIALIZED);
static SERVICE: Mutex<Option<Box<HttpService>>> = Mutex::new(None);
static WORKER: Mutex<Option<JoinHandle<()>>> = Mutex::new(None);
// Policy classes existing at thread start; lets consumer threads
// validate class ids after the policy object has moved to the worker.
static CLASS_COUNT: AtomicUsize = AtomicUsize::new(0);

pub(crate) struct HttpService {
    request_queue: Arc<RequestQueue>,
    policy: Policy,
    exit_requested: bool,
}

/// Allowed operations per policy option.
struct OptionDescriptor {
    is_long: bool,
    is_dynamic: bool,
    is_global: bool,
    is_class: bool,
    is_callback: bool,
}

fn descriptor(opt: PolicyOption) -> OptionDescriptor {
    use PolicyOption::*;
    let d = |is_long, is_dynamic, is_global, is_class, is_callback| OptionDescriptor {
        is_long,
        is_dynamic,
        is_global,
        is_class,
        is_callback,
    };
    match opt {
        ConnectionLimit => d(true, true, true, true, false),
        PerHostConnectionLimit => d(true, true, false, true, false),
        CaPath => d(false, false, true, false, false),
        CaFile => d(false, false, true, false, false),
        HttpProxy => d(false, false, true, false, false),
        UseExternalProxy => d(true, false, true, false, false),
        Trace => d(true, false, true, false, false),
        PipeliningDepth => d(true, true, false, true, false),
        ThrottleRate => d(true, true, false, true, false),
        SslVerifyCallback => d(false, false, true, false, true),
    }
}

impl HttpService {
    /// Instantiate the singleton service and the request queue.  Must
    /// precede any other library call; policy classes and static
    /// options are configured between this and `start_thread`.
    pub fn init() -> Result<(), HttpStatus> {
        let mut slot = SERVICE.lock().unwrap();
        if slot.is_some() || state() == ServiceState::Running {
            return Err(HttpStatus::library(LibraryError::InvalidArg));
        }
        let request_queue = RequestQueue::init();
        *slot = Some(Box::new(HttpService {
            request_queue,
            policy: Policy::new(),
            exit_requested: false,
        }));
        CLASS_COUNT.store(1, Ordering::SeqCst);
        STATE.store(STATE_INITIALIZED, Ordering::SeqCst);
        Ok(())
    }

    /// Tear the singleton down.  A still-running worker is asked to
    /// stop and joined first.
    pub fn term() -> Result<(), HttpStatus> {
        if state() == ServiceState::Running {
            if let Some(queue) = RequestQueue::instance() {
                let _ = queue.add_op(Operation::new_stop());
            }
        }
        if let Some(worker) = WORKER.lock().unwrap().take() {
            let _ = worker.join();
        }
        SERVICE.lock().unwrap().take();
        RequestQueue::term();
        CLASS_COUNT.store(0, Ordering::SeqCst);
        STATE.store(STATE_NOT_INITIALIZED, Ordering::SeqCst);
        Ok(())
    }

    /// Launch the worker thread.  Callable once per `init`.
    pub fn start_thread() -> Result<(), HttpStatus> {
        let service = SERVICE
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| HttpStatus::library(LibraryError::InvalidArg))?;
        STATE.store(STATE_RUNNING, Ordering::SeqCst);
        match std::thread::Builder::new()
            .name("quarry-worker".into())
            .spawn(move || service.run())
        {
            Ok(worker) => {
                *WORKER.lock().unwrap() = Some(worker);
                Ok(())
            }
            Err(_) => {
                STATE.store(STATE_INITIALIZED, Ordering::SeqCst);
                Err(HttpStatus::library(LibraryError::BadAlloc))
            }
        }
    }

    /// Run a closure against the not-yet-started service, for policy
    /// class creation and static option configuration.
    pub fn with_instance<R>(
        f: impl FnOnce(&mut HttpService) -> R,
    ) -> Result<R, HttpStatus> {
        let mut slot = SERVICE.lock().unwrap();
        match slot.as_mut() {
            Some(service) => Ok(f(service)),
            None => Err(HttpStatus::library(LibraryError::InvalidArg)),
        }
    }

    pub fn create_policy_class(&mut self) -> PolicyClassId {
        if state() != ServiceState::Initialized {
            return INVALID_POLICY_ID;
        }
        let policy_id = self.policy.create_policy_class();
        if policy_id != INVALID_POLICY_ID {
            CLASS_COUNT.store(self.policy.class_count(), Ordering::SeqCst);
        }
        policy_id
    }

    pub(crate) fn policy_mut(&mut self) -> &mut Policy {
        &mut self.policy
    }

    pub(crate) fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    /// Find a live request on the transport or the policy queues and
    /// cancel it.  Worker thread only.
    pub(crate) fn cancel_by_handle(
        &mut self,
        transport: &mut Transport,
        target: HttpHandle,
    ) -> bool {
        if transport.cancel(target) {
            return true;
        }
        self.policy.cancel(target)
    }

    // ---- option plumbing, shared by the static and dynamic paths ----

    pub(crate) fn set_option_long(
        &mut self,
        transport: Option<&mut Transport>,
        opt: PolicyOption,
        pclass: PolicyClassId,
        value: i64,
    ) -> Result<i64, HttpStatus> {
        let desc = descriptor(opt);
        if !desc.is_long {
            return Err(HttpStatus::library(LibraryError::InvalidArg));
        }
        if pclass == GLOBAL_POLICY_ID {
            if !desc.is_global {
                return Err(HttpStatus::library(LibraryError::InvalidArg));
            }
            self.policy.global.set_long(opt, value)
        } else if self.policy.is_valid_class(pclass) {
            if !desc.is_class {
                return Err(HttpStatus::library(LibraryError::InvalidArg));
            }
            let applied = self.policy.class_options_mut(pclass).set(opt, value)?;
            if let Some(transport) = transport {
                transport.policy_updated(pclass, &mut self.policy);
            }
            Ok(applied)
        } else {
            Err(HttpStatus::library(LibraryError::InvalidArg))
        }
    }

    pub(crate) fn set_option_string(
        &mut self,
        opt: PolicyOption,
        pclass: PolicyClassId,
        value: &str,
    ) -> Result<String, HttpStatus> {
        let desc = descriptor(opt);
        if desc.is_long || desc.is_callback {
            return Err(HttpStatus::library(LibraryError::InvalidArg));
        }
        if pclass != GLOBAL_POLICY_ID || !desc.is_global {
            return Err(HttpStatus::library(LibraryError::InvalidArg));
        }
        self.policy.global.set_string(opt, value)
    }

    pub(crate) fn set_option_callback(
        &mut self,
        opt: PolicyOption,
        pclass: PolicyClassId,
        value: PolicyCallback,
    ) -> Result<(), HttpStatus> {
        let desc = descriptor(opt);
        if !desc.is_callback || pclass != GLOBAL_POLICY_ID {
            return Err(HttpStatus::library(LibraryError::InvalidArg));
        }
        self.policy.global.set_callback(opt, value)
    }

    pub(crate) fn get_option_long(
        &self,
        opt: PolicyOption,
        pclass: PolicyClassId,
    ) -> Result<i64, HttpStatus> {
        let desc = descriptor(opt);
        if !desc.is_long {
            return Err(HttpStatus::library(LibraryError::InvalidArg));
        }
        if pclass == GLOBAL_POLICY_ID {
            self.policy.global.get_long(opt)
        } else if self.policy.is_valid_class(pclass) {
            self.policy.class_options(pclass).get(opt)
        } else {
            Err(HttpStatus::library(LibraryError::InvalidArg))
        }
    }

    pub(crate) fn get_option_string(
        &self,
        opt: PolicyOption,
        pclass: PolicyClassId,
    ) -> Result<String, HttpStatus> {
        if pclass != GLOBAL_POLICY_ID {
            return Err(HttpStatus::library(LibraryError::InvalidArg));
        }
        self.policy.global.get_string(opt)
    }

    /// Dynamic set/get executed on the worker thread on behalf of a
    /// `SetGet` operation.  Non-dynamic options are refused here; they
    /// must be configured before the thread starts.
    pub(crate) fn execute_set_get(&mut self, transport: &mut Transport, op: &mut SetGetOp) {
        let desc = descriptor(op.option);
        if !desc.is_dynamic {
            op.common.status = HttpStatus::library(LibraryError::OptNotDynamic);
            return;
        }
        let result = if op.do_set {
            if let Some(value) = op.long_value {
                self.set_option_long(Some(transport), op.option, op.pclass, value)
                    .map(OptionValue::Long)
            } else if let Some(value) = op.str_value.take() {
                self.set_option_string(op.option, op.pclass, &value)
                    .map(OptionValue::Str)
            } else {
                Err(HttpStatus::library(LibraryError::InvalidArg))
            }
        } else if desc.is_long {
            self.get_option_long(op.option, op.pclass).map(OptionValue::Long)
        } else {
            self.get_option_string(op.option, op.pclass).map(OptionValue::Str)
        };
        match result {
            Ok(value) => op.reply_value = Some(value),
            Err(status) => op.common.status = status,
        }
    }

    // ---- the worker loop ----

    fn run(mut self: Box<Self>) {
        let mut transport = Transport::new();
        transport.start(self.policy.class_count(), &mut self.policy);

        let mut loop_speed = LoopSpeed::Normal;
        loop {
            if self.exit_requested {
                break;
            }
            let request_speed = self.process_request_queue(&mut transport, loop_speed);
            let ready_speed = self.policy.process_ready_queue(&mut transport);
            let transport_speed = transport.process(&mut self.policy);
            loop_speed = request_speed.min(ready_speed).min(transport_speed);

            if loop_speed == LoopSpeed::Normal {
                std::thread::sleep(Duration::from_millis(LOOP_SLEEP_NORMAL_MS));
            }
            // On RequestSleep the blocking wait happens inside the next
            // request-queue fetch.
        }

        self.shutdown(&mut transport);
        STATE.store(STATE_STOPPED, Ordering::SeqCst);
    }

    /// Pull operations off the request queue and stage them.  When the
    /// previous pass found nothing to do anywhere, waits (bounded) for
    /// a request to arrive rather than spinning.
    fn process_request_queue(
        &mut self,
        transport: &mut Transport,
        prior: LoopSpeed,
    ) -> LoopSpeed {
        let mut ops = Vec::new();
        let queue = Arc::clone(&self.request_queue);
        queue.fetch_all(prior == LoopSpeed::RequestSleep, &mut ops);
        let fetched = !ops.is_empty();
        for op in ops {
            op.stage_from_request(self, transport);
        }
        if fetched {
            LoopSpeed::Normal
        } else {
            LoopSpeed::RequestSleep
        }
    }

    /// Orderly exit: refuse new work, flush what's queued, cancel
    /// everything held by policy and transport.
    fn shutdown(&mut self, transport: &mut Transport) {
        self.request_queue.stop();
        let mut ops = Vec::new();
        self.request_queue.fetch_all(false, &mut ops);
        for op in ops {
            match op {
                // Queued requests can't be serviced any more.
                Operation::Request(request) => request.cancel_and_deliver(),
                // A spin would wedge the shutdown path; drop it.
                Operation::Spin(_) => {}
                // Immediates still execute and reply.
                other => other.stage_from_request(self, transport),
            }
        }
        self.policy.shutdown();
        transport.shutdown();
    }
}

pub fn state() -> ServiceState {
    match STATE.load(Ordering::SeqCst) {
        STATE_INITIALIZED => ServiceState::Initialized,
        STATE_RUNNING => ServiceState::Running,
        STATE_STOPPED => ServiceState::Stopped,
        _ => ServiceState::NotInitialized,
    }
}

/// Whether the worker thread has committed to exiting.  The transition
/// is made by the worker itself, so a consumer may briefly observe a
/// stale `Running`.
pub fn is_stopped() -> bool {
    state() == ServiceState::Stopped
}

/// Whether a policy class id names a class that existed at (or before)
/// thread start.  Usable from any thread.
pub(crate) fn is_known_class(policy_id: PolicyClassId) -> bool {
    (policy_id as usize) < CLASS_COUNT.load(Ordering::SeqCst)
}

pub(crate) fn warn_if_running(context: &str) {
    if state() == ServiceState::Running {
        warn!("{} called while the service thread is running", context);
    }
}
