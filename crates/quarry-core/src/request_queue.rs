//! Cross-thread request queue: many producers, one worker consumer.
//!
//! One process-wide instance created at service init.  Strict FIFO.
//! Stop-after-flush: once stopped, new adds are refused but anything
//! already queued remains deliverable to the worker.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::constants::REQUEST_WAIT_MAX_MS;
use crate::operation::Operation;

struct State {
    ops: VecDeque<Operation>,
    stopped: bool,
}

pub(crate) struct RequestQueue {
    state: Mutex<State>,
    wakeup: Condvar,
}

static INSTANCE: Mutex<Option<Arc<RequestQueue>>> = Mutex::new(None);

impl RequestQueue {
    fn new() -> RequestQueue {
        RequestQueue {
            state: Mutex::new(State {
                ops: VecDeque::new(),
                stopped: false,
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Create the process-wide instance.  Idempotent.
    pub fn init() -> Arc<RequestQueue> {
        let mut slot = INSTANCE.lock().unwrap();
        if let Some(queue) = slot.as_ref() {
            return Arc::clone(queue);
        }
        let queue = Arc::new(RequestQueue::new());
        *slot = Some(Arc::clone(&queue));
        queue
    }

    /// Drop the process-wide reference.  Outstanding `Arc`s (worker,
    /// producers mid-call) keep the queue alive until they release.
    pub fn term() {
        INSTANCE.lock().unwrap().take();
    }

    pub fn instance() -> Option<Arc<RequestQueue>> {
        INSTANCE.lock().unwrap().as_ref().cloned()
    }

    /// Enqueue an operation.  On a stopped queue the operation is handed
    /// back so the caller can fail it; pair with `LibraryError::ShuttingDown`.
    pub fn add_op(&self, op: Operation) -> Result<(), Operation> {
        let wake = {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return Err(op);
            }
            let was_empty = state.ops.is_empty();
            state.ops.push_back(op);
            was_empty
        };
        if wake {
            self.wakeup.notify_all();
        }
        Ok(())
    }

    /// Dequeue the oldest operation.  With `wait`, blocks (bounded) for
    /// an arrival unless the queue has been stopped.
    pub fn fetch_op(&self, wait: bool) -> Option<Operation> {
        let mut state = self.state.lock().unwrap();
        if wait && state.ops.is_empty() && !state.stopped {
            let (next, _timeout) = self
                .wakeup
                .wait_timeout_while(state, Duration::from_millis(REQUEST_WAIT_MAX_MS), |s| {
                    s.ops.is_empty() && !s.stopped
                })
                .unwrap();
            state = next;
        }
        state.ops.pop_front()
    }

    /// Drain every queued operation into `out`, preserving order.  Wait
    /// semantics match `fetch_op`.
    pub fn fetch_all(&self, wait: bool, out: &mut Vec<Operation>) {
        debug_assert!(out.is_empty());
        let mut state = self.state.lock().unwrap();
        if wait && state.ops.is_empty() && !state.stopped {
            let (next, _timeout) = self
                .wakeup
                .wait_timeout_while(state, Duration::from_millis(REQUEST_WAIT_MAX_MS), |s| {
                    s.ops.is_empty() && !s.stopped
                })
                .unwrap();
            state = next;
        }
        out.extend(state.ops.drain(..));
    }

    /// Refuse further adds and wake any blocked fetchers.  Items already
    /// queued stay fetchable.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.stopped = true;
        }
        self.wakeup.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }
}
