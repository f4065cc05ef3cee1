//! Reply queue: worker producer, facade consumer.
//!
//! One per `HttpRequest` facade.  Never blocks on fetch; the library
//! can't know which consumer thread is interested so consumers poll via
//! `HttpRequest::update()`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::operation::Operation;

pub(crate) struct ReplyQueue {
    ops: Mutex<VecDeque<Operation>>,
    wakeup: Condvar,
}

impl ReplyQueue {
    pub fn new() -> ReplyQueue {
        ReplyQueue {
            ops: Mutex::new(VecDeque::new()),
            wakeup: Condvar::new(),
        }
    }

    pub fn add_op(&self, op: Operation) {
        self.ops.lock().unwrap().push_back(op);
        self.wakeup.notify_all();
    }

    pub fn fetch_op(&self) -> Option<Operation> {
        self.ops.lock().unwrap().pop_front()
    }

    pub fn fetch_all(&self, out: &mut Vec<Operation>) {
        debug_assert!(out.is_empty());
        out.extend(self.ops.lock().unwrap().drain(..));
    }

    pub fn len(&self) -> usize {
        self.ops.lock().unwrap().len()
    }
}

impl Drop for ReplyQueue {
    fn drop(&mut self) {
        // Any undelivered operations are released here; their handles
        // die with them via the operation drop path.
        self.ops.get_mut().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle;

    #[test]
    fn fifo_and_nonblocking() {
        let queue = ReplyQueue::new();
        assert!(queue.fetch_op().is_none());

        let first = Operation::new_noop();
        let second = Operation::new_noop();
        let first_handle = first.handle();
        queue.add_op(first);
        queue.add_op(second);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.fetch_op().unwrap().handle(), first_handle);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drop_releases_queued_handles() {
        let queue = ReplyQueue::new();
        let op = Operation::new_noop();
        let h = op.handle();
        queue.add_op(op);
        assert!(handle::is_live(h));
        drop(queue);
        assert!(!handle::is_live(h));
    }
}
