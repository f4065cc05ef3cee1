//! Policy-class HTTP request scheduler for high-volume interactive
//! clients.
//!
//! The library services HTTP requests on a single private worker
//! thread: consumers submit work through [`HttpRequest`], the worker
//! stages each request through per-class ready/retry queues and a
//! libcurl multi transport, and completions come back through handler
//! callbacks pumped by [`HttpRequest::update`].  Policy classes bound
//! concurrency, enable pipelining and throttle request rates
//! independently per traffic type.
//!
//! Minimal use looks like:
//!
//! ```no_run
//! use std::sync::Arc;
//! use quarry_core::{HttpRequest, HttpHandler, HttpResponse, HttpHandle};
//!
//! struct Print;
//! impl HttpHandler for Print {
//!     fn on_completed(&self, _handle: HttpHandle, response: &mut HttpResponse) {
//!         println!("done: {}", response.status().to_terse_string());
//!     }
//! }
//!
//! HttpRequest::create_service().unwrap();
//! HttpRequest::start_thread().unwrap();
//! let mut request = HttpRequest::new();
//! request.request_get(
//!     quarry_core::DEFAULT_POLICY_ID,
//!     0,
//!     "http://example.com/",
//!     None,
//!     None,
//!     Some(Arc::new(Print)),
//! );
//! loop {
//!     request.update(0);
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```

mod buffer;
mod constants;
mod handle;
mod handler;
mod headers;
mod op_request;
mod operation;
mod options;
mod policy;
mod policy_class;
mod policy_global;
mod ready_queue;
mod reply_queue;
mod request;
mod request_queue;
mod response;
mod retry_policy;
mod retry_queue;
mod service;
mod status;
mod transport;
mod xfer;

pub use buffer::{BufferArray, BufferStream, BLOCK_ALLOC_SIZE};
pub use handle::{is_live, resolve, HttpHandle, OpStage, INVALID_HANDLE};
pub use handler::{HandlerPtr, HttpHandler, PolicyCallback};
pub use headers::HeaderList;
pub use options::{
    HttpOptions, PolicyClassId, PolicyOption, DEFAULT_POLICY_ID, GLOBAL_POLICY_ID,
    INVALID_POLICY_ID,
};
pub use request::HttpRequest;
pub use response::{HttpResponse, OptionValue, ResponseRange, TransferStats};
pub use retry_policy::{seconds_until_retry_after, AdaptiveRetryPolicy};
pub use service::{is_stopped, state, ServiceState};
pub use status::{HttpStatus, LibraryError, StatusDomain};
