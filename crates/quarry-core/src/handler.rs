//! Completion-notification capabilities supplied by consumers.

use std::sync::Arc;

use crate::handle::HttpHandle;
use crate::response::HttpResponse;
use crate::status::HttpStatus;

/// Completion callback interface.
///
/// An instance can be dedicated to one request or shared among any
/// number of them.  `on_completed` runs on the consumer thread, inside
/// `HttpRequest::update()`; callbacks on one facade never interleave.
/// The worker thread carries the capability but never invokes it.
pub trait HttpHandler: Send + Sync {
    /// Called exactly once per completed operation with its final
    /// status and any response data.  The handle becomes invalid the
    /// moment this method returns.
    fn on_completed(&self, handle: HttpHandle, response: &mut HttpResponse);
}

/// Shared handler reference as carried on operations.
pub type HandlerPtr = Arc<dyn HttpHandler>;

/// Per-request SSL certificate verification callback, installed via the
/// `SslVerifyCallback` policy option.  Invoked on the worker thread with
/// the request URL and the request's handler capability; returns a
/// status whose success bit accepts or rejects the connection.  The
/// handler argument is passed through untouched, never invoked.
pub type PolicyCallback =
    Arc<dyn Fn(&str, Option<&HandlerPtr>) -> HttpStatus + Send + Sync>;
