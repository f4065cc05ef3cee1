//! Operation handles and the process-wide handle registry.
//!
//! Every operation gets a unique handle at construction.  The registry
//! tracks which station of the pipeline currently owns the operation;
//! entries are dropped when the operation itself is destroyed, so a
//! lookup answers "is this handle still live" without keeping the
//! operation alive.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use dashmap::DashMap;

/// Opaque token identifying a queued operation for its lifetime.  The
/// invalid value is returned when a request fails to queue; fetch the
/// actual failure with `HttpRequest::get_status()`.  After the handler
/// for an operation returns, its handle is dead and may be recycled.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HttpHandle(u64);

/// Returned when a request could not be queued.
pub const INVALID_HANDLE: HttpHandle = HttpHandle(0);

impl Default for HttpHandle {
    fn default() -> Self {
        INVALID_HANDLE
    }
}

impl HttpHandle {
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    pub(crate) fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn from_u64(raw: u64) -> HttpHandle {
        HttpHandle(raw)
    }
}

impl fmt::Display for HttpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for HttpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HttpHandle({:#x})", self.0)
    }
}

/// Station of the pipeline that currently owns an operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpStage {
    /// Constructed, not yet queued.
    New,
    /// On the cross-thread request queue.
    RequestQueue,
    /// On a policy class ready queue.
    Ready,
    /// On a policy class retry queue.
    Retry,
    /// With the transport, I/O in flight.
    Active,
    /// On a reply queue awaiting the consumer's pump.
    Reply,
}

fn registry() -> &'static DashMap<HttpHandle, OpStage> {
    static REGISTRY: OnceLock<DashMap<HttpHandle, OpStage>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

/// Mint a fresh process-wide unique handle and register it.
pub(crate) fn mint() -> HttpHandle {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    let handle = HttpHandle(NEXT.fetch_add(1, Ordering::Relaxed));
    registry().insert(handle, OpStage::New);
    handle
}

/// Record a stage transition for a live handle.
pub(crate) fn relocate(handle: HttpHandle, stage: OpStage) {
    if let Some(mut entry) = registry().get_mut(&handle) {
        *entry = stage;
    }
}

/// Drop the registry entry.  Called when the operation is destroyed.
pub(crate) fn release(handle: HttpHandle) {
    registry().remove(&handle);
}

/// Current station of a live operation, or `None` once it is gone.
pub fn resolve(handle: HttpHandle) -> Option<OpStage> {
    registry().get(&handle).map(|entry| *entry)
}

/// Whether the handle still names a live operation.
pub fn is_live(handle: HttpHandle) -> bool {
    registry().contains_key(&handle)
}
