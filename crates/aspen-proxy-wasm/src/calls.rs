//! Correlation of outbound HTTP calls with their responses.
//!
//! The host answers `proxy_http_call` with a token and later delivers the
//! response through a separate `proxy_on_http_call_response` invocation on
//! the root context. Each root keeps a [`PendingCalls`] table mapping tokens
//! to the context that issued the call and the continuation to resume.
//!
//! Every entry leaves the table exactly once: either with a
//! [`CallOutcome::Response`] or, when its origin is torn down first, with
//! [`CallOutcome::Cancelled`]. An origin being torn down is closed first,
//! so its cancellation continuations cannot add entries behind the drain.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::context::Context;
use crate::host::HostContext;

/// How an outbound call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The host delivered a response. Contents are read through the
    /// `HttpCallResponse*` map and buffer types.
    Response {
        num_headers: usize,
        body_size: usize,
        num_trailers: usize,
    },
    /// The originating context went away before a response arrived.
    Cancelled,
}

impl CallOutcome {
    /// `(num_headers, body_size, num_trailers)`; all zero when cancelled.
    pub fn handles(&self) -> (usize, usize, usize) {
        match *self {
            CallOutcome::Response {
                num_headers,
                body_size,
                num_trailers,
            } => (num_headers, body_size, num_trailers),
            CallOutcome::Cancelled => (0, 0, 0),
        }
    }

    /// Whether the origin was torn down before a response arrived.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallOutcome::Cancelled)
    }
}

/// Code resumed when a call completes: origin context, host view, token, outcome.
pub type Continuation = Box<dyn FnOnce(&mut dyn Context, &mut HostContext<'_>, u32, CallOutcome)>;

/// Box a closure as a [`Continuation`].
pub fn continuation<F>(f: F) -> Continuation
where F: FnOnce(&mut dyn Context, &mut HostContext<'_>, u32, CallOutcome) + 'static {
    Box::new(f)
}

/// One in-flight call.
pub struct PendingCall {
    /// Context id that issued the call (a stream or the root itself).
    pub origin: u32,
    continuation: Continuation,
}

impl PendingCall {
    /// Pair an origin context id with the code to run on completion.
    pub fn new(origin: u32, continuation: Continuation) -> Self {
        Self { origin, continuation }
    }

    /// Consume the entry and run its continuation.
    pub fn resume(self, context: &mut dyn Context, cx: &mut HostContext<'_>, token: u32, outcome: CallOutcome) {
        (self.continuation)(context, cx, token, outcome)
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall").field("origin", &self.origin).finish_non_exhaustive()
    }
}

/// Token-keyed table of in-flight calls for one root context.
#[derive(Debug, Default)]
pub struct PendingCalls {
    entries: BTreeMap<u32, PendingCall>,
    closed: BTreeSet<u32>,
    all_closed: bool,
}

impl PendingCalls {
    /// Create an empty table that accepts calls from every origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop accepting calls from `origin` until [`reopen_origin`](Self::reopen_origin).
    pub fn close_origin(&mut self, origin: u32) {
        self.closed.insert(origin);
    }

    /// Accept calls from `origin` again. Context ids are reused by the host.
    pub fn reopen_origin(&mut self, origin: u32) {
        self.closed.remove(&origin);
    }

    /// Stop accepting calls from any origin. The table is being torn down.
    pub fn close_all(&mut self) {
        self.all_closed = true;
    }

    /// Whether a new call from `origin` may be recorded.
    pub fn accepts(&self, origin: u32) -> bool {
        !self.all_closed && !self.closed.contains(&origin)
    }

    /// Record a call. Returns the entry previously stored under `token`, if any.
    pub fn insert(&mut self, token: u32, call: PendingCall) -> Option<PendingCall> {
        self.entries.insert(token, call)
    }

    /// Remove the entry for `token`.
    pub fn take(&mut self, token: u32) -> Option<PendingCall> {
        self.entries.remove(&token)
    }

    /// Remove every entry, in token order.
    pub fn drain_all(&mut self) -> Vec<(u32, PendingCall)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }

    /// Remove the entries issued by `origin`, in token order.
    pub fn drain_origin(&mut self, origin: u32) -> Vec<(u32, PendingCall)> {
        let tokens: Vec<u32> = self.entries.iter().filter(|(_, call)| call.origin == origin).map(|(t, _)| *t).collect();
        tokens.into_iter().filter_map(|t| self.entries.remove(&t).map(|call| (t, call))).collect()
    }

    pub fn contains(&self, token: u32) -> bool {
        self.entries.contains_key(&token)
    }

    /// Number of calls in flight.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
