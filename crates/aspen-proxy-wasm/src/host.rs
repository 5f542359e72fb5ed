//! The host side of the boundary, as seen from the module.
//!
//! [`Host`] lists every boundary call the runtime makes, with typed
//! arguments and `Result` returns. Inside the sandbox it is implemented by
//! `abi::AbiHost` on top of the raw `proxy_*` imports; tests use
//! `test_support::MockHost`.
//!
//! [`HostContext`] is what a hook receives: the host, the id of the context
//! being driven, its root's configuration, and the root's pending-call table
//! so hooks can issue outbound calls.
//!
//! ## Failure policy
//!
//! Lookups (`get_*`) return `Ok(None)` for absent values and `Err(Status)`
//! for anything else. The `HostContext` helpers that mutate headers or resume
//! a stream are must-succeed: a failure means host and module disagree on
//! the stream state and is escalated through [`crate::error::fatal`].

use std::time::Duration;
use std::time::SystemTime;

use crate::calls::CallOutcome;
use crate::calls::Continuation;
use crate::calls::PendingCall;
use crate::calls::PendingCalls;
use crate::calls::continuation;
use crate::codec;
use crate::error::HostResult;
use crate::error::Status;
use crate::error::expect_ok;
use crate::error::fatal;
use crate::types::BufferStatus;
use crate::types::BufferType;
use crate::types::LogLevel;
use crate::types::MapType;
use crate::types::MetricType;
use crate::types::StreamType;

/// Boundary calls available to the module.
pub trait Host {
    // -- Logging --

    fn log(&self, level: LogLevel, message: &str) -> HostResult<()>;

    fn get_log_level(&self) -> HostResult<LogLevel>;

    // -- Lifecycle properties --

    /// Status code and message attached to the last host operation.
    fn get_status(&self) -> HostResult<(u32, Option<Vec<u8>>)>;

    fn get_property(&self, path: &[&str]) -> HostResult<Option<Vec<u8>>>;

    /// Set a property, or clear it with `None`.
    fn set_property(&self, path: &[&str], value: Option<&[u8]>) -> HostResult<()>;

    /// Period of `on_tick` for the current root context. Zero disables ticks.
    fn set_tick_period(&self, period: Duration) -> HostResult<()>;

    fn get_current_time(&self) -> HostResult<SystemTime>;

    // -- Request control --

    fn resume_stream(&self, stream: StreamType) -> HostResult<()>;

    /// Reply locally instead of forwarding upstream.
    fn send_http_response(
        &self,
        status_code: u32,
        details: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
        grpc_status: Option<i32>,
    ) -> HostResult<()>;

    fn clear_route_cache(&self) -> HostResult<()>;

    // -- Shared state --

    /// Value and CAS token of a shared key. `(None, None)` when absent.
    fn get_shared_data(&self, key: &str) -> HostResult<(Option<Vec<u8>>, Option<u32>)>;

    /// Write a shared key. With `cas`, fails with `CasMismatch` if the key changed.
    fn set_shared_data(&self, key: &str, value: Option<&[u8]>, cas: Option<u32>) -> HostResult<()>;

    fn register_shared_queue(&self, name: &str) -> HostResult<u32>;

    fn resolve_shared_queue(&self, vm_id: &str, name: &str) -> HostResult<Option<u32>>;

    fn enqueue_shared_queue(&self, queue_id: u32, value: Option<&[u8]>) -> HostResult<()>;

    /// Next queued item, `None` when the queue is empty.
    fn dequeue_shared_queue(&self, queue_id: u32) -> HostResult<Option<Vec<u8>>>;

    // -- Header and trailer maps --

    fn get_map_bytes(&self, map: MapType) -> HostResult<Vec<(Vec<u8>, Vec<u8>)>>;

    fn get_map(&self, map: MapType) -> HostResult<Vec<(String, String)>> {
        let pairs = self.get_map_bytes(map)?;
        pairs
            .into_iter()
            .map(|(k, v)| Ok((crate::marshal::to_utf8(k)?, crate::marshal::to_utf8(v)?)))
            .collect()
    }

    fn set_map(&self, map: MapType, pairs: &[(&str, &str)]) -> HostResult<()>;

    fn get_map_value(&self, map: MapType, key: &str) -> HostResult<Option<String>>;

    fn replace_map_value(&self, map: MapType, key: &str, value: &str) -> HostResult<()>;

    fn add_map_value(&self, map: MapType, key: &str, value: &str) -> HostResult<()>;

    fn remove_map_value(&self, map: MapType, key: &str) -> HostResult<()>;

    /// Encoded size of the map in bytes.
    fn get_map_size(&self, map: MapType) -> HostResult<usize>;

    // -- Buffers --

    fn get_buffer(&self, buffer: BufferType, start: usize, max_size: usize) -> HostResult<Option<Vec<u8>>>;

    fn get_buffer_status(&self, buffer: BufferType) -> HostResult<BufferStatus>;

    // -- Metrics --

    fn define_metric(&self, metric_type: MetricType, name: &str) -> HostResult<u32>;

    fn increment_metric(&self, metric_id: u32, offset: i64) -> HostResult<()>;

    fn record_metric(&self, metric_id: u32, value: u64) -> HostResult<()>;

    fn get_metric(&self, metric_id: u32) -> HostResult<u64>;

    // -- Outbound calls --

    /// Issue an HTTP call; the returned token identifies the later response.
    fn dispatch_http_call(
        &self,
        upstream: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
        trailers: &[(&str, &str)],
        timeout: Duration,
    ) -> HostResult<u32>;

    /// Direct subsequent map and buffer calls at `context_id`.
    fn set_effective_context(&self, context_id: u32) -> HostResult<()>;
}

/// Per-hook view handed to plugin code.
pub struct HostContext<'a> {
    host: &'a dyn Host,
    context_id: u32,
    root_id: u32,
    configuration: &'a str,
    calls: &'a mut PendingCalls,
}

impl<'a> HostContext<'a> {
    /// Build a view for `context_id` under `root_id`.
    ///
    /// `calls` is the root's pending-call table; for a root context
    /// `context_id == root_id`.
    pub fn new(
        host: &'a dyn Host,
        context_id: u32,
        root_id: u32,
        configuration: &'a str,
        calls: &'a mut PendingCalls,
    ) -> Self {
        Self {
            host,
            context_id,
            root_id,
            configuration,
            calls,
        }
    }

    /// The host behind this view.
    pub fn host(&self) -> &dyn Host {
        self.host
    }

    /// Id of the context the current hook is driving.
    pub fn context_id(&self) -> u32 {
        self.context_id
    }

    /// Id of the root that owns the context; equal to `context_id` for roots.
    pub fn root_id(&self) -> u32 {
        self.root_id
    }

    /// Last configuration delivered to the root context; empty before `on_configure`.
    pub fn configuration(&self) -> &str {
        self.configuration
    }

    /// Number of calls still waiting for a response under this root.
    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    /// Abort the module after a critical log entry.
    pub fn fatal(&self, message: &str) -> ! {
        fatal(self.host, message)
    }

    /// Host wall clock. Fatal if the host cannot report it.
    pub fn current_time(&self) -> SystemTime {
        expect_ok(self.host, "get_current_time", self.host.get_current_time())
    }

    // -------------------------------------------------------------------------
    // Must-succeed stream control
    // -------------------------------------------------------------------------

    /// Replace a header, or remove it with `None`.
    pub fn set_header(&self, map: MapType, key: &str, value: Option<&str>) {
        let result = match value {
            Some(value) => self.host.replace_map_value(map, key, value),
            None => self.host.remove_map_value(map, key),
        };
        expect_ok(self.host, "set_header", result)
    }

    /// Append a header without replacing existing values.
    pub fn add_header(&self, map: MapType, key: &str, value: &str) {
        expect_ok(self.host, "add_header", self.host.add_map_value(map, key, value))
    }

    /// Replace the whole header map.
    pub fn set_headers(&self, map: MapType, headers: &[(&str, &str)]) {
        expect_ok(self.host, "set_headers", self.host.set_map(map, headers))
    }

    /// Resume a paused request.
    pub fn resume_http_request(&self) {
        expect_ok(self.host, "resume_http_request", self.host.resume_stream(StreamType::HttpRequest))
    }

    /// Resume a paused response.
    pub fn resume_http_response(&self) {
        expect_ok(self.host, "resume_http_response", self.host.resume_stream(StreamType::HttpResponse))
    }

    /// Reply locally with `status_code` instead of forwarding upstream.
    pub fn send_http_response(&self, status_code: u32, headers: &[(&str, &str)], body: Option<&[u8]>) {
        expect_ok(
            self.host,
            "send_http_response",
            self.host.send_http_response(status_code, "", headers, body, None),
        )
    }

    // -------------------------------------------------------------------------
    // Outbound calls
    // -------------------------------------------------------------------------

    /// Issue an HTTP call whose outcome is delivered to this context's
    /// `on_http_call_response` hook.
    pub fn dispatch_http_call(
        &mut self,
        upstream: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
        trailers: &[(&str, &str)],
        timeout: Duration,
    ) -> HostResult<u32> {
        let route = continuation(|context, cx, token, outcome| context.on_http_call_response(cx, token, outcome));
        self.dispatch_http_call_with(upstream, headers, body, trailers, timeout, route)
    }

    /// Issue an HTTP call resumed by `continuation`.
    ///
    /// Nothing is recorded when the host rejects the call. A context being
    /// deleted gets [`Status::BadArgument`] and the host is not called.
    pub fn dispatch_http_call_with(
        &mut self,
        upstream: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
        trailers: &[(&str, &str)],
        timeout: Duration,
        continuation: Continuation,
    ) -> HostResult<u32> {
        if !self.calls.accepts(self.context_id) {
            tracing::debug!(context_id = self.context_id, upstream, "http call refused during teardown");
            return Err(Status::BadArgument);
        }
        let token = match self.host.dispatch_http_call(upstream, headers, body, trailers, timeout) {
            Ok(token) => token,
            Err(status) => {
                tracing::debug!(context_id = self.context_id, upstream, %status, "http call rejected by host");
                return Err(status);
            }
        };

        if self.calls.insert(token, PendingCall::new(self.context_id, continuation)).is_some() {
            self.fatal(&format!("host reissued pending http call token {token}"));
        }
        tracing::debug!(context_id = self.context_id, root_id = self.root_id, token, upstream, "http call dispatched");
        Ok(token)
    }

    // -------------------------------------------------------------------------
    // Call response accessors
    // -------------------------------------------------------------------------

    /// Headers of the call response being delivered.
    pub fn http_call_response_headers(&self) -> HostResult<Vec<(String, String)>> {
        self.host.get_map(MapType::HttpCallResponseHeaders)
    }

    /// Trailers of the call response being delivered.
    pub fn http_call_response_trailers(&self) -> HostResult<Vec<(String, String)>> {
        self.host.get_map(MapType::HttpCallResponseTrailers)
    }

    /// Response body of the call being delivered; empty for a cancelled call.
    pub fn http_call_response_body(&self, outcome: CallOutcome) -> HostResult<Vec<u8>> {
        let (_, body_size, _) = outcome.handles();
        if body_size == 0 {
            return Ok(Vec::new());
        }
        Ok(self.host.get_buffer(BufferType::HttpCallResponseBody, 0, body_size)?.unwrap_or_default())
    }
}

/// Encode headers for the wire; shared by `Host` implementations.
pub fn serialize_headers(headers: &[(&str, &str)]) -> Vec<u8> {
    codec::encode_headers(headers)
}
