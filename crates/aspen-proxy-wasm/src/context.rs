//! Plugin-facing context traits.
//!
//! A plugin implements [`RootContext`] once per configured plugin instance
//! and [`StreamContext`] for per-request or per-connection state. Every hook
//! has a default, so an implementation overrides only what it needs. The
//! registry holds contexts as trait objects and calls them through
//! [`crate::dispatch`]; the behavior of a context is fixed when it is created.

use crate::calls::CallOutcome;
use crate::host::HostContext;
use crate::types::Action;
use crate::types::PeerType;

/// Hooks shared by root and stream contexts.
pub trait Context {
    /// An outbound call issued with `HostContext::dispatch_http_call` finished.
    fn on_http_call_response(&mut self, _cx: &mut HostContext<'_>, _token: u32, _outcome: CallOutcome) {}

    /// The host wants to finish this context. Return `false` to delay.
    fn on_done(&mut self, _cx: &mut HostContext<'_>) -> bool {
        true
    }

    /// Access-log time for the context.
    fn on_log(&mut self, _cx: &mut HostContext<'_>) {}

    /// Last hook before the context is dropped.
    fn on_delete(&mut self, _cx: &mut HostContext<'_>) {}
}

/// One configured plugin instance.
pub trait RootContext: Context {
    /// The VM started. `vm_configuration` is the VM-wide configuration.
    fn on_vm_start(&mut self, _cx: &mut HostContext<'_>, _vm_configuration: &str) -> bool {
        true
    }

    /// New plugin configuration. Return `false` to reject it.
    fn on_configure(&mut self, _cx: &mut HostContext<'_>, _configuration: &str) -> bool {
        true
    }

    /// Periodic timer set with `Host::set_tick_period`.
    fn on_tick(&mut self, _cx: &mut HostContext<'_>) {}

    /// A shared queue registered by this root has data.
    fn on_queue_ready(&mut self, _cx: &mut HostContext<'_>, _queue_id: u32) {}

    /// Create the context for a new stream under this root.
    fn create_stream_context(&mut self, _context_id: u32) -> Box<dyn StreamContext> {
        Box::new(PassthroughStream)
    }
}

/// One request or connection.
pub trait StreamContext: Context {
    // -- Connection (L4) --

    fn on_new_connection(&mut self, _cx: &mut HostContext<'_>) -> Action {
        Action::Continue
    }

    fn on_downstream_data(&mut self, _cx: &mut HostContext<'_>, _data_size: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn on_downstream_close(&mut self, _cx: &mut HostContext<'_>, _peer: PeerType) {}

    fn on_upstream_data(&mut self, _cx: &mut HostContext<'_>, _data_size: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn on_upstream_close(&mut self, _cx: &mut HostContext<'_>, _peer: PeerType) {}

    // -- HTTP (L7) --

    fn on_request_headers(&mut self, _cx: &mut HostContext<'_>, _num_headers: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn on_request_body(&mut self, _cx: &mut HostContext<'_>, _body_size: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn on_request_trailers(&mut self, _cx: &mut HostContext<'_>, _num_trailers: usize) -> Action {
        Action::Continue
    }

    fn on_response_headers(&mut self, _cx: &mut HostContext<'_>, _num_headers: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn on_response_body(&mut self, _cx: &mut HostContext<'_>, _body_size: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn on_response_trailers(&mut self, _cx: &mut HostContext<'_>, _num_trailers: usize) -> Action {
        Action::Continue
    }
}

/// Stream context that accepts everything; used when a root does not create its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughStream;

impl Context for PassthroughStream {}

impl StreamContext for PassthroughStream {}

/// Root factory registered under a plugin root name.
pub type RootFactory = Box<dyn Fn(u32) -> Box<dyn RootContext>>;
