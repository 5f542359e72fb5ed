//! Uniform call surface over the context traits.
//!
//! The exported entry points are free functions keyed by a numeric context
//! id. The registry turns each one into an event value and routes it through
//! [`dispatch_root`], [`dispatch_stream`] or [`dispatch_lifecycle`], which
//! call the matching trait method on the stored trait object. Overridden
//! hooks run the plugin's code; the rest fall back to the trait defaults.

use crate::context::Context;
use crate::context::RootContext;
use crate::context::StreamContext;
use crate::host::HostContext;
use crate::types::Action;
use crate::types::PeerType;

/// Root-only hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootEvent<'a> {
    VmStart { vm_configuration: &'a str },
    Configure { configuration: &'a str },
    Tick,
    QueueReady { queue_id: u32 },
}

impl RootEvent<'_> {
    /// Export name of the hook this event drives.
    pub fn name(&self) -> &'static str {
        match self {
            RootEvent::VmStart { .. } => "on_vm_start",
            RootEvent::Configure { .. } => "on_configure",
            RootEvent::Tick => "on_tick",
            RootEvent::QueueReady { .. } => "on_queue_ready",
        }
    }
}

/// Stream hooks, connection and HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    NewConnection,
    DownstreamData { data_size: usize, end_of_stream: bool },
    DownstreamClose { peer: PeerType },
    UpstreamData { data_size: usize, end_of_stream: bool },
    UpstreamClose { peer: PeerType },
    RequestHeaders { num_headers: usize, end_of_stream: bool },
    RequestBody { body_size: usize, end_of_stream: bool },
    RequestTrailers { num_trailers: usize },
    ResponseHeaders { num_headers: usize, end_of_stream: bool },
    ResponseBody { body_size: usize, end_of_stream: bool },
    ResponseTrailers { num_trailers: usize },
}

impl StreamEvent {
    /// Export name of the hook this event drives.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::NewConnection => "on_new_connection",
            StreamEvent::DownstreamData { .. } => "on_downstream_data",
            StreamEvent::DownstreamClose { .. } => "on_downstream_close",
            StreamEvent::UpstreamData { .. } => "on_upstream_data",
            StreamEvent::UpstreamClose { .. } => "on_upstream_close",
            StreamEvent::RequestHeaders { .. } => "on_request_headers",
            StreamEvent::RequestBody { .. } => "on_request_body",
            StreamEvent::RequestTrailers { .. } => "on_request_trailers",
            StreamEvent::ResponseHeaders { .. } => "on_response_headers",
            StreamEvent::ResponseBody { .. } => "on_response_body",
            StreamEvent::ResponseTrailers { .. } => "on_response_trailers",
        }
    }
}

/// Hooks every context has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Done,
    Log,
    Delete,
}

impl LifecycleEvent {
    /// Export name of the hook this event drives.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Done => "on_done",
            LifecycleEvent::Log => "on_log",
            LifecycleEvent::Delete => "on_delete",
        }
    }
}

/// What a hook returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookReturn {
    Action(Action),
    Flag(bool),
    Unit,
}

impl HookReturn {
    /// Value handed back to the host from the exported entry point.
    pub fn into_abi(self) -> u32 {
        match self {
            HookReturn::Action(action) => action as u32,
            HookReturn::Flag(flag) => u32::from(flag),
            HookReturn::Unit => 0,
        }
    }
}

/// Route a root event to its [`RootContext`] hook.
pub fn dispatch_root(context: &mut dyn RootContext, cx: &mut HostContext<'_>, event: RootEvent<'_>) -> HookReturn {
    tracing::trace!(context_id = cx.context_id(), hook = event.name(), "dispatching root hook");
    match event {
        RootEvent::VmStart { vm_configuration } => HookReturn::Flag(context.on_vm_start(cx, vm_configuration)),
        RootEvent::Configure { configuration } => HookReturn::Flag(context.on_configure(cx, configuration)),
        RootEvent::Tick => {
            context.on_tick(cx);
            HookReturn::Unit
        }
        RootEvent::QueueReady { queue_id } => {
            context.on_queue_ready(cx, queue_id);
            HookReturn::Unit
        }
    }
}

/// Route a stream event to its [`StreamContext`] hook. Always returns an action.
pub fn dispatch_stream(context: &mut dyn StreamContext, cx: &mut HostContext<'_>, event: StreamEvent) -> HookReturn {
    tracing::trace!(context_id = cx.context_id(), hook = event.name(), "dispatching stream hook");
    let action = match event {
        StreamEvent::NewConnection => context.on_new_connection(cx),
        StreamEvent::DownstreamData {
            data_size,
            end_of_stream,
        } => context.on_downstream_data(cx, data_size, end_of_stream),
        StreamEvent::DownstreamClose { peer } => {
            context.on_downstream_close(cx, peer);
            return HookReturn::Unit;
        }
        StreamEvent::UpstreamData {
            data_size,
            end_of_stream,
        } => context.on_upstream_data(cx, data_size, end_of_stream),
        StreamEvent::UpstreamClose { peer } => {
            context.on_upstream_close(cx, peer);
            return HookReturn::Unit;
        }
        StreamEvent::RequestHeaders {
            num_headers,
            end_of_stream,
        } => context.on_request_headers(cx, num_headers, end_of_stream),
        StreamEvent::RequestBody {
            body_size,
            end_of_stream,
        } => context.on_request_body(cx, body_size, end_of_stream),
        StreamEvent::RequestTrailers { num_trailers } => context.on_request_trailers(cx, num_trailers),
        StreamEvent::ResponseHeaders {
            num_headers,
            end_of_stream,
        } => context.on_response_headers(cx, num_headers, end_of_stream),
        StreamEvent::ResponseBody {
            body_size,
            end_of_stream,
        } => context.on_response_body(cx, body_size, end_of_stream),
        StreamEvent::ResponseTrailers { num_trailers } => context.on_response_trailers(cx, num_trailers),
    };
    HookReturn::Action(action)
}

/// Route a lifecycle event shared by roots and streams.
pub fn dispatch_lifecycle(context: &mut dyn Context, cx: &mut HostContext<'_>, event: LifecycleEvent) -> HookReturn {
    tracing::trace!(context_id = cx.context_id(), hook = event.name(), "dispatching lifecycle hook");
    match event {
        LifecycleEvent::Done => HookReturn::Flag(context.on_done(cx)),
        LifecycleEvent::Log => {
            context.on_log(cx);
            HookReturn::Unit
        }
        LifecycleEvent::Delete => {
            context.on_delete(cx);
            HookReturn::Unit
        }
    }
}
