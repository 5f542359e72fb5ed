//! `proxy_on_*` entry points the host calls into.
//!
//! Only compiled for `wasm32`. Each export decodes its raw arguments into an
//! event and hands it to the module's single [`ContextRegistry`], kept in a
//! thread local. The host never re-enters an export while another one is
//! running, so the `RefCell` borrow is exclusive for the length of a hook.

use std::cell::RefCell;

use crate::abi::AbiHost;
use crate::context::RootContext;
use crate::dispatch::StreamEvent;
use crate::marshal;
use crate::registry::ContextRegistry;
use crate::types::PeerType;

thread_local! {
    static REGISTRY: RefCell<ContextRegistry<AbiHost>> = RefCell::new(ContextRegistry::new(AbiHost));
}

fn with_registry<R>(f: impl FnOnce(&mut ContextRegistry<AbiHost>) -> R) -> R {
    REGISTRY.with(|registry| f(&mut registry.borrow_mut()))
}

/// Register the factory for plugin root `name`. Call from `_start`.
pub fn register_root_context<F>(name: &str, factory: F)
where F: Fn(u32) -> Box<dyn RootContext> + 'static {
    with_registry(|registry| registry.register_root_context(name, factory));
}

/// Forward `tracing` output to the host log. Call from `_start`.
pub fn init_logging() -> anyhow::Result<()> {
    crate::log::init(AbiHost)
}

fn stream_event(context_id: u32, event: StreamEvent) -> u32 {
    with_registry(|registry| registry.on_stream_event(context_id, event)).into_abi()
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_abi_version_0_2_1() {}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_memory_allocate(size: usize) -> *mut u8 {
    marshal::allocate(size)
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_context_create(context_id: u32, root_context_id: u32) {
    with_registry(|registry| registry.on_context_create(context_id, root_context_id));
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_vm_start(context_id: u32, vm_configuration_size: usize) -> bool {
    with_registry(|registry| registry.on_vm_start(context_id, vm_configuration_size))
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_configure(context_id: u32, plugin_configuration_size: usize) -> bool {
    with_registry(|registry| registry.on_configure(context_id, plugin_configuration_size))
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_tick(context_id: u32) {
    with_registry(|registry| registry.on_tick(context_id));
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_queue_ready(context_id: u32, queue_id: u32) {
    with_registry(|registry| registry.on_queue_ready(context_id, queue_id));
}

// -- Connection (L4) --

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_new_connection(context_id: u32) -> u32 {
    stream_event(context_id, StreamEvent::NewConnection)
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_downstream_data(context_id: u32, data_size: usize, end_of_stream: bool) -> u32 {
    stream_event(context_id, StreamEvent::DownstreamData {
        data_size,
        end_of_stream,
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_downstream_connection_close(context_id: u32, peer_type: u32) {
    stream_event(context_id, StreamEvent::DownstreamClose {
        peer: PeerType::from_raw(peer_type),
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_upstream_data(context_id: u32, data_size: usize, end_of_stream: bool) -> u32 {
    stream_event(context_id, StreamEvent::UpstreamData {
        data_size,
        end_of_stream,
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_upstream_connection_close(context_id: u32, peer_type: u32) {
    stream_event(context_id, StreamEvent::UpstreamClose {
        peer: PeerType::from_raw(peer_type),
    });
}

// -- HTTP (L7) --

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_request_headers(context_id: u32, num_headers: usize, end_of_stream: bool) -> u32 {
    stream_event(context_id, StreamEvent::RequestHeaders {
        num_headers,
        end_of_stream,
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_request_body(context_id: u32, body_size: usize, end_of_stream: bool) -> u32 {
    stream_event(context_id, StreamEvent::RequestBody {
        body_size,
        end_of_stream,
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_request_trailers(context_id: u32, num_trailers: usize) -> u32 {
    stream_event(context_id, StreamEvent::RequestTrailers { num_trailers })
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_response_headers(context_id: u32, num_headers: usize, end_of_stream: bool) -> u32 {
    stream_event(context_id, StreamEvent::ResponseHeaders {
        num_headers,
        end_of_stream,
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_response_body(context_id: u32, body_size: usize, end_of_stream: bool) -> u32 {
    stream_event(context_id, StreamEvent::ResponseBody {
        body_size,
        end_of_stream,
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_response_trailers(context_id: u32, num_trailers: usize) -> u32 {
    stream_event(context_id, StreamEvent::ResponseTrailers { num_trailers })
}

// -- Shared --

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_http_call_response(
    context_id: u32,
    token: u32,
    num_headers: usize,
    body_size: usize,
    num_trailers: usize,
) {
    with_registry(|registry| registry.on_http_call_response(context_id, token, num_headers, body_size, num_trailers));
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_done(context_id: u32) -> bool {
    with_registry(|registry| registry.on_done(context_id))
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_log(context_id: u32) {
    with_registry(|registry| registry.on_log(context_id));
}

#[unsafe(no_mangle)]
pub extern "C" fn proxy_on_delete(context_id: u32) {
    with_registry(|registry| registry.delete(context_id));
}
