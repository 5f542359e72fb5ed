//! Context registry for a proxy-wasm module instance.
//!
//! Maps host-issued context ids to the plugin's root and stream contexts and
//! drives their lifecycle.
//!
//! ## Lifecycle
//!
//! Each id goes through:
//!
//! 1. **Unregistered** – never seen, or deleted earlier
//! 2. **Active** – created on first reference by the host
//! 3. **Deleted** – removed by [`ContextRegistry::delete`]; the id reads as
//!    unregistered again and the host may reuse it
//!
//! Root contexts are built by a factory looked up by the `plugin_root_id`
//! property. Stream contexts are built by their root. A hook for an id that
//! is not active is a protocol violation and aborts the module.
//!
//! Deleting a stream cancels the outbound calls it still has in flight;
//! deleting a root cancels every call left in its table. Either way each
//! continuation runs exactly once.

use std::collections::HashMap;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::calls::CallOutcome;
use crate::calls::PendingCall;
use crate::calls::PendingCalls;
use crate::context::RootContext;
use crate::context::RootFactory;
use crate::context::StreamContext;
use crate::dispatch::HookReturn;
use crate::dispatch::LifecycleEvent;
use crate::dispatch::RootEvent;
use crate::dispatch::StreamEvent;
use crate::dispatch::dispatch_lifecycle;
use crate::dispatch::dispatch_root;
use crate::dispatch::dispatch_stream;
use crate::error::expect_ok;
use crate::error::fatal;
use crate::host::Host;
use crate::host::HostContext;
use crate::marshal;
use crate::types::BufferType;
use crate::types::PLUGIN_ROOT_ID_PROPERTY;

/// Lifecycle state of a context id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Unregistered,
    ActiveRoot,
    ActiveStream { root_id: u32 },
}

/// A live root context with the state it owns.
struct RootEntry {
    context: Box<dyn RootContext>,
    /// Last plugin configuration accepted through `on_configure`.
    configuration: String,
    calls: PendingCalls,
}

/// A live stream context and the root it belongs to.
struct StreamEntry {
    context: Box<dyn StreamContext>,
    root_id: u32,
}

/// Owns every live context of one module instance.
pub struct ContextRegistry<H: Host + 'static> {
    host: H,
    /// Root factories keyed by plugin root name.
    factories: HashMap<String, RootFactory>,
    roots: HashMap<u32, RootEntry>,
    streams: HashMap<u32, StreamEntry>,
}

impl<H: Host + 'static> ContextRegistry<H> {
    /// Create an empty registry talking to `host`.
    pub fn new(host: H) -> Self {
        Self {
            host,
            factories: HashMap::new(),
            roots: HashMap::new(),
            streams: HashMap::new(),
        }
    }

    /// The host this registry drives.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Register the root factory for plugin root `name`.
    ///
    /// Must run before the host creates a root context with that name.
    pub fn register_root_context<F>(&mut self, name: impl Into<String>, factory: F)
    where F: Fn(u32) -> Box<dyn RootContext> + 'static {
        let name = name.into();
        if self.factories.insert(name.clone(), Box::new(factory)).is_some() {
            warn!(root_name = %name, "root context factory replaced");
        }
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    /// Entry point for `proxy_on_context_create`: a zero `root_id` means `id` is a root.
    pub fn on_context_create(&mut self, id: u32, root_id: u32) {
        if root_id == 0 {
            self.ensure_root_context(id);
        } else {
            self.ensure_context(id, root_id);
        }
    }

    /// Create the root context for `id` unless it is already active.
    pub fn ensure_root_context(&mut self, id: u32) {
        if self.roots.contains_key(&id) {
            return;
        }
        if self.streams.contains_key(&id) {
            fatal(&self.host, &format!("context id {id} is already a stream context"));
        }

        let name = self.root_name();
        let Some(factory) = self.factories.get(&name) else {
            fatal(&self.host, &format!("missing root context factory for '{name}'"));
        };
        let context = factory(id);
        self.roots.insert(id, RootEntry {
            context,
            configuration: String::new(),
            calls: PendingCalls::new(),
        });
        info!(root_id = id, root_name = %name, "root context created");
    }

    /// Create the stream context `stream_id` under `root_id` unless it is already active.
    ///
    /// An active `stream_id` is left untouched even if `root_id` differs from
    /// the root it was created under.
    pub fn ensure_context(&mut self, stream_id: u32, root_id: u32) {
        self.ensure_root_context(root_id);
        if self.streams.contains_key(&stream_id) {
            return;
        }
        if self.roots.contains_key(&stream_id) {
            fatal(&self.host, &format!("context id {stream_id} is already a root context"));
        }

        let Some(root) = self.roots.get_mut(&root_id) else {
            fatal(&self.host, &format!("root context {root_id} vanished during stream creation"));
        };
        let context = root.context.create_stream_context(stream_id);
        self.streams.insert(stream_id, StreamEntry { context, root_id });
        debug!(context_id = stream_id, root_id, "stream context created");
    }

    /// Name of the root to build, from the `plugin_root_id` property.
    fn root_name(&self) -> String {
        match self.host.get_property(&[PLUGIN_ROOT_ID_PROPERTY]) {
            Ok(Some(bytes)) => match marshal::to_utf8(bytes) {
                Ok(name) => name,
                Err(status) => fatal(&self.host, &format!("invalid {PLUGIN_ROOT_ID_PROPERTY}: {status}")),
            },
            Ok(None) => String::new(),
            Err(status) => fatal(&self.host, &format!("failed to read {PLUGIN_ROOT_ID_PROPERTY}: {status}")),
        }
    }

    // -------------------------------------------------------------------------
    // Root hooks
    // -------------------------------------------------------------------------

    /// Deliver the VM configuration to root `root_id`. Returns the hook's verdict.
    pub fn on_vm_start(&mut self, root_id: u32, vm_configuration_size: usize) -> bool {
        let Some(vm_configuration) = self.read_configuration(BufferType::VmConfiguration, vm_configuration_size) else {
            return false;
        };
        let result = self.with_root(root_id, |context, cx| {
            dispatch_root(context, cx, RootEvent::VmStart {
                vm_configuration: &vm_configuration,
            })
        });
        matches!(result, HookReturn::Flag(true))
    }

    /// Deliver plugin configuration. It is stored for the root's contexts
    /// only when the hook accepts it.
    pub fn on_configure(&mut self, root_id: u32, configuration_size: usize) -> bool {
        let Some(configuration) = self.read_configuration(BufferType::PluginConfiguration, configuration_size)
        else {
            return false;
        };
        let result = self.with_root(root_id, |context, cx| {
            dispatch_root(context, cx, RootEvent::Configure {
                configuration: &configuration,
            })
        });
        let accepted = matches!(result, HookReturn::Flag(true));
        if !accepted {
            warn!(root_id, "plugin configuration rejected");
        } else if let Some(root) = self.roots.get_mut(&root_id) {
            root.configuration = configuration;
        }
        accepted
    }

    /// Run the root's periodic timer hook.
    pub fn on_tick(&mut self, root_id: u32) {
        self.with_root(root_id, |context, cx| dispatch_root(context, cx, RootEvent::Tick));
    }

    /// Notify the root that shared queue `queue_id` has data.
    pub fn on_queue_ready(&mut self, root_id: u32, queue_id: u32) {
        self.with_root(root_id, |context, cx| dispatch_root(context, cx, RootEvent::QueueReady { queue_id }));
    }

    fn read_configuration(&self, buffer: BufferType, size: usize) -> Option<String> {
        if size == 0 {
            return Some(String::new());
        }
        match self.host.get_buffer(buffer, 0, size) {
            Ok(bytes) => match marshal::to_utf8(bytes.unwrap_or_default()) {
                Ok(configuration) => Some(configuration),
                Err(status) => {
                    error!(buffer = ?buffer, %status, "configuration is not valid UTF-8");
                    None
                }
            },
            Err(status) => {
                error!(buffer = ?buffer, %status, "failed to read configuration buffer");
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Stream and shared hooks
    // -------------------------------------------------------------------------

    /// Drive a stream hook and return the plugin's [`Action`](crate::types::Action) for the host.
    pub fn on_stream_event(&mut self, stream_id: u32, event: StreamEvent) -> HookReturn {
        self.with_stream(stream_id, |context, cx| dispatch_stream(context, cx, event))
    }

    /// Ask `id` whether it has finished. `true` lets the host delete it.
    pub fn on_done(&mut self, id: u32) -> bool {
        matches!(self.on_lifecycle(id, LifecycleEvent::Done), HookReturn::Flag(true))
    }

    /// Final logging hook before deletion.
    pub fn on_log(&mut self, id: u32) {
        self.on_lifecycle(id, LifecycleEvent::Log);
    }

    fn on_lifecycle(&mut self, id: u32, event: LifecycleEvent) -> HookReturn {
        if self.roots.contains_key(&id) {
            self.with_root(id, |context, cx| dispatch_lifecycle(context, cx, event))
        } else {
            self.with_stream(id, |context, cx| dispatch_lifecycle(context, cx, event))
        }
    }

    // -------------------------------------------------------------------------
    // Outbound call responses
    // -------------------------------------------------------------------------

    /// Route a call response delivered on `root_id` to the continuation for `token`.
    ///
    /// Unknown tokens are logged and dropped: a call cancelled by a deleted
    /// stream can still be answered by the host.
    pub fn on_http_call_response(
        &mut self,
        root_id: u32,
        token: u32,
        num_headers: usize,
        body_size: usize,
        num_trailers: usize,
    ) {
        let Self {
            host, roots, streams, ..
        } = self;
        let host: &H = host;
        let Some(root) = roots.get_mut(&root_id) else {
            fatal(host, &format!("http call response for unknown root context {root_id}"));
        };
        let Some(call) = root.calls.take(token) else {
            error!(root_id, token, "http call response for unknown token, dropping");
            return;
        };

        if call.origin != root_id {
            expect_ok(host, "set_effective_context", host.set_effective_context(call.origin));
        }
        let outcome = CallOutcome::Response {
            num_headers,
            body_size,
            num_trailers,
        };
        resume_call(host, root_id, root, streams, token, call, outcome);
    }

    // -------------------------------------------------------------------------
    // Deletion
    // -------------------------------------------------------------------------

    /// Tear down `id`, cancelling its in-flight calls first.
    ///
    /// Entry point for `proxy_on_delete`.
    pub fn delete(&mut self, id: u32) {
        if let Some(mut root) = self.roots.remove(&id) {
            let cancelled = self.cancel_all(id, &mut root);
            let RootEntry {
                context,
                configuration,
                calls,
            } = &mut root;
            let mut cx = HostContext::new(&self.host, id, id, configuration.as_str(), calls);
            dispatch_lifecycle(context.as_mut(), &mut cx, LifecycleEvent::Delete);
            info!(root_id = id, cancelled, "root context deleted");
            return;
        }

        if let Some(mut stream) = self.streams.remove(&id) {
            let root_id = stream.root_id;
            let mut orphan_calls = PendingCalls::new();
            let (configuration, calls) = match self.roots.get_mut(&root_id) {
                Some(root) => (root.configuration.as_str(), &mut root.calls),
                None => ("", &mut orphan_calls),
            };
            calls.close_origin(id);
            for (token, call) in calls.drain_origin(id) {
                let mut cx = HostContext::new(&self.host, id, root_id, configuration, calls);
                call.resume(stream.context.as_mut(), &mut cx, token, CallOutcome::Cancelled);
            }
            let mut cx = HostContext::new(&self.host, id, root_id, configuration, calls);
            dispatch_lifecycle(stream.context.as_mut(), &mut cx, LifecycleEvent::Delete);
            calls.reopen_origin(id);
            debug!(context_id = id, root_id, "stream context deleted");
            return;
        }

        fatal(&self.host, &format!("delete of unknown context id {id}"));
    }

    /// Resume every call left under a root being torn down with
    /// [`CallOutcome::Cancelled`]. Returns how many were cancelled.
    ///
    /// The table is closed first, so continuations cannot issue new calls.
    fn cancel_all(&mut self, root_id: u32, root: &mut RootEntry) -> usize {
        root.calls.close_all();
        let pending = root.calls.drain_all();
        let cancelled = pending.len();
        for (token, call) in pending {
            resume_call(&self.host, root_id, root, &mut self.streams, token, call, CallOutcome::Cancelled);
        }
        cancelled
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Whether `id` is a live root, a live stream, or unknown.
    pub fn state(&self, id: u32) -> ContextState {
        if self.roots.contains_key(&id) {
            ContextState::ActiveRoot
        } else if let Some(stream) = self.streams.get(&id) {
            ContextState::ActiveStream {
                root_id: stream.root_id,
            }
        } else {
            ContextState::Unregistered
        }
    }

    /// Accepted configuration of `root_id`, if the root is active.
    pub fn configuration(&self, root_id: u32) -> Option<&str> {
        self.roots.get(&root_id).map(|root| root.configuration.as_str())
    }

    /// Calls in flight under `root_id`.
    pub fn pending_calls(&self, root_id: u32) -> usize {
        self.roots.get(&root_id).map_or(0, |root| root.calls.len())
    }

    /// Number of live root contexts.
    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Number of live stream contexts.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    fn with_root<R>(&mut self, id: u32, f: impl FnOnce(&mut dyn RootContext, &mut HostContext<'_>) -> R) -> R {
        let Self { host, roots, .. } = self;
        let host: &H = host;
        let Some(root) = roots.get_mut(&id) else {
            fatal(host, &format!("unknown root context id {id}"));
        };
        let RootEntry {
            context,
            configuration,
            calls,
        } = root;
        let mut cx = HostContext::new(host, id, id, configuration.as_str(), calls);
        f(context.as_mut(), &mut cx)
    }

    fn with_stream<R>(&mut self, id: u32, f: impl FnOnce(&mut dyn StreamContext, &mut HostContext<'_>) -> R) -> R {
        let Self {
            host, roots, streams, ..
        } = self;
        let host: &H = host;
        let Some(stream) = streams.get_mut(&id) else {
            fatal(host, &format!("unknown stream context id {id}"));
        };
        let root_id = stream.root_id;
        let Some(root) = roots.get_mut(&root_id) else {
            fatal(host, &format!("stream context {id} outlived root context {root_id}"));
        };
        let mut cx = HostContext::new(host, id, root_id, root.configuration.as_str(), &mut root.calls);
        f(stream.context.as_mut(), &mut cx)
    }
}

/// Run a pending call's continuation against its origin context.
fn resume_call(
    host: &dyn Host,
    root_id: u32,
    root: &mut RootEntry,
    streams: &mut HashMap<u32, StreamEntry>,
    token: u32,
    call: PendingCall,
    outcome: CallOutcome,
) {
    let origin = call.origin;
    let RootEntry {
        context,
        configuration,
        calls,
    } = root;

    if origin == root_id {
        let mut cx = HostContext::new(host, root_id, root_id, configuration.as_str(), calls);
        call.resume(context.as_mut(), &mut cx, token, outcome);
    } else if let Some(stream) = streams.get_mut(&origin) {
        let mut cx = HostContext::new(host, origin, root_id, configuration.as_str(), calls);
        call.resume(stream.context.as_mut(), &mut cx, token, outcome);
    } else {
        error!(root_id, origin, token, "origin of http call is gone, dropping outcome");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use super::*;
    use crate::calls::continuation;
    use crate::context::Context;
    use crate::error::Status;
    use crate::test_support::MockHost;
    use crate::types::Action;
    use crate::types::MapType;

    type Journal = Rc<RefCell<Vec<String>>>;

    struct TestRoot {
        journal: Journal,
    }

    impl Context for TestRoot {
        fn on_http_call_response(&mut self, _cx: &mut HostContext<'_>, token: u32, outcome: CallOutcome) {
            self.journal.borrow_mut().push(format!("root:{token}:{}", outcome.is_cancelled()));
        }

        fn on_delete(&mut self, _cx: &mut HostContext<'_>) {
            self.journal.borrow_mut().push("root:delete".to_string());
        }
    }

    impl RootContext for TestRoot {
        fn on_tick(&mut self, cx: &mut HostContext<'_>) {
            let _ = cx.dispatch_http_call("stats", &[], None, &[], Duration::from_secs(1));
        }

        fn create_stream_context(&mut self, context_id: u32) -> Box<dyn StreamContext> {
            Box::new(TestStream {
                id: context_id,
                journal: Rc::clone(&self.journal),
            })
        }
    }

    struct TestStream {
        id: u32,
        journal: Journal,
    }

    impl Context for TestStream {
        fn on_http_call_response(&mut self, cx: &mut HostContext<'_>, token: u32, outcome: CallOutcome) {
            let entry = format!("stream{}:{token}:{}:{}", self.id, cx.context_id(), outcome.is_cancelled());
            self.journal.borrow_mut().push(entry);
        }

        fn on_delete(&mut self, _cx: &mut HostContext<'_>) {
            self.journal.borrow_mut().push(format!("stream{}:delete", self.id));
        }
    }

    impl StreamContext for TestStream {
        fn on_request_headers(
            &mut self,
            cx: &mut HostContext<'_>,
            _num_headers: usize,
            _end_of_stream: bool,
        ) -> Action {
            match cx.dispatch_http_call("auth", &[(":path", "/check")], None, &[], Duration::from_millis(500)) {
                Ok(_) => Action::Pause,
                Err(_) => Action::Continue,
            }
        }
    }

    fn registry_with_counter() -> (ContextRegistry<MockHost>, Journal, Rc<Cell<u32>>) {
        let journal: Journal = Rc::default();
        let created = Rc::new(Cell::new(0));
        let mut registry = ContextRegistry::new(MockHost::new());
        let factory_journal = Rc::clone(&journal);
        let factory_count = Rc::clone(&created);
        registry.register_root_context("", move |_id| {
            factory_count.set(factory_count.get() + 1);
            Box::new(TestRoot {
                journal: Rc::clone(&factory_journal),
            })
        });
        (registry, journal, created)
    }

    fn request_headers() -> StreamEvent {
        StreamEvent::RequestHeaders {
            num_headers: 3,
            end_of_stream: false,
        }
    }

    // -------------------------------------------------------------------------
    // creation
    // -------------------------------------------------------------------------

    #[test]
    fn ensure_root_twice_creates_once() {
        let (mut registry, _, created) = registry_with_counter();
        registry.ensure_root_context(1);
        registry.ensure_root_context(1);
        assert_eq!(created.get(), 1);
        assert_eq!(registry.root_count(), 1);
        assert_eq!(registry.state(1), ContextState::ActiveRoot);
    }

    #[test]
    fn factory_is_selected_by_root_name_property() {
        let mut registry = ContextRegistry::new(MockHost::new());
        registry.host().set_property_value(&[PLUGIN_ROOT_ID_PROPERTY], b"auth");
        let chosen = Rc::new(Cell::new(""));
        for name in ["auth", "ratelimit"] {
            let chosen = Rc::clone(&chosen);
            registry.register_root_context(name, move |_| {
                chosen.set(name);
                Box::new(TestRoot { journal: Rc::default() })
            });
        }
        registry.on_context_create(1, 0);
        assert_eq!(chosen.get(), "auth");
    }

    #[test]
    #[should_panic(expected = "missing root context factory for 'unknown'")]
    fn missing_factory_is_fatal() {
        let (mut registry, _, _) = registry_with_counter();
        registry.host().set_property_value(&[PLUGIN_ROOT_ID_PROPERTY], b"unknown");
        registry.ensure_root_context(1);
    }

    #[test]
    fn stream_id_is_not_recreated_under_another_root() {
        let (mut registry, _, created) = registry_with_counter();
        registry.ensure_context(5, 1);
        registry.ensure_context(5, 2);
        assert_eq!(registry.stream_count(), 1);
        assert_eq!(registry.state(5), ContextState::ActiveStream { root_id: 1 });
        // The second call still ensures root 2 exists.
        assert_eq!(created.get(), 2);
    }

    #[test]
    fn ensure_context_creates_missing_root() {
        let (mut registry, _, created) = registry_with_counter();
        registry.on_context_create(7, 3);
        assert_eq!(created.get(), 1);
        assert_eq!(registry.state(3), ContextState::ActiveRoot);
        assert_eq!(registry.state(7), ContextState::ActiveStream { root_id: 3 });
    }

    #[test]
    #[should_panic(expected = "unknown stream context id 9")]
    fn hook_for_unknown_stream_is_fatal() {
        let (mut registry, _, _) = registry_with_counter();
        registry.on_stream_event(9, request_headers());
    }

    #[test]
    fn deleted_id_reads_unregistered_and_can_be_reused() {
        let (mut registry, journal, _) = registry_with_counter();
        registry.ensure_context(2, 1);
        registry.delete(2);
        assert_eq!(registry.state(2), ContextState::Unregistered);
        registry.ensure_context(2, 1);
        assert_eq!(registry.state(2), ContextState::ActiveStream { root_id: 1 });
        assert_eq!(journal.borrow().as_slice(), ["stream2:delete"]);
    }

    // -------------------------------------------------------------------------
    // configuration
    // -------------------------------------------------------------------------

    #[test]
    fn accepted_configuration_is_stored() {
        let (mut registry, _, _) = registry_with_counter();
        registry.host().set_buffer(BufferType::PluginConfiguration, br#"{"limit":3}"#);
        registry.ensure_root_context(1);
        assert!(registry.on_configure(1, 11));
        assert_eq!(registry.configuration(1), Some(r#"{"limit":3}"#));
    }

    #[test]
    fn empty_vm_configuration_starts() {
        let (mut registry, _, _) = registry_with_counter();
        registry.ensure_root_context(1);
        assert!(registry.on_vm_start(1, 0));
    }

    #[test]
    fn unreadable_configuration_is_rejected() {
        let (mut registry, _, _) = registry_with_counter();
        registry.host().set_buffer(BufferType::PluginConfiguration, &[0xff, 0xfe]);
        registry.ensure_root_context(1);
        assert!(!registry.on_configure(1, 2));
        assert_eq!(registry.configuration(1), Some(""));
    }

    // -------------------------------------------------------------------------
    // call correlation
    // -------------------------------------------------------------------------

    #[test]
    fn response_reaches_originating_stream() {
        let (mut registry, journal, _) = registry_with_counter();
        registry.ensure_context(2, 1);
        let action = registry.on_stream_event(2, request_headers());
        assert_eq!(action, HookReturn::Action(Action::Pause));
        let token = registry.host().http_calls()[0].token;

        registry.on_http_call_response(1, token, 2, 10, 0);

        assert_eq!(journal.borrow().as_slice(), [format!("stream2:{token}:2:false")]);
        assert_eq!(registry.host().effective_context(), Some(2));
        assert_eq!(registry.pending_calls(1), 0);
    }

    #[test]
    fn response_for_root_call_does_not_switch_context() {
        let (mut registry, journal, _) = registry_with_counter();
        registry.ensure_root_context(1);
        registry.on_tick(1);
        let token = registry.host().http_calls()[0].token;

        registry.on_http_call_response(1, token, 0, 0, 0);

        assert_eq!(journal.borrow().as_slice(), [format!("root:{token}:false")]);
        assert_eq!(registry.host().effective_context(), None);
    }

    #[test]
    fn unknown_token_is_dropped() {
        let (mut registry, journal, _) = registry_with_counter();
        registry.ensure_root_context(1);
        registry.on_http_call_response(1, 404, 1, 1, 1);
        assert!(journal.borrow().is_empty());
    }

    #[test]
    fn rejected_call_leaves_no_pending_state() {
        let (mut registry, _, _) = registry_with_counter();
        registry.ensure_context(2, 1);
        registry.host().fail_next(Status::BadArgument);
        let action = registry.on_stream_event(2, request_headers());
        assert_eq!(action, HookReturn::Action(Action::Continue));
        assert_eq!(registry.pending_calls(1), 0);
    }

    #[test]
    fn root_teardown_cancels_every_call_once() {
        let (mut registry, journal, _) = registry_with_counter();
        registry.ensure_root_context(1);
        for stream in [2, 3, 4] {
            registry.ensure_context(stream, 1);
            registry.on_stream_event(stream, request_headers());
        }
        registry.on_tick(1);
        assert_eq!(registry.pending_calls(1), 4);

        registry.delete(1);

        let entries = journal.borrow();
        let cancelled = entries.iter().filter(|e| e.ends_with(":true")).count();
        assert_eq!(cancelled, 4);
        assert_eq!(entries.last().map(String::as_str), Some("root:delete"));
        assert_eq!(registry.state(1), ContextState::Unregistered);
    }

    #[test]
    fn stream_teardown_cancels_only_its_calls() {
        let (mut registry, journal, _) = registry_with_counter();
        registry.ensure_context(2, 1);
        registry.ensure_context(3, 1);
        registry.on_stream_event(2, request_headers());
        registry.on_stream_event(3, request_headers());
        let stream3_token = registry.host().http_calls()[1].token;

        registry.delete(2);
        assert_eq!(registry.pending_calls(1), 1);

        // Stale response for the cancelled call is ignored.
        let stream2_token = registry.host().http_calls()[0].token;
        registry.on_http_call_response(1, stream2_token, 0, 0, 0);
        registry.on_http_call_response(1, stream3_token, 1, 0, 0);

        assert_eq!(journal.borrow().as_slice(), [
            format!("stream2:{stream2_token}:2:true"),
            "stream2:delete".to_string(),
            format!("stream3:{stream3_token}:3:false"),
        ]);
    }

    /// Re-issues its call whenever the previous one is cancelled.
    struct Retrying {
        attempts: Rc<RefCell<Vec<Result<u32, Status>>>>,
    }

    impl Context for Retrying {
        fn on_http_call_response(&mut self, cx: &mut HostContext<'_>, _token: u32, outcome: CallOutcome) {
            if outcome.is_cancelled() {
                let retry = cx.dispatch_http_call("auth", &[], None, &[], Duration::from_secs(1));
                self.attempts.borrow_mut().push(retry);
            }
        }
    }

    impl StreamContext for Retrying {
        fn on_request_headers(
            &mut self,
            cx: &mut HostContext<'_>,
            _num_headers: usize,
            _end_of_stream: bool,
        ) -> Action {
            let _ = cx.dispatch_http_call("auth", &[], None, &[], Duration::from_secs(1));
            Action::Pause
        }
    }

    impl RootContext for Retrying {
        fn on_tick(&mut self, cx: &mut HostContext<'_>) {
            let _ = cx.dispatch_http_call("stats", &[], None, &[], Duration::from_secs(1));
        }

        fn create_stream_context(&mut self, _context_id: u32) -> Box<dyn StreamContext> {
            Box::new(Retrying {
                attempts: Rc::clone(&self.attempts),
            })
        }
    }

    fn retrying_registry() -> (ContextRegistry<MockHost>, Rc<RefCell<Vec<Result<u32, Status>>>>) {
        let attempts: Rc<RefCell<Vec<Result<u32, Status>>>> = Rc::default();
        let mut registry = ContextRegistry::new(MockHost::new());
        let factory_attempts = Rc::clone(&attempts);
        registry.register_root_context("", move |_| {
            Box::new(Retrying {
                attempts: Rc::clone(&factory_attempts),
            })
        });
        (registry, attempts)
    }

    #[test]
    fn stream_teardown_refuses_retry_from_cancelled_call() {
        let (mut registry, attempts) = retrying_registry();
        registry.on_context_create(2, 1);
        registry.on_stream_event(2, request_headers());
        assert_eq!(registry.pending_calls(1), 1);

        registry.delete(2);

        assert_eq!(attempts.borrow().as_slice(), [Err(Status::BadArgument)]);
        assert_eq!(registry.host().http_calls().len(), 1);
        assert_eq!(registry.pending_calls(1), 0);
        assert_eq!(registry.state(2), ContextState::Unregistered);
    }

    #[test]
    fn reused_stream_id_can_call_after_teardown() {
        let (mut registry, _) = retrying_registry();
        registry.on_context_create(2, 1);
        registry.on_stream_event(2, request_headers());
        registry.delete(2);

        registry.on_context_create(2, 1);
        registry.on_stream_event(2, request_headers());

        assert_eq!(registry.host().http_calls().len(), 2);
        assert_eq!(registry.pending_calls(1), 1);
    }

    #[test]
    fn root_teardown_refuses_retries_from_every_origin() {
        let (mut registry, attempts) = retrying_registry();
        registry.on_context_create(2, 1);
        registry.on_context_create(3, 1);
        registry.on_stream_event(2, request_headers());
        registry.on_stream_event(3, request_headers());
        registry.on_tick(1);
        assert_eq!(registry.pending_calls(1), 3);

        registry.delete(1);

        assert_eq!(attempts.borrow().as_slice(), [Err(Status::BadArgument); 3]);
        assert_eq!(registry.host().http_calls().len(), 3);
        assert_eq!(registry.root_count(), 0);
    }

    #[test]
    fn explicit_continuation_runs_instead_of_hook() {
        struct Caller;
        impl Context for Caller {}
        impl RootContext for Caller {
            fn on_tick(&mut self, cx: &mut HostContext<'_>) {
                let _ = cx.dispatch_http_call_with(
                    "stats",
                    &[],
                    Some(b"ping"),
                    &[],
                    Duration::from_secs(2),
                    continuation(|_, cx, _, outcome| {
                        let headers = cx.http_call_response_headers().expect("headers");
                        cx.host().log(crate::types::LogLevel::Info, &format!("{} {:?}", headers.len(), outcome)).ok();
                    }),
                );
            }
        }

        let mut registry = ContextRegistry::new(MockHost::new());
        registry.register_root_context("", |_| Box::new(Caller));
        registry.ensure_root_context(1);
        registry.host().set_map(MapType::HttpCallResponseHeaders, &[(":status", "200")]).expect("set_map");
        registry.on_tick(1);
        let token = registry.host().http_calls()[0].token;
        registry.on_http_call_response(1, token, 1, 0, 0);

        let logs = registry.host().logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].1.starts_with("1 Response"));
    }
}
