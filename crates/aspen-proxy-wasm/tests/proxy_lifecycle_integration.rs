//! Integration tests for the context registry driven the way a proxy host
//! drives a module.
//!
//! A small authorization plugin is registered, configured, and then fed
//! request, call-response and deletion events through `ContextRegistry`
//! backed by `MockHost`. Assertions look at what the plugin asked the host
//! to do: header edits, resumed streams, local replies and metrics.

#![cfg(feature = "testing")]

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use aspen_proxy_wasm::Action;
use aspen_proxy_wasm::BufferType;
use aspen_proxy_wasm::CallOutcome;
use aspen_proxy_wasm::Context;
use aspen_proxy_wasm::ContextRegistry;
use aspen_proxy_wasm::ContextState;
use aspen_proxy_wasm::Host;
use aspen_proxy_wasm::HostContext;
use aspen_proxy_wasm::LogLevel;
use aspen_proxy_wasm::MapType;
use aspen_proxy_wasm::RootContext;
use aspen_proxy_wasm::StreamContext;
use aspen_proxy_wasm::config;
use aspen_proxy_wasm::dispatch::HookReturn;
use aspen_proxy_wasm::dispatch::StreamEvent;
use aspen_proxy_wasm::log::HostLogLayer;
use aspen_proxy_wasm::metrics::Counter;
use aspen_proxy_wasm::test_support::MockHost;
use aspen_proxy_wasm::types::PLUGIN_ROOT_ID_PROPERTY;
use aspen_proxy_wasm::types::StreamType;
use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;

const ROOT_ID: u32 = 1;
const PLUGIN_CONFIG: &str = r#"{"upstream": "auth-cluster", "denied_status": 403}"#;

// ============================================================================
// Plugin under test
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AuthzConfig {
    upstream: String,
    denied_status: u32,
    timeout_ms: u64,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            upstream: "authz".to_string(),
            denied_status: 401,
            timeout_ms: 500,
        }
    }
}

#[derive(Default)]
struct AuthzRoot {
    config: Rc<AuthzConfig>,
    checks: Option<Counter>,
}

impl Context for AuthzRoot {}

impl RootContext for AuthzRoot {
    fn on_vm_start(&mut self, cx: &mut HostContext<'_>, _vm_configuration: &str) -> bool {
        self.checks = Counter::define(cx.host(), "authz.checks").ok();
        self.checks.is_some()
    }

    fn on_configure(&mut self, _cx: &mut HostContext<'_>, configuration: &str) -> bool {
        match config::parse_json::<AuthzConfig>(configuration) {
            Ok(config) => {
                self.config = Rc::new(config);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "rejecting configuration");
                false
            }
        }
    }

    fn create_stream_context(&mut self, _context_id: u32) -> Box<dyn StreamContext> {
        Box::new(AuthzStream {
            config: Rc::clone(&self.config),
            checks: self.checks,
        })
    }
}

struct AuthzStream {
    config: Rc<AuthzConfig>,
    checks: Option<Counter>,
}

impl Context for AuthzStream {
    fn on_http_call_response(&mut self, cx: &mut HostContext<'_>, _token: u32, outcome: CallOutcome) {
        if outcome.is_cancelled() {
            return;
        }
        let status = cx.host().get_map_value(MapType::HttpCallResponseHeaders, ":status").ok().flatten();
        if status.as_deref() == Some("200") {
            cx.set_header(MapType::HttpRequestHeaders, "x-authz", Some("allowed"));
            cx.resume_http_request();
        } else {
            cx.send_http_response(self.config.denied_status, &[("x-denied-by", "authz")], Some(b"denied"));
        }
    }
}

impl StreamContext for AuthzStream {
    fn on_request_headers(&mut self, cx: &mut HostContext<'_>, _num_headers: usize, _end_of_stream: bool) -> Action {
        let path = cx.host().get_map_value(MapType::HttpRequestHeaders, ":path").ok().flatten().unwrap_or_default();
        if path.starts_with("/public") {
            cx.add_header(MapType::HttpRequestHeaders, "x-authz", "skipped");
            return Action::Continue;
        }

        if let Some(checks) = self.checks {
            let _ = checks.increment(cx.host());
        }
        let headers = [(":method", "GET"), (":path", path.as_str()), (":authority", "authz")];
        let timeout = Duration::from_millis(self.config.timeout_ms);
        match cx.dispatch_http_call(&self.config.upstream, &headers, None, &[], timeout) {
            Ok(_) => Action::Pause,
            Err(status) => {
                tracing::warn!(%status, "authorization call failed, failing open");
                Action::Continue
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn configured_registry() -> ContextRegistry<MockHost> {
    let host = MockHost::new();
    host.set_property_value(&[PLUGIN_ROOT_ID_PROPERTY], b"authz");
    host.set_buffer(BufferType::PluginConfiguration, PLUGIN_CONFIG.as_bytes());

    let mut registry = ContextRegistry::new(host);
    registry.register_root_context("authz", |_| Box::new(AuthzRoot::default()));
    registry.on_context_create(ROOT_ID, 0);
    assert!(registry.on_vm_start(ROOT_ID, 0));
    assert!(registry.on_configure(ROOT_ID, PLUGIN_CONFIG.len()));
    registry
}

fn request(registry: &mut ContextRegistry<MockHost>, stream_id: u32, path: &str) -> HookReturn {
    registry
        .host()
        .set_map(MapType::HttpRequestHeaders, &[(":path", path), (":method", "GET")])
        .expect("set request headers");
    registry.on_context_create(stream_id, ROOT_ID);
    registry.on_stream_event(stream_id, StreamEvent::RequestHeaders {
        num_headers: 2,
        end_of_stream: true,
    })
}

fn respond(registry: &mut ContextRegistry<MockHost>, token: u32, status: &str) {
    registry
        .host()
        .set_map(MapType::HttpCallResponseHeaders, &[(":status", status)])
        .expect("set call response headers");
    registry.on_http_call_response(ROOT_ID, token, 1, 0, 0);
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_configuration_reaches_root_and_streams() {
    let mut registry = configured_registry();
    assert_eq!(registry.configuration(ROOT_ID), Some(PLUGIN_CONFIG));

    request(&mut registry, 2, "/orders");
    let calls = registry.host().http_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].upstream, "auth-cluster");
    assert_eq!(calls[0].timeout, Duration::from_millis(500));
    assert!(calls[0].headers.contains(&(":path".to_string(), "/orders".to_string())));
}

#[test]
fn test_public_path_skips_authorization() {
    let mut registry = configured_registry();

    let result = request(&mut registry, 2, "/public/logo.png");

    assert_eq!(result, HookReturn::Action(Action::Continue));
    assert!(registry.host().http_calls().is_empty());
    let added = ("x-authz".to_string(), "skipped".to_string());
    assert_eq!(registry.host().map(MapType::HttpRequestHeaders).last(), Some(&added));
    assert_eq!(registry.host().metric_value("authz.checks"), Some(0));
}

#[test]
fn test_allowed_request_is_resumed() {
    let mut registry = configured_registry();
    assert_eq!(request(&mut registry, 2, "/orders"), HookReturn::Action(Action::Pause));
    let token = registry.host().http_calls()[0].token;

    respond(&mut registry, token, "200");

    let host = registry.host();
    assert_eq!(host.effective_context(), Some(2));
    assert_eq!(host.resumed(), vec![StreamType::HttpRequest]);
    assert!(host.map(MapType::HttpRequestHeaders).contains(&("x-authz".to_string(), "allowed".to_string())));
    assert!(host.local_responses().is_empty());
    assert_eq!(host.metric_value("authz.checks"), Some(1));
    assert_eq!(registry.pending_calls(ROOT_ID), 0);
}

#[test]
fn test_denied_request_gets_local_reply() {
    let mut registry = configured_registry();
    request(&mut registry, 2, "/admin");
    let token = registry.host().http_calls()[0].token;

    respond(&mut registry, token, "403");

    let replies = registry.host().local_responses();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].status_code, 403);
    assert_eq!(replies[0].body.as_deref(), Some(&b"denied"[..]));
    assert!(registry.host().resumed().is_empty());
}

#[test]
fn test_concurrent_streams_are_resumed_independently() {
    let mut registry = configured_registry();
    request(&mut registry, 2, "/a");
    request(&mut registry, 3, "/b");
    let calls = registry.host().http_calls();
    assert_eq!(registry.pending_calls(ROOT_ID), 2);

    // Answer out of order.
    respond(&mut registry, calls[1].token, "500");
    assert_eq!(registry.host().effective_context(), Some(3));
    respond(&mut registry, calls[0].token, "200");
    assert_eq!(registry.host().effective_context(), Some(2));

    assert_eq!(registry.host().local_responses().len(), 1);
    assert_eq!(registry.host().resumed(), vec![StreamType::HttpRequest]);
}

#[test]
fn test_deleted_stream_ignores_late_response() {
    let mut registry = configured_registry();
    request(&mut registry, 2, "/orders");
    let token = registry.host().http_calls()[0].token;

    assert!(registry.on_done(2));
    registry.on_log(2);
    registry.delete(2);
    assert_eq!(registry.state(2), ContextState::Unregistered);
    assert_eq!(registry.pending_calls(ROOT_ID), 0);

    let sink = Arc::new(MockHost::new());
    let subscriber = tracing_subscriber::registry().with(HostLogLayer::new(Arc::clone(&sink)));
    tracing::subscriber::with_default(subscriber, || respond(&mut registry, token, "200"));

    assert!(registry.host().resumed().is_empty());
    assert!(registry.host().local_responses().is_empty());
    let logs = sink.logs();
    assert!(
        logs.iter().any(|(level, message)| *level == LogLevel::Error && message.contains("unknown token")),
        "expected stale-token error, got {logs:?}"
    );
}

#[test]
fn test_rejected_configuration_keeps_previous() {
    let mut registry = configured_registry();
    let bad = "{\"denied_status\": \"nope\"}";
    registry.host().set_buffer(BufferType::PluginConfiguration, bad.as_bytes());

    assert!(!registry.on_configure(ROOT_ID, bad.len()));
    assert_eq!(registry.configuration(ROOT_ID), Some(PLUGIN_CONFIG));
}

#[test]
fn test_root_deletion_tears_down_cleanly() {
    let mut registry = configured_registry();
    request(&mut registry, 2, "/a");
    request(&mut registry, 3, "/b");
    registry.delete(2);
    registry.delete(3);
    registry.delete(ROOT_ID);

    assert_eq!(registry.root_count(), 0);
    assert_eq!(registry.stream_count(), 0);
    assert!(registry.host().resumed().is_empty());
}
