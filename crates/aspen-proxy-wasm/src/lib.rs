//! Guest-side runtime for proxy-wasm extension modules.
//!
//! A module built on this crate is loaded by a proxy host, which drives it
//! through `proxy_on_*` exports and serves it through `proxy_*` imports
//! (ABI 0.2.1). The crate turns that flat, id-keyed interface into typed
//! plugin contexts.
//!
//! ## Module Lifecycle
//!
//! 1. `_start` registers root factories with `exports::register_root_context`
//! 2. The host creates a root context; the factory named by the
//!    `plugin_root_id` property builds it
//! 3. `on_vm_start` and `on_configure` deliver the VM and plugin configuration
//! 4. Each request or connection gets a stream context from its root
//! 5. Outbound calls are correlated by token and resumed on the context that
//!    issued them, or cancelled if that context is deleted first
//!
//! ## Layers
//!
//! - `marshal` and `codec` move bytes across the boundary
//! - `host::Host` is the typed view of the imports; `abi::AbiHost` implements
//!   it inside the sandbox and `test_support::MockHost` outside
//! - `registry::ContextRegistry` owns the contexts and routes every hook

#[cfg(target_arch = "wasm32")]
pub mod abi;
pub mod calls;
pub mod codec;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
#[cfg(target_arch = "wasm32")]
pub mod exports;
pub mod host;
pub mod log;
pub mod marshal;
pub mod metrics;
pub mod registry;
pub mod types;

pub use calls::CallOutcome;
pub use calls::Continuation;
pub use calls::continuation;
pub use context::Context;
pub use context::RootContext;
pub use context::StreamContext;
pub use error::HostResult;
pub use error::Status;
pub use host::Host;
pub use host::HostContext;
pub use registry::ContextRegistry;
pub use registry::ContextState;
pub use types::Action;
pub use types::BufferType;
pub use types::LogLevel;
pub use types::MapType;
pub use types::PeerType;

#[cfg(any(test, feature = "testing"))]
pub mod test_support;
