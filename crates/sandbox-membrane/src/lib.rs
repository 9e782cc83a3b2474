#![forbid(unsafe_code)]

//! Virtualization membrane for sandboxed script execution.
//!
//! Three pieces sit between sandboxed code and the host environment:
//!
//! - [`invariant`] decides whether a get/set trap may report a value
//!   without breaking the host's non-configurable property guarantees.
//! - [`binder`] wraps host functions so they run against a fixed receiver
//!   while still answering `instanceof`, statics and construction like the
//!   original.
//! - [`tracker`] remembers resources a sandbox creates so
//!   [`sandbox::SandboxScope::teardown`] can release each exactly once.
//!
//! [`object_model`] and [`realm`] provide the host object model they
//! operate on.

pub mod binder;
pub mod config;
pub mod diagnostics;
pub mod error_code;
pub mod invariant;
pub mod object_model;
pub mod realm;
pub mod sandbox;
pub mod tracker;

pub use binder::{FunctionIdentityBinder, NATIVE_KEY, StaticTransfer};
pub use config::{ConfigError, SandboxConfig};
pub use diagnostics::{DiagnosticEvent, DiagnosticLog, DiagnosticMode};
pub use error_code::SandboxErrorCode;
pub use invariant::{
    DescriptorInvariantChecker, InterceptionGuard, InterceptionVerdict, SetTrapContext,
};
pub use object_model::{
    JsValue, ObjectError, ObjectHandle, ObjectHeap, PropertyDescriptor, PropertyKey,
    WellKnownSymbol,
};
pub use realm::{Invocation, Realm};
pub use sandbox::{SandboxId, SandboxScope};
pub use tracker::{
    MutationObserver, MutationObserverInit, RecoveryReport, ScopedObserverFactory,
    ScopedResourceTracker, Tracked, TrackedResource,
};
