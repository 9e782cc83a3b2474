//! One sandbox instance: its realm, its membrane components, and the
//! resources it must release on teardown.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::binder::FunctionIdentityBinder;
use crate::config::{ConfigError, SandboxConfig};
use crate::diagnostics::DiagnosticLog;
use crate::invariant::InterceptionGuard;
use crate::object_model::{JsValue, ObjectError, ObjectHandle};
use crate::realm::Realm;
use crate::tracker::{RecoveryReport, ScopedObserverFactory};

const COMPONENT: &str = "sandbox";

static NEXT_SANDBOX_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SandboxId(pub u64);

impl SandboxId {
    fn next() -> Self {
        Self(NEXT_SANDBOX_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sandbox:{}", self.0)
    }
}

#[derive(Debug)]
pub struct SandboxScope {
    id: SandboxId,
    config: Rc<SandboxConfig>,
    diagnostics: DiagnosticLog,
    realm: Realm,
    observers: ScopedObserverFactory,
    binder: FunctionIdentityBinder,
    guard: InterceptionGuard,
    torn_down: Cell<bool>,
}

impl SandboxScope {
    pub fn new(config: SandboxConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Rc::new(config);
        let diagnostics = DiagnosticLog::new(&config.trace_id, config.diagnostics);
        let id = SandboxId::next();
        diagnostics.emit(COMPONENT, "create", &id.to_string(), None, None);
        Ok(Self {
            id,
            observers: ScopedObserverFactory::new(Rc::clone(&config), diagnostics.clone()),
            binder: FunctionIdentityBinder::new(diagnostics.clone()),
            guard: InterceptionGuard::new(diagnostics.clone()),
            realm: Realm::new(),
            config,
            diagnostics,
            torn_down: Cell::new(false),
        })
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Self::new(SandboxConfig::from_json(text)?)
    }

    pub fn id(&self) -> SandboxId {
        self.id
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    pub fn realm_mut(&mut self) -> &mut Realm {
        &mut self.realm
    }

    /// The sandbox's `MutationObserver` constructor.
    pub fn observers(&self) -> &ScopedObserverFactory {
        &self.observers
    }

    pub fn binder(&self) -> &FunctionIdentityBinder {
        &self.binder
    }

    pub fn guard(&self) -> &InterceptionGuard {
        &self.guard
    }

    /// Bind `target` to `context` inside this sandbox's realm.
    pub fn bind(
        &mut self,
        target: ObjectHandle,
        context: JsValue,
    ) -> Result<ObjectHandle, ObjectError> {
        self.binder.bind(&mut self.realm, target, context)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    /// Release every tracked resource. Only the first call recovers;
    /// later calls return `None`.
    pub fn teardown(&self) -> Option<RecoveryReport> {
        if self.torn_down.replace(true) {
            return None;
        }
        let report = self.observers.recover();
        self.diagnostics.emit(
            COMPONENT,
            "teardown",
            &format!("{} disposed={}", self.id, report.disposed),
            None,
            None,
        );
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticMode;

    fn config(trace_id: &str) -> SandboxConfig {
        SandboxConfig {
            trace_id: trace_id.to_string(),
            diagnostics: DiagnosticMode::Production,
            ..SandboxConfig::default()
        }
    }

    #[test]
    fn ids_are_unique() {
        let a = SandboxScope::new(config("a")).unwrap();
        let b = SandboxScope::new(config("b")).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.diagnostics().trace_id(), "a");
        assert_eq!(a.diagnostics().count("create"), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(
            SandboxScope::new(config("")),
            Err(ConfigError::Invalid { field: "trace_id", .. })
        ));
    }

    #[test]
    fn teardown_recovers_once() {
        let scope = SandboxScope::new(config("t")).unwrap();
        let observer = scope.observers().construct(ObjectHandle(0));
        let report = scope.teardown().unwrap();
        assert_eq!(report.disposed, 1);
        assert!(scope.is_torn_down());
        assert!(scope.teardown().is_none());
        assert_eq!(observer.disconnect_count(), 1);
        assert_eq!(scope.diagnostics().count("teardown"), 1);
        assert_eq!(scope.diagnostics().count("recover"), 1);
    }

    #[test]
    fn from_json_honours_collection_flag() {
        let scope = SandboxScope::from_json(r#"{"collection_disabled": true}"#).unwrap();
        assert!(scope.config().collection_disabled);
        scope.observers().construct(ObjectHandle(0));
        assert!(scope.observers().tracker().is_empty());
    }
}
