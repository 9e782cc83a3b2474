//! Sandbox-scoped resource tracking.
//!
//! Every resource constructed through a sandbox's [`ScopedResourceTracker`]
//! is remembered in a set owned by that sandbox alone. Disposing a resource
//! individually removes it from the set *before* running its real disposal;
//! [`ScopedResourceTracker::recover`] disposes whatever is left and always
//! ends with an empty set. Each resource is therefore disposed at most once
//! through the tracker.
//!
//! [`MutationObserver`] is the concrete resource the sandbox hands out;
//! [`ScopedObserverFactory`] exposes the observer constructor signature.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::config::SandboxConfig;
use crate::diagnostics::DiagnosticLog;
use crate::error_code::SandboxErrorCode;
use crate::object_model::ObjectHandle;

const COMPONENT: &str = "resource_tracker";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("resource is no longer valid: {0}")]
    Stale(String),
    #[error("dispose failed: {0}")]
    DisposeFailed(String),
}

/// A handle whose release the sandbox owes at teardown.
pub trait TrackedResource {
    /// Release the resource.
    fn dispose(&self) -> Result<(), ResourceError>;

    /// Whether `dispose` can still be called meaningfully.
    fn is_disposable(&self) -> bool {
        true
    }

    /// Short label for diagnostics.
    fn describe(&self) -> String;
}

/// Identity of one tracked construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource:{}", self.0)
    }
}

struct TrackedSet<R> {
    members: BTreeMap<ResourceId, Rc<R>>,
}

/// Counts from one `recover()` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub disposed: usize,
    /// Members no longer disposable.
    pub stale: usize,
    /// Members whose disposal returned an error.
    pub failed: usize,
}

/// A resource handed out by the tracker. Disposal only goes through
/// [`Tracked::dispose`], so the set is always left first.
pub struct Tracked<R> {
    id: ResourceId,
    resource: Rc<R>,
    /// Dangling when constructed with collection disabled.
    set: Weak<RefCell<TrackedSet<R>>>,
}

impl<R> Clone for Tracked<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            resource: Rc::clone(&self.resource),
            set: Weak::clone(&self.set),
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for Tracked<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .finish()
    }
}

impl<R: TrackedResource> Tracked<R> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Individual disposal: leave the tracked set first, then release.
    pub fn dispose(&self) -> Result<(), ResourceError> {
        if let Some(set) = self.set.upgrade() {
            set.borrow_mut().members.remove(&self.id);
        }
        self.resource.dispose()
    }
}

pub struct ScopedResourceTracker<R> {
    set: Rc<RefCell<TrackedSet<R>>>,
    next_id: Cell<u64>,
    config: Rc<SandboxConfig>,
    diagnostics: DiagnosticLog,
}

impl<R> fmt::Debug for ScopedResourceTracker<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedResourceTracker")
            .field("tracked", &self.set.borrow().members.len())
            .field("collection_disabled", &self.config.collection_disabled)
            .finish()
    }
}

impl<R: TrackedResource> ScopedResourceTracker<R> {
    pub fn new(config: Rc<SandboxConfig>, diagnostics: DiagnosticLog) -> Self {
        Self {
            set: Rc::new(RefCell::new(TrackedSet {
                members: BTreeMap::new(),
            })),
            next_id: Cell::new(1),
            config,
            diagnostics,
        }
    }

    /// Register a freshly constructed resource, unless collection is
    /// disabled in which case it is handed back untracked.
    pub fn track(&self, resource: R) -> Tracked<R> {
        let id = ResourceId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let resource = Rc::new(resource);
        if self.config.collection_disabled {
            return Tracked {
                id,
                resource,
                set: Weak::new(),
            };
        }
        self.set
            .borrow_mut()
            .members
            .insert(id, Rc::clone(&resource));
        Tracked {
            id,
            resource,
            set: Rc::downgrade(&self.set),
        }
    }

    pub fn contains(&self, handle: &Tracked<R>) -> bool {
        self.set
            .borrow()
            .members
            .get(&handle.id)
            .is_some_and(|member| Rc::ptr_eq(member, &handle.resource))
    }

    pub fn len(&self) -> usize {
        self.set.borrow().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.borrow().members.is_empty()
    }

    /// Dispose every tracked member and empty the set.
    ///
    /// Stale members and failing disposals are recorded and skipped; the
    /// set is cleared regardless.
    pub fn recover(&self) -> RecoveryReport {
        let members = std::mem::take(&mut self.set.borrow_mut().members);
        let mut report = RecoveryReport::default();

        for (id, resource) in members {
            if !resource.is_disposable() {
                report.stale += 1;
                self.diagnostics.emit(
                    COMPONENT,
                    "recover_skip_stale",
                    "skip",
                    Some(SandboxErrorCode::RecoveryStaleResource),
                    Some(format!("{id} {}", resource.describe())),
                );
                continue;
            }
            match resource.dispose() {
                Ok(()) => report.disposed += 1,
                Err(err) => {
                    report.failed += 1;
                    self.diagnostics.emit(
                        COMPONENT,
                        "recover_dispose_failed",
                        &err.to_string(),
                        Some(SandboxErrorCode::RecoveryDisposeFailed),
                        Some(format!("{id} {}", resource.describe())),
                    );
                }
            }
        }

        self.diagnostics.emit(
            COMPONENT,
            "recover",
            &format!(
                "disposed={} stale={} failed={}",
                report.disposed, report.stale, report.failed
            ),
            None,
            None,
        );
        report
    }
}

// ---------------------------------------------------------------------------
// MutationObserver
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ObserverError {
    #[error("invalid observe() options: {0}")]
    InvalidOptions(&'static str),
    #[error("observer is no longer valid")]
    Invalidated,
}

/// `MutationObserverInit`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MutationObserverInit {
    pub child_list: bool,
    pub attributes: Option<bool>,
    pub character_data: Option<bool>,
    pub subtree: bool,
    pub attribute_old_value: Option<bool>,
    pub character_data_old_value: Option<bool>,
    pub attribute_filter: Option<Vec<String>>,
}

/// Options after the DOM's defaulting and validation rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverOptions {
    pub child_list: bool,
    pub attributes: bool,
    pub character_data: bool,
    pub subtree: bool,
    pub attribute_old_value: bool,
    pub character_data_old_value: bool,
    pub attribute_filter: Option<Vec<String>>,
}

impl MutationObserverInit {
    pub fn normalize(&self) -> Result<ObserverOptions, ObserverError> {
        let attributes = self.attributes.unwrap_or(
            self.attribute_old_value.is_some() || self.attribute_filter.is_some(),
        );
        let character_data = self
            .character_data
            .unwrap_or(self.character_data_old_value.is_some());

        if !self.child_list && !attributes && !character_data {
            return Err(ObserverError::InvalidOptions(
                "one of childList, attributes, characterData must be true",
            ));
        }
        if self.attribute_old_value == Some(true) && !attributes {
            return Err(ObserverError::InvalidOptions(
                "attributeOldValue requires attributes",
            ));
        }
        if self.attribute_filter.is_some() && !attributes {
            return Err(ObserverError::InvalidOptions(
                "attributeFilter requires attributes",
            ));
        }
        if self.character_data_old_value == Some(true) && !character_data {
            return Err(ObserverError::InvalidOptions(
                "characterDataOldValue requires characterData",
            ));
        }

        Ok(ObserverOptions {
            child_list: self.child_list,
            attributes,
            character_data,
            subtree: self.subtree,
            attribute_old_value: self.attribute_old_value.unwrap_or(false),
            character_data_old_value: self.character_data_old_value.unwrap_or(false),
            attribute_filter: self.attribute_filter.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    ChildList,
    Attributes,
    CharacterData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: ObjectHandle,
    pub attribute_name: Option<String>,
    pub old_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Registration {
    target: ObjectHandle,
    options: ObserverOptions,
}

/// Observer handle. Records are queued by the host; the callback is never
/// invoked from here.
#[derive(Debug)]
pub struct MutationObserver {
    callback: ObjectHandle,
    registrations: RefCell<Vec<Registration>>,
    records: RefCell<VecDeque<MutationRecord>>,
    disconnects: Cell<u32>,
    invalidated: Cell<bool>,
}

impl MutationObserver {
    pub fn new(callback: ObjectHandle) -> Self {
        Self {
            callback,
            registrations: RefCell::new(Vec::new()),
            records: RefCell::new(VecDeque::new()),
            disconnects: Cell::new(0),
            invalidated: Cell::new(false),
        }
    }

    pub fn callback(&self) -> ObjectHandle {
        self.callback
    }

    /// Start (or re-configure) observation of `target`.
    pub fn observe(
        &self,
        target: ObjectHandle,
        init: &MutationObserverInit,
    ) -> Result<(), ObserverError> {
        if self.invalidated.get() {
            return Err(ObserverError::Invalidated);
        }
        let options = init.normalize()?;
        let mut registrations = self.registrations.borrow_mut();
        match registrations.iter_mut().find(|r| r.target == target) {
            Some(existing) => existing.options = options,
            None => registrations.push(Registration { target, options }),
        }
        Ok(())
    }

    pub fn observed_targets(&self) -> Vec<ObjectHandle> {
        self.registrations.borrow().iter().map(|r| r.target).collect()
    }

    pub fn is_observing(&self) -> bool {
        !self.registrations.borrow().is_empty()
    }

    /// Host hook: queue `record` if a registration on its target asks for
    /// that kind of mutation. Old values are dropped unless requested.
    pub fn enqueue_record(&self, mut record: MutationRecord) -> bool {
        let registrations = self.registrations.borrow();
        let Some(registration) = registrations.iter().find(|r| r.target == record.target) else {
            return false;
        };
        let options = &registration.options;
        let wanted = match record.kind {
            MutationKind::ChildList => options.child_list,
            MutationKind::Attributes => {
                options.attributes
                    && match (&options.attribute_filter, &record.attribute_name) {
                        (Some(filter), Some(name)) => filter.contains(name),
                        (Some(_), None) => false,
                        (None, _) => true,
                    }
            }
            MutationKind::CharacterData => options.character_data,
        };
        if !wanted {
            return false;
        }
        let keep_old = match record.kind {
            MutationKind::ChildList => false,
            MutationKind::Attributes => options.attribute_old_value,
            MutationKind::CharacterData => options.character_data_old_value,
        };
        if !keep_old {
            record.old_value = None;
        }
        drop(registrations);
        self.records.borrow_mut().push_back(record);
        true
    }

    /// `takeRecords()`.
    pub fn take_records(&self) -> Vec<MutationRecord> {
        self.records.borrow_mut().drain(..).collect()
    }

    /// Drop all registrations and pending records.
    pub(crate) fn disconnect(&self) {
        self.registrations.borrow_mut().clear();
        self.records.borrow_mut().clear();
        self.disconnects.set(self.disconnects.get() + 1);
    }

    /// Times `disconnect` ran.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.get()
    }

    /// Host hook: the underlying observer was torn down outside the sandbox.
    pub fn invalidate(&self) {
        self.invalidated.set(true);
    }
}

impl TrackedResource for MutationObserver {
    fn dispose(&self) -> Result<(), ResourceError> {
        if self.invalidated.get() {
            return Err(ResourceError::Stale(self.describe()));
        }
        self.disconnect();
        Ok(())
    }

    fn is_disposable(&self) -> bool {
        !self.invalidated.get()
    }

    fn describe(&self) -> String {
        format!("MutationObserver(callback={})", self.callback)
    }
}

pub type TrackedObserver = Tracked<MutationObserver>;

impl Tracked<MutationObserver> {
    /// `disconnect()` on the sandboxed observer.
    pub fn disconnect(&self) -> Result<(), ResourceError> {
        self.dispose()
    }

    pub fn callback(&self) -> ObjectHandle {
        self.resource.callback()
    }

    pub fn observe(
        &self,
        target: ObjectHandle,
        init: &MutationObserverInit,
    ) -> Result<(), ObserverError> {
        self.resource.observe(target, init)
    }

    pub fn observed_targets(&self) -> Vec<ObjectHandle> {
        self.resource.observed_targets()
    }

    pub fn is_observing(&self) -> bool {
        self.resource.is_observing()
    }

    pub fn enqueue_record(&self, record: MutationRecord) -> bool {
        self.resource.enqueue_record(record)
    }

    pub fn take_records(&self) -> Vec<MutationRecord> {
        self.resource.take_records()
    }

    pub fn disconnect_count(&self) -> u32 {
        self.resource.disconnect_count()
    }

    pub fn invalidate(&self) {
        self.resource.invalidate()
    }
}

/// Drop-in for the `MutationObserver` constructor inside one sandbox.
#[derive(Debug)]
pub struct ScopedObserverFactory {
    tracker: ScopedResourceTracker<MutationObserver>,
}

impl ScopedObserverFactory {
    pub fn new(config: Rc<SandboxConfig>, diagnostics: DiagnosticLog) -> Self {
        Self {
            tracker: ScopedResourceTracker::new(config, diagnostics),
        }
    }

    /// `new MutationObserver(callback)`.
    pub fn construct(&self, callback: ObjectHandle) -> TrackedObserver {
        self.tracker.track(MutationObserver::new(callback))
    }

    pub fn recover(&self) -> RecoveryReport {
        self.tracker.recover()
    }

    pub fn tracker(&self) -> &ScopedResourceTracker<MutationObserver> {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticMode;

    fn factory(collection_disabled: bool) -> (ScopedObserverFactory, DiagnosticLog) {
        let config = SandboxConfig {
            collection_disabled,
            ..SandboxConfig::default()
        };
        let log = DiagnosticLog::new("trace-tracker", DiagnosticMode::Production);
        (ScopedObserverFactory::new(Rc::new(config), log.clone()), log)
    }

    fn child_list() -> MutationObserverInit {
        MutationObserverInit {
            child_list: true,
            ..Default::default()
        }
    }

    #[test]
    fn recover_disposes_each_member_once() {
        let (factory, _) = factory(false);
        let observers: Vec<_> = (0..3).map(|i| factory.construct(ObjectHandle(i))).collect();
        assert_eq!(factory.tracker().len(), 3);

        let report = factory.recover();
        assert_eq!(report.disposed, 3);
        assert!(factory.tracker().is_empty());
        assert!(observers.iter().all(|o| o.disconnect_count() == 1));
    }

    #[test]
    fn individual_disconnect_leaves_set_before_recovery() {
        let (factory, _) = factory(false);
        let a = factory.construct(ObjectHandle(1));
        let b = factory.construct(ObjectHandle(2));
        a.disconnect().unwrap();
        assert!(!factory.tracker().contains(&a));
        assert!(factory.tracker().contains(&b));

        let report = factory.recover();
        assert_eq!(report.disposed, 1);
        assert_eq!(a.disconnect_count(), 1);
        assert_eq!(b.disconnect_count(), 1);
    }

    #[test]
    fn disabled_collection_tracks_nothing() {
        let (factory, _) = factory(true);
        let o = factory.construct(ObjectHandle(1));
        assert!(factory.tracker().is_empty());
        assert!(!factory.tracker().contains(&o));
        assert_eq!(factory.recover(), RecoveryReport::default());
        assert_eq!(o.disconnect_count(), 0);
        o.disconnect().unwrap();
        assert_eq!(o.disconnect_count(), 1);
    }

    #[test]
    fn stale_member_is_skipped_and_set_still_cleared() {
        let (factory, log) = factory(false);
        let stale = factory.construct(ObjectHandle(1));
        let live = factory.construct(ObjectHandle(2));
        stale.invalidate();

        let report = factory.recover();
        assert_eq!(report.stale, 1);
        assert_eq!(report.disposed, 1);
        assert!(factory.tracker().is_empty());
        assert_eq!(stale.disconnect_count(), 0);
        assert_eq!(live.disconnect_count(), 1);
        assert_eq!(log.count("recover_skip_stale"), 1);
        assert_eq!(log.count("recover"), 1);
    }

    #[test]
    fn second_recover_is_noop() {
        let (factory, _) = factory(false);
        let o = factory.construct(ObjectHandle(1));
        factory.recover();
        assert_eq!(factory.recover(), RecoveryReport::default());
        assert_eq!(o.disconnect_count(), 1);
    }

    #[test]
    fn tracked_disconnect_is_the_only_disposal_path() {
        let (factory, _) = factory(false);
        let a = factory.construct(ObjectHandle(1));
        let again = a.clone();
        a.disconnect().unwrap();
        again.disconnect().unwrap();
        assert_eq!(a.disconnect_count(), 2);

        let report = factory.recover();
        assert_eq!(report, RecoveryReport::default());
        assert_eq!(again.disconnect_count(), 2);
    }

    #[test]
    fn handle_outliving_tracker_still_disposes() {
        let (factory, _) = factory(false);
        let o = factory.construct(ObjectHandle(1));
        drop(factory);
        o.disconnect().unwrap();
        assert_eq!(o.disconnect_count(), 1);
    }

    struct Flaky {
        calls: Cell<u32>,
    }

    impl TrackedResource for Flaky {
        fn dispose(&self) -> Result<(), ResourceError> {
            self.calls.set(self.calls.get() + 1);
            Err(ResourceError::DisposeFailed("host refused".into()))
        }

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    #[test]
    fn failing_dispose_counted_and_set_cleared() {
        let log = DiagnosticLog::new("t", DiagnosticMode::Production);
        let tracker: ScopedResourceTracker<Flaky> =
            ScopedResourceTracker::new(Rc::new(SandboxConfig::default()), log.clone());
        let a = tracker.track(Flaky { calls: Cell::new(0) });
        let b = tracker.track(Flaky { calls: Cell::new(0) });
        assert_ne!(a.id(), b.id());

        let report = tracker.recover();
        assert_eq!(report.failed, 2);
        assert!(tracker.is_empty());
        assert_eq!(a.resource.calls.get(), 1);
        assert_eq!(log.count("recover_dispose_failed"), 2);
    }

    #[test]
    fn observe_validates_options() {
        let o = MutationObserver::new(ObjectHandle(0));
        assert_eq!(
            o.observe(ObjectHandle(1), &MutationObserverInit::default()),
            Err(ObserverError::InvalidOptions(
                "one of childList, attributes, characterData must be true"
            ))
        );
        let bad = MutationObserverInit {
            attributes: Some(false),
            attribute_filter: Some(vec!["class".into()]),
            ..Default::default()
        };
        assert!(o.observe(ObjectHandle(1), &bad).is_err());
        assert!(!o.is_observing());
    }

    #[test]
    fn attribute_filter_implies_attributes() {
        let init = MutationObserverInit {
            attribute_filter: Some(vec!["id".into()]),
            ..Default::default()
        };
        let options = init.normalize().unwrap();
        assert!(options.attributes);
        assert!(!options.attribute_old_value);
    }

    #[test]
    fn observe_same_target_replaces_options() {
        let o = MutationObserver::new(ObjectHandle(0));
        o.observe(ObjectHandle(5), &child_list()).unwrap();
        o.observe(
            ObjectHandle(5),
            &MutationObserverInit {
                character_data: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(o.observed_targets(), vec![ObjectHandle(5)]);
        let record = MutationRecord {
            kind: MutationKind::ChildList,
            target: ObjectHandle(5),
            attribute_name: None,
            old_value: None,
        };
        assert!(!o.enqueue_record(record));
    }

    #[test]
    fn records_filtered_and_drained() {
        let o = MutationObserver::new(ObjectHandle(0));
        o.observe(
            ObjectHandle(7),
            &MutationObserverInit {
                attribute_filter: Some(vec!["class".into()]),
                attribute_old_value: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        let attr = |name: &str| MutationRecord {
            kind: MutationKind::Attributes,
            target: ObjectHandle(7),
            attribute_name: Some(name.to_string()),
            old_value: Some("before".into()),
        };
        assert!(o.enqueue_record(attr("class")));
        assert!(!o.enqueue_record(attr("style")));
        assert!(!o.enqueue_record(MutationRecord {
            target: ObjectHandle(8),
            ..attr("class")
        }));

        let records = o.take_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].old_value.as_deref(), Some("before"));
        assert!(o.take_records().is_empty());
    }

    #[test]
    fn disconnect_clears_registrations_and_queue() {
        let o = MutationObserver::new(ObjectHandle(0));
        o.observe(ObjectHandle(1), &child_list()).unwrap();
        o.enqueue_record(MutationRecord {
            kind: MutationKind::ChildList,
            target: ObjectHandle(1),
            attribute_name: None,
            old_value: Some("dropped".into()),
        });
        o.disconnect();
        assert!(!o.is_observing());
        assert!(o.take_records().is_empty());
    }

    #[test]
    fn invalidated_observer_rejects_observe_and_dispose() {
        let o = MutationObserver::new(ObjectHandle(0));
        o.invalidate();
        assert_eq!(o.observe(ObjectHandle(1), &child_list()), Err(ObserverError::Invalidated));
        assert!(matches!(o.dispose(), Err(ResourceError::Stale(_))));
        assert!(!o.is_disposable());
    }

    #[test]
    fn init_deserializes_from_camel_case() {
        let json = r#"{"childList": true, "subtree": true, "attributeFilter": ["id"]}"#;
        let init: MutationObserverInit = serde_json::from_str(json).unwrap();
        assert!(init.child_list);
        assert!(init.subtree);
        assert_eq!(init.attribute_filter, Some(vec!["id".to_string()]));
        assert_eq!(init.attributes, None);
    }
}
