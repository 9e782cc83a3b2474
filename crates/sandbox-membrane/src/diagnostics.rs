//! Structured diagnostic events shared by the membrane components.
//!
//! Components never print; they append [`DiagnosticEvent`]s to a
//! [`DiagnosticLog`] owned by the sandbox. Advisory warnings (invariant
//! mismatches) are only recorded in [`DiagnosticMode::Development`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error_code::{ErrorSeverity, SandboxErrorCode};

/// Whether development-only diagnostics are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticMode {
    Development,
    Production,
}

impl Default for DiagnosticMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Development
        } else {
            Self::Production
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub trace_id: String,
    pub component: String,
    pub event: String,
    pub outcome: String,
    pub error_code: Option<String>,
    pub severity: Option<ErrorSeverity>,
    /// Property the event concerns, when there is one.
    pub property: Option<String>,
    pub sequence: u64,
}

#[derive(Debug)]
struct LogState {
    trace_id: String,
    mode: DiagnosticMode,
    events: Vec<DiagnosticEvent>,
    event_counts: BTreeMap<String, u64>,
}

/// Shared, cloneable event sink for one sandbox.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    state: Rc<RefCell<LogState>>,
}

impl DiagnosticLog {
    pub fn new(trace_id: &str, mode: DiagnosticMode) -> Self {
        Self {
            state: Rc::new(RefCell::new(LogState {
                trace_id: trace_id.to_string(),
                mode,
                events: Vec::new(),
                event_counts: BTreeMap::new(),
            })),
        }
    }

    pub fn mode(&self) -> DiagnosticMode {
        self.state.borrow().mode
    }

    pub fn trace_id(&self) -> String {
        self.state.borrow().trace_id.clone()
    }

    /// Record an event in every mode.
    pub fn emit(
        &self,
        component: &str,
        event: &str,
        outcome: &str,
        error_code: Option<SandboxErrorCode>,
        property: Option<String>,
    ) {
        let mut state = self.state.borrow_mut();
        let sequence = state.events.len() as u64;
        let trace_id = state.trace_id.clone();
        state.events.push(DiagnosticEvent {
            trace_id,
            component: component.to_string(),
            event: event.to_string(),
            outcome: outcome.to_string(),
            error_code: error_code.map(SandboxErrorCode::code),
            severity: error_code.map(SandboxErrorCode::severity),
            property,
            sequence,
        });
        *state.event_counts.entry(event.to_string()).or_insert(0) += 1;
    }

    /// Record an advisory warning, development mode only.
    pub fn dev_warning(
        &self,
        component: &str,
        event: &str,
        error_code: SandboxErrorCode,
        property: Option<String>,
    ) {
        if self.mode() == DiagnosticMode::Development {
            self.emit(component, event, "warn", Some(error_code), property);
        }
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.state.borrow().events.clone()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().events.is_empty()
    }

    pub fn count(&self, event: &str) -> u64 {
        self.state
            .borrow()
            .event_counts
            .get(event)
            .copied()
            .unwrap_or(0)
    }

    /// One JSON object per line.
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let state = self.state.borrow();
        let mut out = String::new();
        for event in &state.events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}
