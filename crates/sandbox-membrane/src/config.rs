//! Sandbox configuration consumed (read-only) by the membrane.

use serde::{Deserialize, Serialize};

use crate::diagnostics::DiagnosticMode;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Parse(String),
    #[error("invalid sandbox config: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// When set, resources created in the sandbox are not tracked and
    /// `recover()` leaves them alone.
    pub collection_disabled: bool,
    pub diagnostics: DiagnosticMode,
    pub trace_id: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            collection_disabled: false,
            diagnostics: DiagnosticMode::default(),
            trace_id: "sandbox".to_string(),
        }
    }
}

impl SandboxConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trace_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "trace_id",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
