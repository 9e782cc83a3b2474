use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Error,
    Warning,
    Info,
}

/// Stable codes attached to diagnostic events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SandboxErrorCode {
    /// A virtual read or write disagreed with a frozen own value.
    InvariantValueMismatch,
    /// A virtual read or write hit a non-configurable accessor half.
    InvariantAccessorMissing,
    /// A static property could not be transferred onto a bound function.
    StaticCopyFailed,
    /// A tracked resource was already invalid at recovery.
    RecoveryStaleResource,
    /// A tracked resource failed its own disposal during recovery.
    RecoveryDisposeFailed,
}

impl SandboxErrorCode {
    pub const ALL: [Self; 5] = [
        Self::InvariantValueMismatch,
        Self::InvariantAccessorMissing,
        Self::StaticCopyFailed,
        Self::RecoveryStaleResource,
        Self::RecoveryDisposeFailed,
    ];

    pub const fn numeric(self) -> u16 {
        match self {
            Self::InvariantValueMismatch => 1001,
            Self::InvariantAccessorMissing => 1002,
            Self::StaticCopyFailed => 2001,
            Self::RecoveryStaleResource => 3001,
            Self::RecoveryDisposeFailed => 3002,
        }
    }

    pub const fn severity(self) -> ErrorSeverity {
        match self {
            Self::InvariantValueMismatch | Self::InvariantAccessorMissing => ErrorSeverity::Warning,
            Self::StaticCopyFailed | Self::RecoveryStaleResource => ErrorSeverity::Info,
            Self::RecoveryDisposeFailed => ErrorSeverity::Error,
        }
    }

    /// Rendered form, e.g. `SBX-1001`.
    pub fn code(self) -> String {
        format!("SBX-{:04}", self.numeric())
    }
}

impl fmt::Display for SandboxErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SBX-{:04}", self.numeric())
    }
}
