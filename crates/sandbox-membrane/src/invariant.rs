//! Descriptor invariant checks for virtualized get/set.
//!
//! A virtual layer answering reads and writes for an object must stay
//! consistent with that object's non-configurable own properties:
//!
//! - a frozen data property (non-configurable, non-writable) can only ever
//!   be read as, or written with, its stored value (SameValue);
//! - a non-configurable accessor without a getter reads as `undefined`,
//!   and one without a setter rejects every write.
//!
//! [`DescriptorInvariantChecker`] classifies a proposed operation into an
//! [`InterceptionVerdict`]; [`InterceptionGuard`] translates verdicts into
//! the answers a get/set trap returns. Inherited descriptors are never
//! consulted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diagnostics::DiagnosticLog;
use crate::error_code::SandboxErrorCode;
use crate::object_model::{
    JsValue, ObjectError, ObjectHandle, ObjectHeap, OrdinaryObject, PropertyDescriptor,
    PropertyKey,
};

const COMPONENT: &str = "descriptor_invariant";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterceptionVerdict {
    /// No invariant applies; the caller decides.
    Allowed,
    /// The value differs from a frozen own value.
    RejectedValueMismatch,
    /// The needed half of a non-configurable accessor is absent.
    RejectedAccessorMissing,
    /// Write of the identical value to a frozen property: report success,
    /// skip the write.
    AllowedNoopWrite,
}

impl InterceptionVerdict {
    pub fn is_rejected(self) -> bool {
        matches!(
            self,
            Self::RejectedValueMismatch | Self::RejectedAccessorMissing
        )
    }

    /// Set-trap answer: `Some(false)` deny, `Some(true)` report success
    /// without writing, `None` let the caller write.
    pub fn set_trap_result(self) -> Option<bool> {
        match self {
            Self::Allowed => None,
            Self::AllowedNoopWrite => Some(true),
            Self::RejectedValueMismatch | Self::RejectedAccessorMissing => Some(false),
        }
    }

    fn error_code(self) -> Option<SandboxErrorCode> {
        match self {
            Self::RejectedValueMismatch => Some(SandboxErrorCode::InvariantValueMismatch),
            Self::RejectedAccessorMissing => Some(SandboxErrorCode::InvariantAccessorMissing),
            Self::Allowed | Self::AllowedNoopWrite => None,
        }
    }
}

impl fmt::Display for InterceptionVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => f.write_str("allowed"),
            Self::RejectedValueMismatch => f.write_str("rejected_value_mismatch"),
            Self::RejectedAccessorMissing => f.write_str("rejected_accessor_missing"),
            Self::AllowedNoopWrite => f.write_str("allowed_noop_write"),
        }
    }
}

/// Pure classification over a target's own descriptor.
pub struct DescriptorInvariantChecker;

impl DescriptorInvariantChecker {
    /// Classify returning `proposed` from a virtual read of `key`.
    pub fn classify_for_get(
        target: &OrdinaryObject,
        key: &PropertyKey,
        proposed: &JsValue,
    ) -> InterceptionVerdict {
        Self::classify_descriptor_for_get(target.get_own_property(key), proposed)
    }

    /// Classify writing `new_value` through a virtual write of `key`.
    pub fn classify_for_set(
        target: &OrdinaryObject,
        key: &PropertyKey,
        new_value: &JsValue,
    ) -> InterceptionVerdict {
        Self::classify_descriptor_for_set(target.get_own_property(key), new_value)
    }

    pub fn classify_descriptor_for_get(
        desc: Option<&PropertyDescriptor>,
        proposed: &JsValue,
    ) -> InterceptionVerdict {
        let Some(desc) = desc.filter(|d| !d.is_configurable()) else {
            return InterceptionVerdict::Allowed;
        };
        match desc {
            PropertyDescriptor::Data {
                value,
                writable: false,
                ..
            } if !proposed.same_value(value) => InterceptionVerdict::RejectedValueMismatch,
            PropertyDescriptor::Accessor { get: None, .. } => {
                InterceptionVerdict::RejectedAccessorMissing
            }
            _ => InterceptionVerdict::Allowed,
        }
    }

    pub fn classify_descriptor_for_set(
        desc: Option<&PropertyDescriptor>,
        new_value: &JsValue,
    ) -> InterceptionVerdict {
        let Some(desc) = desc.filter(|d| !d.is_configurable()) else {
            return InterceptionVerdict::Allowed;
        };
        match desc {
            PropertyDescriptor::Data {
                value,
                writable: false,
                ..
            } => {
                if new_value.same_value(value) {
                    InterceptionVerdict::AllowedNoopWrite
                } else {
                    InterceptionVerdict::RejectedValueMismatch
                }
            }
            PropertyDescriptor::Accessor { set: None, .. } => {
                InterceptionVerdict::RejectedAccessorMissing
            }
            _ => InterceptionVerdict::Allowed,
        }
    }
}

// ---------------------------------------------------------------------------
// Trap-side translation
// ---------------------------------------------------------------------------

/// Objects involved in one intercepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTrapContext {
    pub target: ObjectHandle,
    pub receiver: Option<ObjectHandle>,
    /// The proxy's alternate backing object, when it has one.
    pub alternate_target: Option<ObjectHandle>,
}

impl SetTrapContext {
    pub fn new(target: ObjectHandle) -> Self {
        Self {
            target,
            receiver: None,
            alternate_target: None,
        }
    }

    pub fn with_receiver(mut self, receiver: ObjectHandle) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn with_alternate_target(mut self, alternate: ObjectHandle) -> Self {
        self.alternate_target = Some(alternate);
        self
    }

    /// Object whose descriptors gate the write: alternate target, else
    /// receiver, else target.
    pub fn authority(&self) -> ObjectHandle {
        self.alternate_target
            .or(self.receiver)
            .unwrap_or(self.target)
    }
}

/// Called by get/set traps before they delegate to the underlying object.
#[derive(Debug, Clone)]
pub struct InterceptionGuard {
    diagnostics: DiagnosticLog,
}

impl InterceptionGuard {
    pub fn new(diagnostics: DiagnosticLog) -> Self {
        Self { diagnostics }
    }

    /// Set-trap verdict for writing `value` to `key`.
    ///
    /// `Some(false)` deny, `Some(true)` succeed without writing, `None`
    /// proceed with the caller's own write.
    pub fn set_trap_verdict(
        &self,
        heap: &ObjectHeap,
        ctx: &SetTrapContext,
        key: &PropertyKey,
        value: &JsValue,
    ) -> Result<Option<bool>, ObjectError> {
        let authority = heap.get(ctx.authority())?;
        let verdict = DescriptorInvariantChecker::classify_for_set(authority, key, value);
        if verdict == InterceptionVerdict::RejectedValueMismatch {
            self.warn(verdict, "set_rejected", key);
        }
        Ok(verdict.set_trap_result())
    }

    /// Value a get-trap may legally return, given what the virtual layer
    /// wanted to return.
    ///
    /// A frozen own value wins over `proposed`; a getter-less
    /// non-configurable accessor forces `undefined`.
    pub fn get_trap_value(
        &self,
        heap: &ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
        proposed: JsValue,
    ) -> Result<JsValue, ObjectError> {
        let desc = heap.get(target)?.get_own_property(key);
        let verdict = DescriptorInvariantChecker::classify_descriptor_for_get(desc, &proposed);
        match verdict {
            InterceptionVerdict::Allowed | InterceptionVerdict::AllowedNoopWrite => Ok(proposed),
            InterceptionVerdict::RejectedValueMismatch => {
                self.warn(verdict, "get_value_forced", key);
                Ok(desc
                    .and_then(PropertyDescriptor::value)
                    .cloned()
                    .unwrap_or(JsValue::Undefined))
            }
            InterceptionVerdict::RejectedAccessorMissing => {
                if proposed != JsValue::Undefined {
                    self.warn(verdict, "get_accessor_forced", key);
                }
                Ok(JsValue::Undefined)
            }
        }
    }

    fn warn(&self, verdict: InterceptionVerdict, event: &str, key: &PropertyKey) {
        if let Some(code) = verdict.error_code() {
            self.diagnostics
                .dev_warning(COMPONENT, event, code, Some(key.to_string()));
        }
    }
}
