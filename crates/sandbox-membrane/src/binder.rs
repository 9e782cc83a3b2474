//! Identity-preserving function binding.
//!
//! [`FunctionIdentityBinder::bind`] wraps a function so every call runs
//! with a forced `this`, while the wrapper still looks like the original:
//! same statics, `instanceof` answered by the original, constructible with
//! instances that inherit through the wrapper's own `prototype` object
//! (which itself inherits from the original's).
//!
//! The wrapper carries `$native` pointing at the original for other
//! sandbox components. The binder never reads it back.

use std::rc::Rc;

use crate::diagnostics::DiagnosticLog;
use crate::error_code::SandboxErrorCode;
use crate::object_model::{
    JsValue, ObjectError, ObjectHandle, PropertyDescriptor, PropertyKey, WellKnownSymbol,
};
use crate::realm::{Invocation, Realm};

const COMPONENT: &str = "function_binder";

/// Back-reference from a bound wrapper to the function it wraps.
pub const NATIVE_KEY: &str = "$native";

/// Own properties every function defines specially; never copied.
const PROTECTED_KEYS: [&str; 5] = ["length", "caller", "callee", "arguments", "prototype"];

/// Is `key` one of the intrinsics the binder must not copy?
pub fn is_protected_key(key: &PropertyKey) -> bool {
    match key {
        PropertyKey::String(name) => PROTECTED_KEYS.contains(&name.as_str()),
        PropertyKey::Symbol(id) => {
            WellKnownSymbol::from_id(*id) == Some(WellKnownSymbol::HasInstance)
        }
    }
}

/// What happened to each static property during a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticTransfer {
    /// Copied by plain assignment.
    pub assigned: Vec<PropertyKey>,
    /// Assignment refused; redefined with the source's attributes.
    pub redefined: Vec<PropertyKey>,
    /// Left alone: already fixed on the destination, or both attempts failed.
    pub skipped: Vec<PropertyKey>,
}

#[derive(Debug, Clone)]
pub struct FunctionIdentityBinder {
    diagnostics: DiagnosticLog,
}

impl FunctionIdentityBinder {
    pub fn new(diagnostics: DiagnosticLog) -> Self {
        Self { diagnostics }
    }

    /// Produce a wrapper around `target` whose calls run with `this` forced
    /// to `context`.
    ///
    /// Only fails when `target` is not a function; static-copy problems are
    /// recorded and skipped.
    pub fn bind(
        &self,
        realm: &mut Realm,
        target: ObjectHandle,
        context: JsValue,
    ) -> Result<ObjectHandle, ObjectError> {
        let original = realm.heap().get(target)?;
        if !original.is_callable() {
            return Err(ObjectError::NotCallable(target));
        }
        let constructable = original.is_constructable();
        let inherited = original.prototype;

        let bound = realm.create_function_object(
            inherited,
            constructable,
            Rc::new(move |realm: &mut Realm, inv: Invocation| {
                forward_invocation(realm, target, &context, inv)
            }),
        );
        self.install_identity(realm, target, bound)?;

        let transfer = self.transfer_statics(realm, target, bound)?;

        self.install_prototype(realm, target, bound)?;
        self.install_has_instance(realm, target, bound)?;
        realm.heap_mut().define_property(
            bound,
            NATIVE_KEY.into(),
            PropertyDescriptor::data(JsValue::Object(target)),
        )?;

        self.diagnostics.emit(
            COMPONENT,
            "bind",
            &format!(
                "assigned={} redefined={} skipped={}",
                transfer.assigned.len(),
                transfer.redefined.len(),
                transfer.skipped.len()
            ),
            None,
            Some(target.to_string()),
        );
        Ok(bound)
    }

    /// The `$native` back-reference of a wrapper produced by [`bind`](Self::bind).
    pub fn native_of(realm: &Realm, bound: ObjectHandle) -> Option<ObjectHandle> {
        realm
            .heap()
            .get_own_property_descriptor(bound, &NATIVE_KEY.into())
            .ok()
            .flatten()
            .and_then(|desc| desc.value().and_then(JsValue::as_object))
    }

    /// Wrapper-intrinsic `length` and `name`, shaped like those of a
    /// `Function.prototype.bind` result.
    fn install_identity(
        &self,
        realm: &mut Realm,
        target: ObjectHandle,
        bound: ObjectHandle,
    ) -> Result<(), ObjectError> {
        let length = match realm.get(target, &"length".into()) {
            Ok(JsValue::Number(n)) if n.is_finite() && n >= 0.0 => n,
            _ => 0.0,
        };
        let name = match realm.get(target, &"name".into()) {
            Ok(JsValue::Str(s)) => s,
            _ => String::new(),
        };
        let heap = realm.heap_mut();
        heap.define_property(
            bound,
            "length".into(),
            PropertyDescriptor::data_readonly(JsValue::Number(length)),
        )?;
        heap.define_property(
            bound,
            "name".into(),
            PropertyDescriptor::data_readonly(JsValue::Str(format!("bound {name}"))),
        )?;
        Ok(())
    }

    /// Copy every non-protected own property of `source` onto
    /// `destination`: assign, then redefine, then give up. Never fails on a
    /// single property.
    pub fn transfer_statics(
        &self,
        realm: &mut Realm,
        source: ObjectHandle,
        destination: ObjectHandle,
    ) -> Result<StaticTransfer, ObjectError> {
        let mut transfer = StaticTransfer::default();
        for key in realm.heap().own_property_keys(source)? {
            if is_protected_key(&key) {
                continue;
            }
            if let Ok(Some(existing)) = realm.heap().get_own_property_descriptor(destination, &key)
                && !existing.is_configurable()
            {
                transfer.skipped.push(key);
                continue;
            }

            if let Ok(value) = realm.get(source, &key)
                && let Ok(true) = realm.set(destination, key.clone(), value)
            {
                transfer.assigned.push(key);
                continue;
            }

            let source_desc = realm
                .heap()
                .get_own_property_descriptor(source, &key)
                .ok()
                .flatten();
            if let Some(desc) = source_desc
                && let Ok(true) = realm
                    .heap_mut()
                    .define_property(destination, key.clone(), desc)
            {
                transfer.redefined.push(key);
                continue;
            }

            self.diagnostics.emit(
                COMPONENT,
                "static_copy_skipped",
                "skip",
                Some(SandboxErrorCode::StaticCopyFailed),
                Some(key.to_string()),
            );
            transfer.skipped.push(key);
        }
        Ok(transfer)
    }

    /// Fresh `prototype` inheriting from `target.prototype`, so instances
    /// made through the wrapper stay `instanceof target` without sharing the
    /// original prototype object.
    fn install_prototype(
        &self,
        realm: &mut Realm,
        target: ObjectHandle,
        bound: ObjectHandle,
    ) -> Result<(), ObjectError> {
        let Some(JsValue::Object(original_proto)) = realm
            .heap()
            .get_own_property_descriptor(target, &"prototype".into())?
            .and_then(|desc| desc.value().cloned())
        else {
            return Ok(());
        };
        let proto = realm.heap_mut().alloc(Some(original_proto));
        realm.heap_mut().define_property(
            bound,
            "prototype".into(),
            PropertyDescriptor::Data {
                value: JsValue::Object(proto),
                writable: true,
                enumerable: false,
                configurable: false,
            },
        )?;
        Ok(())
    }

    /// Own `@@hasInstance` delegating to the original.
    fn install_has_instance(
        &self,
        realm: &mut Realm,
        target: ObjectHandle,
        bound: ObjectHandle,
    ) -> Result<(), ObjectError> {
        let function_prototype = realm.function_prototype();
        let has_instance = realm.create_function_object(
            Some(function_prototype),
            false,
            Rc::new(move |realm: &mut Realm, inv: Invocation| {
                let candidate = inv.arg(0);
                let anchored = realm.get(target, &"prototype".into())?.is_object()
                    || realm.heap().is_callable(target)?;
                if !anchored {
                    return Ok(JsValue::Bool(false));
                }
                realm
                    .instance_of(&candidate, &JsValue::Object(target))
                    .map(JsValue::Bool)
            }),
        );
        realm.heap_mut().define_property(
            has_instance,
            "name".into(),
            PropertyDescriptor::data_readonly(JsValue::Str("[Symbol.hasInstance]".to_string())),
        )?;
        realm.heap_mut().define_property(
            bound,
            WellKnownSymbol::HasInstance.key(),
            PropertyDescriptor::data_readonly(JsValue::Object(has_instance)),
        )?;
        Ok(())
    }
}

/// Body of every bound wrapper: construct the original and re-parent, or
/// call the original with the forced context.
fn forward_invocation(
    realm: &mut Realm,
    target: ObjectHandle,
    context: &JsValue,
    inv: Invocation,
) -> Result<JsValue, ObjectError> {
    if !inv.is_construct() {
        return realm.call(target, context.clone(), inv.args);
    }
    let instance = realm.construct(target, inv.args)?;
    if let (Some(object), JsValue::Object(proto)) =
        (instance.as_object(), realm.get(inv.callee, &"prototype".into())?)
        && !realm.heap_mut().set_prototype_of(object, Some(proto))?
    {
        return Err(ObjectError::TypeError(format!(
            "cannot re-parent {object} constructed through a bound function"
        )));
    }
    Ok(instance)
}
