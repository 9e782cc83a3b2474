//! Host object model virtualized by the sandbox membrane.
//!
//! A compact ES object model standing in for the real environment the
//! sandbox runs against:
//!
//! - **Property descriptors**: data vs accessor, configurable/enumerable/writable
//! - **Prototype chains**: `[[Prototype]]` slot with cycle and depth guards
//! - **Function objects**: callable/constructable slots pointing at native
//!   behaviors registered in a [`Realm`](crate::realm::Realm)
//! - **Symbol keys**: property keys that are either strings or symbols
//!
//! `BTreeMap`/`BTreeSet` for deterministic ordering.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Serialize/deserialize `BTreeMap<PropertyKey, PropertyDescriptor>` as a
/// sorted sequence of `[key, descriptor]` pairs, since JSON maps need
/// string keys and `PropertyKey` is an enum.
mod properties_as_seq {
    use super::{BTreeMap, PropertyDescriptor, PropertyKey};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<PropertyKey, PropertyDescriptor>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&PropertyKey, &PropertyDescriptor)> = map.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<PropertyKey, PropertyDescriptor>, D::Error> {
        let pairs: Vec<(PropertyKey, PropertyDescriptor)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// PropertyKey: string or symbol
// ---------------------------------------------------------------------------

/// Unique symbol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// A property key: either a string or a symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKey {
    String(String),
    Symbol(SymbolId),
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Symbol(id) => match WellKnownSymbol::from_id(*id) {
                Some(wk) => f.write_str(wk.name()),
                None => write!(f, "Symbol({})", id.0),
            },
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<WellKnownSymbol> for PropertyKey {
    fn from(symbol: WellKnownSymbol) -> Self {
        symbol.key()
    }
}

// ---------------------------------------------------------------------------
// Well-known symbols
// ---------------------------------------------------------------------------

/// Well-known symbols the membrane cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WellKnownSymbol {
    Iterator,
    HasInstance,
    ToStringTag,
}

impl WellKnownSymbol {
    const ALL: [Self; 3] = [Self::Iterator, Self::HasInstance, Self::ToStringTag];

    /// Well-known symbols occupy ids 1..=3.
    pub fn id(self) -> SymbolId {
        SymbolId(self as u32 + 1)
    }

    pub fn key(self) -> PropertyKey {
        PropertyKey::Symbol(self.id())
    }

    pub fn from_id(id: SymbolId) -> Option<Self> {
        Self::ALL.into_iter().find(|wk| wk.id() == id)
    }

    /// Display name (e.g. `@@hasInstance`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Iterator => "@@iterator",
            Self::HasInstance => "@@hasInstance",
            Self::ToStringTag => "@@toStringTag",
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectHandle / JsValue
// ---------------------------------------------------------------------------

/// Opaque handle referencing an object on the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle(pub u32);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Runtime value. Functions are objects whose heap slot carries a
/// [`FunctionSlot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Symbol(SymbolId),
    Object(ObjectHandle),
}

impl JsValue {
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Self::Object(h) => Some(*h),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Object(_) => "object",
        }
    }

    /// SameValue (`Object.is`): every NaN equals every NaN, `+0` and `-0`
    /// are distinct.
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    return true;
                }
                a.to_bits() == b.to_bits()
            }
            _ => self == other,
        }
    }

    /// `ToBoolean`.
    pub fn to_boolean(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => !(n.is_nan() || *n == 0.0),
            Self::Str(s) => !s.is_empty(),
            Self::Symbol(_) | Self::Object(_) => true,
        }
    }
}

impl From<f64> for JsValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<ObjectHandle> for JsValue {
    fn from(h: ObjectHandle) -> Self {
        Self::Object(h)
    }
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if n.is_nan() => write!(f, "NaN"),
            Self::Number(n) if *n == 0.0 && n.is_sign_negative() => write!(f, "-0"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
            Self::Object(h) => write!(f, "[{h}]"),
        }
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// Property descriptor (ES §6.2.5). Accessor functions are heap handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyDescriptor {
    Data {
        value: JsValue,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    Accessor {
        get: Option<ObjectHandle>,
        set: Option<ObjectHandle>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Writable, enumerable, configurable data descriptor (plain assignment).
    pub fn data(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Non-writable, non-enumerable, non-configurable data descriptor.
    pub fn data_frozen(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Non-writable, non-enumerable but configurable. Shape of a function's
    /// own `name` and `length`.
    pub fn data_readonly(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: true,
        }
    }

    /// Writable, non-enumerable, configurable. Shape of builtin methods.
    pub fn data_hidden(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    pub fn accessor(get: Option<ObjectHandle>, set: Option<ObjectHandle>) -> Self {
        Self::Accessor {
            get,
            set,
            enumerable: true,
            configurable: true,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }

    pub fn value(&self) -> Option<&JsValue> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Is this a data descriptor with writable=true?
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }

    pub fn set_non_configurable(&mut self) {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => {
                *configurable = false;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectError
// ---------------------------------------------------------------------------

/// Errors from object model operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectError {
    TypeError(String),
    ObjectNotFound(ObjectHandle),
    NotCallable(ObjectHandle),
    NotConstructable(ObjectHandle),
    PrototypeCycleDetected,
    PrototypeChainTooDeep { depth: u32, max: u32 },
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeError(msg) => write!(f, "TypeError: {msg}"),
            Self::ObjectNotFound(h) => write!(f, "{h} not found"),
            Self::NotCallable(h) => write!(f, "TypeError: {h} is not a function"),
            Self::NotConstructable(h) => write!(f, "TypeError: {h} is not a constructor"),
            Self::PrototypeCycleDetected => write!(f, "TypeError: prototype chain cycle detected"),
            Self::PrototypeChainTooDeep { depth, max } => {
                write!(
                    f,
                    "TypeError: prototype chain depth {depth} exceeds max {max}"
                )
            }
        }
    }
}

impl std::error::Error for ObjectError {}

// ---------------------------------------------------------------------------
// OrdinaryObject
// ---------------------------------------------------------------------------

const MAX_PROTOTYPE_CHAIN_DEPTH: u32 = 1024;

/// Index of a native behavior in the realm's behavior table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BehaviorId(pub u32);

/// Internal slots present on function objects only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSlot {
    pub behavior: BehaviorId,
    /// Has a `[[Construct]]` internal method.
    pub constructable: bool,
}

/// An ordinary object with internal slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdinaryObject {
    /// `[[Prototype]]` (None means end of chain).
    pub prototype: Option<ObjectHandle>,
    /// `[[Extensible]]`.
    pub extensible: bool,
    #[serde(with = "properties_as_seq")]
    pub properties: BTreeMap<PropertyKey, PropertyDescriptor>,
    pub function: Option<FunctionSlot>,
}

impl Default for OrdinaryObject {
    fn default() -> Self {
        Self {
            prototype: None,
            extensible: true,
            properties: BTreeMap::new(),
            function: None,
        }
    }
}

impl OrdinaryObject {
    pub fn with_prototype(proto: Option<ObjectHandle>) -> Self {
        Self {
            prototype: proto,
            ..Self::default()
        }
    }

    pub fn is_callable(&self) -> bool {
        self.function.is_some()
    }

    pub fn is_constructable(&self) -> bool {
        self.function.is_some_and(|slot| slot.constructable)
    }

    /// `[[GetOwnProperty]](P)`.
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.properties.get(key)
    }

    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    /// `[[DefineOwnProperty]](P, Desc)` (§9.1.6).
    ///
    /// Returns `false` when the definition conflicts with an existing
    /// non-configurable property or the object is not extensible.
    pub fn define_own_property(&mut self, key: PropertyKey, desc: PropertyDescriptor) -> bool {
        let Some(current) = self.properties.get(&key) else {
            if !self.extensible {
                return false;
            }
            self.properties.insert(key, desc);
            return true;
        };

        if !current.is_configurable() {
            if desc.is_configurable() || desc.is_enumerable() != current.is_enumerable() {
                return false;
            }
            match (current, &desc) {
                (
                    PropertyDescriptor::Data {
                        value: current_v,
                        writable: false,
                        ..
                    },
                    PropertyDescriptor::Data {
                        value: new_v,
                        writable: new_w,
                        ..
                    },
                ) => {
                    if *new_w || !current_v.same_value(new_v) {
                        return false;
                    }
                }
                (PropertyDescriptor::Data { .. }, PropertyDescriptor::Data { .. }) => {}
                (
                    PropertyDescriptor::Accessor {
                        get: cur_get,
                        set: cur_set,
                        ..
                    },
                    PropertyDescriptor::Accessor {
                        get: new_get,
                        set: new_set,
                        ..
                    },
                ) => {
                    if cur_get != new_get || cur_set != new_set {
                        return false;
                    }
                }
                // Data <-> accessor conversion.
                _ => return false,
            }
        }
        self.properties.insert(key, desc);
        true
    }

    /// `[[OwnPropertyKeys]]()`: integer indices ascending, then string keys,
    /// then symbols.
    pub fn own_property_keys(&self) -> Vec<PropertyKey> {
        let mut int_keys: Vec<(u64, PropertyKey)> = Vec::new();
        let mut str_keys: Vec<PropertyKey> = Vec::new();
        let mut sym_keys: Vec<PropertyKey> = Vec::new();

        for key in self.properties.keys() {
            match key {
                PropertyKey::String(s) => match s.parse::<u64>() {
                    Ok(n) => int_keys.push((n, key.clone())),
                    Err(_) => str_keys.push(key.clone()),
                },
                PropertyKey::Symbol(_) => sym_keys.push(key.clone()),
            }
        }

        int_keys.sort_by_key(|(n, _)| *n);
        let mut result: Vec<PropertyKey> = int_keys.into_iter().map(|(_, k)| k).collect();
        result.extend(str_keys);
        result.extend(sym_keys);
        result
    }
}

// ---------------------------------------------------------------------------
// ObjectHeap
// ---------------------------------------------------------------------------

/// Arena of objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectHeap {
    objects: Vec<OrdinaryObject>,
    next_symbol: u32,
}

impl ObjectHeap {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            next_symbol: WellKnownSymbol::ALL.len() as u32 + 1,
        }
    }

    /// Allocate a new ordinary object with the given prototype.
    pub fn alloc(&mut self, proto: Option<ObjectHandle>) -> ObjectHandle {
        self.push(OrdinaryObject::with_prototype(proto))
    }

    /// Allocate a function object. Own `name`/`length`/`prototype` are
    /// installed by the realm, not here.
    pub fn alloc_function(
        &mut self,
        proto: Option<ObjectHandle>,
        slot: FunctionSlot,
    ) -> ObjectHandle {
        self.push(OrdinaryObject {
            function: Some(slot),
            ..OrdinaryObject::with_prototype(proto)
        })
    }

    fn push(&mut self, object: OrdinaryObject) -> ObjectHandle {
        let handle = ObjectHandle(self.objects.len() as u32);
        self.objects.push(object);
        handle
    }

    pub fn alloc_symbol(&mut self) -> SymbolId {
        let id = SymbolId(self.next_symbol);
        self.next_symbol += 1;
        id
    }

    pub fn get(&self, handle: ObjectHandle) -> Result<&OrdinaryObject, ObjectError> {
        self.objects
            .get(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut OrdinaryObject, ObjectError> {
        self.objects
            .get_mut(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn is_callable(&self, handle: ObjectHandle) -> Result<bool, ObjectError> {
        Ok(self.get(handle)?.is_callable())
    }

    /// Is `value` an object that is also a function?
    pub fn is_callable_value(&self, value: &JsValue) -> bool {
        value
            .as_object()
            .and_then(|h| self.get(h).ok())
            .is_some_and(OrdinaryObject::is_callable)
    }

    /// `Object.getOwnPropertyDescriptor(O, P)`.
    pub fn get_own_property_descriptor(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        Ok(self.get(handle)?.get_own_property(key).cloned())
    }

    /// `Reflect.defineProperty(O, P, Desc)`.
    pub fn define_property(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        Ok(self.get_mut(handle)?.define_own_property(key, desc))
    }

    pub fn own_property_keys(&self, handle: ObjectHandle) -> Result<Vec<PropertyKey>, ObjectError> {
        Ok(self.get(handle)?.own_property_keys())
    }

    /// Find `key` on `handle` or its prototype chain. Returns the owning
    /// object and a snapshot of the descriptor.
    pub fn lookup(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<(ObjectHandle, PropertyDescriptor)>, ObjectError> {
        let mut current = Some(handle);
        let mut depth: u32 = 0;
        let mut visited = BTreeSet::new();

        while let Some(h) = current {
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: MAX_PROTOTYPE_CHAIN_DEPTH,
                });
            }
            if !visited.insert(h) {
                return Err(ObjectError::PrototypeCycleDetected);
            }
            let obj = self.get(h)?;
            if let Some(desc) = obj.get_own_property(key) {
                return Ok(Some((h, desc.clone())));
            }
            current = obj.prototype;
            depth += 1;
        }
        Ok(None)
    }

    pub fn get_prototype_of(
        &self,
        handle: ObjectHandle,
    ) -> Result<Option<ObjectHandle>, ObjectError> {
        Ok(self.get(handle)?.prototype)
    }

    /// `Reflect.setPrototypeOf(O, proto)`.
    pub fn set_prototype_of(
        &mut self,
        handle: ObjectHandle,
        proto: Option<ObjectHandle>,
    ) -> Result<bool, ObjectError> {
        if let Some(p) = proto {
            let mut current = Some(p);
            let mut visited = BTreeSet::new();
            visited.insert(handle);
            while let Some(h) = current {
                if !visited.insert(h) {
                    return Err(ObjectError::PrototypeCycleDetected);
                }
                current = self.get(h)?.prototype;
            }
        }

        let obj = self.get_mut(handle)?;
        if obj.prototype == proto {
            return Ok(true);
        }
        if !obj.extensible {
            return Ok(false);
        }
        obj.prototype = proto;
        Ok(true)
    }

    /// Does `proto` appear on the prototype chain of `handle` (excluding
    /// `handle` itself)?
    pub fn has_in_prototype_chain(
        &self,
        handle: ObjectHandle,
        proto: ObjectHandle,
    ) -> Result<bool, ObjectError> {
        let mut current = self.get(handle)?.prototype;
        let mut depth: u32 = 0;
        while let Some(h) = current {
            if h == proto {
                return Ok(true);
            }
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: MAX_PROTOTYPE_CHAIN_DEPTH,
                });
            }
            current = self.get(h)?.prototype;
            depth += 1;
        }
        Ok(false)
    }

    pub fn prevent_extensions(&mut self, handle: ObjectHandle) -> Result<(), ObjectError> {
        self.get_mut(handle)?.extensible = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn str_key(s: &str) -> PropertyKey {
        PropertyKey::String(s.to_string())
    }

    fn num(n: f64) -> JsValue {
        JsValue::Number(n)
    }

    fn frozen_data(value: JsValue) -> PropertyDescriptor {
        PropertyDescriptor::Data {
            value,
            writable: false,
            enumerable: true,
            configurable: false,
        }
    }

    #[test]
    fn property_key_display_uses_well_known_names() {
        assert_eq!(str_key("foo").to_string(), "foo");
        assert_eq!(WellKnownSymbol::HasInstance.key().to_string(), "@@hasInstance");
        assert_eq!(PropertyKey::Symbol(SymbolId(42)).to_string(), "Symbol(42)");
    }

    #[test]
    fn well_known_ids_round_trip() {
        for wk in WellKnownSymbol::ALL {
            assert_eq!(WellKnownSymbol::from_id(wk.id()), Some(wk));
        }
        let mut heap = ObjectHeap::new();
        let fresh = heap.alloc_symbol();
        assert_eq!(WellKnownSymbol::from_id(fresh), None);
    }

    #[test]
    fn same_value_nan_and_signed_zero() {
        assert!(num(f64::NAN).same_value(&num(f64::NAN)));
        assert!(!num(0.0).same_value(&num(-0.0)));
        assert!(num(-0.0).same_value(&num(-0.0)));
        assert!(num(1.5).same_value(&num(1.5)));
        assert!(!num(1.0).same_value(&JsValue::Str("1".into())));
        assert!(JsValue::Undefined.same_value(&JsValue::Undefined));
    }

    #[test]
    fn to_boolean_matches_es_rules() {
        assert!(!JsValue::Undefined.to_boolean());
        assert!(!num(f64::NAN).to_boolean());
        assert!(!num(-0.0).to_boolean());
        assert!(!JsValue::Str(String::new()).to_boolean());
        assert!(JsValue::Object(ObjectHandle(0)).to_boolean());
        assert!(num(2.0).to_boolean());
    }

    #[test]
    fn js_value_display() {
        assert_eq!(num(f64::NAN).to_string(), "NaN");
        assert_eq!(num(-0.0).to_string(), "-0");
        assert_eq!(JsValue::Object(ObjectHandle(3)).to_string(), "[object#3]");
    }

    #[test]
    fn descriptor_shapes() {
        let d = PropertyDescriptor::data_readonly(num(1.0));
        assert!(d.is_configurable());
        assert!(!d.is_writable());
        assert!(!d.is_enumerable());

        let a = PropertyDescriptor::accessor(None, Some(ObjectHandle(1)));
        assert!(a.is_accessor());
        assert!(!a.is_writable());
        assert_eq!(a.value(), None);
    }

    #[test]
    fn define_rejects_change_to_non_configurable_value() {
        let mut obj = OrdinaryObject::default();
        assert!(obj.define_own_property(str_key("x"), frozen_data(num(1.0))));
        assert!(!obj.define_own_property(str_key("x"), frozen_data(num(2.0))));
        assert!(obj.define_own_property(str_key("x"), frozen_data(num(1.0))));
        assert!(!obj.define_own_property(str_key("x"), PropertyDescriptor::data(num(1.0))));
    }

    #[test]
    fn define_rejects_signed_zero_swap() {
        let mut obj = OrdinaryObject::default();
        obj.define_own_property(str_key("z"), frozen_data(num(-0.0)));
        assert!(!obj.define_own_property(str_key("z"), frozen_data(num(0.0))));
    }

    #[test]
    fn define_rejects_accessor_conversion_on_non_configurable() {
        let mut obj = OrdinaryObject::default();
        obj.define_own_property(str_key("x"), frozen_data(num(1.0)));
        let accessor = PropertyDescriptor::Accessor {
            get: None,
            set: None,
            enumerable: true,
            configurable: false,
        };
        assert!(!obj.define_own_property(str_key("x"), accessor));
    }

    #[test]
    fn define_on_non_extensible_rejects_new_keys_only() {
        let mut obj = OrdinaryObject::default();
        obj.define_own_property(str_key("a"), PropertyDescriptor::data(num(1.0)));
        obj.extensible = false;
        assert!(!obj.define_own_property(str_key("b"), PropertyDescriptor::data(num(1.0))));
        assert!(obj.define_own_property(str_key("a"), PropertyDescriptor::data(num(2.0))));
    }

    #[test]
    fn own_keys_order_integers_strings_symbols() {
        let mut obj = OrdinaryObject::default();
        for key in [
            WellKnownSymbol::Iterator.key(),
            str_key("b"),
            str_key("10"),
            str_key("a"),
            str_key("2"),
        ] {
            obj.define_own_property(key, PropertyDescriptor::data(JsValue::Null));
        }
        assert_eq!(
            obj.own_property_keys(),
            vec![
                str_key("2"),
                str_key("10"),
                str_key("a"),
                str_key("b"),
                WellKnownSymbol::Iterator.key(),
            ]
        );
    }

    #[test]
    fn lookup_walks_chain_and_reports_owner() {
        let mut heap = ObjectHeap::new();
        let base = heap.alloc(None);
        let child = heap.alloc(Some(base));
        heap.define_property(base, str_key("x"), PropertyDescriptor::data(num(7.0)))
            .unwrap();
        let (owner, desc) = heap.lookup(child, &str_key("x")).unwrap().unwrap();
        assert_eq!(owner, base);
        assert_eq!(desc.value(), Some(&num(7.0)));
        assert!(heap.lookup(child, &str_key("y")).unwrap().is_none());
    }

    #[test]
    fn set_prototype_of_detects_cycles() {
        let mut heap = ObjectHeap::new();
        let a = heap.alloc(None);
        let b = heap.alloc(Some(a));
        assert_eq!(
            heap.set_prototype_of(a, Some(b)),
            Err(ObjectError::PrototypeCycleDetected)
        );
    }

    #[test]
    fn set_prototype_of_non_extensible_only_accepts_same_value() {
        let mut heap = ObjectHeap::new();
        let p = heap.alloc(None);
        let q = heap.alloc(None);
        let o = heap.alloc(Some(p));
        heap.prevent_extensions(o).unwrap();
        assert!(heap.set_prototype_of(o, Some(p)).unwrap());
        assert!(!heap.set_prototype_of(o, Some(q)).unwrap());
    }

    #[test]
    fn prototype_chain_membership_excludes_self() {
        let mut heap = ObjectHeap::new();
        let a = heap.alloc(None);
        let b = heap.alloc(Some(a));
        assert!(heap.has_in_prototype_chain(b, a).unwrap());
        assert!(!heap.has_in_prototype_chain(a, a).unwrap());
    }

    #[test]
    fn missing_handle_is_reported() {
        let heap = ObjectHeap::new();
        assert_eq!(
            heap.get(ObjectHandle(9)).unwrap_err(),
            ObjectError::ObjectNotFound(ObjectHandle(9))
        );
        assert_eq!(
            ObjectError::ObjectNotFound(ObjectHandle(9)).to_string(),
            "object#9 not found"
        );
    }

    #[test]
    fn heap_serde_round_trip_preserves_descriptors() {
        let mut heap = ObjectHeap::new();
        let o = heap.alloc(None);
        heap.define_property(o, str_key("k"), frozen_data(JsValue::Str("v".into())))
            .unwrap();
        heap.define_property(
            o,
            WellKnownSymbol::ToStringTag.key(),
            PropertyDescriptor::data(JsValue::Bool(true)),
        )
        .unwrap();
        let json = serde_json::to_string(&heap).unwrap();
        let back: ObjectHeap = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.get_own_property_descriptor(o, &str_key("k")).unwrap(),
            Some(frozen_data(JsValue::Str("v".into())))
        );
        assert_eq!(back.len(), 1);
    }
}
