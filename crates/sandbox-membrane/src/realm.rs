//! Realm: the object heap plus the native behaviors behind its functions.
//!
//! Provides the operations that can run user code (getters, setters,
//! function calls, construction, `instanceof`) on top of the passive
//! [`ObjectHeap`].

use std::fmt;
use std::rc::Rc;

use crate::object_model::{
    BehaviorId, FunctionSlot, JsValue, ObjectError, ObjectHandle, ObjectHeap, PropertyDescriptor,
    PropertyKey, WellKnownSymbol,
};

/// Arguments of a single `[[Call]]` or `[[Construct]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// The function object being invoked.
    pub callee: ObjectHandle,
    pub this: JsValue,
    pub args: Vec<JsValue>,
    /// `Some` when invoked through `[[Construct]]`.
    pub new_target: Option<ObjectHandle>,
}

impl Invocation {
    pub fn arg(&self, index: usize) -> JsValue {
        self.args.get(index).cloned().unwrap_or(JsValue::Undefined)
    }

    pub fn is_construct(&self) -> bool {
        self.new_target.is_some()
    }
}

/// Native function body.
pub type NativeBehavior = Rc<dyn Fn(&mut Realm, Invocation) -> Result<JsValue, ObjectError>>;

fn empty_function(_: &mut Realm, _: Invocation) -> Result<JsValue, ObjectError> {
    Ok(JsValue::Undefined)
}

/// `Function.prototype[@@hasInstance]`.
fn function_prototype_has_instance(
    realm: &mut Realm,
    inv: Invocation,
) -> Result<JsValue, ObjectError> {
    let value = inv.arg(0);
    realm.ordinary_has_instance(&inv.this, &value).map(JsValue::Bool)
}

pub struct Realm {
    heap: ObjectHeap,
    behaviors: Vec<NativeBehavior>,
    object_prototype: ObjectHandle,
    function_prototype: ObjectHandle,
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("objects", &self.heap.len())
            .field("behaviors", &self.behaviors.len())
            .field("object_prototype", &self.object_prototype)
            .field("function_prototype", &self.function_prototype)
            .finish()
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

impl Realm {
    /// Create a realm with `Object.prototype`, `Function.prototype` and
    /// `Function.prototype[@@hasInstance]` installed.
    pub fn new() -> Self {
        let mut heap = ObjectHeap::new();
        let object_prototype = heap.alloc(None);
        let function_prototype = heap.alloc_function(
            Some(object_prototype),
            FunctionSlot {
                behavior: BehaviorId(0),
                constructable: false,
            },
        );
        let empty: NativeBehavior = Rc::new(empty_function);
        let mut realm = Self {
            heap,
            behaviors: vec![empty],
            object_prototype,
            function_prototype,
        };

        let has_instance = realm.create_function_object(
            Some(function_prototype),
            false,
            Rc::new(function_prototype_has_instance),
        );
        // Frozen, so it can only be shadowed by defining an own property.
        if let Ok(fp) = realm.heap.get_mut(function_prototype) {
            fp.define_own_property(
                WellKnownSymbol::HasInstance.key(),
                PropertyDescriptor::data_frozen(JsValue::Object(has_instance)),
            );
        }
        realm
    }

    pub fn heap(&self) -> &ObjectHeap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut ObjectHeap {
        &mut self.heap
    }

    pub fn object_prototype(&self) -> ObjectHandle {
        self.object_prototype
    }

    pub fn function_prototype(&self) -> ObjectHandle {
        self.function_prototype
    }

    /// Plain object inheriting from `Object.prototype`.
    pub fn create_object(&mut self) -> ObjectHandle {
        self.heap.alloc(Some(self.object_prototype))
    }

    fn register_behavior(&mut self, behavior: NativeBehavior) -> BehaviorId {
        let id = BehaviorId(self.behaviors.len() as u32);
        self.behaviors.push(behavior);
        id
    }

    /// Allocate a function object with no own properties.
    pub fn create_function_object(
        &mut self,
        proto: Option<ObjectHandle>,
        constructable: bool,
        behavior: NativeBehavior,
    ) -> ObjectHandle {
        let behavior = self.register_behavior(behavior);
        self.heap.alloc_function(
            proto,
            FunctionSlot {
                behavior,
                constructable,
            },
        )
    }

    /// Create a function the way a function declaration would: own `length`
    /// and `name`, and for constructors a fresh `prototype` object whose
    /// `constructor` points back.
    pub fn create_function<F>(
        &mut self,
        name: &str,
        length: u32,
        constructable: bool,
        behavior: F,
    ) -> Result<ObjectHandle, ObjectError>
    where
        F: Fn(&mut Realm, Invocation) -> Result<JsValue, ObjectError> + 'static,
    {
        let func = self.create_function_object(
            Some(self.function_prototype),
            constructable,
            Rc::new(behavior),
        );
        self.heap.define_property(
            func,
            "length".into(),
            PropertyDescriptor::data_readonly(JsValue::Number(f64::from(length))),
        )?;
        self.heap.define_property(
            func,
            "name".into(),
            PropertyDescriptor::data_readonly(JsValue::Str(name.to_string())),
        )?;
        if constructable {
            let proto = self.create_object();
            self.heap.define_property(
                proto,
                "constructor".into(),
                PropertyDescriptor::data_hidden(JsValue::Object(func)),
            )?;
            self.heap.define_property(
                func,
                "prototype".into(),
                PropertyDescriptor::Data {
                    value: JsValue::Object(proto),
                    writable: true,
                    enumerable: false,
                    configurable: false,
                },
            )?;
        }
        Ok(func)
    }

    // -- [[Get]] / [[Set]] ----------------------------------------------

    /// `[[Get]](O, P, O)`: walks the chain and runs getters.
    pub fn get(&mut self, target: ObjectHandle, key: &PropertyKey) -> Result<JsValue, ObjectError> {
        match self.heap.lookup(target, key)? {
            None => Ok(JsValue::Undefined),
            Some((_, PropertyDescriptor::Data { value, .. })) => Ok(value),
            Some((_, PropertyDescriptor::Accessor { get: Some(getter), .. })) => {
                self.call(getter, JsValue::Object(target), Vec::new())
            }
            Some((_, PropertyDescriptor::Accessor { get: None, .. })) => Ok(JsValue::Undefined),
        }
    }

    /// Ordinary `[[Set]](O, P, V, O)`. Returns `false` where strict-mode
    /// code would throw.
    pub fn set(
        &mut self,
        target: ObjectHandle,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<bool, ObjectError> {
        match self.heap.lookup(target, &key)? {
            None => self
                .heap
                .define_property(target, key, PropertyDescriptor::data(value)),
            Some((_, PropertyDescriptor::Data { writable: false, .. })) => Ok(false),
            Some((owner, PropertyDescriptor::Data { .. })) if owner == target => {
                if let Some(PropertyDescriptor::Data { value: slot, .. }) =
                    self.heap.get_mut(target)?.properties.get_mut(&key)
                {
                    *slot = value;
                }
                Ok(true)
            }
            Some((_, PropertyDescriptor::Data { .. })) => self
                .heap
                .define_property(target, key, PropertyDescriptor::data(value)),
            Some((_, PropertyDescriptor::Accessor { set: Some(setter), .. })) => {
                self.call(setter, JsValue::Object(target), vec![value])?;
                Ok(true)
            }
            Some((_, PropertyDescriptor::Accessor { set: None, .. })) => Ok(false),
        }
    }

    // -- [[Call]] / [[Construct]] ---------------------------------------

    fn invoke(&mut self, inv: Invocation) -> Result<JsValue, ObjectError> {
        let slot = self
            .heap
            .get(inv.callee)?
            .function
            .ok_or(ObjectError::NotCallable(inv.callee))?;
        let behavior = self
            .behaviors
            .get(slot.behavior.0 as usize)
            .cloned()
            .ok_or_else(|| {
                ObjectError::TypeError(format!("no native behavior for {}", inv.callee))
            })?;
        behavior(self, inv)
    }

    pub fn call(
        &mut self,
        callee: ObjectHandle,
        this: JsValue,
        args: Vec<JsValue>,
    ) -> Result<JsValue, ObjectError> {
        self.invoke(Invocation {
            callee,
            this,
            args,
            new_target: None,
        })
    }

    /// `new callee(...args)`.
    pub fn construct(
        &mut self,
        callee: ObjectHandle,
        args: Vec<JsValue>,
    ) -> Result<JsValue, ObjectError> {
        self.construct_with_new_target(callee, args, callee)
    }

    /// `Reflect.construct(callee, args, new_target)`. The fresh receiver
    /// inherits from `new_target.prototype`; a native returning an object
    /// replaces it.
    pub fn construct_with_new_target(
        &mut self,
        callee: ObjectHandle,
        args: Vec<JsValue>,
        new_target: ObjectHandle,
    ) -> Result<JsValue, ObjectError> {
        if !self.heap.get(callee)?.is_constructable() {
            return Err(ObjectError::NotConstructable(callee));
        }
        let proto = match self.get(new_target, &"prototype".into())? {
            JsValue::Object(p) => p,
            _ => self.object_prototype,
        };
        let receiver = self.heap.alloc(Some(proto));
        let result = self.invoke(Invocation {
            callee,
            this: JsValue::Object(receiver),
            args,
            new_target: Some(new_target),
        })?;
        if result.is_object() {
            Ok(result)
        } else {
            Ok(JsValue::Object(receiver))
        }
    }

    // -- instanceof -------------------------------------------------------

    /// `value instanceof target`, honouring `@@hasInstance`.
    pub fn instance_of(&mut self, value: &JsValue, target: &JsValue) -> Result<bool, ObjectError> {
        let Some(target_handle) = target.as_object() else {
            return Err(ObjectError::TypeError(format!(
                "right-hand side of instanceof is a {}, not an object",
                target.type_name()
            )));
        };
        match self.get(target_handle, &WellKnownSymbol::HasInstance.key())? {
            JsValue::Undefined | JsValue::Null => {}
            JsValue::Object(handler) => {
                let verdict = self.call(handler, target.clone(), vec![value.clone()])?;
                return Ok(verdict.to_boolean());
            }
            other => {
                return Err(ObjectError::TypeError(format!(
                    "@@hasInstance is a {}, not a function",
                    other.type_name()
                )));
            }
        }
        if !self.heap.is_callable(target_handle)? {
            return Err(ObjectError::NotCallable(target_handle));
        }
        self.ordinary_has_instance(target, value)
    }

    /// `OrdinaryHasInstance(C, O)`.
    pub fn ordinary_has_instance(
        &mut self,
        ctor: &JsValue,
        value: &JsValue,
    ) -> Result<bool, ObjectError> {
        if !self.heap.is_callable_value(ctor) {
            return Ok(false);
        }
        let (Some(ctor), Some(object)) = (ctor.as_object(), value.as_object()) else {
            return Ok(false);
        };
        match self.get(ctor, &"prototype".into())? {
            JsValue::Object(proto) => self.heap.has_in_prototype_chain(object, proto),
            other => Err(ObjectError::TypeError(format!(
                "function has non-object prototype {other} in instanceof check"
            ))),
        }
    }
}
