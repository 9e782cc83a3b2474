#![no_main]

use libfuzzer_sys::fuzz_target;
use sandbox_membrane::{
    DescriptorInvariantChecker, InterceptionVerdict, JsValue, PropertyDescriptor, PropertyKey,
    Realm,
};

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }

    let mut realm = Realm::new();
    let Ok(setter) = realm.create_function("set", 1, false, |_, _| Ok(JsValue::Undefined)) else {
        return;
    };
    let Ok(getter) = realm.create_function("get", 0, false, |_, _| Ok(JsValue::Null)) else {
        return;
    };

    let key = PropertyKey::from("p");
    let stored = value(byte(data, 1));
    let flags = byte(data, 0);
    let desc = if flags & 0b1000 == 0 {
        PropertyDescriptor::Data {
            value: stored.clone(),
            writable: flags & 0b001 != 0,
            enumerable: true,
            configurable: flags & 0b010 != 0,
        }
    } else {
        PropertyDescriptor::Accessor {
            get: (flags & 0b0001_0000 != 0).then_some(getter),
            set: (flags & 0b100 != 0).then_some(setter),
            enumerable: true,
            configurable: flags & 0b010 != 0,
        }
    };

    let target = realm.create_object();
    if realm.heap_mut().define_property(target, key.clone(), desc.clone()) != Ok(true) {
        return;
    }

    let proposed = value(byte(data, 2));
    let Ok(object) = realm.heap().get(target) else {
        return;
    };
    let verdict = DescriptorInvariantChecker::classify_for_set(object, &key, &proposed);
    let read = DescriptorInvariantChecker::classify_for_get(object, &key, &stored);

    if desc.is_data() {
        assert_ne!(read, InterceptionVerdict::RejectedValueMismatch);
    }
    if desc.is_configurable() {
        assert_eq!(verdict, InterceptionVerdict::Allowed);
    }

    let written = realm.set(target, key, proposed.clone());
    match verdict {
        InterceptionVerdict::RejectedValueMismatch
        | InterceptionVerdict::RejectedAccessorMissing => {
            assert_eq!(written, Ok(false));
        }
        InterceptionVerdict::AllowedNoopWrite => {
            assert!(stored.same_value(&proposed));
            assert_eq!(written, Ok(false));
        }
        InterceptionVerdict::Allowed => {
            let has_setter = matches!(desc, PropertyDescriptor::Accessor { set: Some(_), .. });
            if desc.is_writable() || has_setter {
                assert_eq!(written, Ok(true));
            }
        }
    }
});

fn value(selector: u8) -> JsValue {
    match selector % 8 {
        0 => JsValue::Undefined,
        1 => JsValue::Null,
        2 => JsValue::Bool(selector & 0x80 != 0),
        3 => JsValue::Number(f64::NAN),
        4 => JsValue::Number(0.0),
        5 => JsValue::Number(-0.0),
        6 => JsValue::Number(f64::from(selector >> 3)),
        _ => JsValue::Str(format!("s{}", selector >> 3)),
    }
}

fn byte(data: &[u8], index: usize) -> u8 {
    data[index % data.len()]
}
