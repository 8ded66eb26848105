//! Conversion between concrete Rust types and [`Value`].
//!
//! User record types implement [`Reflect`] by hand, building a [`Record`]
//! of their declared [`RecordType`](crate::RecordType).
//!
//! [`Record`]: crate::Record

use std::collections::BTreeMap;

use crate::error::ValueError;
use crate::value::{Key, KeyKind, Map, Ref, Value};

pub trait Reflect: Sized {
    /// The zero value of this type, used as an allocation template.
    fn template() -> Value;

    fn to_value(&self) -> Value;

    fn from_value(value: &Value) -> Result<Self, ValueError>;
}

/// Types usable as map keys.
pub trait ReflectKey: Sized + Ord {
    const KIND: KeyKind;

    fn to_key(&self) -> Key;

    fn from_key(key: &Key) -> Result<Self, ValueError>;
}

fn through_ref(value: &Value) -> Value {
    match value {
        Value::Ref(_) | Value::Poly(_) => value.resolved(),
        other => other.clone(),
    }
}

impl Reflect for bool {
    fn template() -> Value {
        Value::Bool(false)
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        through_ref(value).as_bool().ok_or_else(|| ValueError::mismatch("bool", value))
    }
}

macro_rules! reflect_signed {
    ($($t:ty),*) => {$(
        impl Reflect for $t {
            fn template() -> Value {
                Value::Int(0)
            }

            fn to_value(&self) -> Value {
                Value::Int(i64::from(*self))
            }

            fn from_value(value: &Value) -> Result<Self, ValueError> {
                through_ref(value)
                    .as_i64()
                    .and_then(|i| <$t>::try_from(i).ok())
                    .ok_or_else(|| ValueError::mismatch(stringify!($t), value))
            }
        }
    )*};
}

macro_rules! reflect_unsigned {
    ($($t:ty),*) => {$(
        impl Reflect for $t {
            fn template() -> Value {
                Value::Uint(0)
            }

            fn to_value(&self) -> Value {
                Value::Uint(u64::from(*self))
            }

            fn from_value(value: &Value) -> Result<Self, ValueError> {
                let n = match through_ref(value) {
                    Value::Uint(u) => Some(u),
                    Value::Int(i) => u64::try_from(i).ok(),
                    Value::Float(f) if f.fract() == 0.0 && f >= 0.0 => Some(f as u64),
                    _ => None,
                };
                n.and_then(|u| <$t>::try_from(u).ok())
                    .ok_or_else(|| ValueError::mismatch(stringify!($t), value))
            }
        }
    )*};
}

reflect_signed!(i8, i16, i32, i64);
reflect_unsigned!(u8, u16, u32, u64);

impl Reflect for f64 {
    fn template() -> Value {
        Value::Float(0.0)
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        through_ref(value).as_f64().ok_or_else(|| ValueError::mismatch("f64", value))
    }
}

impl Reflect for f32 {
    fn template() -> Value {
        Value::Float(0.0)
    }

    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl Reflect for String {
    fn template() -> Value {
        Value::String(String::new())
    }

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match through_ref(value) {
            Value::String(s) => Ok(s),
            _ => Err(ValueError::mismatch("string", value)),
        }
    }
}

impl<T: Reflect> Reflect for Vec<T> {
    fn template() -> Value {
        Value::List(Vec::new())
    }

    fn to_value(&self) -> Value {
        Value::List(self.iter().map(Reflect::to_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match through_ref(value) {
            Value::List(items) | Value::Array(items) => items.iter().map(T::from_value).collect(),
            Value::Null => Ok(Vec::new()),
            _ => Err(ValueError::mismatch("list", value)),
        }
    }
}

/// `Option<T>` is an owned reference: `None` is an empty reference that can
/// allocate a `T`.
impl<T: Reflect> Reflect for Option<T> {
    fn template() -> Value {
        Value::Ref(Ref::empty_of(T::template()))
    }

    fn to_value(&self) -> Value {
        match self {
            Some(v) => {
                let mut r = Ref::empty_of(T::template());
                r.store(v.to_value());
                Value::Ref(r)
            }
            None => Self::template(),
        }
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            Value::Ref(r) => match r.read() {
                Some(inner) => T::from_value(&inner).map(Some),
                None => Ok(None),
            },
            other => T::from_value(other).map(Some),
        }
    }
}

impl<K: ReflectKey, V: Reflect> Reflect for BTreeMap<K, V> {
    fn template() -> Value {
        Value::Map(Map::new(K::KIND))
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new(K::KIND);
        for (k, v) in self {
            // The key already has the declared kind.
            let _ = map.insert(k.to_key(), v.to_value());
        }
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match through_ref(value) {
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| Ok((K::from_key(&k.coerce(K::KIND)?)?, V::from_value(v)?)))
                .collect(),
            Value::Null => Ok(BTreeMap::new()),
            _ => Err(ValueError::mismatch("map", value)),
        }
    }
}

impl<T: Reflect, const N: usize> Reflect for [T; N] {
    fn template() -> Value {
        Value::Array((0..N).map(|_| T::template()).collect())
    }

    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(Reflect::to_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        let items: Vec<T> = match through_ref(value) {
            Value::Array(items) | Value::List(items) => {
                items.iter().map(T::from_value).collect::<Result<_, _>>()?
            }
            _ => return Err(ValueError::mismatch("array", value)),
        };
        let found = items.len();
        items
            .try_into()
            .map_err(|_| ValueError::LengthMismatch { expected: N, found })
    }
}

impl ReflectKey for String {
    const KIND: KeyKind = KeyKind::Str;

    fn to_key(&self) -> Key {
        Key::Str(self.clone())
    }

    fn from_key(key: &Key) -> Result<Self, ValueError> {
        match key {
            Key::Str(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }
}

impl ReflectKey for i64 {
    const KIND: KeyKind = KeyKind::Int;

    fn to_key(&self) -> Key {
        Key::Int(*self)
    }

    fn from_key(key: &Key) -> Result<Self, ValueError> {
        match key.coerce(KeyKind::Int)? {
            Key::Int(i) => Ok(i),
            other => Err(ValueError::InvalidKey(other.to_string(), KeyKind::Int)),
        }
    }
}

impl ReflectKey for u64 {
    const KIND: KeyKind = KeyKind::Uint;

    fn to_key(&self) -> Key {
        Key::Uint(*self)
    }

    fn from_key(key: &Key) -> Result<Self, ValueError> {
        match key.coerce(KeyKind::Uint)? {
            Key::Uint(u) => Ok(u),
            other => Err(ValueError::InvalidKey(other.to_string(), KeyKind::Uint)),
        }
    }
}

impl ReflectKey for bool {
    const KIND: KeyKind = KeyKind::Bool;

    fn to_key(&self) -> Key {
        Key::Bool(*self)
    }

    fn from_key(key: &Key) -> Result<Self, ValueError> {
        match key.coerce(KeyKind::Bool)? {
            Key::Bool(b) => Ok(b),
            other => Err(ValueError::InvalidKey(other.to_string(), KeyKind::Bool)),
        }
    }
}
