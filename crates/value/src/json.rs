//! Bridge between [`Value`] and `serde_json::Value`.
//!
//! The mapping is the natural one: records and maps become objects, arrays
//! and lists become JSON arrays, bytes become standard base64 strings and
//! owned references are transparent. A non-empty polymorphic container is
//! written as `{"type": <name>, "value": <inner>}`.
//!
//! Decoding cannot recover declared shapes on its own; [`conform`] coerces a
//! decoded value back to the shape of a template.

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::error::ValueError;
use crate::value::{CellId, Key, KeyKind, Map, Poly, Record, Ref, Value};

pub const POLY_TYPE: &str = "type";
pub const POLY_VALUE: &str = "value";

// ── Encoding ──────────────────────────────────────────────────────────────

/// Converts a value to JSON. A reference that points back into its own
/// ancestry is written as `null`.
pub fn to_json(value: &Value) -> Json {
    let mut stack = HashSet::new();
    encode(value, &mut stack)
}

fn encode(value: &Value, stack: &mut HashSet<CellId>) -> Json {
    match value {
        Value::Null | Value::Unsupported(_) => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Uint(u) => Json::from(*u),
        Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(STANDARD.encode(b)),
        Value::Record(rec) => {
            let mut obj = JsonMap::new();
            for (name, v) in rec.fields() {
                obj.insert(name.to_string(), encode(v, stack));
            }
            Json::Object(obj)
        }
        Value::Array(items) | Value::List(items) => {
            Json::Array(items.iter().map(|v| encode(v, stack)).collect())
        }
        Value::Map(map) => {
            let mut obj = JsonMap::new();
            for (k, v) in map.iter() {
                obj.insert(k.to_string(), encode(v, stack));
            }
            Json::Object(obj)
        }
        Value::Ref(r) => {
            let Some(id) = r.id() else { return Json::Null };
            if !stack.insert(id) {
                return Json::Null;
            }
            let out = match r.read() {
                Some(guard) => encode(&guard, stack),
                None => Json::Null,
            };
            stack.remove(&id);
            out
        }
        Value::Poly(p) => match (p.type_name(), p.value()) {
            (Some(name), Some(v)) => {
                let mut obj = JsonMap::new();
                obj.insert(POLY_TYPE.to_string(), Json::String(name.to_string()));
                obj.insert(POLY_VALUE.to_string(), encode(v, stack));
                Json::Object(obj)
            }
            _ => Json::Null,
        },
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────

/// Converts JSON to a value: objects become string-keyed maps and arrays
/// become lists.
pub fn from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::Uint(u)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(from_json).collect()),
        Json::Object(obj) => {
            let mut map = Map::new(KeyKind::Str);
            for (k, v) in obj {
                // String keys always coerce to a string-keyed map.
                let _ = map.insert(Key::Str(k.clone()), from_json(v));
            }
            Value::Map(map)
        }
    }
}

// ── Conforming ────────────────────────────────────────────────────────────

/// Coerces `value` to the shape of `template`.
///
/// A `Null` template accepts anything. Lists and maps conform their elements
/// against the template's first element, when it has one.
pub fn conform(value: Value, template: &Value) -> Result<Value, ValueError> {
    match template {
        Value::Null => Ok(value),
        Value::Bool(_) => match value {
            Value::Bool(_) => Ok(value),
            other => Err(ValueError::mismatch("bool", &other)),
        },
        Value::Int(_) => value
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| ValueError::mismatch("int", &value)),
        Value::Uint(_) => match &value {
            Value::Uint(_) => Ok(value),
            Value::Int(i) => u64::try_from(*i)
                .map(Value::Uint)
                .map_err(|_| ValueError::mismatch("uint", &value)),
            Value::Float(f) if f.fract() == 0.0 && *f >= 0.0 => Ok(Value::Uint(*f as u64)),
            _ => Err(ValueError::mismatch("uint", &value)),
        },
        Value::Float(_) => value
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| ValueError::mismatch("float", &value)),
        Value::String(_) => match value {
            Value::String(_) => Ok(value),
            other => Err(ValueError::mismatch("string", &other)),
        },
        Value::Bytes(_) => match value {
            Value::Bytes(_) => Ok(value),
            Value::String(s) => STANDARD
                .decode(s.as_bytes())
                .map(Value::Bytes)
                .map_err(|_| ValueError::InvalidBytes),
            other => Err(ValueError::mismatch("bytes", &other)),
        },
        Value::Record(tpl) => conform_record(value, tpl),
        Value::Array(tpl) => {
            let items = match value {
                Value::Array(items) | Value::List(items) => items,
                other => return Err(ValueError::mismatch("array", &other)),
            };
            if items.len() != tpl.len() {
                return Err(ValueError::LengthMismatch { expected: tpl.len(), found: items.len() });
            }
            let items = items
                .into_iter()
                .zip(tpl)
                .map(|(v, t)| conform(v, t))
                .collect::<Result<_, _>>()?;
            Ok(Value::Array(items))
        }
        Value::List(tpl) => {
            let items = match value {
                Value::Array(items) | Value::List(items) => items,
                Value::Null => Vec::new(),
                other => return Err(ValueError::mismatch("list", &other)),
            };
            let items = match tpl.first() {
                Some(elem) => items.into_iter().map(|v| conform(v, elem)).collect::<Result<_, _>>()?,
                None => items,
            };
            Ok(Value::List(items))
        }
        Value::Map(tpl) => conform_map(value, tpl),
        Value::Ref(tpl) => {
            let inner_tpl = tpl.load().or_else(|| tpl.shape().cloned()).unwrap_or_default();
            match value {
                Value::Null => Ok(Value::Ref(Ref::from_parts(None, tpl.shape_arc().cloned()))),
                Value::Ref(_) => Ok(value),
                other => {
                    let inner = conform(other, &inner_tpl)?;
                    let out = Ref::from_parts(Some(Default::default()), tpl.shape_arc().cloned());
                    out.clone().store(inner);
                    Ok(Value::Ref(out))
                }
            }
        }
        Value::Poly(tpl) => conform_poly(value, tpl),
        Value::Unsupported(kind) => Err(ValueError::Unsupported(kind.clone())),
    }
}

fn conform_record(value: Value, tpl: &Record) -> Result<Value, ValueError> {
    let mut out = Record::new(tpl.ty());
    match value {
        Value::Record(rec) if rec.type_name() == tpl.type_name() => return Ok(Value::Record(rec)),
        Value::Map(map) => {
            for (k, v) in map.iter() {
                let name = k.to_string();
                let field_tpl = tpl.get(&name).cloned().unwrap_or_default();
                out.set(&name, conform(v.clone(), &field_tpl)?)?;
            }
        }
        Value::Record(rec) => {
            for (name, v) in rec.fields() {
                let field_tpl = tpl.get(name).cloned().unwrap_or_default();
                out.set(name, conform(v.clone(), &field_tpl)?)?;
            }
        }
        other => return Err(ValueError::mismatch(tpl.type_name(), &other)),
    }
    Ok(Value::Record(out))
}

fn conform_map(value: Value, tpl: &Map) -> Result<Value, ValueError> {
    let mut out = Map::new(tpl.key_kind());
    let elem = tpl.iter().next().map(|(_, v)| v.clone()).unwrap_or_default();
    match value {
        Value::Map(map) => {
            for (k, v) in map.iter() {
                out.insert(k.clone(), conform(v.clone(), &elem)?)?;
            }
        }
        Value::Record(rec) => {
            for (name, v) in rec.fields() {
                out.insert(Key::Str(name.to_string()), conform(v.clone(), &elem)?)?;
            }
        }
        Value::Null => {}
        other => return Err(ValueError::mismatch("map", &other)),
    }
    Ok(Value::Map(out))
}

fn conform_poly(value: Value, tpl: &Poly) -> Result<Value, ValueError> {
    match value {
        Value::Poly(_) => Ok(value),
        Value::Null => Ok(Value::Poly(Poly::empty())),
        Value::Map(map) => {
            let name = map
                .get(&Key::from(POLY_TYPE))
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| ValueError::mismatch("poly", &Value::Map(map.clone())))?;
            let inner = map.get(&Key::from(POLY_VALUE)).cloned().unwrap_or_default();
            let inner_tpl = match (tpl.type_name(), tpl.value()) {
                (Some(t), Some(v)) if t == name => v.clone(),
                _ => Value::Null,
            };
            Ok(Value::Poly(Poly::new(name, conform(inner, &inner_tpl)?)))
        }
        other => Err(ValueError::mismatch("poly", &other)),
    }
}

impl Value {
    pub fn to_json(&self) -> Json {
        to_json(self)
    }

    pub fn from_json(json: &Json) -> Value {
        from_json(json)
    }

    pub fn conform(self, template: &Value) -> Result<Value, ValueError> {
        conform(self, template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FieldPolicy, RecordType};
    use serde_json::json;

    #[test]
    fn encodes_natural_mapping() {
        let ty = RecordType::new("Doc").field("name").field("tags").shared();
        let rec = Record::new(&ty).with("name", "v1").with("tags", Value::list(["a", "b"]));
        assert_eq!(to_json(&Value::Record(rec)), json!({"name": "v1", "tags": ["a", "b"]}));
        assert_eq!(to_json(&Value::Bytes(vec![1, 2, 3])), json!("AQID"));
        assert_eq!(to_json(&Value::Poly(Poly::new("Circle", 2i64))), json!({"type": "Circle", "value": 2}));
    }

    #[test]
    fn cyclic_ref_encodes_as_null() {
        let node = Ref::new(Value::Null);
        node.clone().store(Value::list([Value::Ref(node.clone())]));
        assert_eq!(to_json(&Value::Ref(node)), json!([null]));
    }

    #[test]
    fn decodes_numbers_by_range() {
        assert!(matches!(from_json(&json!(-1)), Value::Int(-1)));
        assert!(matches!(from_json(&json!(u64::MAX)), Value::Uint(u64::MAX)));
        assert!(matches!(from_json(&json!(1.5)), Value::Float(_)));
    }

    #[test]
    fn conforms_to_record_template() {
        let ty = RecordType::new("Item")
            .field_with("id", FieldPolicy::key())
            .field("blob")
            .shared();
        let tpl = Value::Record(Record::new(&ty).with("id", 0u64).with("blob", Value::Bytes(vec![])));
        let decoded = from_json(&json!({"id": 4, "blob": "AQID"}));
        let conformed = decoded.conform(&tpl).unwrap();
        let rec = conformed.as_record().unwrap();
        assert!(matches!(rec.get("id"), Some(Value::Uint(4))));
        assert!(matches!(rec.get("blob"), Some(Value::Bytes(b)) if b == &vec![1, 2, 3]));
    }

    #[test]
    fn conforms_map_keys() {
        let tpl = Value::Map(Map::new(KeyKind::Int));
        let decoded = from_json(&json!({"7": true}));
        let conformed = decoded.conform(&tpl).unwrap();
        assert!(conformed.as_map().unwrap().contains_key(&Key::Int(7)));
        let bad = from_json(&json!({"x": true})).conform(&tpl);
        assert!(matches!(bad, Err(ValueError::InvalidKey(_, KeyKind::Int))));
    }

    #[test]
    fn conforms_fixed_array_length() {
        let tpl = Value::array([0i64, 0]);
        let err = from_json(&json!([1, 2, 3])).conform(&tpl).unwrap_err();
        assert_eq!(err, ValueError::LengthMismatch { expected: 2, found: 3 });
    }

    #[test]
    fn conforms_refs_and_poly() {
        let tpl = Value::Ref(Ref::empty_of(Value::Int(0)));
        let v = from_json(&json!(3)).conform(&tpl).unwrap();
        let Value::Ref(r) = v else { panic!("expected ref") };
        assert!(matches!(r.load(), Some(Value::Int(3))));
        assert!(matches!(from_json(&json!(null)).conform(&tpl), Ok(Value::Ref(r)) if r.is_empty()));

        let poly = from_json(&json!({"type": "Circle", "value": 2})).conform(&Value::Poly(Poly::empty())).unwrap();
        assert!(matches!(&poly, Value::Poly(p) if p.type_name() == Some("Circle")));
    }
}
