//! JSON-Patch wire format.
//!
//! A patch travels as a flat array of operation objects in RFC 6902 form,
//! extended with the fields this crate needs:
//!
//! ```json
//! {"op": "test", "path": "", "condition": {"op": "compare", ...}}
//! {"op": "replace", "path": "/Name", "value": "v2", "oldValue": "v1"}
//! {"op": "add", "path": "/Items/1", "value": {...}, "key": 7, "prev": 3}
//! {"op": "move", "from": "/Items/0", "path": "/Items/2", "key": 3, "prev": 9, "fromPrev": null}
//! {"op": "replace", "path": "/Items/1", "key": 7, "patch": [ ... ]}
//! {"op": "log", "path": "/Items", "message": "..."}
//! ```
//!
//! `if`, `unless` and `clock` may appear on any operation. Guards of
//! ancestor nodes are folded into every operation below them. Decoding goes
//! through [`PatchBuilder`], so the result is type-checked against a shape.
//!
//! Values keep the kinds plain JSON cannot tell apart as tagged objects:
//!
//! ```json
//! {"@record": "Entity", "id": 7, "name": "x"}
//! {"@poly": "Circle", "@value": {...}}
//! {"@bytes": "AAEC"}
//! {"@array": [1, 2]}
//! {"@map": "int", "@entries": {"1": "a"}}
//! ```
//!
//! Record types resolve through the [`Registry`] first and then through the
//! record types the shape contains; an unknown name fails decoding.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Map, Value as Json};
use structpatch_condition::{codec as cond_codec, Condition};
use structpatch_pointer::{format, parse_strict, Path, PathPart};
use structpatch_value::{
    conform, from_json, to_json, CellId, Key, KeyKind, Map as ValueMap, Poly, Record, RecordType, Value,
};

use super::structured::{key_kind_from, Registry};
use crate::builder::PatchBuilder;
use crate::clock::Clock;
use crate::error::CodecError;
use crate::patch::{EditKind, Guards, ListEdit, OpKind, Operation, Patch};

const RECORD_TAG: &str = "@record";
const POLY_TAG: &str = "@poly";
const POLY_VALUE: &str = "@value";
const BYTES_TAG: &str = "@bytes";
const ARRAY_TAG: &str = "@array";
const MAP_TAG: &str = "@map";
const MAP_ENTRIES: &str = "@entries";

// ── Helpers ───────────────────────────────────────────────────────────────

fn invalid(msg: impl Into<String>) -> CodecError {
    CodecError::InvalidOp(msg.into())
}

fn encode_path(path: &Path) -> Json {
    Json::String(format(path))
}

fn decode_path(obj: &Map<String, Json>, key: &str) -> Result<Path, CodecError> {
    let s = obj
        .get(key)
        .and_then(Json::as_str)
        .ok_or_else(|| invalid(format!("{key} must be a string")))?;
    parse_strict(s).map_err(|e| invalid(format!("{key}: {e}")))
}

fn encode_key(key: &Key) -> Json {
    to_json(&key.to_value())
}

fn decode_key(json: &Json) -> Result<Key, CodecError> {
    Key::from_value(&from_json(json)).ok_or_else(|| invalid(format!("{json} is not a valid key")))
}

// ── Values ────────────────────────────────────────────────────────────────

fn tagged(entries: Vec<(&str, Json)>) -> Json {
    Json::Object(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

/// Encodes a value; references are transparent and a reference met again
/// inside its own referent becomes `null`.
fn encode_value(value: &Value) -> Result<Json, CodecError> {
    fn walk(value: &Value, stack: &mut HashSet<CellId>) -> Result<Json, CodecError> {
        Ok(match value {
            Value::Record(rec) => {
                let mut m = Map::new();
                m.insert(RECORD_TAG.into(), json!(rec.type_name()));
                for (name, v) in rec.fields() {
                    m.insert(name.to_string(), walk(v, stack)?);
                }
                Json::Object(m)
            }
            Value::List(items) => Json::Array(items.iter().map(|v| walk(v, stack)).collect::<Result<_, _>>()?),
            Value::Array(items) => {
                let items = items.iter().map(|v| walk(v, stack)).collect::<Result<_, _>>()?;
                tagged(vec![(ARRAY_TAG, Json::Array(items))])
            }
            Value::Map(map) => {
                let mut entries = Map::new();
                for (k, v) in map.iter() {
                    entries.insert(k.to_string(), walk(v, stack)?);
                }
                match map.key_kind() {
                    KeyKind::Str => Json::Object(entries),
                    kind => tagged(vec![(MAP_TAG, json!(kind.to_string())), (MAP_ENTRIES, Json::Object(entries))]),
                }
            }
            Value::Ref(r) => match r.id() {
                Some(id) if stack.insert(id) => {
                    let out = match r.read() {
                        Some(inner) => walk(&inner, stack)?,
                        None => Json::Null,
                    };
                    stack.remove(&id);
                    out
                }
                _ => Json::Null,
            },
            Value::Poly(p) => match (p.type_name(), p.value()) {
                (Some(name), Some(inner)) => tagged(vec![(POLY_TAG, json!(name)), (POLY_VALUE, walk(inner, stack)?)]),
                _ => Json::Null,
            },
            Value::Bytes(_) => tagged(vec![(BYTES_TAG, to_json(value))]),
            Value::Unsupported(kind) => return Err(CodecError::Unsupported(kind.clone())),
            scalar => to_json(scalar),
        })
    }
    walk(value, &mut HashSet::new())
}

/// Record types a decoder may construct.
struct Types<'r> {
    registry: &'r Registry,
    shape: HashMap<String, Arc<RecordType>>,
}

impl<'r> Types<'r> {
    fn new(registry: &'r Registry, shape: &Value) -> Self {
        let mut types = Types { registry, shape: HashMap::new() };
        types.collect(shape, &mut HashSet::new());
        types
    }

    fn collect(&mut self, value: &Value, seen: &mut HashSet<CellId>) {
        match value {
            Value::Record(rec) => {
                self.shape.entry(rec.type_name().to_string()).or_insert_with(|| Arc::clone(rec.ty()));
                for (_, v) in rec.fields() {
                    self.collect(v, seen);
                }
            }
            Value::List(items) | Value::Array(items) => items.iter().for_each(|v| self.collect(v, seen)),
            Value::Map(map) => map.iter().for_each(|(_, v)| self.collect(v, seen)),
            Value::Ref(r) => {
                if let Some(shape) = r.shape() {
                    self.collect(shape, seen);
                }
                if r.id().is_some_and(|id| seen.insert(id)) {
                    if let Some(inner) = r.read() {
                        self.collect(&inner, seen);
                    }
                }
            }
            Value::Poly(p) => {
                if let Some(inner) = p.value() {
                    self.collect(inner, seen);
                }
            }
            _ => {}
        }
    }

    fn record(&self, name: &str) -> Result<Arc<RecordType>, CodecError> {
        self.registry
            .record_type(name)
            .or_else(|| self.shape.get(name))
            .cloned()
            .ok_or_else(|| CodecError::UnknownRecordType(name.to_string()))
    }
}

fn tag<'j>(obj: &'j Map<String, Json>, tag: &str) -> Result<Option<&'j str>, CodecError> {
    match obj.get(tag) {
        None => Ok(None),
        Some(Json::String(s)) => Ok(Some(s)),
        Some(other) => Err(invalid(format!("{tag} must be a string, found {other}"))),
    }
}

fn decode_value(json: &Json, types: &Types<'_>) -> Result<Value, CodecError> {
    let obj = match json {
        Json::Array(items) => {
            return Ok(Value::List(items.iter().map(|v| decode_value(v, types)).collect::<Result<_, _>>()?));
        }
        Json::Object(obj) => obj,
        scalar => return Ok(from_json(scalar)),
    };
    if let Some(name) = tag(obj, RECORD_TAG)? {
        let mut rec = Record::new(&types.record(name)?);
        for (field, v) in obj.iter().filter(|(k, _)| k.as_str() != RECORD_TAG) {
            rec.set(field, decode_value(v, types)?)?;
        }
        return Ok(Value::Record(rec));
    }
    if let Some(name) = tag(obj, POLY_TAG)? {
        let inner = obj.get(POLY_VALUE).map(|v| decode_value(v, types)).transpose()?;
        return Ok(Value::Poly(Poly::new(name, inner.unwrap_or_default())));
    }
    if let Some(encoded) = tag(obj, BYTES_TAG)? {
        return Ok(conform(Value::from(encoded), &Value::Bytes(Vec::new()))?);
    }
    if let Some(items) = obj.get(ARRAY_TAG) {
        let items = items.as_array().ok_or_else(|| invalid(format!("{ARRAY_TAG} must be an array")))?;
        return Ok(Value::Array(items.iter().map(|v| decode_value(v, types)).collect::<Result<_, _>>()?));
    }
    let (kind, entries) = match tag(obj, MAP_TAG)? {
        Some(kind) => {
            let entries = obj
                .get(MAP_ENTRIES)
                .and_then(Json::as_object)
                .ok_or_else(|| invalid(format!("{MAP_ENTRIES} must be an object")))?;
            (key_kind_from(kind)?, entries)
        }
        None => (KeyKind::Str, obj),
    };
    let mut map = ValueMap::new(kind);
    for (k, v) in entries {
        map.insert(Key::parse(k, kind)?, decode_value(v, types)?)?;
    }
    Ok(Value::Map(map))
}

/// An absent or `null` neighbour is the list head.
fn decode_prev(obj: &Map<String, Json>, field: &str) -> Result<Option<Key>, CodecError> {
    match obj.get(field) {
        None | Some(Json::Null) => Ok(None),
        Some(k) => decode_key(k).map(Some),
    }
}

/// Guards in effect for an operation: its own plus those of its ancestors.
#[derive(Debug, Clone, Default)]
struct Inherited {
    if_: Option<Condition>,
    unless: Option<Condition>,
    clock: Option<Clock>,
}

impl Inherited {
    fn under(&self, guards: &Guards) -> Inherited {
        let if_ = match (&self.if_, &guards.if_) {
            (Some(a), Some(b)) => Some(a.clone().and(b.clone())),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        let unless = match (&self.unless, &guards.unless) {
            (Some(a), Some(b)) => Some(a.clone().or(b.clone())),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        Inherited { if_, unless, clock: guards.clock.or(self.clock) }
    }

    fn write(&self, m: &mut Map<String, Json>) {
        if let Some(c) = &self.if_ {
            m.insert("if".into(), cond_codec::to_json(c));
        }
        if let Some(c) = &self.unless {
            m.insert("unless".into(), cond_codec::to_json(c));
        }
        if let Some(c) = &self.clock {
            m.insert("clock".into(), json!({"wall": c.wall, "counter": c.counter, "origin": c.origin}));
        }
    }
}

fn push(out: &mut Vec<Json>, guards: &Inherited, mut m: Map<String, Json>) {
    guards.write(&mut m);
    out.push(Json::Object(m));
}

fn op_object(name: &str, path: &Path) -> Map<String, Json> {
    let mut m = Map::new();
    m.insert("op".into(), json!(name));
    m.insert("path".into(), encode_path(path));
    m
}

// ── Serialization ─────────────────────────────────────────────────────────

/// Serializes a patch to a JSON-Patch array.
pub fn to_json_patch(patch: &Patch) -> Result<Json, CodecError> {
    let mut out = Vec::new();
    if let Some(cond) = &patch.condition {
        let mut m = op_object("test", &Path::root());
        m.insert("condition".into(), cond_codec::to_json(cond));
        out.push(Json::Object(m));
    }
    if let Some(root) = &patch.root {
        encode_op(root, &Path::root(), &Inherited::default(), &mut out)?;
    }
    Ok(Json::Array(out))
}

fn encode_op(op: &Operation, path: &Path, inherited: &Inherited, out: &mut Vec<Json>) -> Result<(), CodecError> {
    if let Some(cond) = &op.guards.condition {
        let mut m = op_object("test", path);
        m.insert("condition".into(), cond_codec::to_json(&cond.with_absolute_prefix(path)));
        out.push(Json::Object(m));
    }
    let guards = inherited.under(&op.guards);
    match &op.kind {
        OpKind::Value { old, new } => {
            let mut m = match (old, new) {
                (None, Some(_)) => op_object("add", path),
                (Some(_), Some(_)) => op_object("replace", path),
                (_, None) => op_object("remove", path),
            };
            if let Some(v) = new {
                m.insert("value".into(), encode_value(v)?);
            }
            if let Some(v) = old {
                m.insert("oldValue".into(), encode_value(v)?);
            }
            push(out, &guards, m);
        }
        OpKind::Test { expected } => {
            let mut m = op_object("test", path);
            m.insert("value".into(), encode_value(expected)?);
            push(out, &guards, m);
        }
        OpKind::Log { message } => {
            let mut m = op_object("log", path);
            m.insert("message".into(), json!(message));
            push(out, &guards, m);
        }
        OpKind::Copy { from } | OpKind::Move { from } => {
            let mut m = op_object(if matches!(op.kind, OpKind::Copy { .. }) { "copy" } else { "move" }, path);
            m.insert("from".into(), encode_path(from));
            push(out, &guards, m);
        }
        OpKind::Custom(custom) => {
            return Err(CodecError::Unsupported(format!("custom operation {} at {path}", custom.kind())));
        }
        OpKind::Record(fields) => {
            for (name, child) in fields {
                encode_op(child, &path.child(name.as_str()), &guards, out)?;
            }
        }
        OpKind::FixedArray(items) => {
            for (i, child) in items {
                encode_op(child, &path.child(*i), &guards, out)?;
            }
        }
        OpKind::Map { added, removed, modified } => {
            for (key, old) in removed {
                let mut m = op_object("remove", &path.child(key));
                if let Some(v) = old {
                    m.insert("oldValue".into(), encode_value(v)?);
                }
                push(out, &guards, m);
            }
            for (key, value) in added {
                let mut m = op_object("add", &path.child(key));
                m.insert("value".into(), encode_value(value)?);
                push(out, &guards, m);
            }
            for (key, child) in modified {
                encode_op(child, &path.child(key), &guards, out)?;
            }
        }
        OpKind::List(edits) => {
            for edit in edits {
                encode_edit(edit, path, &guards, out)?;
            }
        }
        // A leaf change of a payload travels as whole tagged values, so the
        // decoder sees the polymorphic wrapper it type-checks against.
        OpKind::Poly { type_name, inner, .. } => match &inner.kind {
            OpKind::Value { old, new } => {
                let wrap = |v: &Option<Value>| v.clone().map(|v| Value::Poly(Poly::new(type_name.as_str(), v)));
                let kind = OpKind::Value { old: wrap(old), new: wrap(new) };
                encode_op(&Operation { kind, guards: inner.guards.clone() }, path, &guards, out)?
            }
            _ => encode_op(inner, path, &guards, out)?,
        },
        OpKind::Ref { inner, .. } => encode_op(inner, path, &guards, out)?,
    }
    Ok(())
}

fn encode_edit(edit: &ListEdit, list: &Path, inherited: &Inherited, out: &mut Vec<Json>) -> Result<(), CodecError> {
    let path = list.child(edit.index);
    let guards = inherited.under(&edit.guards);

    // Positional sub-patches flatten into plain operations below the element.
    if let (EditKind::Replace, Some(sub), None) = (edit.kind, &edit.patch, &edit.key) {
        return encode_op(sub, &path, &guards, out);
    }

    let mut m = op_object(edit.kind.as_str(), &path);
    if let Some(from) = edit.from {
        m.insert("from".into(), encode_path(&list.child(from)));
    }
    if let Some(v) = &edit.value {
        m.insert("value".into(), encode_value(v)?);
    }
    if let Some(v) = &edit.old {
        m.insert("oldValue".into(), encode_value(v)?);
    }
    if let Some(sub) = &edit.patch {
        let nested = Patch::new(Some(sub.as_ref().clone()));
        m.insert("patch".into(), to_json_patch(&nested)?);
    }
    if let Some(key) = &edit.key {
        m.insert("key".into(), encode_key(key));
        if matches!(edit.kind, EditKind::Add | EditKind::Move | EditKind::Copy) {
            m.insert("prev".into(), edit.prev.as_ref().map_or(Json::Null, encode_key));
        }
        if matches!(edit.kind, EditKind::Remove | EditKind::Move) {
            m.insert("fromPrev".into(), edit.from_prev.as_ref().map_or(Json::Null, encode_key));
        }
    }
    push(out, &guards, m);
    Ok(())
}

// ── Deserialization ───────────────────────────────────────────────────────

/// Parses a JSON-Patch array, type-checking every operation against `shape`.
/// Tagged records resolve through `registry`, then through `shape`.
pub fn from_json_patch(json: &Json, shape: &Value, registry: &Registry) -> Result<Patch, CodecError> {
    decode_patch(json, shape, &Types::new(registry, shape))
}

fn decode_patch(json: &Json, shape: &Value, types: &Types<'_>) -> Result<Patch, CodecError> {
    let ops = json.as_array().ok_or_else(|| invalid("patch must be an array"))?;
    let mut b = PatchBuilder::new(shape.clone());
    for op in ops {
        decode_op(&mut b, op, types)?;
    }
    Ok(b.build()?)
}

fn decode_op(b: &mut PatchBuilder, json: &Json, types: &Types<'_>) -> Result<(), CodecError> {
    let obj = json.as_object().ok_or_else(|| invalid("operation must be an object"))?;
    let name = obj.get("op").and_then(Json::as_str).ok_or_else(|| invalid("op must be a string"))?;
    let path = decode_path(obj, "path")?;
    let value = |field: &str| obj.get(field).map(|v| decode_value(v, types)).transpose();

    if obj.contains_key("key") {
        decode_keyed(b, obj, name, path, types)?;
    } else {
        match name {
            "add" => {
                b.add(path, value("value")?.ok_or_else(|| invalid("add needs a value"))?)?;
            }
            "replace" => {
                let new = value("value")?.ok_or_else(|| invalid("replace needs a value"))?;
                match value("oldValue")? {
                    Some(old) => b.replace(path, old, new)?,
                    None => b.set(path, new)?,
                };
            }
            "remove" => {
                b.remove(path, value("oldValue")?)?;
            }
            "test" => match (obj.get("condition"), value("value")?) {
                (Some(cond), None) => {
                    b.condition_at(path, cond_codec::from_json(cond)?)?;
                    return Ok(());
                }
                (None, Some(expected)) => {
                    b.test(path, expected)?;
                }
                _ => return Err(invalid("test needs exactly one of value or condition")),
            },
            "log" => {
                let message = obj.get("message").and_then(Json::as_str).unwrap_or_default();
                b.log(path, message)?;
            }
            "copy" | "move" => {
                let from = decode_path(obj, "from")?;
                match (value("oldValue")?, sibling_indices(&from, &path)) {
                    // A positional list move or copy that records the value it expects at `from`.
                    (Some(old), Some((list, from, index))) => {
                        let edit = match name {
                            "move" => ListEdit::move_to(from, index),
                            _ => ListEdit::copy_to(from, index),
                        };
                        b.list_edit(list, edit.expecting(old))?;
                    }
                    _ if name == "move" => {
                        b.move_from(from, path)?;
                    }
                    _ => {
                        b.copy_from(from, path)?;
                    }
                }
            }
            other => return Err(CodecError::UnknownKind(other.to_string())),
        }
    }

    if let Some(c) = obj.get("if") {
        b.if_(cond_codec::from_json(c)?)?;
    }
    if let Some(c) = obj.get("unless") {
        b.unless(cond_codec::from_json(c)?)?;
    }
    if let Some(c) = obj.get("clock") {
        let clock: Clock = serde_json::from_value(c.clone()).map_err(|e| invalid(format!("clock: {e}")))?;
        b.clock(clock)?;
    }
    Ok(())
}

/// A keyed list edit: the path names the element, its parent the list.
fn decode_keyed(
    b: &mut PatchBuilder,
    obj: &Map<String, Json>,
    name: &str,
    path: Path,
    types: &Types<'_>,
) -> Result<(), CodecError> {
    let mut parts = path.into_parts();
    let index = match parts.pop() {
        Some(PathPart::Index(i)) => i,
        _ => return Err(invalid("keyed edit path must end in an index")),
    };
    let list = Path::from_parts(parts);
    let key = decode_key(obj.get("key").unwrap_or(&Json::Null))?;
    let value = |field: &str| obj.get(field).map(|v| decode_value(v, types)).transpose();
    let from_index = || -> Result<usize, CodecError> {
        match decode_path(obj, "from")?.last() {
            Some(PathPart::Index(i)) => Ok(*i),
            _ => Err(invalid("from must end in an index")),
        }
    };

    let edit = match EditKind::from_str(name).ok_or_else(|| CodecError::UnknownKind(name.to_string()))? {
        EditKind::Add => ListEdit::add(index, value("value")?.ok_or_else(|| invalid("add needs a value"))?)
            .after(decode_prev(obj, "prev")?),
        EditKind::Remove => ListEdit::remove(index, value("oldValue")?).was_after(decode_prev(obj, "fromPrev")?),
        EditKind::Move => ListEdit::move_to(from_index()?, index)
            .after(decode_prev(obj, "prev")?)
            .was_after(decode_prev(obj, "fromPrev")?),
        EditKind::Copy => ListEdit::copy_to(from_index()?, index).after(decode_prev(obj, "prev")?),
        EditKind::Replace => match (obj.get("patch"), value("value")?) {
            (Some(nested), _) => {
                let elem = element_shape(&b.shape_at(&list)?);
                let sub = decode_patch(nested, &elem, types)?;
                let Some(mut op) = sub.root else { return Ok(()) };
                if let Some(cond) = sub.condition {
                    op.guards.condition = Some(match op.guards.condition.take() {
                        Some(existing) => cond.and(existing),
                        None => cond,
                    });
                }
                ListEdit::patch(index, op)
            }
            (None, Some(new)) => ListEdit::set(index, new, value("oldValue")?),
            (None, None) => return Err(invalid("replace needs a value or a patch")),
        },
    };
    b.list_edit(list, edit.keyed(key))?;
    Ok(())
}

/// `(list, from, index)` when both paths name elements of the same list.
fn sibling_indices(from: &Path, path: &Path) -> Option<(Path, usize, usize)> {
    let (Some(PathPart::Index(from_index)), Some(PathPart::Index(index))) = (from.last(), path.last()) else {
        return None;
    };
    let (list, from_list) = (path.parent()?, from.parent()?);
    (list == from_list).then_some((list, *from_index, *index))
}

fn element_shape(list: &Value) -> Value {
    match list {
        Value::List(items) => items.first().cloned().unwrap_or_default(),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use structpatch_condition::field;
    use structpatch_value::{deep_copy, FieldPolicy, Ref};

    fn entity(id: i64, name: &str) -> Value {
        let ty = RecordType::new("Entity").field_with("id", FieldPolicy::key()).field("name").shared();
        Value::Record(Record::new(&ty).with("id", id).with("name", name))
    }

    fn round_trip(a: &Value, b: &Value, shape: &Value) -> Json {
        let patch = Patch::diff(a, b).unwrap();
        let wire = to_json_patch(&patch).unwrap();
        let decoded = from_json_patch(&wire, shape, &Registry::new()).unwrap();
        let mut target = deep_copy(a);
        decoded.apply_checked(&mut target).unwrap();
        assert_eq!(&target, b);
        wire
    }

    #[test]
    fn value_ops_use_rfc6902_names() {
        let ty = RecordType::new("Doc").field("name").field("note").shared();
        let a = Value::Record(Record::new(&ty).with("name", "v1").with("note", "x"));
        let b = Value::Record(Record::new(&ty).with("name", "v2").with("note", "x"));
        let wire = round_trip(&a, &b, &a.zeroed());
        assert_eq!(wire, json!([{"op": "replace", "path": "/name", "value": "v2", "oldValue": "v1"}]));
    }

    #[test]
    fn map_entries_become_add_and_remove() {
        let a = Value::Map(ValueMap::new(KeyKind::Str).with("a", 1i64).with("b", 2i64));
        let b = Value::Map(ValueMap::new(KeyKind::Str).with("b", 3i64).with("c", 4i64));
        let wire = round_trip(&a, &b, &a.zeroed());
        let ops: Vec<_> = wire.as_array().unwrap().iter().map(|o| o["op"].as_str().unwrap()).collect();
        assert_eq!(ops, vec!["remove", "add", "replace"]);
    }

    #[test]
    fn keyed_edits_carry_keys_and_neighbours() {
        let a = Value::list([entity(1, "a"), entity(2, "b"), entity(3, "c")]);
        let b = Value::list([entity(3, "c"), entity(1, "a"), entity(4, "d")]);
        let wire = round_trip(&a, &b, &Value::list([entity(0, "")]));
        for op in wire.as_array().unwrap() {
            assert!(op.get("key").is_some(), "{op}");
        }
        let moved = wire.as_array().unwrap().iter().find(|o| o["op"] == "move").unwrap();
        assert_eq!(moved["prev"], json!(3));
        assert_eq!(moved["fromPrev"], Json::Null);
    }

    #[test]
    fn keyed_sub_patches_nest() {
        let a = Value::list([entity(1, "a"), entity(2, "b")]);
        let b = Value::list([entity(1, "a"), entity(2, "B")]);
        let wire = round_trip(&a, &b, &Value::list([entity(0, "")]));
        assert_eq!(
            wire,
            json!([{"op": "replace", "path": "/1", "key": 2, "patch": [
                {"op": "replace", "path": "/name", "value": "B", "oldValue": "b"}
            ]}])
        );
    }

    #[test]
    fn guards_and_conditions_survive() {
        let mut b = PatchBuilder::dynamic();
        b.set("/a", 1i64).unwrap().if_(field("b").eq(2i64)).unwrap().clock(Clock::new(5, 0, 1)).unwrap();
        b.condition_at("", field("c").defined()).unwrap();
        let patch = b.build().unwrap();
        let wire = to_json_patch(&patch).unwrap();
        assert_eq!(wire[0]["op"], "test");
        assert_eq!(wire[1]["clock"], json!({"wall": 5, "counter": 0, "origin": 1}));
        let back = from_json_patch(&wire, &Value::Null, &Registry::new()).unwrap();
        assert_eq!(back.condition, patch.condition);
        assert_eq!(back.root, patch.root);
    }

    #[test]
    fn rejects_malformed_operations() {
        let decode = |wire: Json| from_json_patch(&wire, &Value::Null, &Registry::new());
        assert!(decode(json!({})).is_err());
        assert!(matches!(decode(json!([{"op": "frobnicate", "path": "/a"}])), Err(CodecError::UnknownKind(_))));
        assert!(decode(json!([{"op": "add", "path": "a", "value": 1}])).is_err());
        assert!(decode(json!([{"op": "test", "path": "/a"}])).is_err());
        assert!(matches!(
            decode(json!([{"op": "add", "path": "/a", "value": {"@record": "Nope"}}])),
            Err(CodecError::UnknownRecordType(_))
        ));
    }

    fn holder(items: Vec<Value>, by_name: ValueMap, current: Ref) -> Value {
        let ty = RecordType::new("Holder").field("items").field("byName").field("current").shared();
        Value::Record(
            Record::new(&ty)
                .with("items", Value::list(items))
                .with("byName", by_name)
                .with("current", Value::Ref(current)),
        )
    }

    #[test]
    fn records_below_empty_containers_keep_their_type() {
        let item_type = RecordType::new("Item").field("name").shared();
        let item = Value::Record(Record::new(&item_type).with("name", "x"));
        let mut by_name = ValueMap::new(KeyKind::Str);
        by_name.insert(Key::from("x"), item.clone()).unwrap();
        let a = holder(Vec::new(), ValueMap::new(KeyKind::Str), Ref::empty());
        let b = holder(vec![item.clone()], by_name, Ref::new(item));

        let patch = Patch::diff(&a, &b).unwrap();
        let wire = to_json_patch(&patch).unwrap();
        assert_eq!(wire[0]["value"]["@record"], "Item", "{wire}");

        // `a` shows no Item anywhere, so the type has to come from the registry.
        assert!(matches!(from_json_patch(&wire, &a, &Registry::new()), Err(CodecError::UnknownRecordType(_))));
        let mut registry = Registry::new();
        registry.register_record(item_type);
        let decoded = from_json_patch(&wire, &a, &registry).unwrap();
        let mut target = deep_copy(&a);
        decoded.apply_checked(&mut target).unwrap();
        assert_eq!(target, b);
        assert!(target.as_record().unwrap().get("items").unwrap().as_slice().unwrap()[0].as_record().is_some());

        // The reverse decodes against `b`, whose shape carries the type.
        let back = to_json_patch(&patch.reverse().unwrap()).unwrap();
        let reversed = from_json_patch(&back, &b, &Registry::new()).unwrap();
        reversed.apply_checked(&mut target).unwrap();
        assert_eq!(target, a);
    }

    #[test]
    fn tagged_values_keep_their_kind() {
        let mut by_id = ValueMap::new(KeyKind::Int);
        by_id.insert(Key::Int(1), Value::from("a")).unwrap();
        let value = Value::Array(vec![
            Value::Bytes(vec![0, 1, 2]),
            Value::Poly(Poly::new("Circle", 2i64)),
            Value::Map(by_id),
        ]);
        let wire = encode_value(&value).unwrap();
        assert_eq!(wire["@array"][0], json!({"@bytes": "AAEC"}));
        assert_eq!(wire["@array"][2], json!({"@map": "int", "@entries": {"1": "a"}}));

        let registry = Registry::new();
        assert_eq!(decode_value(&wire, &Types::new(&registry, &Value::Null)).unwrap(), value);
    }

    #[test]
    fn poly_payload_changes_travel_as_tagged_values() {
        let ty = RecordType::new("Drawing").field("shape").shared();
        let drawing = |size: i64| Value::Record(Record::new(&ty).with("shape", Value::Poly(Poly::new("Circle", size))));
        let wire = round_trip(&drawing(1), &drawing(2), &drawing(0));
        assert_eq!(wire[0]["value"], json!({"@poly": "Circle", "@value": 2}));
        assert_eq!(wire[0]["oldValue"], json!({"@poly": "Circle", "@value": 1}));
    }

    #[test]
    fn positional_move_keeps_its_expected_value() {
        let edit = ListEdit::move_to(0, 1).expecting("a".into());
        let patch = Patch::new(Some(Operation::new(OpKind::List(vec![edit]))));
        let wire = to_json_patch(&patch).unwrap();
        assert_eq!(wire, json!([{"op": "move", "from": "/0", "path": "/1", "oldValue": "a"}]));

        let decoded = from_json_patch(&wire, &Value::list(["a", "b"]), &Registry::new()).unwrap();
        assert_eq!(decoded.root, patch.root);
        let mut value = Value::list(["a", "b"]);
        decoded.apply_checked(&mut value).unwrap();
        assert!(decoded.apply_checked(&mut value).is_err());
    }
}
