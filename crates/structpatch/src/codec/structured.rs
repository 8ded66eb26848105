//! Structured binary format (CBOR).
//!
//! Every operation node, condition and value is written as a two-entry map
//! `{"kind": <name>, "data": <payload>}`. Decoding is closed-world: the
//! [`Registry`] passed to [`decode`] must know every operation kind,
//! condition kind, record type and custom operation kind that occurs.
//!
//! Owned references carry an `id`. The first occurrence of a cell carries
//! its referent; later occurrences carry only the id, so shared and cyclic
//! graphs decode back into shared cells.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use ciborium::value::{Integer, Value as Cbor};
use indexmap::IndexMap;
use structpatch_condition::{CmpOp, Condition, StringOp, TypeKind};
use structpatch_pointer::{format, parse, Path};
use structpatch_value::{CellId, Key, KeyKind, Map, Poly, Record, RecordType, Ref, Value};

use crate::clock::Clock;
use crate::error::CodecError;
use crate::patch::{CustomOp, EditKind, Guards, ListEdit, OpKind, Operation, Patch};

/// Rebuilds a custom operation from its encoded payload.
pub type CustomDecoder = Arc<dyn Fn(&Value) -> Result<Arc<dyn CustomOp>, String> + Send + Sync>;

const OP_KINDS: &[&str] = &[
    "value", "record", "fixed_array", "map", "list", "ref", "poly", "test", "copy", "move", "log",
];

const CONDITION_KINDS: &[&str] = &[
    "compare", "compare_fields", "defined", "undefined", "type", "contains", "starts", "ends", "matches", "in",
    "log", "and", "or", "not",
];

// ── Registry ──────────────────────────────────────────────────────────────

/// Everything the decoder is allowed to construct.
#[derive(Clone, Default)]
pub struct Registry {
    ops: BTreeSet<String>,
    conditions: BTreeSet<String>,
    records: HashMap<String, Arc<RecordType>>,
    custom: HashMap<String, CustomDecoder>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("ops", &self.ops)
            .field("conditions", &self.conditions)
            .field("records", &self.records.keys().collect::<Vec<_>>())
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// A registry that knows nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Knows every built-in operation and condition kind; record types and
    /// custom operations still have to be registered.
    pub fn with_defaults() -> Self {
        Self {
            ops: OP_KINDS.iter().map(|s| s.to_string()).collect(),
            conditions: CONDITION_KINDS.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn register_op_kind(&mut self, kind: &str) -> &mut Self {
        self.ops.insert(kind.to_string());
        self
    }

    pub fn register_condition_kind(&mut self, kind: &str) -> &mut Self {
        self.conditions.insert(kind.to_string());
        self
    }

    pub fn register_record(&mut self, ty: Arc<RecordType>) -> &mut Self {
        self.records.insert(ty.name.clone(), ty);
        self
    }

    pub(crate) fn record_type(&self, name: &str) -> Option<&Arc<RecordType>> {
        self.records.get(name)
    }

    pub fn register_custom(
        &mut self,
        kind: impl Into<String>,
        decoder: impl Fn(&Value) -> Result<Arc<dyn CustomOp>, String> + Send + Sync + 'static,
    ) -> &mut Self {
        self.custom.insert(kind.into(), Arc::new(decoder));
        self
    }
}

// ── CBOR helpers ──────────────────────────────────────────────────────────

fn text(s: &str) -> Cbor {
    Cbor::Text(s.to_string())
}

fn int(n: impl Into<Integer>) -> Cbor {
    Cbor::Integer(n.into())
}

fn surrogate(kind: &str, data: Cbor) -> Cbor {
    Cbor::Map(vec![(text("kind"), text(kind)), (text("data"), data)])
}

fn object(entries: Vec<(&str, Cbor)>) -> Cbor {
    Cbor::Map(entries.into_iter().map(|(k, v)| (text(k), v)).collect())
}

fn invalid(msg: impl Into<String>) -> CodecError {
    CodecError::InvalidOp(msg.into())
}

/// Read access to a CBOR map with text keys.
struct Fields<'a>(&'a [(Cbor, Cbor)]);

impl<'a> Fields<'a> {
    fn of(value: &'a Cbor) -> Result<Self, CodecError> {
        match value {
            Cbor::Map(entries) => Ok(Fields(entries)),
            other => Err(invalid(format!("expected a map, found {other:?}"))),
        }
    }

    fn get(&self, name: &str) -> Option<&'a Cbor> {
        self.0
            .iter()
            .find(|(k, _)| matches!(k, Cbor::Text(t) if t == name))
            .map(|(_, v)| v)
            .filter(|v| !v.is_null())
    }

    fn req(&self, name: &str) -> Result<&'a Cbor, CodecError> {
        self.get(name).ok_or_else(|| invalid(format!("missing {name}")))
    }

    fn text(&self, name: &str) -> Result<&'a str, CodecError> {
        self.req(name)?.as_text().ok_or_else(|| invalid(format!("{name} must be text")))
    }

    fn bool(&self, name: &str) -> bool {
        self.get(name).and_then(Cbor::as_bool).unwrap_or(false)
    }

    fn u64(&self, name: &str) -> Result<u64, CodecError> {
        as_u64(self.req(name)?)
    }

    fn array(&self, name: &str) -> Result<&'a [Cbor], CodecError> {
        match self.get(name) {
            Some(Cbor::Array(items)) => Ok(items),
            None => Ok(&[]),
            Some(_) => Err(invalid(format!("{name} must be an array"))),
        }
    }
}

fn as_u64(v: &Cbor) -> Result<u64, CodecError> {
    v.as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| invalid("expected an unsigned integer"))
}

fn as_i64(v: &Cbor) -> Result<i64, CodecError> {
    v.as_integer()
        .and_then(|i| i64::try_from(i).ok())
        .ok_or_else(|| invalid("expected an integer"))
}

/// Splits a surrogate into its kind and payload.
fn unwrap_surrogate(v: &Cbor) -> Result<(&str, &Cbor), CodecError> {
    let f = Fields::of(v)?;
    let kind = f.text("kind")?;
    let data = f.0.iter().find(|(k, _)| matches!(k, Cbor::Text(t) if t == "data")).map(|(_, v)| v);
    Ok((kind, data.unwrap_or(&Cbor::Null)))
}

/// Inverse of `KeyKind`'s display form.
pub(super) fn key_kind_from(name: &str) -> Result<KeyKind, CodecError> {
    match name {
        "string" => Ok(KeyKind::Str),
        "int" => Ok(KeyKind::Int),
        "uint" => Ok(KeyKind::Uint),
        "bool" => Ok(KeyKind::Bool),
        other => Err(invalid(format!("unknown key kind {other}"))),
    }
}

fn encode_key(key: &Key) -> Cbor {
    let raw = match key {
        Key::Bool(b) => Cbor::Bool(*b),
        Key::Int(i) => int(*i),
        Key::Uint(u) => int(*u),
        Key::Str(s) => text(s),
    };
    Cbor::Array(vec![text(&key.kind().to_string()), raw])
}

fn decode_key(v: &Cbor) -> Result<Key, CodecError> {
    let Cbor::Array(pair) = v else { return Err(invalid("key must be a [kind, key] pair")) };
    let [kind, raw] = pair.as_slice() else { return Err(invalid("key must be a [kind, key] pair")) };
    let kind = key_kind_from(kind.as_text().ok_or_else(|| invalid("key kind must be text"))?)?;
    Ok(match kind {
        KeyKind::Bool => Key::Bool(raw.as_bool().ok_or_else(|| invalid("expected a bool key"))?),
        KeyKind::Int => Key::Int(as_i64(raw)?),
        KeyKind::Uint => Key::Uint(as_u64(raw)?),
        KeyKind::Str => Key::Str(raw.as_text().ok_or_else(|| invalid("expected a text key"))?.to_string()),
    })
}

fn pairs<'a>(items: &'a [Cbor], what: &str) -> Result<Vec<(&'a Cbor, &'a Cbor)>, CodecError> {
    items
        .iter()
        .map(|item| match item {
            Cbor::Array(pair) if pair.len() == 2 => Ok((&pair[0], &pair[1])),
            _ => Err(invalid(format!("{what} entries must be pairs"))),
        })
        .collect()
}

// ── Encoding ──────────────────────────────────────────────────────────────

/// Encodes a patch to CBOR bytes.
pub fn encode(patch: &Patch) -> Result<Vec<u8>, CodecError> {
    let surrogate = Encoder::default().patch(patch)?;
    let mut out = Vec::new();
    ciborium::ser::into_writer(&surrogate, &mut out).map_err(|e| CodecError::Cbor(e.to_string()))?;
    Ok(out)
}

#[derive(Default)]
struct Encoder {
    cells: HashMap<CellId, u64>,
}

impl Encoder {
    fn patch(&mut self, patch: &Patch) -> Result<Cbor, CodecError> {
        let root = match &patch.root {
            Some(op) => self.op(op)?,
            None => Cbor::Null,
        };
        let condition = match &patch.condition {
            Some(c) => self.condition(c)?,
            None => Cbor::Null,
        };
        Ok(surrogate(
            "patch",
            object(vec![("root", root), ("condition", condition), ("strict", Cbor::Bool(patch.strict))]),
        ))
    }

    fn value(&mut self, value: &Value) -> Result<Cbor, CodecError> {
        Ok(match value {
            Value::Null => surrogate("null", Cbor::Null),
            Value::Bool(b) => surrogate("bool", Cbor::Bool(*b)),
            Value::Int(i) => surrogate("int", int(*i)),
            Value::Uint(u) => surrogate("uint", int(*u)),
            Value::Float(f) => surrogate("float", Cbor::Float(*f)),
            Value::String(s) => surrogate("string", text(s)),
            Value::Bytes(b) => surrogate("bytes", Cbor::Bytes(b.clone())),
            Value::Record(rec) => {
                let fields = rec
                    .fields()
                    .map(|(name, v)| Ok((text(name), self.value(v)?)))
                    .collect::<Result<Vec<_>, CodecError>>()?;
                surrogate("record", object(vec![("type", text(rec.type_name())), ("fields", Cbor::Map(fields))]))
            }
            Value::Array(items) => surrogate("array", self.values(items)?),
            Value::List(items) => surrogate("list", self.values(items)?),
            Value::Map(map) => {
                let entries = map
                    .iter()
                    .map(|(k, v)| Ok(Cbor::Array(vec![encode_key(k), self.value(v)?])))
                    .collect::<Result<Vec<_>, CodecError>>()?;
                surrogate(
                    "map",
                    object(vec![
                        ("key_kind", text(&map.key_kind().to_string())),
                        ("entries", Cbor::Array(entries)),
                    ]),
                )
            }
            Value::Ref(r) => surrogate("ref", self.reference(r)?),
            Value::Poly(p) => match (p.type_name(), p.value()) {
                (Some(name), Some(v)) => {
                    surrogate("poly", object(vec![("type", text(name)), ("value", self.value(v)?)]))
                }
                _ => surrogate("poly", Cbor::Null),
            },
            Value::Unsupported(kind) => return Err(CodecError::Unsupported(kind.clone())),
        })
    }

    fn values(&mut self, items: &[Value]) -> Result<Cbor, CodecError> {
        Ok(Cbor::Array(items.iter().map(|v| self.value(v)).collect::<Result<_, _>>()?))
    }

    fn reference(&mut self, r: &Ref) -> Result<Cbor, CodecError> {
        let Some(cell) = r.id() else {
            let shape = match r.shape() {
                Some(s) => self.value(s)?,
                None => Cbor::Null,
            };
            return Ok(object(vec![("id", Cbor::Null), ("shape", shape)]));
        };
        if let Some(id) = self.cells.get(&cell) {
            return Ok(object(vec![("id", int(*id))]));
        }
        let id = self.cells.len() as u64;
        self.cells.insert(cell, id);
        let referent = self.value(&r.load().unwrap_or_default())?;
        Ok(object(vec![("id", int(id)), ("value", referent)]))
    }

    fn guards(&mut self, guards: &Guards) -> Result<Cbor, CodecError> {
        let mut out = Vec::new();
        for (name, cond) in [("condition", &guards.condition), ("if", &guards.if_), ("unless", &guards.unless)] {
            if let Some(c) = cond {
                out.push((name, self.condition(c)?));
            }
        }
        if let Some(c) = guards.clock {
            out.push(("clock", Cbor::Array(vec![int(c.wall), int(c.counter), int(c.origin)])));
        }
        Ok(object(out))
    }

    fn op(&mut self, op: &Operation) -> Result<Cbor, CodecError> {
        let (kind, mut data): (&str, Vec<(&str, Cbor)>) = match &op.kind {
            OpKind::Value { old, new } => {
                let mut data = Vec::new();
                if let Some(v) = old {
                    data.push(("old", self.value(v)?));
                }
                if let Some(v) = new {
                    data.push(("new", self.value(v)?));
                }
                ("value", data)
            }
            OpKind::Record(fields) => {
                let fields = fields
                    .iter()
                    .map(|(name, child)| Ok((text(name), self.op(child)?)))
                    .collect::<Result<Vec<_>, CodecError>>()?;
                ("record", vec![("fields", Cbor::Map(fields))])
            }
            OpKind::FixedArray(items) => {
                let items = items
                    .iter()
                    .map(|(i, child)| Ok(Cbor::Array(vec![int(*i as u64), self.op(child)?])))
                    .collect::<Result<Vec<_>, CodecError>>()?;
                ("fixed_array", vec![("items", Cbor::Array(items))])
            }
            OpKind::Map { added, removed, modified } => {
                let added = added
                    .iter()
                    .map(|(k, v)| Ok(Cbor::Array(vec![encode_key(k), self.value(v)?])))
                    .collect::<Result<Vec<_>, CodecError>>()?;
                let removed = removed
                    .iter()
                    .map(|(k, v)| {
                        let old = match v {
                            Some(v) => self.value(v)?,
                            None => Cbor::Null,
                        };
                        Ok(Cbor::Array(vec![encode_key(k), old]))
                    })
                    .collect::<Result<Vec<_>, CodecError>>()?;
                let modified = modified
                    .iter()
                    .map(|(k, child)| Ok(Cbor::Array(vec![encode_key(k), self.op(child)?])))
                    .collect::<Result<Vec<_>, CodecError>>()?;
                (
                    "map",
                    vec![
                        ("added", Cbor::Array(added)),
                        ("removed", Cbor::Array(removed)),
                        ("modified", Cbor::Array(modified)),
                    ],
                )
            }
            OpKind::List(edits) => {
                let edits = edits.iter().map(|e| self.edit(e)).collect::<Result<Vec<_>, _>>()?;
                ("list", vec![("edits", Cbor::Array(edits))])
            }
            OpKind::Ref { inner, template } => {
                let mut data = vec![("inner", self.op(inner)?)];
                if let Some(t) = template {
                    data.push(("template", self.value(t)?));
                }
                ("ref", data)
            }
            OpKind::Poly { type_name, inner, template } => {
                let mut data = vec![("type", text(type_name)), ("inner", self.op(inner)?)];
                if let Some(t) = template {
                    data.push(("template", self.value(t)?));
                }
                ("poly", data)
            }
            OpKind::Test { expected } => ("test", vec![("expected", self.value(expected)?)]),
            OpKind::Copy { from } => ("copy", vec![("from", text(&format(from)))]),
            OpKind::Move { from } => ("move", vec![("from", text(&format(from)))]),
            OpKind::Log { message } => ("log", vec![("message", text(message))]),
            OpKind::Custom(custom) => {
                let payload = self.value(&custom.encode())?;
                return Ok(surrogate(
                    "custom",
                    object(vec![("kind", text(custom.kind())), ("payload", payload), ("guards", self.guards(&op.guards)?)]),
                ));
            }
        };
        if !op.guards.is_empty() {
            data.push(("guards", self.guards(&op.guards)?));
        }
        Ok(surrogate(kind, object(data)))
    }

    fn edit(&mut self, edit: &ListEdit) -> Result<Cbor, CodecError> {
        let mut data = vec![("kind", text(edit.kind.as_str())), ("index", int(edit.index as u64))];
        if let Some(from) = edit.from {
            data.push(("from", int(from as u64)));
        }
        for (name, key) in [("key", &edit.key), ("prev", &edit.prev), ("from_prev", &edit.from_prev)] {
            if let Some(k) = key {
                data.push((name, encode_key(k)));
            }
        }
        if let Some(v) = &edit.value {
            data.push(("value", self.value(v)?));
        }
        if let Some(v) = &edit.old {
            data.push(("old", self.value(v)?));
        }
        if let Some(sub) = &edit.patch {
            data.push(("patch", self.op(sub)?));
        }
        if !edit.guards.is_empty() {
            data.push(("guards", self.guards(&edit.guards)?));
        }
        Ok(object(data))
    }

    fn condition(&mut self, cond: &Condition) -> Result<Cbor, CodecError> {
        let path = |p: &Path| text(&format(p));
        let data = match cond {
            Condition::Compare { path: p, op, value, fold_case } => object(vec![
                ("path", path(p)),
                ("op", text(op.as_str())),
                ("value", self.value(value)?),
                ("fold_case", Cbor::Bool(*fold_case)),
            ]),
            Condition::CompareFields { left, op, right, fold_case } => object(vec![
                ("left", path(left)),
                ("op", text(op.as_str())),
                ("right", path(right)),
                ("fold_case", Cbor::Bool(*fold_case)),
            ]),
            Condition::Defined { path: p } | Condition::Undefined { path: p } => object(vec![("path", path(p))]),
            Condition::TypeOf { path: p, kind } => object(vec![("path", path(p)), ("type", text(kind.as_str()))]),
            Condition::StringPred { path: p, needle, fold_case, .. } => object(vec![
                ("path", path(p)),
                ("needle", text(needle)),
                ("fold_case", Cbor::Bool(*fold_case)),
            ]),
            Condition::In { path: p, values, fold_case } => object(vec![
                ("path", path(p)),
                ("values", self.values(values)?),
                ("fold_case", Cbor::Bool(*fold_case)),
            ]),
            Condition::Log { message } => object(vec![("message", text(message))]),
            Condition::And(items) | Condition::Or(items) => {
                Cbor::Array(items.iter().map(|c| self.condition(c)).collect::<Result<_, _>>()?)
            }
            Condition::Not(inner) => self.condition(inner)?,
        };
        Ok(surrogate(cond.op_name(), data))
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────

/// Decodes CBOR bytes produced by [`encode`].
pub fn decode(bytes: &[u8], registry: &Registry) -> Result<Patch, CodecError> {
    let surrogate: Cbor = ciborium::de::from_reader(bytes).map_err(|e| CodecError::Cbor(e.to_string()))?;
    Decoder { registry, cells: HashMap::new() }.patch(&surrogate)
}

struct Decoder<'r> {
    registry: &'r Registry,
    cells: HashMap<u64, Ref>,
}

impl Decoder<'_> {
    fn patch(&mut self, v: &Cbor) -> Result<Patch, CodecError> {
        let (kind, data) = unwrap_surrogate(v)?;
        if kind != "patch" {
            return Err(CodecError::UnknownKind(kind.to_string()));
        }
        let f = Fields::of(data)?;
        let root = f.get("root").map(|r| self.op(r)).transpose()?;
        let condition = f.get("condition").map(|c| self.condition(c)).transpose()?;
        Ok(Patch { root, condition, strict: f.bool("strict") })
    }

    fn value(&mut self, v: &Cbor) -> Result<Value, CodecError> {
        let (kind, data) = unwrap_surrogate(v)?;
        let mismatch = || invalid(format!("malformed {kind} value"));
        Ok(match kind {
            "null" => Value::Null,
            "bool" => Value::Bool(data.as_bool().ok_or_else(mismatch)?),
            "int" => Value::Int(as_i64(data)?),
            "uint" => Value::Uint(as_u64(data)?),
            "float" => Value::Float(data.as_float().ok_or_else(mismatch)?),
            "string" => Value::String(data.as_text().ok_or_else(mismatch)?.to_string()),
            "bytes" => Value::Bytes(data.as_bytes().ok_or_else(mismatch)?.clone()),
            "record" => {
                let f = Fields::of(data)?;
                let name = f.text("type")?;
                let ty = self
                    .registry
                    .records
                    .get(name)
                    .ok_or_else(|| CodecError::UnknownRecordType(name.to_string()))?;
                let mut rec = Record::new(ty);
                for (field, value) in Fields::of(f.req("fields")?)?.0 {
                    let field = field.as_text().ok_or_else(mismatch)?;
                    let value = self.value(value)?;
                    rec.set(field, value)?;
                }
                Value::Record(rec)
            }
            "array" => Value::Array(self.values(data)?),
            "list" => Value::List(self.values(data)?),
            "map" => {
                let f = Fields::of(data)?;
                let mut map = Map::new(key_kind_from(f.text("key_kind")?)?);
                for (k, v) in pairs(f.array("entries")?, "map")? {
                    let value = self.value(v)?;
                    map.insert(decode_key(k)?, value)?;
                }
                Value::Map(map)
            }
            "ref" => Value::Ref(self.reference(data)?),
            "poly" => match data {
                Cbor::Null => Value::Poly(Poly::empty()),
                _ => {
                    let f = Fields::of(data)?;
                    let name = f.text("type")?.to_string();
                    Value::Poly(Poly::new(name, self.value(f.req("value")?)?))
                }
            },
            other => return Err(CodecError::UnknownKind(other.to_string())),
        })
    }

    fn values(&mut self, v: &Cbor) -> Result<Vec<Value>, CodecError> {
        match v {
            Cbor::Array(items) => items.iter().map(|i| self.value(i)).collect(),
            _ => Err(invalid("expected an array of values")),
        }
    }

    fn reference(&mut self, data: &Cbor) -> Result<Ref, CodecError> {
        let f = Fields::of(data)?;
        let Some(id) = f.get("id") else {
            return Ok(match f.get("shape") {
                Some(shape) => Ref::empty_of(self.value(shape)?),
                None => Ref::empty(),
            });
        };
        let id = as_u64(id)?;
        let Some(referent) = f.get("value") else {
            return self.cells.get(&id).cloned().ok_or_else(|| invalid(format!("unknown reference id {id}")));
        };
        // Register the cell before decoding its referent so cycles resolve.
        let mut cell = Ref::new(Value::Null);
        self.cells.insert(id, cell.clone());
        let value = self.value(referent)?;
        cell.store(value);
        Ok(cell)
    }

    fn guards(&mut self, data: Option<&Cbor>) -> Result<Guards, CodecError> {
        let Some(data) = data else { return Ok(Guards::default()) };
        let f = Fields::of(data)?;
        let clock = match f.get("clock") {
            Some(Cbor::Array(parts)) if parts.len() == 3 => {
                Some(Clock::new(as_u64(&parts[0])?, as_u64(&parts[1])?, as_u64(&parts[2])?))
            }
            Some(_) => return Err(invalid("clock must be [wall, counter, origin]")),
            None => None,
        };
        Ok(Guards {
            condition: f.get("condition").map(|c| self.condition(c)).transpose()?,
            if_: f.get("if").map(|c| self.condition(c)).transpose()?,
            unless: f.get("unless").map(|c| self.condition(c)).transpose()?,
            clock,
        })
    }

    fn op(&mut self, v: &Cbor) -> Result<Operation, CodecError> {
        let (kind, data) = unwrap_surrogate(v)?;
        let f = Fields::of(data)?;
        let guards = self.guards(f.get("guards"))?;
        if kind == "custom" {
            let name = f.text("kind")?;
            let registry = self.registry;
            let decoder = registry.custom.get(name).ok_or_else(|| CodecError::UnknownKind(name.to_string()))?;
            let payload = self.value(f.req("payload")?)?;
            let custom = (decoder.as_ref())(&payload).map_err(|e| invalid(format!("custom {name}: {e}")))?;
            return Ok(Operation { kind: OpKind::Custom(custom), guards });
        }
        if !self.registry.ops.contains(kind) {
            return Err(CodecError::UnknownKind(kind.to_string()));
        }
        let kind = match kind {
            "value" => OpKind::Value {
                old: f.get("old").map(|v| self.value(v)).transpose()?,
                new: f.get("new").map(|v| self.value(v)).transpose()?,
            },
            "record" => {
                let mut fields = IndexMap::new();
                for (name, child) in Fields::of(f.req("fields")?)?.0 {
                    let name = name.as_text().ok_or_else(|| invalid("field names must be text"))?;
                    fields.insert(name.to_string(), self.op(child)?);
                }
                OpKind::Record(fields)
            }
            "fixed_array" => {
                let mut items = std::collections::BTreeMap::new();
                for (i, child) in pairs(f.array("items")?, "fixed_array")? {
                    items.insert(as_u64(i)? as usize, self.op(child)?);
                }
                OpKind::FixedArray(items)
            }
            "map" => {
                let mut added = std::collections::BTreeMap::new();
                let mut removed = std::collections::BTreeMap::new();
                let mut modified = std::collections::BTreeMap::new();
                for (k, v) in pairs(f.array("added")?, "added")? {
                    added.insert(decode_key(k)?, self.value(v)?);
                }
                for (k, v) in pairs(f.array("removed")?, "removed")? {
                    let old = if v.is_null() { None } else { Some(self.value(v)?) };
                    removed.insert(decode_key(k)?, old);
                }
                for (k, child) in pairs(f.array("modified")?, "modified")? {
                    modified.insert(decode_key(k)?, self.op(child)?);
                }
                OpKind::Map { added, removed, modified }
            }
            "list" => OpKind::List(f.array("edits")?.iter().map(|e| self.edit(e)).collect::<Result<_, _>>()?),
            "ref" => OpKind::Ref {
                inner: Box::new(self.op(f.req("inner")?)?),
                template: f.get("template").map(|t| self.value(t)).transpose()?,
            },
            "poly" => OpKind::Poly {
                type_name: f.text("type")?.to_string(),
                inner: Box::new(self.op(f.req("inner")?)?),
                template: f.get("template").map(|t| self.value(t)).transpose()?,
            },
            "test" => OpKind::Test { expected: self.value(f.req("expected")?)? },
            "copy" => OpKind::Copy { from: parse(f.text("from")?) },
            "move" => OpKind::Move { from: parse(f.text("from")?) },
            "log" => OpKind::Log { message: f.text("message")?.to_string() },
            other => return Err(CodecError::UnknownKind(other.to_string())),
        };
        Ok(Operation { kind, guards })
    }

    fn edit(&mut self, v: &Cbor) -> Result<ListEdit, CodecError> {
        let f = Fields::of(v)?;
        let name = f.text("kind")?;
        let kind = EditKind::from_str(name).ok_or_else(|| CodecError::UnknownKind(name.to_string()))?;
        let key = |field: &str| f.get(field).map(decode_key).transpose();
        Ok(ListEdit {
            kind,
            index: f.u64("index")? as usize,
            from: f.get("from").map(as_u64).transpose()?.map(|i| i as usize),
            key: key("key")?,
            prev: key("prev")?,
            from_prev: key("from_prev")?,
            value: f.get("value").map(|x| self.value(x)).transpose()?,
            old: f.get("old").map(|x| self.value(x)).transpose()?,
            patch: f.get("patch").map(|x| self.op(x).map(Box::new)).transpose()?,
            guards: self.guards(f.get("guards"))?,
        })
    }

    fn condition(&mut self, v: &Cbor) -> Result<Condition, CodecError> {
        let (kind, data) = unwrap_surrogate(v)?;
        if !self.registry.conditions.contains(kind) {
            return Err(CodecError::UnknownKind(kind.to_string()));
        }
        let list = |d: &Cbor| match d {
            Cbor::Array(items) => Ok(items.clone()),
            _ => Err(invalid(format!("{kind} needs an array of conditions"))),
        };
        let cond = match kind {
            "and" => Condition::And(list(data)?.iter().map(|c| self.condition(c)).collect::<Result<_, _>>()?),
            "or" => Condition::Or(list(data)?.iter().map(|c| self.condition(c)).collect::<Result<_, _>>()?),
            "not" => Condition::Not(Box::new(self.condition(data)?)),
            "log" => Condition::Log { message: Fields::of(data)?.text("message")?.to_string() },
            _ => {
                let f = Fields::of(data)?;
                let path = |name: &str| f.text(name).map(parse);
                match kind {
                    "compare" => Condition::Compare {
                        path: path("path")?,
                        op: CmpOp::from_str(f.text("op")?)?,
                        value: self.value(f.req("value")?)?,
                        fold_case: f.bool("fold_case"),
                    },
                    "compare_fields" => Condition::CompareFields {
                        left: path("left")?,
                        op: CmpOp::from_str(f.text("op")?)?,
                        right: path("right")?,
                        fold_case: f.bool("fold_case"),
                    },
                    "defined" => Condition::Defined { path: path("path")? },
                    "undefined" => Condition::Undefined { path: path("path")? },
                    "type" => Condition::TypeOf { path: path("path")?, kind: TypeKind::from_str(f.text("type")?)? },
                    "in" => Condition::In {
                        path: path("path")?,
                        values: self.values(f.req("values")?)?,
                        fold_case: f.bool("fold_case"),
                    },
                    other => match StringOp::from_name(other) {
                        Some(op) => Condition::StringPred {
                            path: path("path")?,
                            op,
                            needle: f.text("needle")?.to_string(),
                            fold_case: f.bool("fold_case"),
                        },
                        None => return Err(CodecError::UnknownKind(other.to_string())),
                    },
                }
            }
        };
        Ok(cond)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use structpatch_condition::field;
    use structpatch_value::FieldPolicy;

    fn node_type() -> Arc<RecordType> {
        RecordType::new("Node").field_with("id", FieldPolicy::key()).field("next").shared()
    }

    fn registry() -> Registry {
        let mut r = Registry::with_defaults();
        r.register_record(node_type());
        r
    }

    #[test]
    fn diffed_patch_round_trips() {
        let ty = node_type();
        let a = Value::list([Value::Record(Record::new(&ty).with("id", 1i64)), Value::Record(Record::new(&ty).with("id", 2i64))]);
        let b = Value::list([Value::Record(Record::new(&ty).with("id", 2i64).with("next", "x"))]);
        let mut patch = Patch::diff(&a, &b).unwrap().with_condition(field("0.id").one_of([1i64, 2]));
        patch.stamp(Clock::new(9, 1, 3));
        let back = decode(&encode(&patch).unwrap(), &registry()).unwrap();
        assert_eq!(back.root, patch.root);
        assert_eq!(back.condition, patch.condition);
    }

    #[test]
    fn shared_and_cyclic_refs_stay_shared() {
        let ty = node_type();
        let shared = Ref::new(Value::Record(Record::new(&ty).with("id", 7i64)));
        let mut cyclic = Ref::new(Value::Null);
        cyclic.store(Value::Record(Record::new(&ty).with("id", 8i64).with("next", cyclic.clone())));
        let new = Value::list([Value::Ref(shared.clone()), Value::Ref(shared), Value::Ref(cyclic)]);
        let patch = Patch::new(Some(OpKind::Value { old: None, new: Some(new) }.into()));

        let back = decode(&encode(&patch).unwrap(), &registry()).unwrap();
        let Some(OpKind::Value { new: Some(Value::List(items)), .. }) = back.root.map(|op| op.kind) else {
            panic!("value op")
        };
        let [Value::Ref(a), Value::Ref(b), Value::Ref(c)] = items.as_slice() else { panic!("three refs") };
        assert!(a.ptr_eq(b));
        let inner = c.load().unwrap();
        let Some(Value::Ref(next)) = inner.as_record().unwrap().get("next").cloned() else { panic!("next ref") };
        assert!(next.ptr_eq(c));
    }

    #[test]
    fn decoding_is_closed_world() {
        let ty = node_type();
        let patch = Patch::new(Some(
            OpKind::Value { old: None, new: Some(Value::Record(Record::new(&ty).with("id", 1i64))) }.into(),
        ));
        let bytes = encode(&patch).unwrap();
        assert!(matches!(decode(&bytes, &Registry::new()), Err(CodecError::UnknownKind(k)) if k == "value"));
        assert!(matches!(
            decode(&bytes, &Registry::with_defaults()),
            Err(CodecError::UnknownRecordType(t)) if t == "Node"
        ));
        assert!(matches!(decode(&[0xff, 0x00], &registry()), Err(CodecError::Cbor(_))));
    }

    #[derive(Debug)]
    struct Bump(i64);

    impl CustomOp for Bump {
        fn kind(&self) -> &str {
            "bump"
        }

        fn apply(&self, target: &mut Value) -> Result<(), String> {
            let n = target.as_i64().ok_or("not an int")?;
            *target = Value::Int(n + self.0);
            Ok(())
        }

        fn encode(&self) -> Value {
            Value::Int(self.0)
        }
    }

    #[test]
    fn custom_ops_need_a_decoder() {
        let patch = Patch::new(Some(OpKind::Custom(Arc::new(Bump(2))).into()));
        let bytes = encode(&patch).unwrap();
        assert!(matches!(decode(&bytes, &registry()), Err(CodecError::UnknownKind(k)) if k == "bump"));

        let mut reg = registry();
        reg.register_custom("bump", |payload: &Value| {
            let n = payload.as_i64().ok_or("bad payload")?;
            Ok(Arc::new(Bump(n)) as Arc<dyn CustomOp>)
        });
        let back = decode(&bytes, &reg).unwrap();
        let mut target = Value::Int(1);
        back.apply(&mut target).unwrap();
        assert_eq!(target, Value::Int(3));
    }

    #[test]
    fn unsupported_values_cannot_be_encoded() {
        let patch = Patch::new(Some(OpKind::Value { old: None, new: Some(Value::Unsupported("fn".into())) }.into()));
        assert!(matches!(encode(&patch), Err(CodecError::Unsupported(_))));
    }
}
