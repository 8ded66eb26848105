//! The dynamic value model.
//!
//! A [`Value`] is any in-memory composite the engine can diff and patch:
//! scalars, records of a declared [`RecordType`], fixed arrays, dynamic
//! lists, keyed maps, owned references and polymorphic containers.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;

use crate::error::ValueError;

// ── Keys ──────────────────────────────────────────────────────────────────

/// The declared key type of a [`Map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Str,
    Int,
    Uint,
    Bool,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyKind::Str => "string",
            KeyKind::Int => "int",
            KeyKind::Uint => "uint",
            KeyKind::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A map key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Str(String),
}

impl Key {
    pub fn kind(&self) -> KeyKind {
        match self {
            Key::Bool(_) => KeyKind::Bool,
            Key::Int(_) => KeyKind::Int,
            Key::Uint(_) => KeyKind::Uint,
            Key::Str(_) => KeyKind::Str,
        }
    }

    /// Parses the textual form of a key (as found in a location string or a
    /// JSON object) into a key of the given kind.
    pub fn parse(text: &str, kind: KeyKind) -> Result<Key, ValueError> {
        let invalid = || ValueError::InvalidKey(text.to_string(), kind);
        match kind {
            KeyKind::Str => Ok(Key::Str(text.to_string())),
            KeyKind::Int => text.parse().map(Key::Int).map_err(|_| invalid()),
            KeyKind::Uint => text.parse().map(Key::Uint).map_err(|_| invalid()),
            KeyKind::Bool => match text {
                "true" => Ok(Key::Bool(true)),
                "false" => Ok(Key::Bool(false)),
                _ => Err(invalid()),
            },
        }
    }

    /// Converts this key to another key kind, going through its text form.
    pub fn coerce(&self, kind: KeyKind) -> Result<Key, ValueError> {
        if self.kind() == kind {
            return Ok(self.clone());
        }
        Key::parse(&self.to_string(), kind)
    }

    /// Builds a key from a scalar value.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Bool(b) => Some(Key::Bool(*b)),
            Value::Int(i) => Some(Key::Int(*i)),
            Value::Uint(u) => Some(Key::Uint(*u)),
            Value::String(s) => Some(Key::Str(s.clone())),
            Value::Ref(r) => r.load().and_then(|v| Key::from_value(&v)),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Int(*i),
            Key::Uint(u) => Value::Uint(*u),
            Key::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Bool(b) => write!(f, "{b}"),
            Key::Int(i) => write!(f, "{i}"),
            Key::Uint(u) => write!(f, "{u}"),
            Key::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<u64> for Key {
    fn from(u: u64) -> Self {
        Key::Uint(u)
    }
}

// ── Declared type metadata ───────────────────────────────────────────────

/// Per-field annotations consumed by the differencer and the applier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldPolicy {
    /// The field identifies list elements across positions.
    pub key: bool,
    /// The field is neither compared, diffed nor patched.
    pub ignore: bool,
    /// The field may be diffed but never patched.
    pub read_only: bool,
    /// The field's subtree is diffed and applied as one opaque value.
    pub atomic: bool,
}

impl FieldPolicy {
    pub const fn key() -> Self {
        Self { key: true, ignore: false, read_only: false, atomic: false }
    }

    pub const fn ignore() -> Self {
        Self { key: false, ignore: true, read_only: false, atomic: false }
    }

    pub const fn read_only() -> Self {
        Self { key: false, ignore: false, read_only: true, atomic: false }
    }

    pub const fn atomic() -> Self {
        Self { key: false, ignore: false, read_only: false, atomic: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub policy: FieldPolicy,
}

/// A named record type: an ordered list of declared fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: Vec::new() }
    }

    pub fn field(self, name: impl Into<String>) -> Self {
        self.field_with(name, FieldPolicy::default())
    }

    pub fn field_with(mut self, name: impl Into<String>, policy: FieldPolicy) -> Self {
        self.fields.push(FieldDef { name: name.into(), policy });
        self
    }

    pub fn shared(self) -> Arc<RecordType> {
        Arc::new(self)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Policy of a field; undeclared fields get the default policy.
    pub fn policy(&self, name: &str) -> FieldPolicy {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.policy)
            .unwrap_or_default()
    }

    /// Name of the field declared as the entity key, if any.
    pub fn key_field(&self) -> Option<&str> {
        self.fields.iter().find(|f| f.policy.key).map(|f| f.name.as_str())
    }
}

// ── Record ────────────────────────────────────────────────────────────────

/// A value of a declared [`RecordType`].
#[derive(Debug, Clone)]
pub struct Record {
    ty: Arc<RecordType>,
    fields: IndexMap<String, Value>,
}

impl Record {
    /// Creates a record with every declared field set to `Null`.
    pub fn new(ty: &Arc<RecordType>) -> Self {
        let fields = ty.fields.iter().map(|f| (f.name.clone(), Value::Null)).collect();
        Self { ty: Arc::clone(ty), fields }
    }

    /// Builder-style field assignment. Undeclared names are ignored.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        if let Some(slot) = self.fields.get_mut(name) {
            *slot = value.into();
        }
        self
    }

    pub fn ty(&self) -> &Arc<RecordType> {
        &self.ty
    }

    pub fn type_name(&self) -> &str {
        &self.ty.name
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<Value, ValueError> {
        match self.fields.get_mut(name) {
            Some(slot) => Ok(std::mem::replace(slot, value)),
            None => Err(ValueError::UnknownField {
                record: self.ty.name.clone(),
                field: name.to_string(),
            }),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn fields_mut(&mut self) -> impl Iterator<Item = (&str, &mut Value)> {
        self.fields.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// The entity key of this record, when its type declares one.
    pub fn key(&self) -> Option<Key> {
        let field = self.ty.key_field()?;
        self.fields.get(field).and_then(Key::from_value)
    }
}

// ── Map ───────────────────────────────────────────────────────────────────

/// An associative map with a declared key kind.
#[derive(Debug, Clone)]
pub struct Map {
    key_kind: KeyKind,
    entries: BTreeMap<Key, Value>,
}

impl Map {
    pub fn new(key_kind: KeyKind) -> Self {
        Self { key_kind, entries: BTreeMap::new() }
    }

    pub fn with(mut self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn key_kind(&self) -> KeyKind {
        self.key_kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &Key) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts an entry, coercing the key to the declared key kind.
    pub fn insert(&mut self, key: Key, value: Value) -> Result<Option<Value>, ValueError> {
        let key = key.coerce(self.key_kind)?;
        Ok(self.entries.insert(key, value))
    }

    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.keys()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.entries.values_mut()
    }
}

// ── Owned reference ──────────────────────────────────────────────────────

/// Allocation identity of a referent cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(usize);

type Cell = Arc<RwLock<Value>>;

/// An owned reference. Cloning a `Ref` shares the referent; use
/// [`crate::deep_copy`] for an independent graph.
#[derive(Clone, Default)]
pub struct Ref {
    cell: Option<Cell>,
    shape: Option<Arc<Value>>,
}

impl Ref {
    pub fn new(value: impl Into<Value>) -> Self {
        Self { cell: Some(Arc::new(RwLock::new(value.into()))), shape: None }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// An empty reference that knows how to allocate its referent.
    pub fn empty_of(template: Value) -> Self {
        Self { cell: None, shape: Some(Arc::new(template)) }
    }

    pub(crate) fn from_parts(cell: Option<Cell>, shape: Option<Arc<Value>>) -> Self {
        Self { cell, shape }
    }

    pub(crate) fn shape_arc(&self) -> Option<&Arc<Value>> {
        self.shape.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.cell.is_none()
    }

    pub fn id(&self) -> Option<CellId> {
        self.cell.as_ref().map(|c| CellId(Arc::as_ptr(c) as *const () as usize))
    }

    pub fn ptr_eq(&self, other: &Ref) -> bool {
        match (&self.cell, &other.cell) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// The declared zero referent, if one was recorded.
    pub fn shape(&self) -> Option<&Value> {
        self.shape.as_deref()
    }

    /// A clone of the referent.
    pub fn load(&self) -> Option<Value> {
        self.read().map(|guard| guard.clone())
    }

    pub fn read(&self) -> Option<RwLockReadGuard<'_, Value>> {
        self.cell
            .as_ref()
            .map(|c| c.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn write(&self) -> Option<RwLockWriteGuard<'_, Value>> {
        self.cell
            .as_ref()
            .map(|c| c.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the referent, allocating a fresh cell when empty.
    pub fn store(&mut self, value: Value) {
        if let Some(cell) = &self.cell {
            *cell.write().unwrap_or_else(PoisonError::into_inner) = value;
            return;
        }
        self.cell = Some(Arc::new(RwLock::new(value)));
    }

    /// Allocates the referent from `template`, or from the declared shape.
    /// Returns false when the reference is empty and nothing can be allocated.
    pub fn allocate(&mut self, template: Option<&Value>) -> bool {
        if self.cell.is_some() {
            return true;
        }
        let zero = match template.or(self.shape.as_deref()) {
            Some(t) => crate::copy::deep_copy(t),
            None => return false,
        };
        self.cell = Some(Arc::new(RwLock::new(zero)));
        true
    }

    /// Drops the referent, keeping the declared shape.
    pub fn clear(&mut self) {
        self.cell = None;
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(CellId(id)) => write!(f, "Ref(#{id:x})"),
            None => f.write_str("Ref(empty)"),
        }
    }
}

// ── Polymorphic container ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PolyValue {
    pub type_name: String,
    pub value: Value,
}

/// A polymorphic container: empty, or a value tagged with its concrete type.
#[derive(Debug, Clone, Default)]
pub struct Poly(Option<Box<PolyValue>>);

impl Poly {
    pub fn new(type_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Poly(Some(Box::new(PolyValue { type_name: type_name.into(), value: value.into() })))
    }

    pub fn empty() -> Self {
        Poly(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn type_name(&self) -> Option<&str> {
        self.0.as_ref().map(|p| p.type_name.as_str())
    }

    pub fn value(&self) -> Option<&Value> {
        self.0.as_ref().map(|p| &p.value)
    }

    pub fn value_mut(&mut self) -> Option<&mut Value> {
        self.0.as_mut().map(|p| &mut p.value)
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }
}

// ── Value ─────────────────────────────────────────────────────────────────

/// Any value the engine can traverse.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Record(Record),
    /// Fixed-size array.
    Array(Vec<Value>),
    /// Dynamic array.
    List(Vec<Value>),
    Map(Map),
    Ref(Ref),
    Poly(Poly),
    /// A live value generic traversal cannot handle (callable, channel, ...).
    Unsupported(String),
}

impl Value {
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Value {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn array<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Value {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Record(_) => "record",
            Value::Array(_) => "array",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Ref(_) => "ref",
            Value::Poly(_) => "poly",
            Value::Unsupported(_) => "unsupported",
        }
    }

    /// True for an empty owned reference or polymorphic container.
    pub fn is_empty_ref(&self) -> bool {
        match self {
            Value::Ref(r) => r.is_empty(),
            Value::Poly(p) => p.is_empty(),
            _ => false,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Bool(_)
                | Value::Int(_)
                | Value::Uint(_)
                | Value::Float(_)
                | Value::String(_)
                | Value::Bytes(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Uint(u) => Some(*u as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Uint(u) => i64::try_from(*u).ok(),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Elements of a fixed array or a list.
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Strips owned references and polymorphic wrappers. Empty wrappers and
    /// reference cycles resolve to `Null`.
    pub fn resolved(&self) -> Value {
        let mut seen = HashSet::new();
        let mut current = self.clone();
        loop {
            match current {
                Value::Ref(r) => {
                    let Some(id) = r.id() else { return Value::Null };
                    if !seen.insert(id) {
                        return Value::Null;
                    }
                    current = r.load().unwrap_or_default();
                }
                Value::Poly(p) => match p.0 {
                    Some(inner) => current = inner.value,
                    None => return Value::Null,
                },
                other => return other,
            }
        }
    }

    /// A value of the same shape with scalars zeroed and dynamic
    /// collections emptied; used as an allocation template.
    pub fn zeroed(&self) -> Value {
        match self {
            Value::Null => Value::Null,
            Value::Bool(_) => Value::Bool(false),
            Value::Int(_) => Value::Int(0),
            Value::Uint(_) => Value::Uint(0),
            Value::Float(_) => Value::Float(0.0),
            Value::String(_) => Value::String(String::new()),
            Value::Bytes(_) => Value::Bytes(Vec::new()),
            Value::Record(r) => {
                let mut out = Record::new(r.ty());
                for (name, v) in r.fields() {
                    if let Some(slot) = out.get_mut(name) {
                        *slot = v.zeroed_shallow();
                    }
                }
                Value::Record(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(Value::zeroed).collect()),
            Value::List(_) => Value::List(Vec::new()),
            Value::Map(m) => Value::Map(Map::new(m.key_kind())),
            Value::Ref(r) => Value::Ref(Ref::from_parts(None, r.shape_arc().cloned())),
            Value::Poly(_) => Value::Poly(Poly::empty()),
            Value::Unsupported(k) => Value::Unsupported(k.clone()),
        }
    }

    /// Like [`Value::zeroed`] but references become empty instead of being
    /// followed, so cyclic graphs terminate.
    fn zeroed_shallow(&self) -> Value {
        match self {
            Value::Ref(r) => {
                let shape = r
                    .shape_arc()
                    .cloned()
                    .or_else(|| r.load().map(|v| Arc::new(v.zeroed_shallow())));
                Value::Ref(Ref::from_parts(None, shape))
            }
            other => other.zeroed(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        crate::equal::deep_equal(self, other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::Uint(u)
    }
}

impl From<u32> for Value {
    fn from(u: u32) -> Self {
        Value::Uint(u64::from(u))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Value::Ref(r)
    }
}

impl From<Poly> for Value {
    fn from(p: Poly) -> Self {
        Value::Poly(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_type() -> Arc<RecordType> {
        RecordType::new("Item")
            .field_with("id", FieldPolicy::key())
            .field("name")
            .field_with("cache", FieldPolicy::ignore())
            .shared()
    }

    #[test]
    fn record_new_fills_declared_fields() {
        let rec = Record::new(&item_type());
        assert_eq!(rec.fields().count(), 3);
        assert_eq!(rec.get("name"), Some(&Value::Null));
    }

    #[test]
    fn record_set_rejects_undeclared_field() {
        let mut rec = Record::new(&item_type());
        let err = rec.set("nope", Value::Int(1)).unwrap_err();
        assert!(matches!(err, ValueError::UnknownField { .. }));
    }

    #[test]
    fn record_key_uses_key_field() {
        let rec = Record::new(&item_type()).with("id", 7i64);
        assert_eq!(rec.key(), Some(Key::Int(7)));
    }

    #[test]
    fn key_parse_and_coerce() {
        assert_eq!(Key::parse("42", KeyKind::Int).unwrap(), Key::Int(42));
        assert!(Key::parse("x", KeyKind::Int).is_err());
        assert_eq!(Key::Str("5".into()).coerce(KeyKind::Uint).unwrap(), Key::Uint(5));
        assert_eq!(Key::Int(3).coerce(KeyKind::Str).unwrap(), Key::Str("3".into()));
    }

    #[test]
    fn map_insert_coerces_key() {
        let mut m = Map::new(KeyKind::Int);
        m.insert(Key::Str("10".into()), Value::Bool(true)).unwrap();
        assert!(m.contains_key(&Key::Int(10)));
    }

    #[test]
    fn ref_clone_shares_referent() {
        let a = Ref::new(1i64);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        let mut c = b.clone();
        c.store(Value::Int(2));
        assert_eq!(a.load(), Some(Value::Int(2)));
    }

    #[test]
    fn ref_store_allocates_when_empty() {
        let mut r = Ref::empty();
        r.store(Value::Int(5));
        assert!(!r.is_empty());
        let shared = r.clone();
        r.store(Value::Int(6));
        assert!(r.ptr_eq(&shared));
        assert_eq!(shared.load(), Some(Value::Int(6)));
    }

    #[test]
    fn ref_allocate_uses_shape() {
        let mut r = Ref::empty_of(Value::Int(0));
        assert!(r.is_empty());
        assert!(r.allocate(None));
        assert_eq!(r.load(), Some(Value::Int(0)));
        let mut bare = Ref::empty();
        assert!(!bare.allocate(None));
    }

    #[test]
    fn resolved_strips_wrappers_and_cycles() {
        let r = Ref::new(Poly::new("Leaf", "x"));
        assert_eq!(Value::Ref(r).resolved(), Value::from("x"));

        let cyclic = Ref::new(Value::Null);
        let mut inner = cyclic.clone();
        inner.store(Value::Ref(cyclic.clone()));
        assert_eq!(Value::Ref(cyclic).resolved(), Value::Null);
    }

    #[test]
    fn zeroed_keeps_shape() {
        let rec = Record::new(&item_type()).with("id", 3i64).with("name", "a");
        let zero = Value::Record(rec).zeroed();
        let zero = zero.as_record().unwrap();
        assert_eq!(zero.get("id"), Some(&Value::Int(0)));
        assert_eq!(zero.get("name"), Some(&Value::String(String::new())));
    }
}
