//! Structural diff: compute the operation tree that turns one value into
//! another.
//!
//! The walk short-circuits on deep-equal subtrees, snapshots whole values
//! when one side is an empty reference, consults the per-type registry, and
//! otherwise recurses by kind. Lists use [`sequence`] (edit distance) or
//! [`keyed`] (entity alignment) scripts.

mod keyed;
mod sequence;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use structpatch_pointer::Path;
use structpatch_value::{
    deep_equal, try_deep_copy, CellId, CopyOptions, Map, Record, Reflect, Value, ValueError,
};

use crate::error::DiffError;
use crate::patch::{OpKind, Operation, Patch};

// ── Custom differencers ───────────────────────────────────────────────────

/// A per-type differencer, consulted before the structural walk for
/// records of the type it is registered under.
///
/// Returning `Ok(None)` means "no change". An error aborts the diff.
pub trait CustomDiff: Send + Sync {
    fn diff(&self, a: &Record, b: &Record) -> Result<Option<Operation>, String>;
}

impl<F> CustomDiff for F
where
    F: Fn(&Record, &Record) -> Result<Option<Operation>, String> + Send + Sync,
{
    fn diff(&self, a: &Record, b: &Record) -> Result<Option<Operation>, String> {
        self(a, b)
    }
}

/// Custom differencers by record type name.
#[derive(Clone, Default)]
pub struct DiffRegistry {
    by_type: HashMap<String, Arc<dyn CustomDiff>>,
}

impl DiffRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, differ: Arc<dyn CustomDiff>) {
        self.by_type.insert(type_name.into(), differ);
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<dyn CustomDiff>> {
        self.by_type.get(type_name)
    }
}

impl fmt::Debug for DiffRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.by_type.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("DiffRegistry").field("types", &names).finish()
    }
}

// ── Options ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Locations excluded from comparison, together with their subtrees.
    pub ignore: Vec<Path>,
    /// Skip `Unsupported` values (and zero them in snapshots) instead of
    /// failing.
    pub skip_unsupported: bool,
    pub registry: DiffRegistry,
}

impl DiffOptions {
    pub fn ignore(mut self, path: impl Into<Path>) -> Self {
        self.ignore.push(path.into());
        self
    }

    pub fn skip_unsupported(mut self, skip: bool) -> Self {
        self.skip_unsupported = skip;
        self
    }

    pub fn register(mut self, type_name: impl Into<String>, differ: Arc<dyn CustomDiff>) -> Self {
        self.registry.register(type_name, differ);
        self
    }
}

// ── Public API ────────────────────────────────────────────────────────────

/// Computes the operation turning `a` into `b`, or `None` when they are
/// deep-equal.
///
/// ```
/// use structpatch::diff;
/// use structpatch_value::Value;
///
/// let a = Value::list([1i64, 2, 3]);
/// assert!(diff(&a, &a).unwrap().is_none());
/// assert!(diff(&a, &Value::list([1i64, 3])).unwrap().is_some());
/// ```
pub fn diff(a: &Value, b: &Value) -> Result<Option<Operation>, DiffError> {
    Differ::new().diff(a, b)
}

/// Diffs two typed values through their [`Reflect`] representation.
pub fn diff_typed<T: Reflect>(a: &T, b: &T) -> Result<Patch, DiffError> {
    Ok(Patch::new(diff(&a.to_value(), &b.to_value())?))
}

impl Patch {
    /// The patch turning `a` into `b`.
    pub fn diff(a: &Value, b: &Value) -> Result<Patch, DiffError> {
        Ok(Patch::new(diff(a, b)?))
    }
}

/// A configured differencer. The visited set used for cycle detection is
/// cleared at the start of every [`Differ::diff`] call.
#[derive(Debug, Default)]
pub struct Differ {
    options: DiffOptions,
    visited: HashSet<(CellId, CellId)>,
}

impl Differ {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: DiffOptions) -> Self {
        Self { options, visited: HashSet::new() }
    }

    pub fn options(&self) -> &DiffOptions {
        &self.options
    }

    pub fn diff(&mut self, a: &Value, b: &Value) -> Result<Option<Operation>, DiffError> {
        self.visited.clear();
        self.node(&Path::root(), a, b)
    }

    // ── Core recursive differ ─────────────────────────────────────────────

    pub(crate) fn node(&mut self, path: &Path, a: &Value, b: &Value) -> Result<Option<Operation>, DiffError> {
        if self.is_ignored(path) {
            return Ok(None);
        }
        if let Some(kind) = unsupported_kind(a, b) {
            if self.options.skip_unsupported {
                tracing::debug!(path = %path, kind, "skipping unsupported value");
                return Ok(None);
            }
            return Err(DiffError::Unsupported { path: path.to_string(), kind: kind.to_string() });
        }
        if deep_equal(a, b) {
            return Ok(None);
        }
        if a.is_empty_ref() || b.is_empty_ref() {
            return self.replace(path, a, b).map(Some);
        }
        match (a, b) {
            (Value::Record(ra), Value::Record(rb)) if ra.type_name() == rb.type_name() => {
                if let Some(custom) = self.options.registry.get(ra.type_name()).cloned() {
                    return custom.diff(ra, rb).map_err(|message| {
                        tracing::debug!(path = %path, type_name = ra.type_name(), error = %message, "custom diff failed");
                        DiffError::Custom { type_name: ra.type_name().to_string(), message }
                    });
                }
                self.record(path, ra, rb)
            }
            (Value::Array(xs), Value::Array(ys)) if xs.len() == ys.len() => self.fixed_array(path, xs, ys),
            (Value::List(xs), Value::List(ys)) => self.list(path, xs, ys),
            (Value::Map(ma), Value::Map(mb)) if ma.key_kind() == mb.key_kind() => self.map(path, ma, mb),
            (Value::Ref(ra), Value::Ref(rb)) => {
                let (Some(ia), Some(ib)) = (ra.id(), rb.id()) else {
                    return self.replace(path, a, b).map(Some);
                };
                if ia == ib || !self.visited.insert((ia, ib)) {
                    return Ok(None);
                }
                let (Some(ga), Some(gb)) = (ra.read(), rb.read()) else {
                    return Ok(None);
                };
                let template = gb.zeroed();
                Ok(self.node(path, &ga, &gb)?.map(|inner| {
                    OpKind::Ref { inner: Box::new(inner), template: Some(template) }.into()
                }))
            }
            (Value::Poly(pa), Value::Poly(pb)) if pa.type_name() == pb.type_name() => {
                let (Some(type_name), Some(va), Some(vb)) = (pb.type_name(), pa.value(), pb.value()) else {
                    return self.replace(path, a, b).map(Some);
                };
                Ok(self.node(path, va, vb)?.map(|inner| {
                    OpKind::Poly {
                        type_name: type_name.to_string(),
                        inner: Box::new(inner),
                        template: Some(vb.zeroed()),
                    }
                    .into()
                }))
            }
            _ => self.replace(path, a, b).map(Some),
        }
    }

    fn record(&mut self, path: &Path, a: &Record, b: &Record) -> Result<Option<Operation>, DiffError> {
        let ty = a.ty();
        let mut fields = IndexMap::new();
        for (name, va) in a.fields() {
            let policy = ty.policy(name);
            if policy.ignore {
                continue;
            }
            let Some(vb) = b.get(name) else { continue };
            let at = path.child(name);
            let op = if policy.atomic {
                if self.is_ignored(&at) || deep_equal(va, vb) {
                    None
                } else {
                    Some(self.replace(&at, va, vb)?)
                }
            } else {
                self.node(&at, va, vb)?
            };
            if let Some(op) = op {
                fields.insert(name.to_string(), op);
            }
        }
        Ok((!fields.is_empty()).then(|| OpKind::Record(fields).into()))
    }

    fn fixed_array(&mut self, path: &Path, xs: &[Value], ys: &[Value]) -> Result<Option<Operation>, DiffError> {
        let mut items = BTreeMap::new();
        for (index, (x, y)) in xs.iter().zip(ys).enumerate() {
            if let Some(op) = self.node(&path.child(index), x, y)? {
                items.insert(index, op);
            }
        }
        Ok((!items.is_empty()).then(|| OpKind::FixedArray(items).into()))
    }

    fn map(&mut self, path: &Path, a: &Map, b: &Map) -> Result<Option<Operation>, DiffError> {
        let mut added = BTreeMap::new();
        let mut removed = BTreeMap::new();
        let mut modified = BTreeMap::new();
        for (key, va) in a.iter() {
            let at = path.child(key);
            if self.is_ignored(&at) {
                continue;
            }
            match b.get(key) {
                None => {
                    removed.insert(key.clone(), Some(self.snapshot(&at, va)?));
                }
                Some(vb) => {
                    if let Some(op) = self.node(&at, va, vb)? {
                        modified.insert(key.clone(), op);
                    }
                }
            }
        }
        for (key, vb) in b.iter() {
            let at = path.child(key);
            if a.contains_key(key) || self.is_ignored(&at) {
                continue;
            }
            added.insert(key.clone(), self.snapshot(&at, vb)?);
        }
        if added.is_empty() && removed.is_empty() && modified.is_empty() {
            return Ok(None);
        }
        Ok(Some(OpKind::Map { added, removed, modified }.into()))
    }

    fn list(&mut self, path: &Path, xs: &[Value], ys: &[Value]) -> Result<Option<Operation>, DiffError> {
        let keyed = match (crate::patch::list::unique_keys(xs), crate::patch::list::unique_keys(ys)) {
            (Some(ka), Some(kb)) if !(ka.is_empty() && kb.is_empty()) => Some((ka, kb)),
            _ => None,
        };
        let edits = match keyed {
            Some((ka, kb)) => self.keyed(path, xs, ys, &ka, &kb)?,
            None => self.sequence(path, xs, ys)?,
        };
        Ok((!edits.is_empty()).then(|| OpKind::List(edits).into()))
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    fn is_ignored(&self, path: &Path) -> bool {
        self.options.ignore.iter().any(|p| p == path)
    }

    /// An independent copy of `value` for storing in an operation.
    pub(crate) fn snapshot(&self, path: &Path, value: &Value) -> Result<Value, DiffError> {
        let options = CopyOptions { zero_unsupported: self.options.skip_unsupported };
        try_deep_copy(value, options).map_err(|e| match e {
            ValueError::Unsupported(kind) => DiffError::Unsupported { path: path.to_string(), kind },
            other => DiffError::Unsupported { path: path.to_string(), kind: other.to_string() },
        })
    }

    fn replace(&self, path: &Path, a: &Value, b: &Value) -> Result<Operation, DiffError> {
        Ok(Operation::replace(self.snapshot(path, a)?, self.snapshot(path, b)?))
    }
}

fn unsupported_kind<'v>(a: &'v Value, b: &'v Value) -> Option<&'v str> {
    match (a, b) {
        (Value::Unsupported(kind), _) | (_, Value::Unsupported(kind)) => Some(kind),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use structpatch_value::{deep_copy, FieldPolicy, Key, KeyKind, Poly, RecordType, Ref};

    fn config_type() -> Arc<RecordType> {
        RecordType::new("Config")
            .field("name")
            .field("value")
            .field_with("cache", FieldPolicy::ignore())
            .field_with("blob", FieldPolicy::atomic())
            .shared()
    }

    fn config(name: &str, value: i64) -> Record {
        Record::new(&config_type()).with("name", name).with("value", value)
    }

    fn field<'o>(op: &'o Operation, name: &str) -> Option<&'o Operation> {
        match &op.kind {
            OpKind::Record(fields) => fields.get(name),
            _ => None,
        }
    }

    #[test]
    fn equal_values_have_no_diff() {
        let a = Value::Record(config("x", 1));
        assert!(diff(&a, &deep_copy(&a)).unwrap().is_none());
    }

    #[test]
    fn record_diff_keeps_changed_fields_only() {
        let a = Value::Record(config("x", 1));
        let b = Value::Record(config("x", 2));
        let op = diff(&a, &b).unwrap().unwrap();
        assert!(field(&op, "name").is_none());
        assert!(matches!(
            &field(&op, "value").unwrap().kind,
            OpKind::Value { old: Some(Value::Int(1)), new: Some(Value::Int(2)) }
        ));
    }

    #[test]
    fn ignored_fields_and_paths_are_skipped() {
        let a = Value::Record(config("x", 1).with("cache", 5i64));
        let b = Value::Record(config("y", 1).with("cache", 6i64));
        let op = diff(&a, &b).unwrap().unwrap();
        assert!(field(&op, "cache").is_none());

        let mut differ = Differ::with_options(DiffOptions::default().ignore("/name"));
        assert!(differ.diff(&a, &b).unwrap().is_none());
    }

    #[test]
    fn atomic_field_is_one_value() {
        let a = Value::Record(config("x", 1).with("blob", Value::list([1i64, 2])));
        let b = Value::Record(config("x", 1).with("blob", Value::list([1i64, 3])));
        let op = diff(&a, &b).unwrap().unwrap();
        assert!(matches!(&field(&op, "blob").unwrap().kind, OpKind::Value { .. }));
    }

    #[test]
    fn map_partitions_keys() {
        let a = Value::Map(Map::new(KeyKind::Str).with("a", 1i64).with("b", 2i64));
        let b = Value::Map(Map::new(KeyKind::Str).with("b", 3i64).with("c", 4i64));
        let op = diff(&a, &b).unwrap().unwrap();
        let OpKind::Map { added, removed, modified } = &op.kind else { panic!("expected map op") };
        assert_eq!(added.keys().collect::<Vec<_>>(), vec![&Key::from("c")]);
        assert_eq!(removed.get(&Key::from("a")), Some(&Some(Value::Int(1))));
        assert!(modified.contains_key(&Key::from("b")));
    }

    #[test]
    fn empty_ref_is_snapshotted() {
        let a = Value::Ref(Ref::empty());
        let b = Value::Ref(Ref::new(3i64));
        let op = diff(&a, &b).unwrap().unwrap();
        let OpKind::Value { new: Some(Value::Ref(r)), .. } = &op.kind else { panic!("expected snapshot") };
        let Value::Ref(orig) = &b else { unreachable!() };
        assert!(!r.ptr_eq(orig));
    }

    #[test]
    fn cyclic_refs_terminate() {
        let a = Ref::new(Value::Null);
        a.clone().store(Value::list([Value::Ref(a.clone()), Value::Int(1)]));
        let b = Ref::new(Value::Null);
        b.clone().store(Value::list([Value::Ref(b.clone()), Value::Int(2)]));
        let op = diff(&Value::Ref(a), &Value::Ref(b)).unwrap().unwrap();
        assert!(matches!(op.kind, OpKind::Ref { .. }));
    }

    #[test]
    fn poly_of_different_types_is_replaced() {
        let a = Value::Poly(Poly::new("Circle", 1i64));
        let b = Value::Poly(Poly::new("Square", 1i64));
        assert!(matches!(diff(&a, &b).unwrap().unwrap().kind, OpKind::Value { .. }));
        let c = Value::Poly(Poly::new("Circle", 2i64));
        assert!(matches!(diff(&a, &c).unwrap().unwrap().kind, OpKind::Poly { .. }));
    }

    #[test]
    fn unsupported_fails_unless_skipped() {
        let a = Value::list([Value::Int(1), Value::Unsupported("func".into())]);
        let b = Value::list([Value::Int(2), Value::Unsupported("func".into())]);
        assert!(matches!(diff(&a, &b), Err(DiffError::Unsupported { .. })));
        let mut differ = Differ::with_options(DiffOptions::default().skip_unsupported(true));
        assert!(differ.diff(&a, &b).unwrap().is_some());
    }

    #[test]
    fn custom_differ_is_consulted() {
        let marker: Arc<dyn CustomDiff> =
            Arc::new(|_: &Record, _: &Record| Ok::<_, String>(Some(Operation::log("custom"))));
        let failing: Arc<dyn CustomDiff> =
            Arc::new(|_: &Record, _: &Record| Err::<Option<Operation>, _>("boom".to_string()));
        let a = Value::Record(config("x", 1));
        let b = Value::Record(config("x", 2));

        let mut differ = Differ::with_options(DiffOptions::default().register("Config", marker));
        assert!(matches!(differ.diff(&a, &b).unwrap().unwrap().kind, OpKind::Log { .. }));

        let mut differ = Differ::with_options(DiffOptions::default().register("Config", failing));
        assert_eq!(
            differ.diff(&a, &b).unwrap_err(),
            DiffError::Custom { type_name: "Config".into(), message: "boom".into() }
        );
    }
}
