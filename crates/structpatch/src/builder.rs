//! Fluent construction of patches, type-checked against a root shape.
//!
//! The shape is a template value: records declare their fields, maps their
//! key kind, and lists or maps with at least one element use it as the
//! element template. `Null` anywhere in the shape accepts anything.
//!
//! ```
//! use structpatch::PatchBuilder;
//! use structpatch_condition::field;
//! use structpatch_value::{Record, RecordType, Value};
//!
//! let ty = RecordType::new("Doc").field("name").field("tags").shared();
//! let shape = Value::Record(Record::new(&ty).with("name", "").with("tags", Value::list([""])));
//!
//! let mut b = PatchBuilder::new(shape.clone());
//! b.set("/name", "v2").unwrap().if_(field("name").eq("v1")).unwrap();
//! b.add("/tags/0", "new").unwrap();
//! let patch = b.build().unwrap();
//!
//! let mut doc = Value::Record(Record::new(&ty).with("name", "v1").with("tags", Value::list(["a"])));
//! patch.apply(&mut doc).unwrap();
//! assert_eq!(doc.as_record().unwrap().get("name"), Some(&Value::from("v2")));
//! ```

use std::collections::BTreeMap;

use indexmap::IndexMap;
use structpatch_condition::Condition;
use structpatch_pointer::{key_for, parse_strict, Path, PathPart};
use structpatch_value::{conform, Reflect, Value};

use crate::clock::Clock;
use crate::error::PatchError;
use crate::patch::{EditKind, Guards, ListEdit, OpKind, Operation, Patch};

// ── Paths ─────────────────────────────────────────────────────────────────

/// Anything the builder accepts as a location.
pub trait IntoPath {
    fn into_path(self) -> Result<Path, PatchError>;
}

impl IntoPath for &str {
    fn into_path(self) -> Result<Path, PatchError> {
        Ok(parse_strict(self)?)
    }
}

impl IntoPath for String {
    fn into_path(self) -> Result<Path, PatchError> {
        self.as_str().into_path()
    }
}

impl IntoPath for Path {
    fn into_path(self) -> Result<Path, PatchError> {
        Ok(self)
    }
}

impl IntoPath for &Path {
    fn into_path(self) -> Result<Path, PatchError> {
        Ok(self.clone())
    }
}

// ── Entries ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Leaf {
    Add(Value),
    Set(Value),
    Replace { old: Value, new: Value },
    Remove(Option<Value>),
    Test(Value),
    Log(String),
    Copy(Path),
    Move(Path),
    /// A ready-made edit for the list at the entry's path.
    Edit(ListEdit),
}

impl Leaf {
    fn into_op(self, guards: Guards) -> Operation {
        let kind = match self {
            Leaf::Add(v) | Leaf::Set(v) => OpKind::Value { old: None, new: Some(v) },
            Leaf::Replace { old, new } => OpKind::Value { old: Some(old), new: Some(new) },
            Leaf::Remove(old) => OpKind::Value { old, new: None },
            Leaf::Test(expected) => OpKind::Test { expected },
            Leaf::Log(message) => OpKind::Log { message },
            Leaf::Copy(from) => OpKind::Copy { from },
            Leaf::Move(from) => OpKind::Move { from },
            Leaf::Edit(edit) => OpKind::List(vec![edit]),
        };
        Operation { kind, guards }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    path: Path,
    leaf: Leaf,
    guards: Guards,
}

// ── Builder ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PatchBuilder {
    shape: Value,
    entries: Vec<Entry>,
    /// Absolute conditions and the location each one is anchored at.
    conditions: Vec<(Path, Condition)>,
    strict: bool,
}

impl PatchBuilder {
    pub fn new(shape: Value) -> Self {
        Self { shape, entries: Vec::new(), conditions: Vec::new(), strict: false }
    }

    /// A builder for values of type `T`.
    pub fn for_type<T: Reflect>() -> Self {
        Self::new(T::template())
    }

    /// A builder that accepts any location and value.
    pub fn dynamic() -> Self {
        Self::new(Value::Null)
    }

    pub fn shape(&self) -> &Value {
        &self.shape
    }

    /// Writes `value`. In a list this replaces the element.
    pub fn set(&mut self, path: impl IntoPath, value: impl Into<Value>) -> Result<&mut Self, PatchError> {
        let path = path.into_path()?;
        let value = self.conformed(&path, value.into())?;
        self.push(path, Leaf::Set(value))
    }

    /// Inserts `value`. In a list this shifts later elements.
    pub fn add(&mut self, path: impl IntoPath, value: impl Into<Value>) -> Result<&mut Self, PatchError> {
        let path = path.into_path()?;
        let value = self.conformed(&path, value.into())?;
        self.push(path, Leaf::Add(value))
    }

    /// Replaces a value whose previous state is known.
    pub fn replace(
        &mut self,
        path: impl IntoPath,
        old: impl Into<Value>,
        new: impl Into<Value>,
    ) -> Result<&mut Self, PatchError> {
        let path = path.into_path()?;
        let old = self.conformed(&path, old.into())?;
        let new = self.conformed(&path, new.into())?;
        self.push(path, Leaf::Replace { old, new })
    }

    pub fn remove(&mut self, path: impl IntoPath, old: Option<Value>) -> Result<&mut Self, PatchError> {
        let path = path.into_path()?;
        let old = old.map(|v| self.conformed(&path, v)).transpose()?;
        self.push(path, Leaf::Remove(old))
    }

    pub fn test(&mut self, path: impl IntoPath, expected: impl Into<Value>) -> Result<&mut Self, PatchError> {
        let path = path.into_path()?;
        let expected = self.conformed(&path, expected.into())?;
        self.push(path, Leaf::Test(expected))
    }

    pub fn log(&mut self, path: impl IntoPath, message: impl Into<String>) -> Result<&mut Self, PatchError> {
        let path = path.into_path()?;
        self.shape_at(&path)?;
        self.push(path, Leaf::Log(message.into()))
    }

    pub fn copy_from(&mut self, from: impl IntoPath, path: impl IntoPath) -> Result<&mut Self, PatchError> {
        let (from, path) = (from.into_path()?, path.into_path()?);
        self.shape_at(&from)?;
        self.shape_at(&path)?;
        self.push(path, Leaf::Copy(from))
    }

    pub fn move_from(&mut self, from: impl IntoPath, path: impl IntoPath) -> Result<&mut Self, PatchError> {
        let (from, path) = (from.into_path()?, path.into_path()?);
        self.shape_at(&from)?;
        self.shape_at(&path)?;
        self.push(path, Leaf::Move(from))
    }

    /// Appends a prepared edit (keyed or positional) to the list at `list`.
    pub fn list_edit(&mut self, list: impl IntoPath, mut edit: ListEdit) -> Result<&mut Self, PatchError> {
        let list = list.into_path()?;
        let elem = match self.shape_at(&list)? {
            Value::List(items) => items.first().cloned().unwrap_or_default(),
            Value::Null => Value::Null,
            other => return Err(not_a(&list, "list", &other)),
        };
        edit.value = edit.value.map(|v| conform(v, &elem)).transpose()?;
        edit.old = edit.old.map(|v| conform(v, &elem)).transpose()?;
        let guards = std::mem::take(&mut edit.guards);
        self.entries.push(Entry { path: list, leaf: Leaf::Edit(edit), guards });
        Ok(self)
    }

    /// Guards the last operation: it only applies when `cond` holds
    /// against the root.
    pub fn if_(&mut self, cond: Condition) -> Result<&mut Self, PatchError> {
        let guards = self.last_guards()?;
        guards.if_ = Some(match guards.if_.take() {
            Some(existing) => existing.and(cond),
            None => cond,
        });
        Ok(self)
    }

    /// Guards the last operation: it is skipped when `cond` holds.
    pub fn unless(&mut self, cond: Condition) -> Result<&mut Self, PatchError> {
        let guards = self.last_guards()?;
        guards.unless = Some(match guards.unless.take() {
            Some(existing) => existing.or(cond),
            None => cond,
        });
        Ok(self)
    }

    /// Stamps the last operation with a clock.
    pub fn clock(&mut self, clock: Clock) -> Result<&mut Self, PatchError> {
        self.last_guards()?.clock = Some(clock);
        Ok(self)
    }

    /// Adds a condition checked before applying. It is anchored at the
    /// longest common prefix of the locations it reads, and evaluated
    /// relative to that node.
    pub fn with_condition(&mut self, cond: Condition) -> Result<&mut Self, PatchError> {
        let anchor = cond.anchor();
        self.condition_at(anchor, cond)
    }

    /// Adds an absolute condition anchored at `path`.
    pub fn condition_at(&mut self, path: impl IntoPath, cond: Condition) -> Result<&mut Self, PatchError> {
        let path = path.into_path()?;
        self.conditions.push((path, cond));
        Ok(self)
    }

    pub fn strict(&mut self, strict: bool) -> &mut Self {
        self.strict = strict;
        self
    }

    pub fn build(self) -> Result<Patch, PatchError> {
        let mut root: Option<Operation> = None;
        for entry in self.entries {
            place(&mut root, &self.shape, &entry.path, 0, entry.leaf, entry.guards)?;
        }
        let mut patch = Patch::new(root).strict(self.strict);
        for (anchor, cond) in self.conditions {
            let reached = match patch.root.as_mut() {
                Some(op) => attach(op, anchor.parts(), 0, &cond),
                None => false,
            };
            if !reached {
                patch.condition = Some(match patch.condition.take() {
                    Some(existing) => existing.and(cond),
                    None => cond,
                });
            }
        }
        Ok(patch)
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    fn push(&mut self, path: Path, leaf: Leaf) -> Result<&mut Self, PatchError> {
        self.entries.push(Entry { path, leaf, guards: Guards::default() });
        Ok(self)
    }

    fn last_guards(&mut self) -> Result<&mut Guards, PatchError> {
        self.entries
            .last_mut()
            .map(|e| &mut e.guards)
            .ok_or_else(|| PatchError::InvalidPath("no operation to guard".to_string()))
    }

    fn conformed(&self, path: &Path, value: Value) -> Result<Value, PatchError> {
        let shape = self.shape_at(path)?;
        Ok(conform(value, &shape)?)
    }

    /// The shape of the value at `path`; `Null` when unconstrained.
    pub fn shape_at(&self, path: &Path) -> Result<Value, PatchError> {
        let mut shape = self.shape.clone();
        for (depth, part) in path.parts().iter().enumerate() {
            shape = step(&shape, part).map_err(|why| {
                let at = Path::from_parts(path.parts()[..=depth].to_vec());
                PatchError::InvalidPath(format!("{at}: {why}"))
            })?;
        }
        Ok(shape)
    }
}

fn not_a(path: &Path, expected: &str, found: &Value) -> PatchError {
    PatchError::InvalidPath(format!("{path}: expected a {expected}, found {}", found.kind_name()))
}

/// Shape one step below `shape`.
fn step(shape: &Value, part: &PathPart) -> Result<Value, String> {
    match shape {
        Value::Null => Ok(Value::Null),
        Value::Record(rec) => rec
            .get(&part.as_text())
            .cloned()
            .ok_or_else(|| format!("{} has no field {part:?}", rec.type_name())),
        Value::Array(items) => match part.index() {
            Some(i) if i < items.len() => Ok(items[i].clone()),
            _ => Err(format!("index {part} outside fixed array of {}", items.len())),
        },
        Value::List(items) => match part.index() {
            Some(_) => Ok(items.first().cloned().unwrap_or_default()),
            None => Err(format!("{part:?} is not a list index")),
        },
        Value::Map(map) => {
            key_for(part, map.key_kind()).map_err(|e| e.to_string())?;
            Ok(map.iter().next().map(|(_, v)| v.clone()).unwrap_or_default())
        }
        Value::Ref(_) | Value::Poly(_) => step(&unwrap_shape(shape), part),
        other => Err(format!("{} has no children", other.kind_name())),
    }
}

/// The referent shape of a reference or polymorphic shape.
fn unwrap_shape(shape: &Value) -> Value {
    match shape {
        Value::Ref(r) => r.load().or_else(|| r.shape().cloned()).unwrap_or_default(),
        Value::Poly(p) => p.value().cloned().unwrap_or_default(),
        other => other.clone(),
    }
}

// ── Tree construction ─────────────────────────────────────────────────────

/// A temporary stand-in while a child node is taken out for rebuilding.
fn hole() -> Operation {
    OpKind::Record(IndexMap::new()).into()
}

fn occupied(path: &Path) -> PatchError {
    PatchError::InvalidPath(format!("{path}: location already has an operation"))
}

/// Inserts `leaf` at `path[depth..]` below `slot`, creating container nodes
/// that match `shape`.
fn place(
    slot: &mut Option<Operation>,
    shape: &Value,
    path: &Path,
    depth: usize,
    leaf: Leaf,
    guards: Guards,
) -> Result<(), PatchError> {
    let parts = path.parts();
    if depth == parts.len() {
        return put_leaf(slot, path, leaf, guards);
    }
    let part = &parts[depth];
    match shape {
        Value::Ref(r) => {
            let inner_shape = unwrap_shape(shape);
            let template = r.shape().cloned().unwrap_or_else(|| inner_shape.zeroed());
            let (mut inner, template, node_guards) = match slot.take() {
                None => (None, Some(template), Guards::default()),
                Some(Operation { kind: OpKind::Ref { inner, template }, guards }) => (Some(*inner), template, guards),
                Some(other) => {
                    *slot = Some(other);
                    return Err(occupied(path));
                }
            };
            place(&mut inner, &inner_shape, path, depth, leaf, guards)?;
            *slot = inner.map(|inner| Operation {
                kind: OpKind::Ref { inner: Box::new(inner), template },
                guards: node_guards,
            });
            Ok(())
        }
        Value::Poly(p) if p.type_name().is_some() => {
            let type_name = p.type_name().unwrap_or_default().to_string();
            let inner_shape = unwrap_shape(shape);
            let (mut inner, template, node_guards) = match slot.take() {
                None => (None, Some(inner_shape.zeroed()), Guards::default()),
                Some(Operation { kind: OpKind::Poly { inner, template, .. }, guards }) => {
                    (Some(*inner), template, guards)
                }
                Some(other) => {
                    *slot = Some(other);
                    return Err(occupied(path));
                }
            };
            place(&mut inner, &inner_shape, path, depth, leaf, guards)?;
            *slot = inner.map(|inner| Operation {
                kind: OpKind::Poly { type_name, inner: Box::new(inner), template },
                guards: node_guards,
            });
            Ok(())
        }
        Value::Map(map) => {
            let key = key_for(part, map.key_kind())?;
            let elem = map.iter().next().map(|(_, v)| v.clone()).unwrap_or_default();
            let node = slot.get_or_insert_with(|| {
                OpKind::Map { added: BTreeMap::new(), removed: BTreeMap::new(), modified: BTreeMap::new() }.into()
            });
            let OpKind::Map { added, removed, modified } = &mut node.kind else {
                return Err(occupied(path));
            };
            if added.contains_key(&key) || removed.contains_key(&key) {
                return Err(occupied(path));
            }
            let last = depth + 1 == parts.len();
            match leaf {
                Leaf::Add(v) | Leaf::Set(v) if last && guards.is_empty() && !modified.contains_key(&key) => {
                    added.insert(key, v);
                }
                Leaf::Remove(old) if last && guards.is_empty() && !modified.contains_key(&key) => {
                    removed.insert(key, old);
                }
                leaf => {
                    let mut child = modified.get_mut(&key).map(|op| std::mem::replace(op, hole()));
                    place(&mut child, &elem, path, depth + 1, leaf, guards)?;
                    if let Some(op) = child {
                        modified.insert(key, op);
                    }
                }
            }
            Ok(())
        }
        Value::List(_) | Value::Null if part.index().is_some() => {
            let elem = step(shape, part).unwrap_or_default();
            place_in_list(slot, &elem, path, depth, leaf, guards)
        }
        Value::Array(items) => {
            let index = part.index().filter(|i| *i < items.len()).ok_or_else(|| {
                PatchError::InvalidPath(format!("{path}: index outside fixed array"))
            })?;
            if matches!(leaf, Leaf::Add(_) | Leaf::Remove(_)) && depth + 1 == parts.len() {
                return Err(PatchError::InvalidPath(format!("{path}: fixed-size array")));
            }
            let node = slot.get_or_insert_with(|| OpKind::FixedArray(BTreeMap::new()).into());
            let OpKind::FixedArray(children) = &mut node.kind else {
                return Err(occupied(path));
            };
            let mut child = children.get_mut(&index).map(|op| std::mem::replace(op, hole()));
            place(&mut child, &items[index], path, depth + 1, leaf, guards)?;
            if let Some(op) = child {
                children.insert(index, op);
            }
            Ok(())
        }
        _ => {
            let name = part.as_text().into_owned();
            let child_shape = step(shape, part).map_err(|why| PatchError::InvalidPath(format!("{path}: {why}")))?;
            let node = slot.get_or_insert_with(|| OpKind::Record(IndexMap::new()).into());
            let OpKind::Record(fields) = &mut node.kind else {
                return Err(occupied(path));
            };
            let mut child = fields.get_mut(&name).map(|op| std::mem::replace(op, hole()));
            place(&mut child, &child_shape, path, depth + 1, leaf, guards)?;
            if let Some(op) = child {
                fields.insert(name, op);
            }
            Ok(())
        }
    }
}

/// Adds an edit for the element at `path[depth]` of a list node.
fn place_in_list(
    slot: &mut Option<Operation>,
    elem: &Value,
    path: &Path,
    depth: usize,
    leaf: Leaf,
    guards: Guards,
) -> Result<(), PatchError> {
    let parts = path.parts();
    let index = parts[depth].index().unwrap_or_default();
    let list_path = Path::from_parts(parts[..depth].to_vec());
    let edit = if depth + 1 == parts.len() {
        match leaf {
            Leaf::Add(v) => ListEdit::add(index, v),
            Leaf::Set(v) => ListEdit::set(index, v, None),
            Leaf::Replace { old, new } => ListEdit::set(index, new, Some(old)),
            Leaf::Remove(old) => ListEdit::remove(index, old),
            Leaf::Copy(from) => ListEdit::copy_to(sibling_index(&from, &list_path, path)?, index),
            Leaf::Move(from) => ListEdit::move_to(sibling_index(&from, &list_path, path)?, index),
            Leaf::Edit(_) => return Err(PatchError::InvalidPath(format!("{path}: not a list"))),
            other @ (Leaf::Test(_) | Leaf::Log(_)) => ListEdit::patch(index, other.into_op(Guards::default())),
        }
    } else {
        // Consecutive changes below the same element share one sub-patch.
        if let Some(last) = open_patch(slot, index) {
            let mut sub = Some(std::mem::replace(last, hole()));
            let placed = place(&mut sub, elem, path, depth + 1, leaf, Guards::default());
            if let Some(sub) = sub {
                *last = sub;
            }
            return placed;
        }
        let mut sub = None;
        place(&mut sub, elem, path, depth + 1, leaf, Guards::default())?;
        let Some(sub) = sub else { return Ok(()) };
        ListEdit::patch(index, sub)
    };
    // Guards on a deeper leaf stay on the leaf node inside the patch.
    let edit = if depth + 1 == parts.len() { ListEdit { guards, ..edit } } else { edit };
    push_edit(slot, &list_path, edit)
}

/// Position of `from` in the list at `list`; copies and moves into a list
/// element must come from the same list.
fn sibling_index(from: &Path, list: &Path, target: &Path) -> Result<usize, PatchError> {
    match from.parts().split_last() {
        Some((last, init)) if init == list.parts() => last.index(),
        _ => None,
    }
    .ok_or_else(|| PatchError::InvalidPath(format!("{target}: {from} is not an element of the same list")))
}

/// The sub-patch of the last edit when it is an unguarded, positional
/// change of the element at `index`.
fn open_patch(slot: &mut Option<Operation>, index: usize) -> Option<&mut Operation> {
    match slot.as_mut().map(|op| &mut op.kind) {
        Some(OpKind::List(edits)) => match edits.last_mut() {
            Some(ListEdit { kind: EditKind::Replace, index: i, key: None, patch: Some(sub), guards, .. })
                if *i == index && guards.is_empty() =>
            {
                Some(&mut **sub)
            }
            _ => None,
        },
        _ => None,
    }
}

fn push_edit(slot: &mut Option<Operation>, list: &Path, edit: ListEdit) -> Result<(), PatchError> {
    let node = slot.get_or_insert_with(|| OpKind::List(Vec::new()).into());
    match &mut node.kind {
        OpKind::List(edits) => {
            edits.push(edit);
            Ok(())
        }
        _ => Err(occupied(list)),
    }
}

fn put_leaf(slot: &mut Option<Operation>, path: &Path, leaf: Leaf, guards: Guards) -> Result<(), PatchError> {
    if let Leaf::Edit(edit) = leaf {
        let edit = ListEdit { guards, ..edit };
        return push_edit(slot, path, edit);
    }
    match (slot.take(), leaf.into_op(guards)) {
        (None, op) => {
            *slot = Some(op);
            Ok(())
        }
        // A test followed by a write records the tested value as the old one.
        (
            Some(Operation { kind: OpKind::Test { expected }, guards: test_guards }),
            Operation { kind: OpKind::Value { old: None, new }, guards },
        ) if test_guards.is_empty() => {
            *slot = Some(Operation { kind: OpKind::Value { old: Some(expected), new }, guards });
            Ok(())
        }
        (Some(existing), _) => {
            *slot = Some(existing);
            Err(occupied(path))
        }
    }
}

/// Attaches `cond` to the deepest node along `parts`, relative to that
/// node. Returns false when that node is the root itself.
fn attach(node: &mut Operation, parts: &[PathPart], depth: usize, cond: &Condition) -> bool {
    let child = match (&mut node.kind, parts.get(depth)) {
        (OpKind::Ref { inner, .. } | OpKind::Poly { inner, .. }, Some(_)) => {
            return attach(inner, parts, depth, cond);
        }
        (OpKind::Record(fields), Some(part)) => fields.get_mut(part.as_text().as_ref()),
        (OpKind::FixedArray(items), Some(part)) => part.index().and_then(|i| items.get_mut(&i)),
        (OpKind::Map { modified, .. }, Some(part)) => {
            let text = part.as_text();
            modified.iter_mut().find(|(k, _)| k.to_string() == text.as_ref()).map(|(_, op)| op)
        }
        _ => None,
    };
    if let Some(child) = child {
        return attach(child, parts, depth + 1, cond);
    }
    if depth == 0 {
        return false;
    }
    let prefix = Path::from_parts(parts[..depth].to_vec());
    let relative = cond.with_relative_prefix(&prefix);
    node.guards.condition = Some(match node.guards.condition.take() {
        Some(existing) => existing.and(relative),
        None => relative,
    });
    true
}
