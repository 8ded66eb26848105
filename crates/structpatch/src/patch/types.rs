//! The operation tree.
//!
//! An [`Operation`] mirrors the shape of the value it changes: records get
//! per-field children, lists get an edit script, owned references wrap the
//! operation on their referent. Container nodes are never empty; an empty
//! change set is represented by the absence of a node.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use structpatch_condition::Condition;
use structpatch_pointer::Path;
use structpatch_value::{Key, Value};

use crate::clock::Clock;

// ── Guards ────────────────────────────────────────────────────────────────

/// Conditions and metadata attached to a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Guards {
    /// Must hold for the node's current value (paths relative to the node).
    /// Only checked application verifies it.
    pub condition: Option<Condition>,
    /// Evaluated against the root; false skips the node and its subtree.
    pub if_: Option<Condition>,
    /// Evaluated against the root; true skips the node and its subtree.
    pub unless: Option<Condition>,
    pub clock: Option<Clock>,
}

impl Guards {
    pub fn is_empty(&self) -> bool {
        self.condition.is_none() && self.if_.is_none() && self.unless.is_none() && self.clock.is_none()
    }
}

// ── Custom operations ─────────────────────────────────────────────────────

/// An opaque operation produced by a registered per-type differencer.
pub trait CustomOp: fmt::Debug + Send + Sync {
    /// Registry name of this operation kind.
    fn kind(&self) -> &str;

    /// Applies the operation to its target value.
    fn apply(&self, target: &mut Value) -> Result<(), String>;

    /// The inverse operation, when there is one.
    fn reverse(&self) -> Option<Arc<dyn CustomOp>> {
        None
    }

    /// Payload for the structured codec.
    fn encode(&self) -> Value;
}

// ── List edits ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditKind {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
}

impl EditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditKind::Add => "add",
            EditKind::Remove => "remove",
            EditKind::Replace => "replace",
            EditKind::Move => "move",
            EditKind::Copy => "copy",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "add" => Some(EditKind::Add),
            "remove" => Some(EditKind::Remove),
            "replace" => Some(EditKind::Replace),
            "move" => Some(EditKind::Move),
            "copy" => Some(EditKind::Copy),
            _ => None,
        }
    }
}

/// One step of a list edit script.
///
/// `index` and `from` are positions in the list at the moment the edit is
/// applied; edits apply in order. A keyed edit (`key` set) is located by
/// entity key instead, and its positions are informational.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEdit {
    pub kind: EditKind,
    pub index: usize,
    /// Source position of a move or copy.
    pub from: Option<usize>,
    pub key: Option<Key>,
    /// Key of the element the added or moved entity follows after the
    /// edit; `None` is the head.
    pub prev: Option<Key>,
    /// Key of the element a removed or moved entity followed before the
    /// edit; `None` is the head.
    pub from_prev: Option<Key>,
    /// Inserted value (add), or the replacement (replace without `patch`).
    pub value: Option<Value>,
    /// Recorded previous value (remove, replace without `patch`), or the
    /// value expected at `from` (positional move and copy).
    pub old: Option<Value>,
    /// Sub-operation on the element (replace).
    pub patch: Option<Box<Operation>>,
    pub guards: Guards,
}

impl ListEdit {
    fn new(kind: EditKind, index: usize) -> Self {
        Self {
            kind,
            index,
            from: None,
            key: None,
            prev: None,
            from_prev: None,
            value: None,
            old: None,
            patch: None,
            guards: Guards::default(),
        }
    }

    pub fn add(index: usize, value: Value) -> Self {
        Self { value: Some(value), ..Self::new(EditKind::Add, index) }
    }

    pub fn remove(index: usize, old: Option<Value>) -> Self {
        Self { old, ..Self::new(EditKind::Remove, index) }
    }

    /// Replaces the element with `value`.
    pub fn set(index: usize, value: Value, old: Option<Value>) -> Self {
        Self { value: Some(value), old, ..Self::new(EditKind::Replace, index) }
    }

    /// Applies `patch` to the element.
    pub fn patch(index: usize, patch: Operation) -> Self {
        Self { patch: Some(Box::new(patch)), ..Self::new(EditKind::Replace, index) }
    }

    pub fn move_to(from: usize, index: usize) -> Self {
        Self { from: Some(from), ..Self::new(EditKind::Move, index) }
    }

    pub fn copy_to(from: usize, index: usize) -> Self {
        Self { from: Some(from), ..Self::new(EditKind::Copy, index) }
    }

    /// Records the value a positional move or copy expects at `from`.
    pub fn expecting(mut self, value: Value) -> Self {
        self.old = Some(value);
        self
    }

    pub fn keyed(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }

    pub fn after(mut self, prev: Option<Key>) -> Self {
        self.prev = prev;
        self
    }

    pub fn was_after(mut self, from_prev: Option<Key>) -> Self {
        self.from_prev = from_prev;
        self
    }

    pub fn is_keyed(&self) -> bool {
        self.key.is_some()
    }

    fn is_mutating(&self) -> bool {
        match &self.patch {
            Some(p) if self.kind == EditKind::Replace => p.is_mutating(),
            _ => true,
        }
    }
}

// ── Operation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum OpKind {
    /// Replace, add (`old` absent) or remove (`new` absent) a whole value.
    Value { old: Option<Value>, new: Option<Value> },
    Record(IndexMap<String, Operation>),
    FixedArray(BTreeMap<usize, Operation>),
    /// Removed entries keep the previous value when it was recorded.
    Map {
        added: BTreeMap<Key, Value>,
        removed: BTreeMap<Key, Option<Value>>,
        modified: BTreeMap<Key, Operation>,
    },
    List(Vec<ListEdit>),
    /// Operation on the referent of an owned reference; `template` is
    /// allocated when the reference is empty.
    Ref { inner: Box<Operation>, template: Option<Value> },
    Poly { type_name: String, inner: Box<Operation>, template: Option<Value> },
    Test { expected: Value },
    Copy { from: Path },
    Move { from: Path },
    Log { message: String },
    Custom(Arc<dyn CustomOp>),
}

impl PartialEq for OpKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OpKind::Value { old: a, new: b }, OpKind::Value { old: c, new: d }) => a == c && b == d,
            (OpKind::Record(a), OpKind::Record(b)) => a == b,
            (OpKind::FixedArray(a), OpKind::FixedArray(b)) => a == b,
            (
                OpKind::Map { added: a1, removed: r1, modified: m1 },
                OpKind::Map { added: a2, removed: r2, modified: m2 },
            ) => a1 == a2 && r1 == r2 && m1 == m2,
            (OpKind::List(a), OpKind::List(b)) => a == b,
            (OpKind::Ref { inner: a, template: t1 }, OpKind::Ref { inner: b, template: t2 }) => a == b && t1 == t2,
            (
                OpKind::Poly { type_name: n1, inner: a, template: t1 },
                OpKind::Poly { type_name: n2, inner: b, template: t2 },
            ) => n1 == n2 && a == b && t1 == t2,
            (OpKind::Test { expected: a }, OpKind::Test { expected: b }) => a == b,
            (OpKind::Copy { from: a }, OpKind::Copy { from: b }) | (OpKind::Move { from: a }, OpKind::Move { from: b }) => a == b,
            (OpKind::Log { message: a }, OpKind::Log { message: b }) => a == b,
            (OpKind::Custom(a), OpKind::Custom(b)) => Arc::ptr_eq(a, b) || (a.kind() == b.kind() && a.encode() == b.encode()),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OpKind,
    pub guards: Guards,
}

impl From<OpKind> for Operation {
    fn from(kind: OpKind) -> Self {
        Operation { kind, guards: Guards::default() }
    }
}

impl Operation {
    pub fn new(kind: OpKind) -> Self {
        kind.into()
    }

    pub fn replace(old: Value, new: Value) -> Self {
        OpKind::Value { old: Some(old), new: Some(new) }.into()
    }

    pub fn add(new: Value) -> Self {
        OpKind::Value { old: None, new: Some(new) }.into()
    }

    pub fn remove(old: Option<Value>) -> Self {
        OpKind::Value { old, new: None }.into()
    }

    pub fn test(expected: Value) -> Self {
        OpKind::Test { expected }.into()
    }

    pub fn log(message: impl Into<String>) -> Self {
        OpKind::Log { message: message.into() }.into()
    }

    pub fn with_if(mut self, c: Condition) -> Self {
        self.guards.if_ = Some(c);
        self
    }

    pub fn with_unless(mut self, c: Condition) -> Self {
        self.guards.unless = Some(c);
        self
    }

    pub fn with_condition(mut self, c: Condition) -> Self {
        self.guards.condition = Some(c);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.guards.clock = Some(clock);
        self
    }

    pub fn op_name(&self) -> &'static str {
        match &self.kind {
            OpKind::Value { .. } => "value",
            OpKind::Record(_) => "record",
            OpKind::FixedArray(_) => "array",
            OpKind::Map { .. } => "map",
            OpKind::List(_) => "list",
            OpKind::Ref { .. } => "ref",
            OpKind::Poly { .. } => "poly",
            OpKind::Test { .. } => "test",
            OpKind::Copy { .. } => "copy",
            OpKind::Move { .. } => "move",
            OpKind::Log { .. } => "log",
            OpKind::Custom(_) => "custom",
        }
    }

    /// True if applying this node can change a value.
    pub fn is_mutating(&self) -> bool {
        match &self.kind {
            OpKind::Test { .. } | OpKind::Log { .. } => false,
            OpKind::Record(fields) => fields.values().any(Operation::is_mutating),
            OpKind::FixedArray(items) => items.values().any(Operation::is_mutating),
            OpKind::Map { added, removed, modified } => {
                !added.is_empty() || !removed.is_empty() || modified.values().any(Operation::is_mutating)
            }
            OpKind::List(edits) => edits.iter().any(ListEdit::is_mutating),
            OpKind::Ref { inner, .. } | OpKind::Poly { inner, .. } => inner.is_mutating(),
            OpKind::Value { .. } | OpKind::Copy { .. } | OpKind::Move { .. } | OpKind::Custom(_) => true,
        }
    }

    /// The latest clock carried by this node or any node below it.
    pub fn effective_clock(&self) -> Option<Clock> {
        let mut best = self.guards.clock;
        let mut take = |c: Option<Clock>| {
            if c > best {
                best = c;
            }
        };
        match &self.kind {
            OpKind::Record(fields) => fields.values().for_each(|o| take(o.effective_clock())),
            OpKind::FixedArray(items) => items.values().for_each(|o| take(o.effective_clock())),
            OpKind::Map { modified, .. } => modified.values().for_each(|o| take(o.effective_clock())),
            OpKind::List(edits) => {
                for e in edits {
                    take(e.guards.clock);
                    if let Some(p) = &e.patch {
                        take(p.effective_clock());
                    }
                }
            }
            OpKind::Ref { inner, .. } | OpKind::Poly { inner, .. } => take(inner.effective_clock()),
            _ => {}
        }
        best
    }

    /// Stamps `clock` on every node that does not carry one yet.
    pub fn stamp(&mut self, clock: Clock) {
        self.guards.clock.get_or_insert(clock);
        match &mut self.kind {
            OpKind::Record(fields) => fields.values_mut().for_each(|o| o.stamp(clock)),
            OpKind::FixedArray(items) => items.values_mut().for_each(|o| o.stamp(clock)),
            OpKind::Map { modified, .. } => modified.values_mut().for_each(|o| o.stamp(clock)),
            OpKind::List(edits) => {
                for e in edits {
                    e.guards.clock.get_or_insert(clock);
                    if let Some(p) = &mut e.patch {
                        p.stamp(clock);
                    }
                }
            }
            OpKind::Ref { inner, .. } | OpKind::Poly { inner, .. } => inner.stamp(clock),
            _ => {}
        }
    }
}
