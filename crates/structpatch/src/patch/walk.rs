//! Flat traversal of a patch.

use structpatch_pointer::Path;
use structpatch_value::Value;

use super::types::{EditKind, ListEdit, OpKind, Operation};
use super::Patch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    Test,
    Log,
    Custom,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Remove => "remove",
            ChangeKind::Replace => "replace",
            ChangeKind::Move => "move",
            ChangeKind::Copy => "copy",
            ChangeKind::Test => "test",
            ChangeKind::Log => "log",
            ChangeKind::Custom => "custom",
        }
    }

    pub(crate) fn of_value(old: Option<&Value>, new: Option<&Value>) -> Self {
        match (old, new) {
            (None, Some(_)) => ChangeKind::Add,
            (Some(_), Some(_)) => ChangeKind::Replace,
            (_, None) => ChangeKind::Remove,
        }
    }
}

impl From<EditKind> for ChangeKind {
    fn from(k: EditKind) -> Self {
        match k {
            EditKind::Add => ChangeKind::Add,
            EditKind::Remove => ChangeKind::Remove,
            EditKind::Replace => ChangeKind::Replace,
            EditKind::Move => ChangeKind::Move,
            EditKind::Copy => ChangeKind::Copy,
        }
    }
}

/// One leaf change of a patch.
#[derive(Debug, Clone)]
pub struct Change<'a> {
    pub path: Path,
    pub kind: ChangeKind,
    pub old: Option<&'a Value>,
    pub new: Option<&'a Value>,
    /// Source location of a move or copy.
    pub from: Option<Path>,
}

impl Patch {
    /// Visits every leaf change in application order. The first error
    /// returned by `f` stops the traversal and is returned.
    pub fn walk<'a, E>(&'a self, mut f: impl FnMut(Change<'a>) -> Result<(), E>) -> Result<(), E> {
        match &self.root {
            Some(op) => walk_op(op, Path::root(), &mut f),
            None => Ok(()),
        }
    }

    /// Locations touched by the patch, in application order.
    pub fn paths(&self) -> Vec<Path> {
        let mut out = Vec::new();
        let _ = self.walk(|c| {
            out.push(c.path);
            Ok::<(), ()>(())
        });
        out
    }
}

pub(crate) fn walk_op<'a, E>(
    op: &'a Operation,
    path: Path,
    f: &mut impl FnMut(Change<'a>) -> Result<(), E>,
) -> Result<(), E> {
    let leaf = |kind, old, new, from| Change { path: path.clone(), kind, old, new, from };
    match &op.kind {
        OpKind::Value { old, new } => {
            f(leaf(ChangeKind::of_value(old.as_ref(), new.as_ref()), old.as_ref(), new.as_ref(), None))
        }
        OpKind::Record(fields) => {
            for (name, child) in fields {
                walk_op(child, path.child(name.as_str()), f)?;
            }
            Ok(())
        }
        OpKind::FixedArray(items) => {
            for (index, child) in items {
                walk_op(child, path.child(*index), f)?;
            }
            Ok(())
        }
        OpKind::Map { added, removed, modified } => {
            for (key, old) in removed {
                f(Change { path: path.child(key), kind: ChangeKind::Remove, old: old.as_ref(), new: None, from: None })?;
            }
            for (key, child) in modified {
                walk_op(child, path.child(key), f)?;
            }
            for (key, value) in added {
                f(Change { path: path.child(key), kind: ChangeKind::Add, old: None, new: Some(value), from: None })?;
            }
            Ok(())
        }
        OpKind::List(edits) => {
            for edit in edits {
                walk_edit(edit, &path, f)?;
            }
            Ok(())
        }
        OpKind::Ref { inner, .. } | OpKind::Poly { inner, .. } => walk_op(inner, path, f),
        OpKind::Test { expected } => f(leaf(ChangeKind::Test, None, Some(expected), None)),
        OpKind::Copy { from } => f(leaf(ChangeKind::Copy, None, None, Some(from.clone()))),
        OpKind::Move { from } => f(leaf(ChangeKind::Move, None, None, Some(from.clone()))),
        OpKind::Log { .. } => f(leaf(ChangeKind::Log, None, None, None)),
        OpKind::Custom(_) => f(leaf(ChangeKind::Custom, None, None, None)),
    }
}

fn walk_edit<'a, E>(
    edit: &'a ListEdit,
    list: &Path,
    f: &mut impl FnMut(Change<'a>) -> Result<(), E>,
) -> Result<(), E> {
    let path = list.child(edit.index);
    if let (EditKind::Replace, Some(patch)) = (edit.kind, &edit.patch) {
        return walk_op(patch, path, f);
    }
    let from = match edit.kind {
        EditKind::Move | EditKind::Copy => edit.from.map(|i| list.child(i)),
        _ => None,
    };
    f(Change { path, kind: edit.kind.into(), old: edit.old.as_ref(), new: edit.value.as_ref(), from })
}
