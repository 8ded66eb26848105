//! Patch reversal.
//!
//! The reverse of a patch undoes it when applied to the value the patch
//! produced. Conditions are not carried over; clocks are.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use structpatch_pointer::{Path, PathPart};
use structpatch_value::Key;

use super::list::order_by_predecessor;
use super::types::{EditKind, Guards, ListEdit, OpKind, Operation};
use super::Patch;
use crate::error::PatchError;

impl Patch {
    /// The patch that undoes this one.
    ///
    /// Fails with [`PatchError::Irreversible`] when a removal did not record
    /// the removed value, or a custom operation has no inverse.
    pub fn reverse(&self) -> Result<Patch, PatchError> {
        reverse(self)
    }
}

pub fn reverse(patch: &Patch) -> Result<Patch, PatchError> {
    let Some(root) = &patch.root else {
        return Ok(Patch { root: None, condition: None, strict: patch.strict });
    };
    let mut reverser = Reverser::default();
    let mut reversed = reverser.op(root, &Path::root())?;
    for (at, op) in std::mem::take(&mut reverser.grafts) {
        graft(&mut reversed, at.parts(), op, &at)?;
    }
    Ok(Patch { root: reversed, condition: None, strict: patch.strict })
}

fn irreversible(path: &Path, reason: &str) -> PatchError {
    PatchError::Irreversible(format!("{path:?}: {reason}", path = path.to_string()))
}

fn strip(guards: &Guards) -> Guards {
    Guards { clock: guards.clock, ..Guards::default() }
}

#[derive(Default)]
struct Reverser {
    /// Operations that belong at another location than the one reversed,
    /// i.e. the source of a move.
    grafts: Vec<(Path, Operation)>,
}

impl Reverser {
    fn op(&mut self, op: &Operation, path: &Path) -> Result<Option<Operation>, PatchError> {
        let kind = match &op.kind {
            OpKind::Value { old, new } => {
                if old.is_none() && new.is_none() {
                    return Err(irreversible(path, "removal without recorded value"));
                }
                OpKind::Value { old: new.clone(), new: old.clone() }
            }
            OpKind::Record(fields) => {
                let mut out = IndexMap::new();
                for (name, child) in fields.iter().rev() {
                    if let Some(r) = self.op(child, &path.child(name.as_str()))? {
                        out.insert(name.clone(), r);
                    }
                }
                if out.is_empty() {
                    return Ok(None);
                }
                OpKind::Record(out)
            }
            OpKind::FixedArray(items) => {
                let mut out = BTreeMap::new();
                for (index, child) in items {
                    if let Some(r) = self.op(child, &path.child(*index))? {
                        out.insert(*index, r);
                    }
                }
                if out.is_empty() {
                    return Ok(None);
                }
                OpKind::FixedArray(out)
            }
            OpKind::Map { added, removed, modified } => {
                let mut r_added = BTreeMap::new();
                for (key, old) in removed {
                    let old = old
                        .clone()
                        .ok_or_else(|| irreversible(&path.child(key), "removal without recorded value"))?;
                    r_added.insert(key.clone(), old);
                }
                let r_removed = added.iter().map(|(k, v)| (k.clone(), Some(v.clone()))).collect();
                let mut r_modified = BTreeMap::new();
                for (key, child) in modified {
                    if let Some(r) = self.op(child, &path.child(key))? {
                        r_modified.insert(key.clone(), r);
                    }
                }
                OpKind::Map { added: r_added, removed: r_removed, modified: r_modified }
            }
            OpKind::List(edits) => {
                let out = self.list(edits, path)?;
                if out.is_empty() {
                    return Ok(None);
                }
                OpKind::List(out)
            }
            OpKind::Ref { inner, template } => match self.op(inner, path)? {
                Some(r) => OpKind::Ref { inner: Box::new(r), template: template.clone() },
                None => return Ok(None),
            },
            OpKind::Poly { type_name, inner, template } => match self.op(inner, path)? {
                Some(r) => OpKind::Poly {
                    type_name: type_name.clone(),
                    inner: Box::new(r),
                    template: template.clone(),
                },
                None => return Ok(None),
            },
            OpKind::Test { .. } | OpKind::Log { .. } => op.kind.clone(),
            OpKind::Copy { .. } => OpKind::Value { old: None, new: None },
            OpKind::Move { from } => {
                let back = Operation { kind: OpKind::Move { from: path.clone() }, guards: strip(&op.guards) };
                self.grafts.push((from.clone(), back));
                return Ok(None);
            }
            OpKind::Custom(custom) => match custom.reverse() {
                Some(r) => OpKind::Custom(r),
                None => return Err(irreversible(path, &format!("custom operation {} has no inverse", custom.kind()))),
            },
        };
        Ok(Some(Operation { kind, guards: strip(&op.guards) }))
    }

    fn list(&mut self, edits: &[ListEdit], path: &Path) -> Result<Vec<ListEdit>, PatchError> {
        if is_entity_script(edits) {
            return self.entity_list(edits, path);
        }
        let mut out = Vec::with_capacity(edits.len());
        for edit in edits.iter().rev() {
            if let Some(r) = self.edit(edit, path)? {
                out.push(r);
            }
        }
        Ok(out)
    }

    /// Keyed scripts restore entities after their original predecessors,
    /// predecessors first, instead of replaying the forward order backwards.
    fn entity_list(&mut self, edits: &[ListEdit], path: &Path) -> Result<Vec<ListEdit>, PatchError> {
        let mut replaces = Vec::new();
        let mut removals = Vec::new();
        let mut restores = Vec::new();
        for edit in edits {
            let Some(r) = self.edit(edit, path)? else { continue };
            match edit.kind {
                EditKind::Replace => replaces.push(r),
                EditKind::Add => removals.push(r),
                _ => restores.push(r),
            }
        }
        replaces.extend(removals);
        replaces.extend(order_by_predecessor(restores));
        Ok(replaces)
    }

    fn edit(&mut self, edit: &ListEdit, path: &Path) -> Result<Option<ListEdit>, PatchError> {
        let at = path.child(edit.index);
        let mut reversed = match edit.kind {
            EditKind::Add => {
                let value = edit.value.clone().unwrap_or_default();
                ListEdit::remove(edit.index, Some(value)).was_after(edit.prev.clone())
            }
            EditKind::Remove => {
                let old = edit
                    .old
                    .clone()
                    .ok_or_else(|| irreversible(&at, "removal without recorded value"))?;
                ListEdit::add(edit.index, old).after(edit.from_prev.clone())
            }
            EditKind::Replace => match &edit.patch {
                Some(patch) => match self.op(patch, &at)? {
                    Some(r) => ListEdit::patch(edit.index, r),
                    None => return Ok(None),
                },
                None => {
                    let old = edit
                        .old
                        .clone()
                        .ok_or_else(|| irreversible(&at, "replacement without recorded value"))?;
                    ListEdit::set(edit.index, old, edit.value.clone())
                }
            },
            EditKind::Move => {
                let mut back = ListEdit::move_to(edit.index, edit.from.unwrap_or(edit.index))
                    .after(edit.from_prev.clone())
                    .was_after(edit.prev.clone());
                back.old = edit.old.clone();
                back
            }
            EditKind::Copy => ListEdit::remove(edit.index, edit.old.clone()),
        };
        reversed.key = edit.key.clone();
        reversed.guards = strip(&edit.guards);
        Ok(Some(reversed))
    }
}

/// Every edit is keyed and each entity is inserted, removed or moved at
/// most once.
fn is_entity_script(edits: &[ListEdit]) -> bool {
    let mut structural: BTreeSet<&Key> = BTreeSet::new();
    edits.iter().all(|e| match (&e.key, e.kind) {
        (None, _) | (Some(_), EditKind::Copy) => false,
        (Some(_), EditKind::Replace) => true,
        (Some(k), _) => structural.insert(k),
    })
}

/// Places `op` at `parts` below `slot`, creating record or fixed array
/// nodes on the way.
fn graft(slot: &mut Option<Operation>, parts: &[PathPart], op: Operation, at: &Path) -> Result<(), PatchError> {
    let Some((part, rest)) = parts.split_first() else {
        if slot.is_some() {
            return Err(irreversible(at, "move source is changed by the same patch"));
        }
        *slot = Some(op);
        return Ok(());
    };
    let node = slot.get_or_insert_with(|| match part {
        PathPart::Index(_) => OpKind::FixedArray(BTreeMap::new()).into(),
        PathPart::Key(_) => OpKind::Record(IndexMap::new()).into(),
    });
    match &mut node.kind {
        OpKind::Record(fields) => {
            let name = part.as_text().into_owned();
            let mut child = fields.get(&name).cloned();
            graft(&mut child, rest, op, at)?;
            if let Some(c) = child {
                fields.insert(name, c);
            }
        }
        OpKind::FixedArray(items) => {
            let PathPart::Index(index) = part else {
                return Err(irreversible(at, "move source is not an index of a fixed array"));
            };
            let mut child = items.get(index).cloned();
            graft(&mut child, rest, op, at)?;
            if let Some(c) = child {
                items.insert(*index, c);
            }
        }
        OpKind::Map { added, removed, modified } => {
            let text = part.as_text();
            if added.keys().chain(removed.keys()).any(|k| k.to_string() == text) {
                return Err(irreversible(at, "move source is changed by the same patch"));
            }
            let key = modified
                .keys()
                .find(|k| k.to_string() == text)
                .cloned()
                .unwrap_or_else(|| Key::Str(text.into_owned()));
            let mut child = modified.get(&key).cloned();
            graft(&mut child, rest, op, at)?;
            if let Some(c) = child {
                modified.insert(key, c);
            }
        }
        OpKind::Ref { inner, .. } | OpKind::Poly { inner, .. } => {
            let mut child = Some(inner.as_ref().clone());
            graft(&mut child, parts, op, at)?;
            if let Some(c) = child {
                **inner = c;
            }
        }
        _ => return Err(irreversible(at, "move source lies inside a changed value")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use structpatch_pointer::parse;
    use structpatch_value::{deep_copy, Record, RecordType, Value};

    fn record(fields: Vec<(&str, Operation)>) -> Operation {
        Operation::new(OpKind::Record(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect()))
    }

    fn doc() -> Value {
        let ty = RecordType::new("Doc").field("A").field("B").field("Items").shared();
        Value::Record(
            Record::new(&ty)
                .with("A", "x")
                .with("B", "")
                .with("Items", Value::list([1i64, 2, 3])),
        )
    }

    #[test]
    fn reverse_undoes_value_and_list_changes() {
        let patch = Patch::new(Some(record(vec![
            ("A", Operation::replace("x".into(), "y".into())),
            (
                "Items",
                Operation::new(OpKind::List(vec![
                    ListEdit::remove(0, Some(Value::Int(1))),
                    ListEdit::add(2, Value::Int(4)),
                    ListEdit::move_to(0, 1),
                ])),
            ),
        ])));
        let original = doc();
        let mut v = deep_copy(&original);
        patch.apply(&mut v).unwrap();
        assert_eq!(structpatch_pointer::get(&v, &parse("/Items")), Some(Value::list([3i64, 2, 4])));
        patch.reverse().unwrap().apply(&mut v).unwrap();
        assert_eq!(v, original);
    }

    #[test]
    fn move_reverses_at_its_source() {
        let patch = Patch::new(Some(record(vec![("B", Operation::new(OpKind::Move { from: parse("/A") }))])));
        let original = doc();
        let mut v = deep_copy(&original);
        patch.apply(&mut v).unwrap();
        let back = patch.reverse().unwrap();
        let Some(OpKind::Record(fields)) = back.root.as_ref().map(|o| &o.kind) else { panic!("expected record") };
        assert!(matches!(fields.get("A").map(|o| &o.kind), Some(OpKind::Move { .. })));
        back.apply(&mut v).unwrap();
        assert_eq!(structpatch_pointer::get(&v, &parse("/A")), Some(Value::from("x")));
    }

    #[test]
    fn unrecorded_removal_is_irreversible() {
        let patch = Patch::new(Some(record(vec![("A", Operation::remove(None))])));
        assert!(matches!(patch.reverse(), Err(PatchError::Irreversible(_))));
    }

    #[test]
    fn conditions_are_dropped() {
        let c = structpatch_condition::field("A").eq("x");
        let patch = Patch::new(Some(Operation::replace(Value::Int(1), Value::Int(2)).with_if(c.clone())))
            .with_condition(c);
        let back = patch.reverse().unwrap();
        assert!(back.condition.is_none());
        assert!(back.root.unwrap().guards.if_.is_none());
    }
}
