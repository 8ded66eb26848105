//! List edit scripts: positional splicing and keyed entity reconciliation.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use structpatch_pointer::{self as pointer, Follow, PointerError};
use structpatch_value::{deep_copy, CellId, Key, Value};

use super::apply::{inspect, Applier, Loc, Outcome};
use super::types::{EditKind, ListEdit};
use super::walk::ChangeKind;
use crate::clock::Clock;
use crate::error::NodeFailure;

/// The entity key of a list element: the key field of a record, looking
/// through owned references and polymorphic containers.
pub(crate) fn entity_key(value: &Value) -> Option<Key> {
    fn walk(value: &Value, seen: &mut HashSet<CellId>) -> Option<Key> {
        match value {
            Value::Record(r) => r.key(),
            Value::Ref(r) => {
                if !seen.insert(r.id()?) {
                    return None;
                }
                let guard = r.read()?;
                walk(&guard, seen)
            }
            Value::Poly(p) => walk(p.value()?, seen),
            _ => None,
        }
    }
    walk(value, &mut HashSet::new())
}

/// Keys of every element, or `None` when any element has no key or a key
/// repeats.
pub(crate) fn unique_keys(items: &[Value]) -> Option<Vec<Key>> {
    let mut seen = BTreeSet::new();
    let mut keys = Vec::with_capacity(items.len());
    for item in items {
        let key = entity_key(item)?;
        if !seen.insert(key.clone()) {
            return None;
        }
        keys.push(key);
    }
    Some(keys)
}

/// Where an entity goes when it must follow `prev` (`None` is the head).
///
/// Entities already placed after the same predecessor by this script whose
/// key sorts first stay ahead, together with whatever was placed after
/// them. An unresolved predecessor appends.
pub(crate) fn insertion_point(
    keys: &[Option<Key>],
    prev: Option<&Key>,
    key: &Key,
    placed: &BTreeMap<Key, Option<Key>>,
) -> usize {
    let mut pos = match prev {
        None => 0,
        Some(p) => match keys.iter().position(|k| k.as_ref() == Some(p)) {
            Some(i) => i + 1,
            None => return keys.len(),
        },
    };
    let ours = key.to_string();
    let mut ahead: BTreeSet<&Key> = BTreeSet::new();
    while let Some(Some(next)) = keys.get(pos) {
        let Some(next_prev) = placed.get(next) else { break };
        let sibling = next_prev.as_ref() == prev && next.to_string() < ours;
        let trailing = next_prev.as_ref().is_some_and(|p| ahead.contains(p));
        if !(sibling || trailing) {
            break;
        }
        ahead.insert(next);
        pos += 1;
    }
    pos
}

/// Orders keyed inserts so that every entity comes after the entity it
/// follows, when that one is inserted by the same script. Ties go by the
/// key's string form, so the result only depends on the set of edits.
pub(crate) fn order_by_predecessor(mut edits: Vec<ListEdit>) -> Vec<ListEdit> {
    edits.sort_by_cached_key(|e| e.key.as_ref().map(|k| (k.to_string(), k.clone())));
    let pending_keys: BTreeSet<Key> = edits.iter().filter_map(|e| e.key.clone()).collect();
    let mut done: BTreeSet<Key> = BTreeSet::new();
    let mut out = Vec::with_capacity(edits.len());
    let mut pending = edits;
    while !pending.is_empty() {
        let before = out.len();
        let mut rest = Vec::new();
        for edit in pending {
            let waiting = edit
                .prev
                .as_ref()
                .is_some_and(|p| pending_keys.contains(p) && !done.contains(p) && edit.key.as_ref() != Some(p));
            if waiting {
                rest.push(edit);
            } else {
                if let Some(k) = &edit.key {
                    done.insert(k.clone());
                }
                out.push(edit);
            }
        }
        if out.len() == before {
            // predecessor cycle
            out.extend(rest);
            break;
        }
        pending = rest;
    }
    out
}

/// The key `key` follows in `keys`: `Some(None)` at the head, `None` when
/// `key` is not in the list.
fn predecessor(keys: &[Option<Key>], key: &Key) -> Option<Option<Key>> {
    let pos = keys.iter().position(|k| k.as_ref() == Some(key))?;
    Some(pos.checked_sub(1).and_then(|p| keys[p].clone()))
}

fn describe(prev: Option<&Key>) -> String {
    prev.map_or_else(|| "head".to_string(), |k| format!("after {k}"))
}

fn list_keys(root: &Value, at: &Loc) -> Option<Vec<Option<Key>>> {
    inspect(root, at, |v| match v {
        Value::List(items) => Some(items.iter().map(entity_key).collect()),
        _ => None,
    })
    .flatten()
}

fn with_list<R>(
    root: &mut Value,
    at: &Loc,
    f: impl FnOnce(&mut Vec<Value>) -> Result<R, PointerError>,
) -> Result<R, PointerError> {
    pointer::with_mut_at(root, &at.path, Follow::Layers(at.layers), |v| match v {
        Value::List(items) => f(items),
        other => Err(PointerError::NotContainer(other.kind_name())),
    })
}

fn done(result: Result<(), PointerError>) -> Outcome {
    match result {
        Ok(()) => Outcome::Applied,
        Err(e) => Outcome::Failed(e.into()),
    }
}

fn out_of_range(index: usize, len: usize) -> PointerError {
    PointerError::IndexOutOfRange { index, len }
}

/// A keyed move whose entity no longer follows the recorded predecessor.
fn moved_from_elsewhere(initial: &[Option<Key>], edit: &ListEdit, key: &Key) -> Option<NodeFailure> {
    if edit.kind != EditKind::Move {
        return None;
    }
    let found = predecessor(initial, key)?;
    (found != edit.from_prev).then(|| NodeFailure::Mismatch {
        expected: describe(edit.from_prev.as_ref()),
        found: describe(found.as_ref()),
    })
}

impl Applier<'_> {
    pub(super) fn apply_list(&mut self, root: &mut Value, at: &Loc, edits: &[ListEdit], clock: Option<Clock>) {
        let mut placed: BTreeMap<Key, Option<Key>> = BTreeMap::new();
        // Keyed moves record their predecessor before the script ran.
        let initial = if self.verifies() && edits.iter().any(|e| e.is_keyed() && e.kind == EditKind::Move) {
            list_keys(root, at)
        } else {
            None
        };
        for edit in edits {
            let clock = edit.guards.clock.or(clock);
            match &edit.key {
                Some(key) if edit.kind != EditKind::Copy => {
                    let Some(keys) = list_keys(root, at) else {
                        let outcome = Outcome::Failed(PointerError::NotFound(at.logical.to_string()).into());
                        self.record(at, outcome);
                        continue;
                    };
                    let pos = keys.iter().position(|k| k.as_ref() == Some(key));
                    let elem = at.element(pos.unwrap_or(keys.len()), key);
                    if let Some(outcome) = self.blocked(root, &edit.guards, &elem) {
                        self.record(&elem, outcome);
                        continue;
                    }
                    let stale = initial.as_deref().and_then(|before| moved_from_elsewhere(before, edit, key));
                    if let Some(failure) = stale {
                        self.record(&elem, Outcome::Failed(failure));
                        continue;
                    }
                    if let Some(outcome) = self.keyed_edit(root, at, &elem, edit, key, keys, pos, &mut placed, clock) {
                        self.record(&elem, outcome);
                    }
                }
                _ => {
                    let elem = at.child(edit.index);
                    if let Some(outcome) = self.blocked(root, &edit.guards, &elem) {
                        self.record(&elem, outcome);
                        continue;
                    }
                    if let Some(outcome) = self.positional_edit(root, at, &elem, edit, clock) {
                        self.record(&elem, outcome);
                    }
                }
            }
        }
    }

    fn positional_edit(
        &mut self,
        root: &mut Value,
        list: &Loc,
        elem: &Loc,
        edit: &ListEdit,
        clock: Option<Clock>,
    ) -> Option<Outcome> {
        let index = edit.index;
        Some(match edit.kind {
            EditKind::Replace => {
                if inspect(root, elem, |_| ()).is_none() {
                    return Some(self.absent(elem));
                }
                match &edit.patch {
                    Some(patch) => {
                        self.visit(root, patch, elem, clock);
                        return None;
                    }
                    None => self.apply_value(root, elem, edit.old.as_ref(), edit.value.as_ref(), clock),
                }
            }
            EditKind::Remove => self.apply_value(root, elem, edit.old.as_ref(), None, clock),
            EditKind::Add => {
                // Strict inserts only append: an existing index counts as occupied.
                if self.verifies() && self.strict && inspect(root, elem, |_| ()).is_some() {
                    return Some(Outcome::Failed(NodeFailure::AlreadyExists));
                }
                if !self.accepts(elem, ChangeKind::Add, edit.value.as_ref(), clock) {
                    return Some(Self::rejected());
                }
                let value = edit.value.as_ref().map(deep_copy).unwrap_or_default();
                done(with_list(root, list, |items| {
                    if index > items.len() {
                        return Err(out_of_range(index, items.len()));
                    }
                    items.insert(index, value);
                    Ok(())
                }))
            }
            EditKind::Move | EditKind::Copy => {
                let moving = edit.kind == EditKind::Move;
                let from = edit.from.unwrap_or(index);
                let kind = if moving { ChangeKind::Move } else { ChangeKind::Copy };
                if self.verifies() && edit.old.is_some() {
                    if let Err(failure) = self.verify_old(root, &list.child(from), edit.old.as_ref(), false) {
                        return Some(Outcome::Failed(failure));
                    }
                }
                if !self.accepts(elem, kind, None, clock) {
                    return Some(Self::rejected());
                }
                done(with_list(root, list, |items| {
                    if from >= items.len() {
                        return Err(out_of_range(from, items.len()));
                    }
                    let value = if moving { items.remove(from) } else { deep_copy(&items[from]) };
                    if index > items.len() {
                        let len = items.len();
                        if moving {
                            items.insert(from, value);
                        }
                        return Err(out_of_range(index, len));
                    }
                    items.insert(index, value);
                    Ok(())
                }))
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn keyed_edit(
        &mut self,
        root: &mut Value,
        list: &Loc,
        elem: &Loc,
        edit: &ListEdit,
        key: &Key,
        mut keys: Vec<Option<Key>>,
        pos: Option<usize>,
        placed: &mut BTreeMap<Key, Option<Key>>,
        clock: Option<Clock>,
    ) -> Option<Outcome> {
        Some(match (edit.kind, pos) {
            (EditKind::Add, Some(_)) => {
                if self.verifies() {
                    Outcome::Failed(NodeFailure::AlreadyExists)
                } else {
                    Outcome::Skipped("entity already present".to_string())
                }
            }
            (EditKind::Add, None) => {
                if !self.accepts(elem, ChangeKind::Add, edit.value.as_ref(), clock) {
                    return Some(Self::rejected());
                }
                let index = insertion_point(&keys, edit.prev.as_ref(), key, placed);
                let value = edit.value.as_ref().map(deep_copy).unwrap_or_default();
                let outcome = done(with_list(root, list, |items| {
                    items.insert(index.min(items.len()), value);
                    Ok(())
                }));
                placed.insert(key.clone(), edit.prev.clone());
                outcome
            }
            (_, None) => self.absent(elem),
            (EditKind::Remove, Some(pos)) => {
                if self.verifies() {
                    if let Err(failure) = self.verify_old(root, elem, edit.old.as_ref(), false) {
                        return Some(Outcome::Failed(failure));
                    }
                }
                if !self.accepts(elem, ChangeKind::Remove, None, clock) {
                    return Some(Self::rejected());
                }
                done(with_list(root, list, |items| {
                    items.remove(pos);
                    Ok(())
                }))
            }
            (EditKind::Move, Some(pos)) => {
                if !self.accepts(elem, ChangeKind::Move, None, clock) {
                    return Some(Self::rejected());
                }
                keys.remove(pos);
                let index = insertion_point(&keys, edit.prev.as_ref(), key, placed);
                let outcome = done(with_list(root, list, |items| {
                    let value = items.remove(pos);
                    items.insert(index.min(items.len()), value);
                    Ok(())
                }));
                placed.insert(key.clone(), edit.prev.clone());
                outcome
            }
            (EditKind::Replace, Some(_)) => match &edit.patch {
                Some(patch) => {
                    self.visit(root, patch, elem, clock);
                    return None;
                }
                None => self.apply_value(root, elem, edit.old.as_ref(), edit.value.as_ref(), clock),
            },
            (EditKind::Copy, Some(_)) => self.positional_edit(root, list, elem, edit, clock)?,
        })
    }
}
