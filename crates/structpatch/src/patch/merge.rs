//! Merging independently produced patches.
//!
//! Changes at different locations are united. When both patches change the
//! same location, a [`MergeResolver`] decides, or else the operation with
//! the later clock wins; on equal clocks the first patch wins.

use std::collections::{BTreeMap, BTreeSet};

use structpatch_pointer::Path;
use structpatch_value::{Key, Value};

use super::list::order_by_predecessor;
use super::types::{EditKind, Guards, ListEdit, OpKind, Operation};
use super::Patch;
use crate::clock::Clock;

/// Combines two operations that change the same location.
pub trait MergeResolver {
    fn merge(&self, path: &Path, ours: &Operation, theirs: &Operation) -> Operation;
}

impl<F> MergeResolver for F
where
    F: Fn(&Path, &Operation, &Operation) -> Operation,
{
    fn merge(&self, path: &Path, ours: &Operation, theirs: &Operation) -> Operation {
        self(path, ours, theirs)
    }
}

/// Merges `b` into `a`. Conditions are conjoined; the result is strict if
/// either input is.
pub fn merge(a: &Patch, b: &Patch, resolver: Option<&dyn MergeResolver>) -> Patch {
    let root = match (&a.root, &b.root) {
        (Some(x), Some(y)) => Some(merge_op(x, y, &Path::root(), resolver)),
        (x, y) => x.clone().or_else(|| y.clone()),
    };
    let condition = match (&a.condition, &b.condition) {
        (Some(x), Some(y)) => Some(x.clone().and(y.clone())),
        (x, y) => x.clone().or_else(|| y.clone()),
    };
    Patch { root, condition, strict: a.strict || b.strict }
}

impl Patch {
    pub fn merge(&self, other: &Patch, resolver: Option<&dyn MergeResolver>) -> Patch {
        merge(self, other, resolver)
    }
}

fn same_guards(a: &Guards, b: &Guards) -> bool {
    a.condition == b.condition && a.if_ == b.if_ && a.unless == b.unless
}

fn decide(path: &Path, x: &Operation, y: &Operation, resolver: Option<&dyn MergeResolver>) -> Operation {
    if let Some(r) = resolver {
        return r.merge(path, x, y);
    }
    if y.effective_clock() > x.effective_clock() {
        y.clone()
    } else {
        x.clone()
    }
}

fn merge_op(x: &Operation, y: &Operation, path: &Path, resolver: Option<&dyn MergeResolver>) -> Operation {
    if !same_guards(&x.guards, &y.guards) {
        return decide(path, x, y, resolver);
    }
    let kind = match (&x.kind, &y.kind) {
        (OpKind::Record(a), OpKind::Record(b)) => {
            let mut out = a.clone();
            for (name, theirs) in b {
                let merged = match a.get(name) {
                    Some(ours) => merge_op(ours, theirs, &path.child(name.as_str()), resolver),
                    None => theirs.clone(),
                };
                out.insert(name.clone(), merged);
            }
            OpKind::Record(out)
        }
        (OpKind::FixedArray(a), OpKind::FixedArray(b)) => {
            let mut out = a.clone();
            for (index, theirs) in b {
                let merged = match a.get(index) {
                    Some(ours) => merge_op(ours, theirs, &path.child(*index), resolver),
                    None => theirs.clone(),
                };
                out.insert(*index, merged);
            }
            OpKind::FixedArray(out)
        }
        (OpKind::Map { .. }, OpKind::Map { .. }) => merge_map(x, y, path, resolver),
        (OpKind::List(a), OpKind::List(b)) if is_entity_list(a) && is_entity_list(b) => {
            OpKind::List(merge_entities(a, x.guards.clock, b, y.guards.clock, path, resolver))
        }
        (OpKind::Ref { inner: a, template }, OpKind::Ref { inner: b, template: other }) => OpKind::Ref {
            inner: Box::new(merge_op(a, b, path, resolver)),
            template: template.clone().or_else(|| other.clone()),
        },
        (
            OpKind::Poly { type_name, inner: a, template },
            OpKind::Poly { type_name: other_type, inner: b, template: other },
        ) if type_name == other_type => OpKind::Poly {
            type_name: type_name.clone(),
            inner: Box::new(merge_op(a, b, path, resolver)),
            template: template.clone().or_else(|| other.clone()),
        },
        (OpKind::Value { new: a, .. }, OpKind::Value { new: b, .. }) if a == b => x.kind.clone(),
        (OpKind::Test { expected: a }, OpKind::Test { expected: b }) if a == b => x.kind.clone(),
        (OpKind::Log { message: a }, OpKind::Log { message: b }) if a == b => x.kind.clone(),
        _ => return decide(path, x, y, resolver),
    };
    Operation { kind, guards: Guards { clock: x.guards.clock.max(y.guards.clock), ..x.guards.clone() } }
}

// ── Maps ──────────────────────────────────────────────────────────────────

enum Entry<'a> {
    Added(&'a Value),
    Removed(&'a Option<Value>),
    Modified(&'a Operation),
}

fn entries(op: &Operation) -> BTreeMap<&Key, Entry<'_>> {
    let mut out = BTreeMap::new();
    if let OpKind::Map { added, removed, modified } = &op.kind {
        out.extend(removed.iter().map(|(k, v)| (k, Entry::Removed(v))));
        out.extend(modified.iter().map(|(k, v)| (k, Entry::Modified(v))));
        out.extend(added.iter().map(|(k, v)| (k, Entry::Added(v))));
    }
    out
}

fn entry_op(entry: &Entry<'_>, clock: Option<Clock>) -> Operation {
    let op = match entry {
        Entry::Added(v) => Operation::add((*v).clone()),
        Entry::Removed(old) => Operation::remove((*old).clone()),
        Entry::Modified(op) => (*op).clone(),
    };
    match (op.guards.clock, clock) {
        (None, Some(c)) => op.with_clock(c),
        _ => op,
    }
}

fn merge_map(x: &Operation, y: &Operation, path: &Path, resolver: Option<&dyn MergeResolver>) -> OpKind {
    let ours = entries(x);
    let theirs = entries(y);
    let keys: BTreeSet<&Key> = ours.keys().chain(theirs.keys()).copied().collect();
    let mut added = BTreeMap::new();
    let mut removed = BTreeMap::new();
    let mut modified = BTreeMap::new();
    for key in keys {
        let merged = match (ours.get(key), theirs.get(key)) {
            (Some(Entry::Modified(a)), Some(Entry::Modified(b))) => merge_op(a, b, &path.child(key), resolver),
            (Some(a), Some(b)) => decide(
                &path.child(key),
                &entry_op(a, x.guards.clock),
                &entry_op(b, y.guards.clock),
                resolver,
            ),
            (Some(a), None) => entry_op(a, None),
            (None, Some(b)) => entry_op(b, None),
            (None, None) => continue,
        };
        match merged.kind {
            OpKind::Value { old, new: None } => {
                removed.insert(key.clone(), old);
            }
            OpKind::Value { old: None, new: Some(v) } => {
                added.insert(key.clone(), v);
            }
            kind => {
                modified.insert(key.clone(), Operation { kind, guards: merged.guards });
            }
        }
    }
    OpKind::Map { added, removed, modified }
}

// ── Keyed lists ───────────────────────────────────────────────────────────

fn is_entity_list(edits: &[ListEdit]) -> bool {
    !edits.is_empty() && edits.iter().all(|e| e.key.is_some() && e.kind != EditKind::Copy)
}

fn edit_clock(edit: &ListEdit) -> Option<Clock> {
    let nested = edit.patch.as_ref().and_then(|p| p.effective_clock());
    edit.guards.clock.max(nested)
}

/// Edits grouped by entity, each stamped with the list node's clock when it
/// carries none.
fn bundles(edits: &[ListEdit], clock: Option<Clock>) -> BTreeMap<Key, Vec<ListEdit>> {
    let mut out: BTreeMap<Key, Vec<ListEdit>> = BTreeMap::new();
    for edit in edits {
        let Some(key) = &edit.key else { continue };
        let mut edit = edit.clone();
        if edit.guards.clock.is_none() {
            edit.guards.clock = clock;
        }
        out.entry(key.clone()).or_default().push(edit);
    }
    out
}

fn merge_entities(
    a: &[ListEdit],
    a_clock: Option<Clock>,
    b: &[ListEdit],
    b_clock: Option<Clock>,
    path: &Path,
    resolver: Option<&dyn MergeResolver>,
) -> Vec<ListEdit> {
    let ours = bundles(a, a_clock);
    let theirs = bundles(b, b_clock);
    let keys: BTreeSet<&Key> = ours.keys().chain(theirs.keys()).collect();
    let mut chosen = Vec::new();
    for key in keys {
        match (ours.get(key), theirs.get(key)) {
            (Some(x), Some(y)) => chosen.extend(merge_bundle(key, x, y, path, resolver)),
            (Some(only), None) | (None, Some(only)) => chosen.extend(only.iter().cloned()),
            (None, None) => {}
        }
    }
    canonical_order(chosen)
}

fn merge_bundle(
    key: &Key,
    x: &[ListEdit],
    y: &[ListEdit],
    path: &Path,
    resolver: Option<&dyn MergeResolver>,
) -> Vec<ListEdit> {
    let bundle_clock = |b: &[ListEdit]| b.iter().map(edit_clock).max().flatten();
    let removes = |b: &[ListEdit]| b.iter().any(|e| e.kind == EditKind::Remove);
    if removes(x) || removes(y) {
        return if bundle_clock(y) > bundle_clock(x) { y.to_vec() } else { x.to_vec() };
    }

    let structural = |b: &[ListEdit]| b.iter().find(|e| e.kind != EditKind::Replace).cloned();
    let replace = |b: &[ListEdit]| b.iter().find(|e| e.kind == EditKind::Replace).cloned();
    let mut out = Vec::new();
    match (structural(x), structural(y)) {
        (Some(sx), Some(sy)) => out.push(if edit_clock(&sy) > edit_clock(&sx) { sy } else { sx }),
        (Some(s), None) | (None, Some(s)) => out.push(s),
        (None, None) => {}
    }
    match (replace(x), replace(y)) {
        (Some(rx), Some(ry)) => out.push(merge_replace(rx, ry, &path.child(key), resolver)),
        (Some(r), None) | (None, Some(r)) => out.push(r),
        (None, None) => {}
    }
    out
}

fn merge_replace(x: ListEdit, y: ListEdit, path: &Path, resolver: Option<&dyn MergeResolver>) -> ListEdit {
    if let (Some(px), Some(py)) = (&x.patch, &y.patch) {
        let merged = merge_op(px, py, path, resolver);
        let clock = x.guards.clock.max(y.guards.clock);
        let mut edit = ListEdit::patch(x.index, merged);
        edit.key = x.key.clone();
        edit.guards = Guards { clock, ..x.guards };
        return edit;
    }
    if edit_clock(&y) > edit_clock(&x) {
        y
    } else {
        x
    }
}

/// Removals by key, then inserts and moves with predecessors first, then
/// element replacements by key.
fn canonical_order(edits: Vec<ListEdit>) -> Vec<ListEdit> {
    let by_key = |e: &ListEdit| e.key.as_ref().map(|k| (k.to_string(), k.clone()));
    let (mut removes, rest): (Vec<_>, Vec<_>) = edits.into_iter().partition(|e| e.kind == EditKind::Remove);
    let (mut replaces, inserts): (Vec<_>, Vec<_>) = rest.into_iter().partition(|e| e.kind == EditKind::Replace);
    removes.sort_by_cached_key(by_key);
    replaces.sort_by_cached_key(by_key);
    let mut out = removes;
    out.extend(order_by_predecessor(inserts));
    out.extend(replaces);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn record(fields: Vec<(&str, Operation)>) -> Patch {
        let map: IndexMap<String, Operation> = fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        Patch::new(Some(Operation::new(OpKind::Record(map))))
    }

    fn field_kind<'a>(p: &'a Patch, name: &str) -> Option<&'a OpKind> {
        match &p.root.as_ref()?.kind {
            OpKind::Record(fields) => fields.get(name).map(|o| &o.kind),
            _ => None,
        }
    }

    #[test]
    fn disjoint_fields_are_united() {
        let a = record(vec![("A", Operation::replace(1i64.into(), 2i64.into()))]);
        let b = record(vec![("B", Operation::replace(1i64.into(), 3i64.into()))]);
        let m = merge(&a, &b, None);
        assert!(field_kind(&m, "A").is_some());
        assert!(field_kind(&m, "B").is_some());
    }

    #[test]
    fn later_clock_wins_either_way() {
        let early = record(vec![("A", Operation::replace(1i64.into(), 2i64.into()).with_clock(Clock::new(1, 0, 1)))]);
        let late = record(vec![("A", Operation::replace(1i64.into(), 9i64.into()).with_clock(Clock::new(2, 0, 2)))]);
        for m in [merge(&early, &late, None), merge(&late, &early, None)] {
            let Some(OpKind::Value { new, .. }) = field_kind(&m, "A") else { panic!("expected value op") };
            assert_eq!(new, &Some(Value::Int(9)));
        }
    }

    #[test]
    fn resolver_decides_conflicts() {
        let a = record(vec![("A", Operation::replace(1i64.into(), 2i64.into()))]);
        let b = record(vec![("A", Operation::replace(1i64.into(), 3i64.into()))]);
        let sum = |_: &Path, _: &Operation, _: &Operation| Operation::replace(1i64.into(), 5i64.into());
        let m = merge(&a, &b, Some(&sum));
        let Some(OpKind::Value { new, .. }) = field_kind(&m, "A") else { panic!("expected value op") };
        assert_eq!(new, &Some(Value::Int(5)));
    }

    #[test]
    fn keyed_edits_have_canonical_order() {
        let add = |id: i64| ListEdit::add(0, Value::Int(id)).keyed(Key::Int(id)).after(Some(Key::Int(1)));
        let a = Patch::new(Some(Operation::new(OpKind::List(vec![add(4), ListEdit::remove(0, None).keyed(Key::Int(2))]))));
        let b = Patch::new(Some(Operation::new(OpKind::List(vec![add(3)]))));
        let keys = |p: &Patch| match &p.root.as_ref().map(|o| &o.kind) {
            Some(OpKind::List(edits)) => edits.iter().map(|e| (e.kind, e.key.clone())).collect::<Vec<_>>(),
            _ => Vec::new(),
        };
        let ab = merge(&a, &b, None);
        let ba = merge(&b, &a, None);
        assert_eq!(keys(&ab), keys(&ba));
        assert_eq!(
            keys(&ab),
            vec![
                (EditKind::Remove, Some(Key::Int(2))),
                (EditKind::Add, Some(Key::Int(3))),
                (EditKind::Add, Some(Key::Int(4))),
            ]
        );
    }
}
