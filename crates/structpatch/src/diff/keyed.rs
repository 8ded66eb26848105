//! Entity-aligned list diff.
//!
//! Elements are matched by their entity key regardless of position.
//! Source-only entities are removed first; the target is then walked in
//! order, adding new entities after their predecessor and moving shared
//! entities that fall outside the longest common subsequence of shared keys.
//! Positions are taken from a simulation of the key order.

use std::collections::{BTreeSet, HashMap};

use structpatch_pointer::Path;
use structpatch_value::{Key, Value};

use super::sequence::element_edit;
use super::Differ;
use crate::error::DiffError;
use crate::patch::ListEdit;

impl Differ {
    pub(super) fn keyed(
        &mut self,
        path: &Path,
        xs: &[Value],
        ys: &[Value],
        ka: &[Key],
        kb: &[Key],
    ) -> Result<Vec<ListEdit>, DiffError> {
        let source: HashMap<&Key, usize> = ka.iter().enumerate().map(|(i, k)| (k, i)).collect();
        let target: BTreeSet<&Key> = kb.iter().collect();
        let source_prev = |i: usize| i.checked_sub(1).map(|p| ka[p].clone());

        let mut order: Vec<&Key> = ka.iter().collect();
        let mut edits = Vec::new();

        for (i, key) in ka.iter().enumerate() {
            if target.contains(key) {
                continue;
            }
            let at = position(&order, key);
            order.remove(at);
            let old = self.snapshot(&path.child(at), &xs[i])?;
            edits.push(ListEdit::remove(at, Some(old)).keyed(key.clone()).was_after(source_prev(i)));
        }

        let shared_a: Vec<&Key> = ka.iter().filter(|k| target.contains(k)).collect();
        let shared_b: Vec<&Key> = kb.iter().filter(|k| source.contains_key(k)).collect();
        let stable = lcs(&shared_a, &shared_b);

        for (j, key) in kb.iter().enumerate() {
            let prev = j.checked_sub(1).map(|p| &kb[p]);
            let after = |order: &[&Key]| prev.map_or(0, |p| position(order, p) + 1);
            match source.get(key) {
                None => {
                    let at = after(&order[..]);
                    order.insert(at, key);
                    let value = self.snapshot(&path.child(j), &ys[j])?;
                    edits.push(ListEdit::add(at, value).keyed(key.clone()).after(prev.cloned()));
                }
                Some(&i) => {
                    if !stable.contains(key) {
                        let from = position(&order, key);
                        order.remove(from);
                        let at = after(&order[..]);
                        order.insert(at, key);
                        edits.push(
                            ListEdit::move_to(from, at)
                                .keyed(key.clone())
                                .after(prev.cloned())
                                .was_after(source_prev(i)),
                        );
                    }
                    if let Some(op) = self.node(&path.child(j), &xs[i], &ys[j])? {
                        let at = position(&order, key);
                        edits.push(element_edit(at, op).keyed(key.clone()));
                    }
                }
            }
        }
        Ok(edits)
    }
}

fn position(order: &[&Key], key: &Key) -> usize {
    order.iter().position(|k| *k == key).unwrap_or(order.len())
}

/// Keys of a longest common subsequence of two key sequences.
fn lcs<'k>(a: &[&'k Key], b: &[&'k Key]) -> BTreeSet<&'k Key> {
    let (n, m) = (a.len(), b.len());
    let mut len = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            len[i][j] = if a[i] == b[j] {
                len[i + 1][j + 1] + 1
            } else {
                len[i + 1][j].max(len[i][j + 1])
            };
        }
    }
    let mut out = BTreeSet::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            out.insert(a[i]);
            i += 1;
            j += 1;
        } else if len[i + 1][j] >= len[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{EditKind, OpKind, Patch};
    use structpatch_value::{deep_copy, FieldPolicy, Record, RecordType};

    fn entity(id: i64, name: &str) -> Value {
        let ty = RecordType::new("Entity")
            .field_with("id", FieldPolicy::key())
            .field("name")
            .shared();
        Value::Record(Record::new(&ty).with("id", id).with("name", name))
    }

    fn edits(a: &Value, b: &Value) -> Vec<ListEdit> {
        match crate::diff::diff(a, b).unwrap().map(|op| op.kind) {
            Some(OpKind::List(edits)) => edits,
            other => panic!("expected list op, got {other:?}"),
        }
    }

    #[test]
    fn swap_is_a_single_move() {
        let a = Value::list([entity(1, "a"), entity(2, "b")]);
        let b = Value::list([entity(2, "b"), entity(1, "a")]);
        let script = edits(&a, &b);
        assert_eq!(script.len(), 1);
        assert_eq!(script[0].kind, EditKind::Move);
        assert!(script[0].value.is_none() && script[0].patch.is_none());

        let mut target = deep_copy(&a);
        Patch::diff(&a, &b).unwrap().apply(&mut target).unwrap();
        assert_eq!(target, b);
    }

    #[test]
    fn adds_carry_their_predecessor() {
        let a = Value::list([entity(1, "a"), entity(3, "c")]);
        let b = Value::list([entity(1, "a"), entity(2, "b"), entity(3, "c")]);
        let script = edits(&a, &b);
        assert_eq!(script.len(), 1);
        assert_eq!(script[0].kind, EditKind::Add);
        assert_eq!(script[0].key, Some(Key::Int(2)));
        assert_eq!(script[0].prev, Some(Key::Int(1)));
        assert_eq!(script[0].index, 1);
    }

    #[test]
    fn removal_records_source_predecessor() {
        let a = Value::list([entity(1, "a"), entity(2, "b"), entity(3, "c")]);
        let b = Value::list([entity(1, "a"), entity(3, "c")]);
        let script = edits(&a, &b);
        assert_eq!(script.len(), 1);
        assert_eq!(script[0].kind, EditKind::Remove);
        assert_eq!(script[0].from_prev, Some(Key::Int(1)));
        assert!(script[0].old.is_some());
    }

    #[test]
    fn changed_entities_get_replaces() {
        let a = Value::list([entity(1, "a"), entity(2, "b")]);
        let b = Value::list([entity(1, "a"), entity(2, "B")]);
        let script = edits(&a, &b);
        assert_eq!(script.len(), 1);
        assert_eq!(script[0].kind, EditKind::Replace);
        assert_eq!(script[0].key, Some(Key::Int(2)));
        assert!(script[0].patch.is_some());
    }

    #[test]
    fn reorder_add_remove_and_change_round_trip() {
        let a = Value::list([entity(1, "a"), entity(2, "b"), entity(3, "c"), entity(4, "d")]);
        let b = Value::list([entity(4, "D"), entity(5, "e"), entity(2, "b"), entity(1, "a")]);
        let mut target = deep_copy(&a);
        Patch::diff(&a, &b).unwrap().apply(&mut target).unwrap();
        assert_eq!(target, b);
    }

    #[test]
    fn lcs_keeps_longest_run() {
        let k: Vec<Key> = (1..=4).map(Key::Int).collect();
        let a = vec![&k[0], &k[1], &k[2], &k[3]];
        let b = vec![&k[3], &k[0], &k[1], &k[2]];
        let stable = lcs(&a, &b);
        assert_eq!(stable.len(), 3);
        assert!(!stable.contains(&k[3]));
    }
}
