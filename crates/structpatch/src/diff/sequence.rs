//! Positional list diff: common-affix trim, then a Levenshtein table over
//! the remaining middle run.

use structpatch_pointer::Path;
use structpatch_value::{deep_equal, Value};

use super::Differ;
use crate::error::DiffError;
use crate::patch::{ListEdit, OpKind, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Element kept or substituted: source index, target index.
    Pair(usize, usize),
    Delete(usize),
    Insert(usize),
}

impl Differ {
    /// Edit script turning `xs` into `ys`. Indices are positions at the time
    /// each edit applies.
    pub(super) fn sequence(&mut self, path: &Path, xs: &[Value], ys: &[Value]) -> Result<Vec<ListEdit>, DiffError> {
        let prefix = xs.iter().zip(ys).take_while(|(x, y)| deep_equal(x, y)).count();
        let room = xs.len().min(ys.len()) - prefix;
        let suffix = xs
            .iter()
            .rev()
            .zip(ys.iter().rev())
            .take(room)
            .take_while(|(x, y)| deep_equal(x, y))
            .count();
        let old = &xs[prefix..xs.len() - suffix];
        let new = &ys[prefix..ys.len() - suffix];

        let mut edits = Vec::new();
        if old.is_empty() {
            // pure append (or insertion run)
            for (i, y) in new.iter().enumerate() {
                let at = prefix + i;
                edits.push(ListEdit::add(at, self.snapshot(&path.child(at), y)?));
            }
            return Ok(edits);
        }
        if new.is_empty() {
            // pure truncate (or deletion run)
            for x in old {
                edits.push(ListEdit::remove(prefix, Some(self.snapshot(&path.child(prefix), x)?)));
            }
            return Ok(edits);
        }

        let mut at = prefix;
        for step in backtrack(old, new) {
            match step {
                Step::Pair(i, j) => {
                    if let Some(op) = self.node(&path.child(at), &old[i], &new[j])? {
                        edits.push(element_edit(at, op));
                    }
                    at += 1;
                }
                Step::Delete(i) => {
                    edits.push(ListEdit::remove(at, Some(self.snapshot(&path.child(at), &old[i])?)));
                }
                Step::Insert(j) => {
                    edits.push(ListEdit::add(at, self.snapshot(&path.child(at), &new[j])?));
                    at += 1;
                }
            }
        }
        Ok(edits)
    }
}

/// Turns an element sub-diff into a list edit: whole-value replacements
/// become `set`, anything else is applied to the element in place.
pub(super) fn element_edit(index: usize, op: Operation) -> ListEdit {
    match op.kind {
        OpKind::Value { old, new: Some(new) } if op.guards.is_empty() => ListEdit::set(index, new, old),
        kind => ListEdit::patch(index, Operation { kind, guards: op.guards }),
    }
}

/// Minimal edit path through the Levenshtein table, in source order.
fn backtrack(old: &[Value], new: &[Value]) -> Vec<Step> {
    let (n, m) = (old.len(), new.len());
    let same: Vec<Vec<bool>> = old
        .iter()
        .map(|x| new.iter().map(|y| deep_equal(x, y)).collect())
        .collect();
    let sub = |i: usize, j: usize| usize::from(!same[i][j]);

    let mut cost = vec![vec![0usize; m + 1]; n + 1];
    cost[0] = (0..=m).collect();
    for (i, row) in cost.iter_mut().enumerate() {
        row[0] = i;
    }
    for i in 1..=n {
        for j in 1..=m {
            let diagonal = cost[i - 1][j - 1] + sub(i - 1, j - 1);
            let delete = cost[i - 1][j] + 1;
            let insert = cost[i][j - 1] + 1;
            cost[i][j] = diagonal.min(delete).min(insert);
        }
    }

    let mut steps = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && cost[i][j] == cost[i - 1][j - 1] + sub(i - 1, j - 1) {
            steps.push(Step::Pair(i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if i > 0 && cost[i][j] == cost[i - 1][j] + 1 {
            steps.push(Step::Delete(i - 1));
            i -= 1;
        } else {
            steps.push(Step::Insert(j - 1));
            j -= 1;
        }
    }
    steps.reverse();
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{EditKind, Patch};
    use structpatch_value::deep_copy;

    fn script(a: &Value, b: &Value) -> Vec<ListEdit> {
        match crate::diff::diff(a, b).unwrap().map(|op| op.kind) {
            Some(OpKind::List(edits)) => edits,
            Some(other) => panic!("expected list op, got {other:?}"),
            None => Vec::new(),
        }
    }

    fn round_trip(a: &Value, b: &Value) {
        let mut target = deep_copy(a);
        Patch::diff(a, b).unwrap().apply(&mut target).unwrap();
        assert_eq!(&target, b);
    }

    #[test]
    fn single_insertion_is_one_add() {
        let a = Value::list([1i64, 2, 3, 4]);
        let b = Value::list([1i64, 2, 9, 3, 4]);
        let edits = script(&a, &b);
        assert_eq!(edits, vec![ListEdit::add(2, Value::Int(9))]);
        round_trip(&a, &b);
    }

    #[test]
    fn append_and_truncate_fast_paths() {
        let a = Value::list(["a"]);
        let b = Value::list(["a", "b", "c"]);
        assert_eq!(
            script(&a, &b),
            vec![ListEdit::add(1, "b".into()), ListEdit::add(2, "c".into())]
        );
        assert_eq!(
            script(&b, &a),
            vec![ListEdit::remove(1, Some("b".into())), ListEdit::remove(1, Some("c".into()))]
        );
    }

    #[test]
    fn substitution_is_preferred_over_delete_insert() {
        let a = Value::list(["a", "b"]);
        let b = Value::list(["a", "c"]);
        let edits = script(&a, &b);
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].kind, EditKind::Replace);
        assert_eq!(edits[0].index, 1);
    }

    #[test]
    fn mixed_scripts_round_trip() {
        let cases = [
            (vec!["a", "b", "c", "d"], vec!["b", "x", "d", "e"]),
            (vec!["a", "b", "c"], vec!["c", "b", "a"]),
            (vec![], vec!["a"]),
            (vec!["q", "r", "s"], vec![]),
            (vec!["a", "a", "b"], vec!["b", "a", "a"]),
        ];
        for (a, b) in cases {
            round_trip(&Value::list(a), &Value::list(b));
        }
    }

    #[test]
    fn nested_lists_get_sub_patches() {
        let a = Value::list([Value::list([1i64, 2]), Value::list([3i64])]);
        let b = Value::list([Value::list([1i64, 2, 5]), Value::list([3i64])]);
        let edits = script(&a, &b);
        assert_eq!(edits.len(), 1);
        assert!(edits[0].patch.is_some());
        round_trip(&a, &b);
    }
}
