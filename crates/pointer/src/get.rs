//! Read access by location.

use std::collections::HashSet;

use structpatch_value::{CellId, Value};

use crate::{key_for, Path, PathPart};

/// Runs `f` on the value at `path` without cloning it. Owned references and
/// polymorphic containers are followed before each step; the target itself
/// is passed as stored.
pub fn read<R>(root: &Value, path: &Path, f: impl FnOnce(&Value) -> R) -> Option<R> {
    let mut seen = HashSet::new();
    read_inner(root, path.parts(), &mut seen, f)
}

fn read_inner<R>(
    current: &Value,
    parts: &[PathPart],
    seen: &mut HashSet<CellId>,
    f: impl FnOnce(&Value) -> R,
) -> Option<R> {
    let Some((part, rest)) = parts.split_first() else {
        return Some(f(current));
    };
    match current {
        Value::Ref(r) => {
            // A reference cycle with no record in between never resolves.
            if !seen.insert(r.id()?) {
                return None;
            }
            let guard = r.read()?;
            read_inner(&guard, parts, seen, f)
        }
        Value::Poly(p) => read_inner(p.value()?, parts, seen, f),
        Value::Record(rec) => {
            seen.clear();
            read_inner(rec.get(&part.as_text())?, rest, seen, f)
        }
        Value::Array(items) | Value::List(items) => {
            seen.clear();
            read_inner(items.get(part.index()?)?, rest, seen, f)
        }
        Value::Map(map) => {
            seen.clear();
            let key = key_for(part, map.key_kind()).ok()?;
            read_inner(map.get(&key)?, rest, seen, f)
        }
        _ => None,
    }
}

/// A copy of the value stored at `path`, or `None` when it does not resolve.
pub fn get(root: &Value, path: &Path) -> Option<Value> {
    read(root, path, Value::clone)
}

/// Like [`get`], with wrappers around the target stripped as well. Empty
/// wrappers resolve to `None`.
pub fn resolve(root: &Value, path: &Path) -> Option<Value> {
    read(root, path, |v| {
        if v.is_empty_ref() {
            None
        } else {
            Some(v.resolved())
        }
    })
    .flatten()
}

pub fn contains(root: &Value, path: &Path) -> bool {
    read(root, path, |_| ()).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use structpatch_value::{Key, KeyKind, Map, Poly, Record, RecordType, Ref};

    fn doc() -> Value {
        let ty = RecordType::new("Doc").field("name").field("tags").field("meta").shared();
        let meta = Map::new(KeyKind::Int).with(Key::Int(5), "five");
        Value::Record(
            Record::new(&ty)
                .with("name", "v1")
                .with("tags", Value::list(["a", "b"]))
                .with("meta", Ref::new(Poly::new("Meta", meta))),
        )
    }

    #[test]
    fn resolves_fields_indices_and_keys() {
        let d = doc();
        assert_eq!(get(&d, &parse("/name")), Some(Value::from("v1")));
        assert_eq!(get(&d, &parse("/tags/1")), Some(Value::from("b")));
        assert_eq!(get(&d, &parse("/meta/5")), Some(Value::from("five")));
    }

    #[test]
    fn missing_steps_are_none() {
        let d = doc();
        assert_eq!(get(&d, &parse("/nope")), None);
        assert_eq!(get(&d, &parse("/tags/9")), None);
        assert_eq!(get(&d, &parse("/tags/x")), None);
        assert_eq!(get(&d, &parse("/meta/x")), None);
        assert_eq!(get(&d, &parse("/name/deeper")), None);
    }

    #[test]
    fn get_keeps_target_wrapper_resolve_strips_it() {
        let d = doc();
        assert!(matches!(get(&d, &parse("/meta")), Some(Value::Ref(_))));
        assert!(matches!(resolve(&d, &parse("/meta")), Some(Value::Map(_))));
    }

    #[test]
    fn self_referencing_ref_does_not_loop() {
        let r = Ref::new(Value::Null);
        r.clone().store(Value::Ref(r.clone()));
        assert_eq!(get(&Value::Ref(r), &parse("/a")), None);
    }
}
