//! Cycle-safe structural equality.

use std::collections::HashSet;

use crate::value::{CellId, Value};

/// Performs a deep equality check between two values.
///
/// - Numbers compare numerically across `Int`, `Uint` and `Float`.
/// - Record fields declared `ignore` are not compared.
/// - Reference pairs already under comparison are treated as equal, so
///   cyclic graphs terminate.
/// - `Unsupported` values are never equal to anything.
///
/// ```
/// use structpatch_value::{deep_equal, Value};
///
/// let a = Value::list([1i64, 2, 3]);
/// let b = Value::list([1.0, 2.0, 3.0]);
/// assert!(deep_equal(&a, &b));
/// ```
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    let mut visited = HashSet::new();
    equal_inner(a, b, &mut visited)
}

fn equal_inner(a: &Value, b: &Value, visited: &mut HashSet<(CellId, CellId)>) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,

        (Value::Int(_) | Value::Uint(_) | Value::Float(_), _) => numbers_equal(a, b),

        (Value::Record(ra), Value::Record(rb)) => {
            if ra.type_name() != rb.type_name() {
                return false;
            }
            let ty = ra.ty();
            for (name, va) in ra.fields() {
                if ty.policy(name).ignore {
                    continue;
                }
                match rb.get(name) {
                    Some(vb) => {
                        if !equal_inner(va, vb, visited) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
            true
        }

        (Value::Array(xs), Value::Array(ys)) | (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len()
                && xs.iter().zip(ys).all(|(x, y)| equal_inner(x, y, visited))
        }

        (Value::Map(ma), Value::Map(mb)) => {
            if ma.len() != mb.len() {
                return false;
            }
            for (key, va) in ma.iter() {
                match mb.get(key) {
                    Some(vb) => {
                        if !equal_inner(va, vb, visited) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
            true
        }

        (Value::Ref(ra), Value::Ref(rb)) => {
            let (Some(ia), Some(ib)) = (ra.id(), rb.id()) else {
                return ra.is_empty() && rb.is_empty();
            };
            if ia == ib || !visited.insert((ia, ib)) {
                return true;
            }
            match (ra.read(), rb.read()) {
                (Some(ga), Some(gb)) => equal_inner(&ga, &gb, visited),
                _ => false,
            }
        }

        (Value::Poly(pa), Value::Poly(pb)) => match (pa.type_name(), pb.type_name()) {
            (None, None) => true,
            (Some(ta), Some(tb)) if ta == tb => match (pa.value(), pb.value()) {
                (Some(va), Some(vb)) => equal_inner(va, vb, visited),
                _ => false,
            },
            _ => false,
        },

        _ => false,
    }
}

fn numbers_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Uint(x), Value::Uint(y)) => x == y,
        (Value::Int(x), Value::Uint(y)) | (Value::Uint(y), Value::Int(x)) => {
            i128::from(*x) == i128::from(*y)
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FieldPolicy, Key, KeyKind, Map, Poly, Record, RecordType, Ref};

    #[test]
    fn numbers_compare_across_kinds() {
        assert!(deep_equal(&Value::Int(3), &Value::Uint(3)));
        assert!(deep_equal(&Value::Uint(3), &Value::Float(3.0)));
        assert!(!deep_equal(&Value::Int(-1), &Value::Uint(u64::MAX)));
        assert!(deep_equal(&Value::Float(f64::NAN), &Value::Float(f64::NAN)));
    }

    #[test]
    fn different_kinds_are_not_equal() {
        assert!(!deep_equal(&Value::from("1"), &Value::Int(1)));
        assert!(!deep_equal(&Value::list([1i64]), &Value::array([1i64])));
        assert!(!deep_equal(&Value::Null, &Value::Ref(Ref::empty())));
    }

    #[test]
    fn ignored_fields_are_skipped() {
        let ty = RecordType::new("T")
            .field("a")
            .field_with("cache", FieldPolicy::ignore())
            .shared();
        let x = Record::new(&ty).with("a", 1i64).with("cache", "x");
        let y = Record::new(&ty).with("a", 1i64).with("cache", "y");
        assert!(deep_equal(&Value::Record(x), &Value::Record(y)));
    }

    #[test]
    fn maps_compare_by_entries() {
        let a = Map::new(KeyKind::Str).with("x", 1i64).with("y", 2i64);
        let b = Map::new(KeyKind::Str).with("y", 2i64).with("x", 1i64);
        assert!(deep_equal(&Value::Map(a.clone()), &Value::Map(b)));
        let c = a.with(Key::from("z"), 3i64);
        assert!(!deep_equal(&Value::Map(c), &Value::Map(Map::new(KeyKind::Str))));
    }

    #[test]
    fn cyclic_refs_terminate() {
        let a = Ref::new(Value::Null);
        a.clone().store(Value::list([Value::Ref(a.clone())]));
        let b = Ref::new(Value::Null);
        b.clone().store(Value::list([Value::Ref(b.clone())]));
        assert!(deep_equal(&Value::Ref(a), &Value::Ref(b)));
    }

    #[test]
    fn poly_compares_type_and_value() {
        let a = Value::Poly(Poly::new("Circle", 1i64));
        let b = Value::Poly(Poly::new("Square", 1i64));
        assert!(!deep_equal(&a, &b));
        assert!(deep_equal(&a, &Value::Poly(Poly::new("Circle", 1u64))));
        assert!(deep_equal(&Value::Poly(Poly::empty()), &Value::Poly(Poly::empty())));
    }

    #[test]
    fn unsupported_never_equal() {
        let f = Value::Unsupported("func".into());
        assert!(!deep_equal(&f, &f.clone()));
    }
}
