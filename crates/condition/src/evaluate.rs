//! Condition evaluation.

use std::cmp::Ordering;

use regex::Regex;
use structpatch_pointer::{resolve, Path};
use structpatch_value::{deep_equal, Value};

use crate::error::ConditionError;
use crate::types::{CmpOp, Condition, StringOp, TypeKind};

/// Evaluates `condition` against `root`.
pub fn evaluate(condition: &Condition, root: &Value) -> Result<bool, ConditionError> {
    match condition {
        Condition::Compare { path, op, value, fold_case } => {
            let left = lookup(root, path);
            compare(left.as_ref(), Some(&value.resolved()), *op, *fold_case)
        }
        Condition::CompareFields { left, op, right, fold_case } => {
            let l = lookup(root, left);
            let r = lookup(root, right);
            compare(l.as_ref(), r.as_ref(), *op, *fold_case)
        }
        Condition::Defined { path } => Ok(lookup(root, path).is_some()),
        Condition::Undefined { path } => Ok(lookup(root, path).is_none()),
        Condition::TypeOf { path, kind } => {
            Ok(TypeKind::of(lookup(root, path).as_ref()) == *kind)
        }
        Condition::StringPred { path, op, needle, fold_case } => {
            let Some(Value::String(target)) = lookup(root, path) else {
                return Ok(false);
            };
            string_predicate(&target, *op, needle, *fold_case)
        }
        Condition::In { path, values, fold_case } => {
            let Some(target) = lookup(root, path) else {
                return Ok(false);
            };
            for candidate in values {
                if compare(Some(&target), Some(&candidate.resolved()), CmpOp::Eq, *fold_case)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Log { message } => {
            tracing::info!(text = %message, "condition log");
            Ok(true)
        }
        Condition::And(items) => {
            for c in items {
                if !evaluate(c, root)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Or(items) => {
            for c in items {
                if evaluate(c, root)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Not(inner) => evaluate(inner, root).map(|b| !b),
    }
}

impl Condition {
    pub fn evaluate(&self, root: &Value) -> Result<bool, ConditionError> {
        evaluate(self, root)
    }
}

fn lookup(root: &Value, path: &Path) -> Option<Value> {
    resolve(root, path)
}

/// Compares two resolved operands. A `None` operand (missing location) is
/// incompatible with everything.
pub fn compare(
    left: Option<&Value>,
    right: Option<&Value>,
    op: CmpOp,
    fold_case: bool,
) -> Result<bool, ConditionError> {
    let ordering = match (left, right) {
        (Some(l), Some(r)) => order(l, r, fold_case),
        _ => None,
    };
    match ordering {
        Some(ord) => Ok(match op {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }),
        None => {
            let equal = match (left, right) {
                (Some(l), Some(r)) => deep_equal(l, r),
                _ => false,
            };
            match op {
                CmpOp::Eq => Ok(equal),
                CmpOp::Ne => Ok(!equal),
                _ => Err(ConditionError::Incomparable {
                    op,
                    left: left.map_or("undefined", Value::kind_name),
                    right: right.map_or("undefined", Value::kind_name),
                }),
            }
        }
    }
}

/// Total order between scalars of compatible kinds; `None` otherwise.
fn order(l: &Value, r: &Value, fold_case: bool) -> Option<Ordering> {
    match (l, r) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(if fold_case {
            a.to_lowercase().cmp(&b.to_lowercase())
        } else {
            a.cmp(b)
        }),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Uint(a), Value::Uint(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Uint(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
        (Value::Uint(a), Value::Int(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    }
}

fn string_predicate(
    target: &str,
    op: StringOp,
    needle: &str,
    fold_case: bool,
) -> Result<bool, ConditionError> {
    if op == StringOp::Matches {
        let pattern = if fold_case { format!("(?i){needle}") } else { needle.to_string() };
        let re = Regex::new(&pattern).map_err(|e| ConditionError::InvalidRegex(e.to_string()))?;
        return Ok(re.is_match(target));
    }
    let (target, needle) = if fold_case {
        (target.to_lowercase(), needle.to_lowercase())
    } else {
        (target.to_string(), needle.to_string())
    };
    Ok(match op {
        StringOp::Contains => target.contains(&needle),
        StringOp::Starts => target.starts_with(&needle),
        StringOp::Ends => target.ends_with(&needle),
        StringOp::Matches => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use structpatch_pointer::parse;

    #[test]
    fn numbers_compare_across_kinds() {
        assert!(compare(Some(&Value::Int(-1)), Some(&Value::Uint(0)), CmpOp::Lt, false).unwrap());
        assert!(compare(Some(&Value::Float(2.5)), Some(&Value::Int(2)), CmpOp::Gt, false).unwrap());
        assert!(compare(Some(&Value::Uint(3)), Some(&Value::Float(3.0)), CmpOp::Eq, false).unwrap());
    }

    #[test]
    fn incompatible_kinds() {
        let s = Value::from("1");
        let n = Value::Int(1);
        assert!(!compare(Some(&s), Some(&n), CmpOp::Eq, false).unwrap());
        assert!(compare(Some(&s), Some(&n), CmpOp::Ne, false).unwrap());
        assert!(matches!(
            compare(Some(&s), Some(&n), CmpOp::Lt, false),
            Err(ConditionError::Incomparable { left: "string", right: "int", .. })
        ));
        assert!(matches!(
            compare(None, Some(&n), CmpOp::Ge, false),
            Err(ConditionError::Incomparable { left: "undefined", .. })
        ));
    }

    #[test]
    fn fold_case_strings() {
        let a = Value::from("Hello");
        let b = Value::from("hello");
        assert!(!compare(Some(&a), Some(&b), CmpOp::Eq, false).unwrap());
        assert!(compare(Some(&a), Some(&b), CmpOp::Eq, true).unwrap());
        assert!(string_predicate("Hello", StringOp::Starts, "he", true).unwrap());
        assert!(string_predicate("Hello", StringOp::Matches, "^h.*O$", true).unwrap());
        assert!(!string_predicate("Hello", StringOp::Matches, "^h", false).unwrap());
    }

    #[test]
    fn invalid_regex_is_an_error() {
        let cond = Condition::StringPred {
            path: Path::root(),
            op: StringOp::Matches,
            needle: "(".into(),
            fold_case: false,
        };
        assert!(matches!(cond.evaluate(&Value::from("x")), Err(ConditionError::InvalidRegex(_))));
    }

    #[test]
    fn defined_never_errors() {
        let root = Value::list([1i64]);
        assert!(evaluate(&Condition::Defined { path: parse("/0") }, &root).unwrap());
        assert!(!evaluate(&Condition::Defined { path: parse("/5/x") }, &root).unwrap());
        assert!(evaluate(&Condition::Undefined { path: parse("/5/x") }, &root).unwrap());
    }
}
