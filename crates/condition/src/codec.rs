//! JSON codec for conditions.
//!
//! Conditions travel as predicate objects shaped like JSON Patch predicate
//! operations:
//!
//! ```json
//! {"op": "compare", "path": "/A", "cmp": ">", "value": 1}
//! {"op": "contains", "path": "/Name", "value": "x", "ignore_case": true}
//! {"op": "and", "path": "/Items/0", "apply": [ ... ]}
//! ```
//!
//! The `path` of a composite predicate is a prefix for the paths inside it.

use serde_json::{json, Map, Value as Json};
use structpatch_pointer::{format, parse, Path};
use structpatch_value::Value;

use crate::error::ConditionError;
use crate::types::{CmpOp, Condition, StringOp, TypeKind};

// ── Helpers ───────────────────────────────────────────────────────────────

fn invalid(msg: impl Into<String>) -> ConditionError {
    ConditionError::InvalidPredicate(msg.into())
}

fn encode_path(path: &Path) -> Json {
    Json::String(format(path))
}

fn decode_path(obj: &Map<String, Json>, key: &str, base: &Path) -> Result<Path, ConditionError> {
    let s = obj
        .get(key)
        .and_then(Json::as_str)
        .ok_or_else(|| invalid(format!("{key} must be a string")))?;
    Ok(base.join(&parse(s)))
}

fn decode_str<'a>(obj: &'a Map<String, Json>, key: &str) -> Result<&'a str, ConditionError> {
    obj.get(key)
        .and_then(Json::as_str)
        .ok_or_else(|| invalid(format!("{key} must be a string")))
}

fn ignore_case(obj: &Map<String, Json>) -> bool {
    obj.get("ignore_case").and_then(Json::as_bool).unwrap_or(false)
}

fn with_ignore_case(mut m: Map<String, Json>, fold_case: bool) -> Json {
    if fold_case {
        m.insert("ignore_case".into(), Json::Bool(true));
    }
    Json::Object(m)
}

// ── Serialization ─────────────────────────────────────────────────────────

/// Serializes a condition to a predicate object.
pub fn to_json(cond: &Condition) -> Json {
    let mut m = Map::new();
    m.insert("op".into(), Json::String(cond.op_name().to_string()));
    match cond {
        Condition::Compare { path, op, value, fold_case } => {
            m.insert("path".into(), encode_path(path));
            m.insert("cmp".into(), json!(op.as_str()));
            m.insert("value".into(), value.to_json());
            with_ignore_case(m, *fold_case)
        }
        Condition::CompareFields { left, op, right, fold_case } => {
            m.insert("path".into(), encode_path(left));
            m.insert("cmp".into(), json!(op.as_str()));
            m.insert("right".into(), encode_path(right));
            with_ignore_case(m, *fold_case)
        }
        Condition::Defined { path } | Condition::Undefined { path } => {
            m.insert("path".into(), encode_path(path));
            Json::Object(m)
        }
        Condition::TypeOf { path, kind } => {
            m.insert("path".into(), encode_path(path));
            m.insert("value".into(), json!(kind.as_str()));
            Json::Object(m)
        }
        Condition::StringPred { path, needle, fold_case, .. } => {
            m.insert("path".into(), encode_path(path));
            m.insert("value".into(), json!(needle));
            with_ignore_case(m, *fold_case)
        }
        Condition::In { path, values, fold_case } => {
            m.insert("path".into(), encode_path(path));
            m.insert("value".into(), Json::Array(values.iter().map(Value::to_json).collect()));
            with_ignore_case(m, *fold_case)
        }
        Condition::Log { message } => {
            m.insert("value".into(), json!(message));
            Json::Object(m)
        }
        Condition::And(items) | Condition::Or(items) => {
            m.insert("path".into(), json!(""));
            m.insert("apply".into(), Json::Array(items.iter().map(to_json).collect()));
            Json::Object(m)
        }
        Condition::Not(inner) => {
            m.insert("path".into(), json!(""));
            m.insert("apply".into(), Json::Array(vec![to_json(inner)]));
            Json::Object(m)
        }
    }
}

// ── Deserialization ───────────────────────────────────────────────────────

/// Deserializes a predicate object.
pub fn from_json(v: &Json) -> Result<Condition, ConditionError> {
    decode(v, &Path::root())
}

fn decode(v: &Json, base: &Path) -> Result<Condition, ConditionError> {
    let obj = v.as_object().ok_or_else(|| invalid("predicate must be an object"))?;
    let op = decode_str(obj, "op")?;

    match op {
        "compare" => Ok(Condition::Compare {
            path: decode_path(obj, "path", base)?,
            op: CmpOp::from_str(decode_str(obj, "cmp")?)?,
            value: Value::from_json(obj.get("value").ok_or_else(|| invalid("missing value"))?),
            fold_case: ignore_case(obj),
        }),
        "compare_fields" => Ok(Condition::CompareFields {
            left: decode_path(obj, "path", base)?,
            op: CmpOp::from_str(decode_str(obj, "cmp")?)?,
            right: decode_path(obj, "right", base)?,
            fold_case: ignore_case(obj),
        }),
        "defined" => Ok(Condition::Defined { path: decode_path(obj, "path", base)? }),
        "undefined" => Ok(Condition::Undefined { path: decode_path(obj, "path", base)? }),
        "type" => Ok(Condition::TypeOf {
            path: decode_path(obj, "path", base)?,
            kind: TypeKind::from_str(decode_str(obj, "value")?)?,
        }),
        "in" => {
            let values = obj
                .get("value")
                .and_then(Json::as_array)
                .ok_or_else(|| invalid("in value must be an array"))?;
            Ok(Condition::In {
                path: decode_path(obj, "path", base)?,
                values: values.iter().map(Value::from_json).collect(),
                fold_case: ignore_case(obj),
            })
        }
        "log" => Ok(Condition::Log { message: decode_str(obj, "value")?.to_string() }),
        "and" | "or" | "not" => {
            let prefix = match obj.get("path") {
                Some(_) => decode_path(obj, "path", base)?,
                None => base.clone(),
            };
            let items = obj
                .get("apply")
                .and_then(Json::as_array)
                .ok_or_else(|| invalid(format!("{op} apply must be an array")))?
                .iter()
                .map(|c| decode(c, &prefix))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(match op {
                "and" => Condition::And(items),
                "or" => Condition::Or(items),
                _ => match <[Condition; 1]>::try_from(items) {
                    Ok([single]) => Condition::Not(Box::new(single)),
                    Err(items) => Condition::Not(Box::new(Condition::And(items))),
                },
            })
        }
        other => match StringOp::from_name(other) {
            Some(sop) => Ok(Condition::StringPred {
                path: decode_path(obj, "path", base)?,
                op: sop,
                needle: decode_str(obj, "value")?.to_string(),
                fold_case: ignore_case(obj),
            }),
            None => Err(invalid(format!("unknown predicate: {other}"))),
        },
    }
}

impl Condition {
    pub fn to_json(&self) -> Json {
        to_json(self)
    }

    pub fn from_json(v: &Json) -> Result<Condition, ConditionError> {
        from_json(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::field;

    #[test]
    fn compare_shape() {
        let c = field("A.B").fold_case().eq("x");
        assert_eq!(
            to_json(&c),
            json!({"op": "compare", "path": "/A/B", "cmp": "==", "value": "x", "ignore_case": true})
        );
    }

    #[test]
    fn composite_path_prefixes_children() {
        let v = json!({
            "op": "and",
            "path": "/Items/0",
            "apply": [
                {"op": "defined", "path": "/Name"},
                {"op": "not", "apply": [{"op": "starts", "path": "/Name", "value": "tmp"}]}
            ]
        });
        let c = from_json(&v).unwrap();
        let paths: Vec<String> = c.paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["/Items/0/Name", "/Items/0/Name"]);
    }

    #[test]
    fn rejects_unknown_ops() {
        assert!(matches!(
            from_json(&json!({"op": "frobnicate", "path": ""})),
            Err(ConditionError::InvalidPredicate(_))
        ));
        assert!(from_json(&json!({"op": "compare", "path": "/A", "cmp": "=~", "value": 1})).is_err());
    }
}
