//! Condition tree types.

use std::fmt;
use std::ops::Not;

use structpatch_pointer::{Path, PathPart};
use structpatch_value::Value;

use crate::error::ConditionError;

// ── Operators ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, ConditionError> {
        match s {
            "==" => Ok(CmpOp::Eq),
            "!=" => Ok(CmpOp::Ne),
            "<" => Ok(CmpOp::Lt),
            ">" => Ok(CmpOp::Gt),
            "<=" => Ok(CmpOp::Le),
            ">=" => Ok(CmpOp::Ge),
            other => Err(ConditionError::InvalidPredicate(format!("unknown comparison: {other}"))),
        }
    }

    /// The operator to use when the operands swap sides.
    pub fn reversed(self) -> Self {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Ge => CmpOp::Le,
            same => same,
        }
    }

    pub fn is_ordering(&self) -> bool {
        !matches!(self, CmpOp::Eq | CmpOp::Ne)
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
    Undefined,
}

impl TypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::String => "string",
            TypeKind::Number => "number",
            TypeKind::Boolean => "boolean",
            TypeKind::Object => "object",
            TypeKind::Array => "array",
            TypeKind::Null => "null",
            TypeKind::Undefined => "undefined",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, ConditionError> {
        match s {
            "string" => Ok(TypeKind::String),
            "number" => Ok(TypeKind::Number),
            "boolean" => Ok(TypeKind::Boolean),
            "object" => Ok(TypeKind::Object),
            "array" => Ok(TypeKind::Array),
            "null" => Ok(TypeKind::Null),
            "undefined" => Ok(TypeKind::Undefined),
            other => Err(ConditionError::InvalidPredicate(format!("unknown type: {other}"))),
        }
    }

    /// Classifies a resolved value; `None` (missing) is `undefined`.
    pub fn of(value: Option<&Value>) -> TypeKind {
        match value {
            None => TypeKind::Undefined,
            Some(v) => match v {
                Value::String(_) | Value::Bytes(_) => TypeKind::String,
                Value::Int(_) | Value::Uint(_) | Value::Float(_) => TypeKind::Number,
                Value::Bool(_) => TypeKind::Boolean,
                Value::Record(_) | Value::Map(_) => TypeKind::Object,
                Value::Array(_) | Value::List(_) => TypeKind::Array,
                Value::Null => TypeKind::Null,
                Value::Ref(_) | Value::Poly(_) => TypeKind::of(Some(&v.resolved())),
                Value::Unsupported(_) => TypeKind::Undefined,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringOp {
    Contains,
    Starts,
    Ends,
    Matches,
}

impl StringOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StringOp::Contains => "contains",
            StringOp::Starts => "starts",
            StringOp::Ends => "ends",
            StringOp::Matches => "matches",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "contains" => Some(StringOp::Contains),
            "starts" => Some(StringOp::Starts),
            "ends" => Some(StringOp::Ends),
            "matches" => Some(StringOp::Matches),
            _ => None,
        }
    }
}

// ── Condition ─────────────────────────────────────────────────────────────

/// A boolean expression evaluated against a root value.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        path: Path,
        op: CmpOp,
        value: Value,
        fold_case: bool,
    },
    CompareFields {
        left: Path,
        op: CmpOp,
        right: Path,
        fold_case: bool,
    },
    Defined {
        path: Path,
    },
    Undefined {
        path: Path,
    },
    TypeOf {
        path: Path,
        kind: TypeKind,
    },
    StringPred {
        path: Path,
        op: StringOp,
        needle: String,
        fold_case: bool,
    },
    In {
        path: Path,
        values: Vec<Value>,
        fold_case: bool,
    },
    Log {
        message: String,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Always true.
    pub fn always() -> Self {
        Condition::And(Vec::new())
    }

    /// Always false.
    pub fn never() -> Self {
        Condition::Or(Vec::new())
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Condition::Compare { .. } => "compare",
            Condition::CompareFields { .. } => "compare_fields",
            Condition::Defined { .. } => "defined",
            Condition::Undefined { .. } => "undefined",
            Condition::TypeOf { .. } => "type",
            Condition::StringPred { op, .. } => op.as_str(),
            Condition::In { .. } => "in",
            Condition::Log { .. } => "log",
            Condition::And(_) => "and",
            Condition::Or(_) => "or",
            Condition::Not(_) => "not",
        }
    }

    /// Conjunction, flattening nested `And`s.
    pub fn and(self, other: Condition) -> Condition {
        let mut items = match self {
            Condition::And(items) => items,
            single => vec![single],
        };
        match other {
            Condition::And(more) => items.extend(more),
            single => items.push(single),
        }
        Condition::And(items)
    }

    /// Disjunction, flattening nested `Or`s.
    pub fn or(self, other: Condition) -> Condition {
        let mut items = match self {
            Condition::Or(items) => items,
            single => vec![single],
        };
        match other {
            Condition::Or(more) => items.extend(more),
            single => items.push(single),
        }
        Condition::Or(items)
    }

    /// Every location this condition reads, in tree order.
    pub fn paths(&self) -> Vec<&Path> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a Path>) {
        match self {
            Condition::Compare { path, .. }
            | Condition::Defined { path }
            | Condition::Undefined { path }
            | Condition::TypeOf { path, .. }
            | Condition::StringPred { path, .. }
            | Condition::In { path, .. } => out.push(path),
            Condition::CompareFields { left, right, .. } => {
                out.push(left);
                out.push(right);
            }
            Condition::Log { .. } => {}
            Condition::And(items) | Condition::Or(items) => {
                for c in items {
                    c.collect_paths(out);
                }
            }
            Condition::Not(inner) => inner.collect_paths(out),
        }
    }

    /// Applies `f` to every location in the tree.
    pub fn map_paths(&self, f: &impl Fn(&Path) -> Path) -> Condition {
        match self {
            Condition::Compare { path, op, value, fold_case } => Condition::Compare {
                path: f(path),
                op: *op,
                value: value.clone(),
                fold_case: *fold_case,
            },
            Condition::CompareFields { left, op, right, fold_case } => Condition::CompareFields {
                left: f(left),
                op: *op,
                right: f(right),
                fold_case: *fold_case,
            },
            Condition::Defined { path } => Condition::Defined { path: f(path) },
            Condition::Undefined { path } => Condition::Undefined { path: f(path) },
            Condition::TypeOf { path, kind } => Condition::TypeOf { path: f(path), kind: *kind },
            Condition::StringPred { path, op, needle, fold_case } => Condition::StringPred {
                path: f(path),
                op: *op,
                needle: needle.clone(),
                fold_case: *fold_case,
            },
            Condition::In { path, values, fold_case } => Condition::In {
                path: f(path),
                values: values.clone(),
                fold_case: *fold_case,
            },
            Condition::Log { message } => Condition::Log { message: message.clone() },
            Condition::And(items) => Condition::And(items.iter().map(|c| c.map_paths(f)).collect()),
            Condition::Or(items) => Condition::Or(items.iter().map(|c| c.map_paths(f)).collect()),
            Condition::Not(inner) => Condition::Not(Box::new(inner.map_paths(f))),
        }
    }

    /// Strips `prefix` from every location that starts with it.
    pub fn with_relative_prefix(&self, prefix: &Path) -> Condition {
        self.map_paths(&|p| p.strip_prefix(prefix).unwrap_or_else(|| p.clone()))
    }

    /// Prepends `prefix` to every location.
    pub fn with_absolute_prefix(&self, prefix: &Path) -> Condition {
        self.map_paths(&|p| prefix.join(p))
    }

    /// The longest common prefix of every location read, part by part.
    pub fn anchor(&self) -> Path {
        structpatch_pointer::common_prefix(self.paths())
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        match self {
            Condition::Not(inner) => *inner,
            other => Condition::Not(Box::new(other)),
        }
    }
}

// ── Surface syntax rendering ──────────────────────────────────────────────

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !matches!(s, "AND" | "OR" | "NOT" | "true" | "false" | "null" | "in")
}

pub(crate) fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Renders a path in dotted form: `A.B[0]["x y"]`, or `$` for the root.
pub fn format_path_expr(path: &Path) -> String {
    let mut out = String::new();
    for (i, part) in path.parts().iter().enumerate() {
        match part {
            PathPart::Key(k) if is_identifier(k) => {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(k);
            }
            PathPart::Key(k) => {
                if i == 0 {
                    out.push('$');
                }
                out.push('[');
                out.push_str(&quote(k));
                out.push(']');
            }
            PathPart::Index(n) => {
                if i == 0 {
                    out.push('$');
                }
                out.push_str(&format!("[{n}]"));
            }
        }
    }
    if out.is_empty() {
        out.push('$');
    }
    out
}

fn format_literal(value: &Value) -> String {
    match value {
        Value::String(s) => quote(s),
        other => other.to_json().to_string(),
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Compare { path, op, value, .. } => {
                write!(f, "{} {} {}", format_path_expr(path), op, format_literal(value))
            }
            Condition::CompareFields { left, op, right, .. } => {
                write!(f, "{} {} {}", format_path_expr(left), op, format_path_expr(right))
            }
            Condition::Defined { path } => write!(f, "defined({})", format_path_expr(path)),
            Condition::Undefined { path } => write!(f, "undefined({})", format_path_expr(path)),
            Condition::TypeOf { path, kind } => {
                write!(f, "type({}, {})", format_path_expr(path), quote(kind.as_str()))
            }
            Condition::StringPred { path, op, needle, fold_case } => {
                write!(f, "{}({}, {}", op.as_str(), format_path_expr(path), quote(needle))?;
                if *fold_case {
                    f.write_str(", true")?;
                }
                f.write_str(")")
            }
            Condition::In { path, values, fold_case } => {
                let items: Vec<String> = values.iter().map(format_literal).collect();
                write!(f, "in({}, [{}]", format_path_expr(path), items.join(", "))?;
                if *fold_case {
                    f.write_str(", true")?;
                }
                f.write_str(")")
            }
            Condition::Log { message } => write!(f, "log({})", quote(message)),
            Condition::And(items) if items.is_empty() => f.write_str("true"),
            Condition::Or(items) if items.is_empty() => f.write_str("false"),
            Condition::And(items) => join(f, items, " && "),
            Condition::Or(items) => join(f, items, " || "),
            Condition::Not(inner) => match inner.as_ref() {
                Condition::And(_) | Condition::Or(_) => write!(f, "!({inner})"),
                other => write!(f, "!{other}"),
            },
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, items: &[Condition], sep: &str) -> fmt::Result {
    for (i, c) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        match c {
            Condition::And(inner) | Condition::Or(inner) if !inner.is_empty() => write!(f, "({c})")?,
            _ => write!(f, "{c}")?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use structpatch_pointer::parse;

    #[test]
    fn path_expr_rendering() {
        assert_eq!(format_path_expr(&parse("/A/B/0")), "A.B[0]");
        assert_eq!(format_path_expr(&parse("/x y/z")), "$[\"x y\"].z");
        assert_eq!(format_path_expr(&Path::root()), "$");
    }

    #[test]
    fn anchor_is_longest_common_prefix() {
        let c = Condition::Compare {
            path: parse("/Items/0/Price"),
            op: CmpOp::Gt,
            value: Value::Int(1),
            fold_case: false,
        }
        .and(Condition::Defined { path: parse("/Items/0/Name") });
        assert_eq!(c.anchor(), parse("/Items/0"));
        let rel = c.with_relative_prefix(&c.anchor());
        let paths: Vec<String> = rel.paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["/Price", "/Name"]);
    }

    #[test]
    fn double_negation_collapses() {
        let c = Condition::Defined { path: parse("/A") };
        assert_eq!(!!c.clone(), c);
    }
}
