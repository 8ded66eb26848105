//! Fluent construction of conditions.
//!
//! ```
//! use structpatch_condition::{field, log};
//!
//! let c = field("Items[0].Price").gt(10).and(field("Items[0].Name").defined());
//! assert_eq!(c.anchor().to_string(), "/Items/0");
//! let c = c.or(log("fallback"));
//! assert_eq!(c.paths().len(), 2);
//! ```

use structpatch_pointer::{Path, PathPart};
use structpatch_value::Value;

use crate::parser::parse_path_expr;
use crate::types::{CmpOp, Condition, StringOp, TypeKind};

/// Starts a condition on the location named by `path`.
///
/// Accepts the dotted form (`A.B[0]`) and the location form (`/A/B/0`). Text
/// that is neither is split on `.` as-is.
pub fn field(path: &str) -> Field {
    let path = parse_path_expr(path).unwrap_or_else(|_| dotted(path));
    Field { path, fold_case: false }
}

fn dotted(text: &str) -> Path {
    Path::from_parts(
        text.split('.')
            .filter(|s| !s.is_empty())
            .map(PathPart::canonical)
            .collect(),
    )
}

pub fn log(message: impl Into<String>) -> Condition {
    Condition::Log { message: message.into() }
}

/// Conjunction of every item; empty is always true.
pub fn all(items: impl IntoIterator<Item = Condition>) -> Condition {
    Condition::And(items.into_iter().collect())
}

/// Disjunction of every item; empty is always false.
pub fn any(items: impl IntoIterator<Item = Condition>) -> Condition {
    Condition::Or(items.into_iter().collect())
}

pub fn not(c: Condition) -> Condition {
    !c
}

#[derive(Debug, Clone)]
pub struct Field {
    path: Path,
    fold_case: bool,
}

impl Field {
    pub fn at(path: Path) -> Self {
        Field { path, fold_case: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// String comparisons made from this field ignore case.
    pub fn fold_case(mut self) -> Self {
        self.fold_case = true;
        self
    }

    fn compare(self, op: CmpOp, value: impl Into<Value>) -> Condition {
        Condition::Compare { path: self.path, op, value: value.into(), fold_case: self.fold_case }
    }

    pub fn eq(self, value: impl Into<Value>) -> Condition {
        self.compare(CmpOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Condition {
        self.compare(CmpOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Condition {
        self.compare(CmpOp::Lt, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Condition {
        self.compare(CmpOp::Gt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Condition {
        self.compare(CmpOp::Le, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Condition {
        self.compare(CmpOp::Ge, value)
    }

    /// Compares against another location of the same root.
    pub fn cmp_field(self, op: CmpOp, other: &str) -> Condition {
        Condition::CompareFields {
            left: self.path,
            op,
            right: field(other).path,
            fold_case: self.fold_case,
        }
    }

    fn string(self, op: StringOp, needle: impl Into<String>) -> Condition {
        Condition::StringPred { path: self.path, op, needle: needle.into(), fold_case: self.fold_case }
    }

    pub fn contains(self, needle: impl Into<String>) -> Condition {
        self.string(StringOp::Contains, needle)
    }

    pub fn starts_with(self, needle: impl Into<String>) -> Condition {
        self.string(StringOp::Starts, needle)
    }

    pub fn ends_with(self, needle: impl Into<String>) -> Condition {
        self.string(StringOp::Ends, needle)
    }

    pub fn matches(self, pattern: impl Into<String>) -> Condition {
        self.string(StringOp::Matches, pattern)
    }

    pub fn one_of<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Condition {
        Condition::In {
            path: self.path,
            values: values.into_iter().map(Into::into).collect(),
            fold_case: self.fold_case,
        }
    }

    pub fn defined(self) -> Condition {
        Condition::Defined { path: self.path }
    }

    pub fn undefined(self) -> Condition {
        Condition::Undefined { path: self.path }
    }

    pub fn is_type(self, kind: TypeKind) -> Condition {
        Condition::TypeOf { path: self.path, kind }
    }
}
