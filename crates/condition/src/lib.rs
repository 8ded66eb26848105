//! structpatch-condition - the boolean condition language used for patch
//! guards.
//!
//! A [`Condition`] is a tree of predicates over locations of a root value.
//! Conditions come from the surface syntax ([`parse_condition`]), from the
//! fluent builder ([`field`]) or from JSON predicate objects
//! ([`codec::from_json`]).
//!
//! # Example
//!
//! ```
//! use structpatch_condition::{parse_condition, field};
//! use structpatch_value::{Map, KeyKind, Value};
//!
//! let root = Value::Map(Map::new(KeyKind::Str).with("Status", "open").with("Count", 3i64));
//! let c = parse_condition(r#"Status == "open" && Count < 5"#).unwrap();
//! assert!(c.evaluate(&root).unwrap());
//! assert_eq!(c, field("Status").eq("open").and(field("Count").lt(5)));
//! ```

pub mod builder;
pub mod codec;
pub mod error;
pub mod evaluate;
pub mod parser;
pub mod types;

pub use builder::{all, any, field, log, not, Field};
pub use error::ConditionError;
pub use evaluate::{compare, evaluate};
pub use parser::{parse_condition, parse_path_expr, ConditionParser};
pub use types::{format_path_expr, CmpOp, Condition, StringOp, TypeKind};
