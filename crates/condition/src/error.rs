use thiserror::Error;

use crate::types::CmpOp;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    /// Malformed surface syntax. `position` is a byte offset into the input.
    #[error("PARSE_ERROR: {message} at {position} near {fragment:?}")]
    Parse {
        message: String,
        fragment: String,
        position: usize,
    },
    #[error("INCOMPARABLE: {left} {op} {right}")]
    Incomparable {
        op: CmpOp,
        left: &'static str,
        right: &'static str,
    },
    #[error("INVALID_REGEX: {0}")]
    InvalidRegex(String),
    #[error("INVALID_PREDICATE: {0}")]
    InvalidPredicate(String),
}
