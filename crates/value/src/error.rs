use thiserror::Error;

use crate::value::KeyKind;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    #[error("UNSUPPORTED: {0}")]
    Unsupported(String),
    #[error("TYPE_MISMATCH: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("UNKNOWN_FIELD: {record}.{field}")]
    UnknownField { record: String, field: String },
    #[error("INVALID_KEY: {0:?} is not a valid {1} key")]
    InvalidKey(String, KeyKind),
    #[error("LENGTH_MISMATCH: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("INVALID_BYTES")]
    InvalidBytes,
}

impl ValueError {
    pub(crate) fn mismatch(expected: &str, found: &crate::Value) -> Self {
        ValueError::TypeMismatch {
            expected: expected.to_string(),
            found: found.kind_name().to_string(),
        }
    }
}
