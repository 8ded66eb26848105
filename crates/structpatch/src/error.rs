//! Error types for diffing, applying and encoding patches.

use std::fmt;

use structpatch_condition::ConditionError;
use structpatch_pointer::{Path, PointerError};
use structpatch_value::ValueError;
use thiserror::Error;

// ── Diff ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiffError {
    /// A value the generic traversal cannot handle.
    #[error("UNSUPPORTED: {kind} at {path:?}")]
    Unsupported { path: String, kind: String },
    /// A registered per-type differencer failed; its subtree has no patch.
    #[error("CUSTOM_DIFF: {type_name}: {message}")]
    Custom { type_name: String, message: String },
}

// ── Apply ─────────────────────────────────────────────────────────────────

/// Why a single node could not be applied.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeFailure {
    #[error(transparent)]
    Navigation(#[from] PointerError),
    #[error("MISMATCH: expected {expected}, found {found}")]
    Mismatch { expected: String, found: String },
    #[error("ALREADY_EXISTS")]
    AlreadyExists,
    #[error("CONDITION_FAILED")]
    ConditionFailed,
    #[error(transparent)]
    Condition(#[from] ConditionError),
    #[error("TEST")]
    Test,
    #[error("READ_ONLY: {0}")]
    ReadOnly(String),
    #[error("TYPE_MISMATCH: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("CUSTOM: {0}")]
    Custom(String),
}

/// A node failure together with the location it happened at.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeError {
    pub path: Path,
    pub failure: NodeFailure,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.path.to_string(), self.failure)
    }
}

fn list(errors: &[NodeError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PatchError {
    /// Best-effort application finished with failed nodes.
    #[error("APPLY_FAILED: {}", list(.0))]
    Failed(Vec<NodeError>),
    /// Checked application found violations; nothing was applied.
    #[error("CONFLICTS: {}", list(.0))]
    Conflicts(Vec<NodeError>),
    #[error("IRREVERSIBLE: {0}")]
    Irreversible(String),
    #[error("INVALID_PATH: {0}")]
    InvalidPath(String),
    #[error(transparent)]
    Pointer(#[from] PointerError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error(transparent)]
    Condition(#[from] ConditionError),
}

impl PatchError {
    /// Node errors carried by `Failed` or `Conflicts`.
    pub fn node_errors(&self) -> &[NodeError] {
        match self {
            PatchError::Failed(errors) | PatchError::Conflicts(errors) => errors,
            _ => &[],
        }
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("INVALID_OP: {0}")]
    InvalidOp(String),
    #[error("UNKNOWN_KIND: {0}")]
    UnknownKind(String),
    #[error("UNKNOWN_RECORD_TYPE: {0}")]
    UnknownRecordType(String),
    #[error("UNSUPPORTED: {0}")]
    Unsupported(String),
    #[error("INVALID_CBOR: {0}")]
    Cbor(String),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Condition(#[from] ConditionError),
    #[error(transparent)]
    Value(#[from] ValueError),
}
