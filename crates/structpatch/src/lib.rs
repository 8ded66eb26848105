//! structpatch: structural diff, patch and merge for in-memory values.
//!
//! A [`Patch`] is a typed tree of operations that mirrors the shape of the
//! value it changes. Patches are computed with [`diff`], built by hand with
//! [`PatchBuilder`], and applied under one of three disciplines:
//!
//! - [`Patch::apply`]: best effort, skipping what cannot be applied.
//! - [`Patch::apply_checked`]: verifies recorded old values and conditions
//!   first and changes nothing on conflict.
//! - [`Patch::apply_resolved`]: asks a [`Resolver`] about every change,
//!   using the clocks stamped on operations.
//!
//! # Example
//!
//! ```
//! use structpatch::Patch;
//! use structpatch_value::{deep_copy, Record, RecordType, Value};
//!
//! let ty = RecordType::new("Doc").field("name").field("value").shared();
//! let a = Value::Record(Record::new(&ty).with("name", "v1").with("value", 1i64));
//! let b = Value::Record(Record::new(&ty).with("name", "v2").with("value", 1i64));
//!
//! let patch = Patch::diff(&a, &b).unwrap();
//! let mut target = deep_copy(&a);
//! patch.apply_checked(&mut target).unwrap();
//! assert_eq!(target, b);
//!
//! // The same patch cannot be applied twice under checking.
//! assert!(patch.apply_checked(&mut target).is_err());
//!
//! patch.reverse().unwrap().apply(&mut target).unwrap();
//! assert_eq!(target, a);
//! ```

pub mod builder;
pub mod clock;
pub mod codec;
pub mod diff;
pub mod error;
pub mod patch;
pub mod resolver;

pub use builder::{IntoPath, PatchBuilder};
pub use clock::{Clock, ClockSource};
pub use diff::{diff, diff_typed, CustomDiff, DiffOptions, DiffRegistry, Differ};
pub use error::{CodecError, DiffError, NodeError, NodeFailure, PatchError};
pub use patch::{
    merge, ApplyReport, Change, ChangeKind, CustomOp, EditKind, Guards, ListEdit, MergeResolver, OpKind,
    Operation, Outcome, Patch,
};
pub use resolver::{LastWriterWinsResolver, Proposal, Resolver, StateResolver};
