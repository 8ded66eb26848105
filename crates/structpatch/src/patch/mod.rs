//! Patch model: the operation tree, its application disciplines, reversal,
//! traversal and merging.

pub mod apply;
pub mod merge;
pub mod reverse;
pub mod types;
pub mod walk;

pub(crate) mod list;

use structpatch_condition::Condition;
use structpatch_value::{Reflect, Value};

pub use apply::{ApplyReport, Outcome};
pub use merge::{merge, MergeResolver};
pub use types::{CustomOp, EditKind, Guards, ListEdit, OpKind, Operation};
pub use walk::{Change, ChangeKind};

use crate::error::PatchError;
use crate::resolver::Resolver;

/// A patch: an optional root operation plus patch-wide settings.
///
/// Applying never consumes or mutates the patch.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    pub root: Option<Operation>,
    /// Must hold against the target root for checked application.
    pub condition: Option<Condition>,
    /// Checked application also rejects adds onto existing locations.
    pub strict: bool,
}

impl Patch {
    pub fn new(root: Option<Operation>) -> Self {
        Self { root, condition: None, strict: false }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// True if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Best-effort application: `if`/`unless` guards only.
    pub fn apply(&self, target: &mut Value) -> Result<ApplyReport, PatchError> {
        apply::apply(self, target)
    }

    /// Verifies recorded old values and conditions before mutating. Every
    /// violation is reported in one [`PatchError::Conflicts`]; on error the
    /// target is left untouched.
    pub fn apply_checked(&self, target: &mut Value) -> Result<ApplyReport, PatchError> {
        apply::apply_checked(self, target)
    }

    /// Asks `resolver` before every mutation.
    pub fn apply_resolved(
        &self,
        target: &mut Value,
        resolver: &mut dyn Resolver,
    ) -> Result<ApplyReport, PatchError> {
        apply::apply_resolved(self, target, resolver)
    }

    /// Best-effort application to a typed value.
    pub fn apply_to<T: Reflect>(&self, target: &mut T) -> Result<ApplyReport, PatchError> {
        let mut value = target.to_value();
        let report = self.apply(&mut value)?;
        *target = T::from_value(&value)?;
        Ok(report)
    }

    /// Stamps `clock` on every node without one.
    pub fn stamp(&mut self, clock: crate::clock::Clock) {
        if let Some(root) = &mut self.root {
            root.stamp(clock);
        }
    }
}
