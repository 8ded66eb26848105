//! Patch application.
//!
//! Every discipline runs the same recursive visit over the operation tree.
//! Mutations always navigate from the root, so guards evaluated between two
//! nodes see the effects of the nodes applied before them.

use std::sync::Arc;

use structpatch_pointer::{self as pointer, Follow, Path, PathPart, PointerError};
use structpatch_value::{deep_copy, deep_equal, to_json, Key, Poly, Value};

use super::types::{Guards, OpKind, Operation};
use super::walk::ChangeKind;
use super::Patch;
use crate::clock::Clock;
use crate::error::{NodeError, NodeFailure, PatchError};
use crate::resolver::{Proposal, Resolver};

// ── Report ────────────────────────────────────────────────────────────────

/// What happened to one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied,
    Skipped(String),
    Failed(NodeFailure),
}

/// Per-node outcomes of one application, in visit order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub entries: Vec<(Path, Outcome)>,
}

impl ApplyReport {
    pub fn outcome(&self, path: &Path) -> Option<&Outcome> {
        self.entries.iter().find(|(p, _)| p == path).map(|(_, o)| o)
    }

    pub fn applied(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Applied))
            .map(|(p, _)| p)
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.entries.iter().filter_map(|(p, o)| match o {
            Outcome::Skipped(reason) => Some((p, reason.as_str())),
            _ => None,
        })
    }

    pub fn failures(&self) -> Vec<NodeError> {
        self.entries
            .iter()
            .filter_map(|(p, o)| match o {
                Outcome::Failed(f) => Some(NodeError { path: p.clone(), failure: f.clone() }),
                _ => None,
            })
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        !self.entries.iter().any(|(_, o)| matches!(o, Outcome::Failed(_)))
    }
}

// ── Entry points ──────────────────────────────────────────────────────────

pub fn apply(patch: &Patch, target: &mut Value) -> Result<ApplyReport, PatchError> {
    let mut applier = Applier::new(Mode::BestEffort, patch.strict, false);
    applier.run(patch, target);
    applier.finish()
}

/// The target is only touched once a dry run on a copy found no violation.
pub fn apply_checked(patch: &Patch, target: &mut Value) -> Result<ApplyReport, PatchError> {
    if let Some(condition) = &patch.condition {
        let failure = match condition.evaluate(target) {
            Ok(true) => None,
            Ok(false) => Some(NodeFailure::ConditionFailed),
            Err(e) => Some(NodeFailure::Condition(e)),
        };
        if let Some(failure) = failure {
            return Err(PatchError::Conflicts(vec![NodeError { path: Path::root(), failure }]));
        }
    }

    let mut scratch = deep_copy(target);
    let mut dry = Applier::new(Mode::Checked, patch.strict, true);
    dry.run(patch, &mut scratch);
    let violations = dry.report.failures();
    if !violations.is_empty() {
        return Err(PatchError::Conflicts(violations));
    }

    let mut applier = Applier::new(Mode::Checked, patch.strict, false);
    applier.run(patch, target);
    applier.finish()
}

pub fn apply_resolved(
    patch: &Patch,
    target: &mut Value,
    resolver: &mut dyn Resolver,
) -> Result<ApplyReport, PatchError> {
    let mut applier = Applier::new(Mode::Resolved(resolver), patch.strict, false);
    applier.run(patch, target);
    applier.finish()
}

// ── Locations ─────────────────────────────────────────────────────────────

/// Where a node applies. `path` navigates the target; `logical` names the
/// node in reports and resolver proposals (keyed list elements use their
/// entity key there). `layers` counts the wrappers to strip at `path`.
#[derive(Debug, Clone)]
pub(super) struct Loc {
    pub(super) path: Path,
    pub(super) logical: Path,
    pub(super) layers: usize,
}

impl Loc {
    fn root() -> Self {
        Loc { path: Path::root(), logical: Path::root(), layers: 0 }
    }

    pub(super) fn child(&self, part: impl Into<PathPart>) -> Loc {
        let part = part.into();
        Loc { path: self.path.child(part.clone()), logical: self.logical.child(part), layers: 0 }
    }

    pub(super) fn element(&self, index: usize, key: &Key) -> Loc {
        Loc { path: self.path.child(index), logical: self.logical.child(key), layers: 0 }
    }

    fn inner(&self) -> Loc {
        Loc { layers: self.layers + 1, ..self.clone() }
    }
}

/// Runs `f` on the current value of a node, if it resolves.
pub(super) fn inspect<R>(root: &Value, at: &Loc, f: impl FnOnce(&Value) -> R) -> Option<R> {
    pointer::read(root, &at.path, |v| peel(v, at.layers, f)).flatten()
}

fn peel<R>(value: &Value, layers: usize, f: impl FnOnce(&Value) -> R) -> Option<R> {
    if layers == 0 {
        return Some(f(value));
    }
    match value {
        Value::Ref(r) => {
            let guard = r.read()?;
            peel(&guard, layers - 1, f)
        }
        Value::Poly(p) => peel(p.value()?, layers - 1, f),
        _ => None,
    }
}

pub(super) fn write(root: &mut Value, at: &Loc, value: Value) -> Result<(), PointerError> {
    if at.layers == 0 {
        return pointer::set(root, &at.path, value);
    }
    pointer::with_mut_at(root, &at.path, Follow::Layers(at.layers), |slot| {
        *slot = value;
        Ok(())
    })
}

fn erase(root: &mut Value, at: &Loc) -> Result<(), PointerError> {
    match at.layers {
        0 if at.path.is_root() => {
            *root = Value::Null;
            Ok(())
        }
        0 => pointer::delete(root, &at.path).map(drop),
        n => pointer::with_mut_at(root, &at.path, Follow::Layers(n), |slot| {
            *slot = slot.zeroed();
            Ok(())
        }),
    }
}

/// True if the location holds something an add would overwrite. Record
/// fields always exist, so they count as occupied only when non-zero.
fn occupied(root: &Value, at: &Loc) -> bool {
    let in_record = at.layers == 0
        && at
            .path
            .parent()
            .and_then(|parent| pointer::resolve(root, &parent))
            .is_some_and(|p| matches!(p, Value::Record(_)));
    inspect(root, at, |cur| !(in_record && deep_equal(cur, &cur.zeroed()))).unwrap_or(false)
}

fn render(value: Option<&Value>) -> String {
    match value {
        Some(v) => to_json(v).to_string(),
        None => "nothing".to_string(),
    }
}

// ── Applier ───────────────────────────────────────────────────────────────

pub(super) enum Mode<'r> {
    BestEffort,
    Checked,
    Resolved(&'r mut dyn Resolver),
}

pub(super) struct Applier<'r> {
    mode: Mode<'r>,
    pub(super) strict: bool,
    /// Suppresses side effects outside the target (log output).
    dry_run: bool,
    report: ApplyReport,
}

impl<'r> Applier<'r> {
    fn new(mode: Mode<'r>, strict: bool, dry_run: bool) -> Self {
        Self { mode, strict, dry_run, report: ApplyReport::default() }
    }

    fn run(&mut self, patch: &Patch, target: &mut Value) {
        if let Some(root) = &patch.root {
            self.visit(target, root, &Loc::root(), None);
        }
    }

    fn finish(self) -> Result<ApplyReport, PatchError> {
        let failures = self.report.failures();
        if failures.is_empty() {
            Ok(self.report)
        } else {
            Err(PatchError::Failed(failures))
        }
    }

    pub(super) fn verifies(&self) -> bool {
        matches!(self.mode, Mode::Checked)
    }

    pub(super) fn record(&mut self, at: &Loc, outcome: Outcome) {
        match &outcome {
            Outcome::Applied => {}
            Outcome::Skipped(reason) => {
                tracing::debug!(path = %at.logical, reason = %reason, "node skipped");
            }
            Outcome::Failed(failure) => {
                tracing::debug!(path = %at.logical, error = %failure, "node failed");
            }
        }
        self.report.entries.push((at.logical.clone(), outcome));
    }

    /// Evaluates the guards of a node; `Some` means the node must not run.
    pub(super) fn blocked(&mut self, root: &Value, guards: &Guards, at: &Loc) -> Option<Outcome> {
        if let Some(c) = &guards.if_ {
            match c.evaluate(root) {
                Ok(true) => {}
                Ok(false) => return Some(Outcome::Skipped("if guard is false".to_string())),
                Err(e) => return Some(self.guard_error(e.into())),
            }
        }
        if let Some(c) = &guards.unless {
            match c.evaluate(root) {
                Ok(false) => {}
                Ok(true) => return Some(Outcome::Skipped("unless guard is true".to_string())),
                Err(e) => return Some(self.guard_error(e.into())),
            }
        }
        if self.verifies() {
            if let Some(c) = &guards.condition {
                let result = inspect(root, at, |cur| c.evaluate(cur))
                    .unwrap_or_else(|| c.evaluate(&Value::Null));
                match result {
                    Ok(true) => {}
                    Ok(false) => return Some(Outcome::Failed(NodeFailure::ConditionFailed)),
                    Err(e) => return Some(Outcome::Failed(e.into())),
                }
            }
        }
        None
    }

    fn guard_error(&self, failure: NodeFailure) -> Outcome {
        if self.verifies() {
            Outcome::Failed(failure)
        } else {
            Outcome::Skipped(format!("guard error: {failure}"))
        }
    }

    pub(super) fn absent(&self, at: &Loc) -> Outcome {
        if self.verifies() {
            Outcome::Failed(PointerError::NotFound(at.logical.to_string()).into())
        } else {
            Outcome::Skipped("target is absent".to_string())
        }
    }

    pub(super) fn rejected() -> Outcome {
        Outcome::Skipped("rejected by resolver".to_string())
    }

    /// Asks the resolver, if any, whether a mutation may go ahead.
    pub(super) fn accepts(
        &mut self,
        at: &Loc,
        kind: ChangeKind,
        value: Option<&Value>,
        clock: Option<Clock>,
    ) -> bool {
        match &mut self.mode {
            Mode::Resolved(resolver) => {
                resolver.resolve(&Proposal { path: &at.logical, kind, value, clock })
            }
            _ => true,
        }
    }

    pub(super) fn verify_old(
        &self,
        root: &Value,
        at: &Loc,
        old: Option<&Value>,
        adding: bool,
    ) -> Result<(), NodeFailure> {
        match old {
            Some(expected) => {
                let found = inspect(root, at, |cur| (!deep_equal(cur, expected)).then(|| render(Some(cur))));
                match found {
                    Some(None) => Ok(()),
                    Some(Some(found)) => Err(NodeFailure::Mismatch { expected: render(Some(expected)), found }),
                    None => Err(NodeFailure::Mismatch { expected: render(Some(expected)), found: render(None) }),
                }
            }
            None if adding && self.strict && occupied(root, at) => Err(NodeFailure::AlreadyExists),
            None => Ok(()),
        }
    }

    pub(super) fn visit(&mut self, root: &mut Value, op: &Operation, at: &Loc, clock: Option<Clock>) {
        let clock = op.guards.clock.or(clock);
        if let Some(outcome) = self.blocked(root, &op.guards, at) {
            self.record(at, outcome);
            return;
        }
        let outcome = match &op.kind {
            OpKind::Value { old, new } => Some(self.apply_value(root, at, old.as_ref(), new.as_ref(), clock)),
            OpKind::Record(fields) => {
                let ty = inspect(root, at, |v| v.as_record().map(|r| Arc::clone(r.ty()))).flatten();
                for (name, child) in fields {
                    let loc = at.child(name.as_str());
                    let policy = ty.as_ref().map(|t| t.policy(name)).unwrap_or_default();
                    if policy.ignore {
                        self.record(&loc, Outcome::Skipped("ignored field".to_string()));
                    } else if policy.read_only && !matches!(child.kind, OpKind::Log { .. }) {
                        self.record(&loc, Outcome::Failed(NodeFailure::ReadOnly(name.clone())));
                    } else {
                        self.visit(root, child, &loc, clock);
                    }
                }
                None
            }
            OpKind::FixedArray(items) => {
                for (index, child) in items {
                    self.visit(root, child, &at.child(*index), clock);
                }
                None
            }
            OpKind::Map { added, removed, modified } => {
                for (key, old) in removed {
                    let loc = at.child(key);
                    let outcome = self.apply_value(root, &loc, old.as_ref(), None, clock);
                    self.record(&loc, outcome);
                }
                for (key, child) in modified {
                    self.visit(root, child, &at.child(key), clock);
                }
                for (key, value) in added {
                    let loc = at.child(key);
                    let outcome = self.apply_value(root, &loc, None, Some(value), clock);
                    self.record(&loc, outcome);
                }
                None
            }
            OpKind::List(edits) => {
                self.apply_list(root, at, edits, clock);
                None
            }
            OpKind::Ref { inner, template } => {
                match ensure_ref(root, at, template.as_ref(), inner.is_mutating()) {
                    Ok(()) => {
                        self.visit(root, inner, &at.inner(), clock);
                        None
                    }
                    Err(f) => Some(Outcome::Failed(f)),
                }
            }
            OpKind::Poly { type_name, inner, template } => {
                match ensure_poly(root, at, type_name, template.as_ref(), inner.is_mutating()) {
                    Ok(()) => {
                        self.visit(root, inner, &at.inner(), clock);
                        None
                    }
                    Err(f) => Some(Outcome::Failed(f)),
                }
            }
            OpKind::Test { expected } => Some(match inspect(root, at, |cur| deep_equal(cur, expected)) {
                Some(true) => Outcome::Applied,
                _ => Outcome::Failed(NodeFailure::Test),
            }),
            OpKind::Copy { from } => Some(self.relocate(root, at, from, false, clock)),
            OpKind::Move { from } => Some(self.relocate(root, at, from, true, clock)),
            OpKind::Log { message } => {
                if !self.dry_run {
                    tracing::info!(path = %at.logical, text = %message, "patch log");
                }
                Some(Outcome::Applied)
            }
            OpKind::Custom(custom) => Some(if !self.accepts(at, ChangeKind::Custom, None, clock) {
                Self::rejected()
            } else {
                let result = pointer::with_mut_at(root, &at.path, Follow::Layers(at.layers), |slot| {
                    Ok(custom.apply(slot))
                });
                match result {
                    Ok(Ok(())) => Outcome::Applied,
                    Ok(Err(message)) => Outcome::Failed(NodeFailure::Custom(message)),
                    Err(e) => Outcome::Failed(e.into()),
                }
            }),
        };
        if let Some(outcome) = outcome {
            self.record(at, outcome);
        }
    }

    /// Add (`old` absent), replace, or remove (`new` absent) a whole value.
    pub(super) fn apply_value(
        &mut self,
        root: &mut Value,
        at: &Loc,
        old: Option<&Value>,
        new: Option<&Value>,
        clock: Option<Clock>,
    ) -> Outcome {
        if new.is_none() && inspect(root, at, |_| ()).is_none() {
            return self.absent(at);
        }
        if self.verifies() {
            if let Err(failure) = self.verify_old(root, at, old, new.is_some()) {
                return Outcome::Failed(failure);
            }
        }
        if !self.accepts(at, ChangeKind::of_value(old, new), new, clock) {
            return Self::rejected();
        }
        let result = match new {
            Some(v) => write(root, at, deep_copy(v)),
            None => erase(root, at),
        };
        match result {
            Ok(()) => Outcome::Applied,
            Err(e) => Outcome::Failed(e.into()),
        }
    }

    fn relocate(&mut self, root: &mut Value, at: &Loc, from: &Path, moving: bool, clock: Option<Clock>) -> Outcome {
        let Some(source) = pointer::get(root, from) else {
            return Outcome::Failed(PointerError::NotFound(from.to_string()).into());
        };
        if self.verifies() && self.strict && occupied(root, at) {
            return Outcome::Failed(NodeFailure::AlreadyExists);
        }
        let kind = if moving { ChangeKind::Move } else { ChangeKind::Copy };
        if !self.accepts(at, kind, Some(&source), clock) {
            return Self::rejected();
        }
        let value = if moving {
            match pointer::delete(root, from) {
                Ok(v) => v,
                Err(e) => return Outcome::Failed(e.into()),
            }
        } else {
            deep_copy(&source)
        };
        match write(root, at, value) {
            Ok(()) => Outcome::Applied,
            Err(e) => Outcome::Failed(e.into()),
        }
    }
}

fn ensure_ref(root: &mut Value, at: &Loc, template: Option<&Value>, create: bool) -> Result<(), NodeFailure> {
    let result = pointer::with_mut_at(root, &at.path, Follow::Layers(at.layers), |slot| {
        Ok(match slot {
            Value::Ref(r) if r.is_empty() && create => {
                if r.allocate(template) {
                    Ok(())
                } else {
                    Err(PointerError::NotFound(at.logical.to_string()).into())
                }
            }
            Value::Ref(_) => Ok(()),
            other => Err(NodeFailure::TypeMismatch {
                expected: "ref".to_string(),
                found: other.kind_name().to_string(),
            }),
        })
    });
    result?
}

fn ensure_poly(
    root: &mut Value,
    at: &Loc,
    type_name: &str,
    template: Option<&Value>,
    create: bool,
) -> Result<(), NodeFailure> {
    let result = pointer::with_mut_at(root, &at.path, Follow::Layers(at.layers), |slot| {
        Ok(match slot {
            Value::Poly(p) => match p.type_name().map(str::to_string) {
                Some(current) if current == type_name => Ok(()),
                Some(current) => Err(NodeFailure::TypeMismatch { expected: type_name.to_string(), found: current }),
                None if create => {
                    *p = Poly::new(type_name, template.map(deep_copy).unwrap_or_default());
                    Ok(())
                }
                None => Ok(()),
            },
            other => Err(NodeFailure::TypeMismatch {
                expected: "poly".to_string(),
                found: other.kind_name().to_string(),
            }),
        })
    });
    result?
}
