//! Conflict resolvers consulted by resolved application.

use std::collections::BTreeMap;

use structpatch_pointer::Path;
use structpatch_value::Value;

use crate::clock::Clock;
use crate::patch::ChangeKind;

/// A mutation about to be performed.
#[derive(Debug, Clone)]
pub struct Proposal<'a> {
    pub path: &'a Path,
    pub kind: ChangeKind,
    /// The value being written, for kinds that write one.
    pub value: Option<&'a Value>,
    pub clock: Option<Clock>,
}

/// Decides whether a proposed mutation goes ahead.
pub trait Resolver {
    fn resolve(&mut self, proposal: &Proposal<'_>) -> bool;
}

impl<F> Resolver for F
where
    F: FnMut(&Proposal<'_>) -> bool,
{
    fn resolve(&mut self, proposal: &Proposal<'_>) -> bool {
        self(proposal)
    }
}

// ── Last writer wins ──────────────────────────────────────────────────────

/// Accepts a mutation iff its clock is strictly later than the last one
/// accepted for the same location. Removals leave a tombstone that also
/// shadows writes below the removed location.
#[derive(Debug, Clone, Default)]
pub struct LastWriterWinsResolver {
    clocks: BTreeMap<Path, Clock>,
    tombstones: BTreeMap<Path, Clock>,
}

impl LastWriterWinsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the last accepted clock of a location.
    pub fn with_clock(mut self, path: Path, clock: Clock) -> Self {
        self.clocks.insert(path, clock);
        self
    }

    pub fn clock_of(&self, path: &Path) -> Option<Clock> {
        self.clocks.get(path).copied()
    }

    pub fn is_tombstoned(&self, path: &Path) -> bool {
        self.tombstone_for(path).is_some()
    }

    /// Latest tombstone on `path` or one of its ancestors.
    fn tombstone_for(&self, path: &Path) -> Option<Clock> {
        let mut cur = Some(path.clone());
        let mut best: Option<Clock> = None;
        while let Some(p) = cur {
            if let Some(c) = self.tombstones.get(&p) {
                best = best.max(Some(*c));
            }
            cur = p.parent();
        }
        best
    }
}

impl Resolver for LastWriterWinsResolver {
    fn resolve(&mut self, proposal: &Proposal<'_>) -> bool {
        let incoming = proposal.clock.unwrap_or(Clock::ZERO);
        let stored = self.clocks.get(proposal.path).copied().max(self.tombstone_for(proposal.path));
        if stored.is_some() && !incoming.is_after(stored.as_ref()) {
            tracing::debug!(
                path = %proposal.path,
                kind = proposal.kind.as_str(),
                incoming = %incoming,
                "rejected by last-writer-wins"
            );
            return false;
        }
        self.clocks.insert(proposal.path.clone(), incoming);
        if proposal.kind == ChangeKind::Remove {
            self.tombstones.insert(proposal.path.clone(), incoming);
        } else {
            self.tombstones.remove(proposal.path);
        }
        true
    }
}

// ── State-based ───────────────────────────────────────────────────────────

/// Compares a local and a remote clock map per location and accepts the
/// remote side when its clock is newer. The proposal's own clock stands in
/// for a missing remote entry.
#[derive(Debug, Clone, Default)]
pub struct StateResolver {
    pub local: BTreeMap<Path, Clock>,
    pub remote: BTreeMap<Path, Clock>,
}

impl StateResolver {
    pub fn new(local: BTreeMap<Path, Clock>, remote: BTreeMap<Path, Clock>) -> Self {
        Self { local, remote }
    }
}

impl Resolver for StateResolver {
    fn resolve(&mut self, proposal: &Proposal<'_>) -> bool {
        let remote = self.remote.get(proposal.path).copied().or(proposal.clock);
        let local = self.local.get(proposal.path).copied();
        let accept = match (local, remote) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(l), Some(r)) => r > l,
        };
        if accept {
            if let Some(r) = remote {
                self.local.insert(proposal.path.clone(), r);
            }
        } else {
            tracing::debug!(path = %proposal.path, kind = proposal.kind.as_str(), "rejected by state resolver");
        }
        accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use structpatch_pointer::parse;

    fn propose(r: &mut dyn Resolver, path: &Path, kind: ChangeKind, clock: Clock) -> bool {
        r.resolve(&Proposal { path, kind, value: None, clock: Some(clock) })
    }

    #[test]
    fn lww_accepts_only_newer() {
        let mut r = LastWriterWinsResolver::new();
        let p = parse("/Name");
        assert!(propose(&mut r, &p, ChangeKind::Replace, Clock::new(2, 0, 1)));
        assert!(!propose(&mut r, &p, ChangeKind::Replace, Clock::new(2, 0, 1)));
        assert!(!propose(&mut r, &p, ChangeKind::Replace, Clock::new(1, 9, 9)));
        assert!(propose(&mut r, &p, ChangeKind::Replace, Clock::new(2, 0, 2)));
        assert_eq!(r.clock_of(&p), Some(Clock::new(2, 0, 2)));
    }

    #[test]
    fn lww_tombstones_shadow_children() {
        let mut r = LastWriterWinsResolver::new();
        assert!(propose(&mut r, &parse("/Items/7"), ChangeKind::Remove, Clock::new(5, 0, 1)));
        assert!(r.is_tombstoned(&parse("/Items/7/Name")));
        assert!(!propose(&mut r, &parse("/Items/7/Name"), ChangeKind::Replace, Clock::new(4, 0, 1)));
        assert!(propose(&mut r, &parse("/Items/7"), ChangeKind::Add, Clock::new(6, 0, 1)));
        assert!(!r.is_tombstoned(&parse("/Items/7")));
    }

    #[test]
    fn state_resolver_prefers_newer_side() {
        let p = parse("/A");
        let mut local = BTreeMap::new();
        local.insert(p.clone(), Clock::new(3, 0, 1));
        let mut remote = BTreeMap::new();
        remote.insert(p.clone(), Clock::new(2, 0, 2));
        let mut r = StateResolver::new(local.clone(), remote);
        assert!(!r.resolve(&Proposal { path: &p, kind: ChangeKind::Replace, value: None, clock: None }));

        let mut remote = BTreeMap::new();
        remote.insert(p.clone(), Clock::new(4, 0, 2));
        let mut r = StateResolver::new(local, remote);
        assert!(r.resolve(&Proposal { path: &p, kind: ChangeKind::Replace, value: None, clock: None }));
        assert_eq!(r.local.get(&p), Some(&Clock::new(4, 0, 2)));
    }
}
