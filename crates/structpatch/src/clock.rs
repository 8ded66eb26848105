//! Logical clocks for timestamping operations produced on different
//! replicas.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A hybrid logical timestamp.
///
/// Totally ordered by `wall`, then `counter`, then `origin`, so two replicas
/// always agree on which of two clocks is later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Clock {
    /// Wall time in milliseconds.
    pub wall: u64,
    /// Tie-breaker for events within the same millisecond.
    pub counter: u64,
    /// Replica identifier.
    pub origin: u64,
}

impl Clock {
    pub const ZERO: Clock = Clock { wall: 0, counter: 0, origin: 0 };

    pub const fn new(wall: u64, counter: u64, origin: u64) -> Self {
        Self { wall, counter, origin }
    }

    /// True if `self` is strictly later than `other`; a missing clock is
    /// the earliest possible.
    pub fn is_after(&self, other: Option<&Clock>) -> bool {
        match other {
            Some(o) => self > o,
            None => true,
        }
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.wall, self.counter, self.origin)
    }
}

// ── ClockSource ───────────────────────────────────────────────────────────

/// Issues strictly increasing clocks for one origin.
#[derive(Debug, Clone)]
pub struct ClockSource {
    origin: u64,
    last: Clock,
}

impl ClockSource {
    pub fn new(origin: u64) -> Self {
        Self { origin, last: Clock::new(0, 0, origin) }
    }

    pub fn origin(&self) -> u64 {
        self.origin
    }

    pub fn last(&self) -> Clock {
        self.last
    }

    /// A clock later than every clock issued or observed so far, using
    /// `wall` as the physical time.
    pub fn tick_at(&mut self, wall: u64) -> Clock {
        self.last = if wall > self.last.wall {
            Clock::new(wall, 0, self.origin)
        } else {
            Clock::new(self.last.wall, self.last.counter + 1, self.origin)
        };
        self.last
    }

    /// Like [`ClockSource::tick_at`] with the system time.
    pub fn tick(&mut self) -> Clock {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.tick_at(wall)
    }

    /// Advances past a clock received from another replica.
    pub fn observe(&mut self, remote: Clock) {
        if (remote.wall, remote.counter) > (self.last.wall, self.last.counter) {
            self.last = Clock::new(remote.wall, remote.counter, self.origin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_wall_counter_origin() {
        let a = Clock::new(1, 5, 9);
        let b = Clock::new(2, 0, 0);
        let c = Clock::new(2, 0, 1);
        assert!(a < b && b < c);
        assert!(c.is_after(Some(&b)));
        assert!(!b.is_after(Some(&b)));
        assert!(Clock::ZERO.is_after(None));
    }

    #[test]
    fn source_is_monotonic() {
        let mut src = ClockSource::new(7);
        let a = src.tick_at(100);
        let b = src.tick_at(100);
        let c = src.tick_at(50);
        assert!(a < b && b < c);
        assert_eq!(c, Clock::new(100, 2, 7));
        src.observe(Clock::new(300, 4, 1));
        assert_eq!(src.tick_at(10), Clock::new(300, 5, 7));
    }
}
