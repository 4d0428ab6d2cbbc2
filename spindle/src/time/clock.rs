use std::fmt;
use std::time::{Duration, Instant};

/// An absolute point on a [`Clock`]'s millisecond timeline.
///
/// Deadlines are the keys of the scheduler's expiry table. They are
/// plain millisecond counts so that fibers sharing the same deadline
/// land in the same bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(u64);

impl Deadline {
    /// Builds a deadline from a raw millisecond offset on the clock.
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Milliseconds since the clock's epoch.
    pub fn as_millis(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Monotonic millisecond clock.
///
/// Each scheduler owns one `Clock`. Its epoch is the instant the clock
/// was created, so readings start near zero and never go backwards.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    /// Reference point for all readings.
    epoch: Instant,
}

impl Clock {
    /// Creates a clock whose epoch is now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the epoch, rounded down.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Returns the deadline `after` from now.
    ///
    /// The result is rounded **up** to the next whole millisecond, so a
    /// deadline reported as passed by [`has_passed`](Self::has_passed)
    /// is always at least `after` in the past.
    pub fn deadline_after(&self, after: Duration) -> Deadline {
        let at = self.epoch.elapsed().saturating_add(after);
        let mut ms = at.as_millis() as u64;

        if at.subsec_nanos() % 1_000_000 != 0 {
            ms += 1;
        }

        Deadline(ms)
    }

    /// Shorthand for [`deadline_after`](Self::deadline_after) in milliseconds.
    pub fn deadline_after_ms(&self, ms: u64) -> Deadline {
        self.deadline_after(Duration::from_millis(ms))
    }

    /// Returns `true` once `deadline` is at or before the current reading.
    pub fn has_passed(&self, deadline: Deadline) -> bool {
        deadline.0 <= self.now_ms()
    }

    /// Time left until `deadline`, or zero if it has passed.
    pub fn remaining(&self, deadline: Deadline) -> Duration {
        Duration::from_millis(deadline.0.saturating_sub(self.now_ms()))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
