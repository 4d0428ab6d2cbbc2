use crate::Error;
use crate::fiber::FiberId;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::os::fd::RawFd;

/// Direction of an I/O wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Waiting for the fd to become readable (or acceptable).
    Read,
    /// Waiting for the fd to become writable (or connected).
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Read => "read",
            Direction::Write => "write",
        })
    }
}

/// The fibers parked on one fd.
///
/// One connection is driven by one fiber, so each direction holds at
/// most a single waiter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Waiters {
    pub(crate) reader: Option<FiberId>,
    pub(crate) writer: Option<FiberId>,
}

impl Waiters {
    fn slot(&mut self, direction: Direction) -> &mut Option<FiberId> {
        match direction {
            Direction::Read => &mut self.reader,
            Direction::Write => &mut self.writer,
        }
    }

    fn is_empty(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }
}

/// The fd side of the scheduler's waiting tables.
///
/// It tracks two things:
/// - which fds are admitted to the multiplexer (interest set),
/// - which fibers are parked on each fd, per direction.
///
/// Entries hold [`FiberId`]s, never references: the fiber arena stays
/// the single owner of every fiber.
#[derive(Debug, Default)]
pub(crate) struct IoTable {
    /// Fds currently registered with the poller.
    admitted: HashSet<RawFd>,

    /// Parked fibers per fd. An fd with no waiter has no entry.
    waiters: HashMap<RawFd, Waiters>,
}

impl IoTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_admitted(&self, fd: RawFd) -> bool {
        self.admitted.contains(&fd)
    }

    /// Marks `fd` as registered with the poller.
    ///
    /// Returns `false` if it already was.
    pub(crate) fn admit(&mut self, fd: RawFd) -> bool {
        self.admitted.insert(fd)
    }

    /// Forgets `fd` entirely, returning whoever was still parked on it.
    ///
    /// The returned flag reports whether the fd was admitted, so the
    /// caller knows whether the poller registration must be dropped too.
    pub(crate) fn evict(&mut self, fd: RawFd) -> (bool, Waiters) {
        let admitted = self.admitted.remove(&fd);
        let waiters = self.waiters.remove(&fd).unwrap_or_default();

        (admitted, waiters)
    }

    /// Parks `fiber` on `fd` for `direction`.
    ///
    /// Registering the same fiber twice is a no-op. A different fiber
    /// already parked in that slot is a [`Error::WaiterConflict`].
    pub(crate) fn insert(
        &mut self,
        fd: RawFd,
        direction: Direction,
        fiber: FiberId,
    ) -> Result<(), Error> {
        let slot = self.waiters.entry(fd).or_default().slot(direction);

        match *slot {
            Some(holder) if holder != fiber => Err(Error::WaiterConflict {
                fd,
                direction,
                holder,
            }),
            _ => {
                *slot = Some(fiber);
                Ok(())
            }
        }
    }

    /// Removes `fiber` from `fd`'s `direction` slot.
    ///
    /// Returns `false` if the slot held someone else or nothing.
    pub(crate) fn remove(&mut self, fd: RawFd, direction: Direction, fiber: FiberId) -> bool {
        let Some(waiters) = self.waiters.get_mut(&fd) else {
            return false;
        };

        let slot = waiters.slot(direction);
        let removed = *slot == Some(fiber);

        if removed {
            *slot = None;
        }

        if waiters.is_empty() {
            self.waiters.remove(&fd);
        }

        removed
    }

    /// The fiber parked on `fd` for `direction`, if any.
    pub(crate) fn waiter(&self, fd: RawFd, direction: Direction) -> Option<FiberId> {
        let waiters = self.waiters.get(&fd)?;

        match direction {
            Direction::Read => waiters.reader,
            Direction::Write => waiters.writer,
        }
    }

    pub(crate) fn has_waiters(&self, fd: RawFd) -> bool {
        self.waiters.contains_key(&fd)
    }

    /// Total number of parked (fd, direction) slots.
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters
            .values()
            .map(|w| w.reader.is_some() as usize + w.writer.is_some() as usize)
            .sum()
    }

    pub(crate) fn admitted_count(&self) -> usize {
        self.admitted.len()
    }
}
