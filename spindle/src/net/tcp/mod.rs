//! TCP networking implementation.
//!
//! It is split into:
//! - [`listener`]: accepting incoming TCP connections,
//! - [`connection`]: connected streams with timed reads and writes.
//!
//! Every syscall here is non-blocking. When one would block, the calling
//! fiber registers with its scheduler and suspends until readiness, its
//! deadline, or the fd being unregistered.

pub mod connection;
pub mod listener;

use crate::error::Result;
use crate::fiber::Wakeup;
use crate::reactor::io::Direction;
use crate::runtime::Scheduler;
use crate::time::Deadline;

use std::os::fd::RawFd;
use std::time::Duration;

/// Suspends until `fd` is ready for `direction`.
///
/// The deadline is fixed by the first wait of an operation and reused by
/// the following ones, so retries never extend the caller's timeout. A
/// zero or absent timeout waits indefinitely.
///
/// Readiness that arrives once the deadline has already passed is
/// reported as [`Wakeup::TimedOut`]; the caller does not retry.
pub(super) fn wait_ready(
    scheduler: &Scheduler,
    fd: RawFd,
    direction: Direction,
    timeout: Option<Duration>,
    deadline: &mut Option<Deadline>,
) -> Result<Wakeup> {
    if deadline.is_none() {
        *deadline = scheduler.deadline_in(timeout.filter(|t| !t.is_zero()));
    }

    let wakeup = scheduler.wait_fd(fd, direction, *deadline)?;

    match *deadline {
        Some(at) if wakeup == Wakeup::Ready && scheduler.clock().has_passed(at) => {
            Ok(Wakeup::TimedOut)
        }
        _ => Ok(wakeup),
    }
}
