//! The fiber scheduler.
//!
//! This module contains the dispatch loop and the suspension protocol:
//! - [`Scheduler`]: fiber admission, dispatch cycles and wake-ups,
//! - [`builder`]: scheduler and per-fiber configuration,
//! - [`yield_now`]: cooperative yielding.
//!
//! Most users spawn fibers, call [`Scheduler::run`] or
//! [`Scheduler::dispatch`], and otherwise rely on the socket primitives
//! in [`net`](crate::net) to suspend and resume on their behalf.

mod core;

pub(crate) mod builder;
pub(crate) mod yield_now;

pub use self::core::{Scheduler, Stats};
