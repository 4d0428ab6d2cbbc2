//! Time utilities.
//!
//! - [`Clock`]: the monotonic millisecond clock every deadline is
//!   measured against,
//! - [`Deadline`]: an absolute point on that clock,
//! - [`Scheduler::sleep`](crate::Scheduler::sleep) and
//!   [`Scheduler::sleep_ms`](crate::Scheduler::sleep_ms): timed
//!   suspension of the running fiber.

mod clock;
mod sleep;

pub use clock::{Clock, Deadline};
