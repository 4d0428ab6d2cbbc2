//! Readiness multiplexing and waiting tables.
//!
//! This module holds everything the scheduler needs to turn external
//! events into wake-ups:
//! - [`poller`]: the epoll backend and the raw socket syscalls,
//! - [`event`]: readiness events reported by a poll,
//! - [`io`]: which fiber waits on which fd, per direction,
//! - [`timer`]: which fibers wake at which deadline.
//!
//! None of these types know about fibers beyond their [`FiberId`]; the
//! scheduler alone keeps them consistent with each other.
//!
//! [`FiberId`]: crate::fiber::FiberId

pub(crate) mod event;
pub(crate) mod io;
pub(crate) mod poller;
pub(crate) mod timer;
