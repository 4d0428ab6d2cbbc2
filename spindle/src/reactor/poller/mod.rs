//! Platform-specific I/O poller.
//!
//! The poller is used by the scheduler to:
//! - admit file descriptors to the readiness multiplexer,
//! - wait, with a bounded timeout, for I/O readiness events.
//!
//! Only the Linux `epoll` backend exists; [`unix`] holds the raw socket
//! syscalls the networking primitives are built on.

pub(crate) mod common;

pub(crate) use common::Interest;

mod epoll;

pub(crate) type Poller = epoll::EpollPoller;

pub(crate) mod unix;

pub(crate) use unix as platform;
