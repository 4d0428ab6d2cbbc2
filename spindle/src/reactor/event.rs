use std::os::fd::RawFd;

/// An I/O event reported by the poller.
///
/// An `Event` carries readiness information for one registered file
/// descriptor. It is produced by the poller and consumed by the
/// scheduler's dispatch loop to wake the fiber parked on that fd.
///
/// Error and hang-up conditions are reported as both readable and
/// writable, so that whichever side is waiting observes the failure
/// on its next syscall.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Event {
    /// The file descriptor the event is about.
    pub(crate) fd: RawFd,

    /// Indicates that the file descriptor is readable.
    pub(crate) readable: bool,

    /// Indicates that the file descriptor is writable.
    pub(crate) writable: bool,
}
