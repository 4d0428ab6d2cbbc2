use crate::fiber::FiberId;
use crate::reactor::io::Direction;

use std::io;
use std::os::fd::RawFd;

/// Errors surfaced by the scheduler and the socket primitives.
///
/// Transient conditions (interrupted syscalls, would-block) never show
/// up here: they are absorbed by the retry loops. Orderly peer close is
/// not an error either; reads report it as `Ok(0)`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A syscall failed hard. The connection should be dropped.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The deadline of a timed operation passed before it could proceed.
    #[error("operation timed out")]
    TimedOut,

    /// Another fiber is already parked on this fd in this direction.
    #[error("fd {fd} already has a {direction} waiter ({holder})")]
    WaiterConflict {
        fd: RawFd,
        direction: Direction,
        holder: FiberId,
    },

    /// A suspending call was made from outside a running fiber.
    #[error("not called from within a running fiber")]
    NotInFiber,

    /// A socket address could not be parsed.
    #[error("invalid socket address `{0}`")]
    InvalidAddress(String),

    /// The fd was unregistered while the operation was waiting on it.
    #[error("fd closed while waiting")]
    Closed,
}

impl Error {
    /// Returns `true` if this is [`Error::TimedOut`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimedOut)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
