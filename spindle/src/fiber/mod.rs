//! Fibers: stackful, cooperatively scheduled units of execution.
//!
//! A [`Fiber`] owns its stack and the context saved the last time it was
//! switched out. Fibers are created and destroyed exclusively by the
//! [`Scheduler`](crate::Scheduler); everything outside the scheduler's
//! arena refers to them by [`FiberId`].
//!
//! - [`context`]: the architecture-specific stack switch,
//! - [`stack`]: guarded, heap-allocated fiber stacks.

pub(crate) mod context;
pub(crate) mod stack;

use crate::Scheduler;
use crate::reactor::io::Direction;
use crate::time::Deadline;
use crate::utils::Key;

use context::{Context, Entry};
use libc::c_void;
use stack::Stack;

use std::cell::Cell;
use std::fmt;
use std::os::fd::RawFd;

/// The body a fiber runs. It receives the scheduler that drives it.
pub(crate) type Body = Box<dyn FnOnce(&Scheduler) + 'static>;

thread_local! {
    /// Creation counter for fibers on this thread, used for diagnostics.
    static NEXT_SEQ: Cell<u64> = const { Cell::new(0) };
}

/// Identifies a fiber within its scheduler.
///
/// Ids are generation-checked: once a fiber has been destroyed, its id
/// never refers to another fiber, even if the arena slot is reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(pub(crate) Key);

impl FiberId {
    pub(crate) fn key(self) -> Key {
        self.0
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId({:?})", self.0)
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber#{}", self.0.index())
    }
}

/// Lifecycle state of a fiber.
///
/// `Init` → `Ready` at creation; a ready fiber runs when dispatched and
/// goes back to `Ready` if it yields, to `Waiting` if it blocks, or to
/// `Finished` when its body returns. Finished fibers are reclaimed by the
/// scheduler right after the dispatch slot that ran them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FiberStatus {
    /// Constructed, not yet queued.
    Init,
    /// Queued (or currently running).
    Ready,
    /// Suspended on I/O readiness and/or a deadline.
    Waiting,
    /// Body returned; awaiting reclamation.
    Finished,
}

impl FiberStatus {
    /// Returns `true` once the fiber's body has returned.
    pub fn is_finished(self) -> bool {
        self == FiberStatus::Finished
    }
}

/// Why a suspended fiber was resumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wakeup {
    /// A registered fd became ready.
    Ready,
    /// The registered deadline passed first.
    TimedOut,
    /// The fd was unregistered (connection closed) while waiting.
    Closed,
}

/// What a fiber is currently registered against.
///
/// Kept on the fiber itself so the scheduler can remove every table
/// entry in one place when the fiber is woken, whatever woke it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct WaitingEvents {
    /// Fds this fiber waits to read from.
    pub(crate) read_fds: Vec<RawFd>,

    /// Fds this fiber waits to write to.
    pub(crate) write_fds: Vec<RawFd>,

    /// Deadline this fiber is filed under in the expiry table.
    pub(crate) expire_at: Option<Deadline>,
}

impl WaitingEvents {
    pub(crate) fn is_empty(&self) -> bool {
        self.read_fds.is_empty() && self.write_fds.is_empty() && self.expire_at.is_none()
    }

    /// Records `fd` for `direction`, ignoring duplicates.
    pub(crate) fn add_fd(&mut self, fd: RawFd, direction: Direction) {
        let fds = match direction {
            Direction::Read => &mut self.read_fds,
            Direction::Write => &mut self.write_fds,
        };

        if !fds.contains(&fd) {
            fds.push(fd);
        }
    }

    /// Every registered fd with its direction.
    pub(crate) fn fds(&self) -> impl Iterator<Item = (RawFd, Direction)> + '_ {
        self.read_fds
            .iter()
            .map(|&fd| (fd, Direction::Read))
            .chain(self.write_fds.iter().map(|&fd| (fd, Direction::Write)))
    }
}

/// A fiber owned by the scheduler arena.
///
/// Fibers are boxed inside the arena so that their [`Context`] keeps a
/// stable address while the arena grows.
pub(crate) struct Fiber {
    /// Thread-local creation sequence number.
    pub(crate) seq: u64,

    /// Diagnostic label.
    pub(crate) name: String,

    pub(crate) status: FiberStatus,

    /// Current registrations, cleared on wake.
    pub(crate) waiting: WaitingEvents,

    /// Reason for the most recent wake-up, consumed on resume.
    pub(crate) wakeup: Option<Wakeup>,

    /// Body to run; taken when the fiber first starts.
    pub(crate) body: Option<Body>,

    /// Saved execution context.
    pub(crate) context: Context,

    /// Stack the context runs on. Freed when the fiber is dropped.
    stack: Stack,
}

impl Fiber {
    /// Allocates a stack and prepares a context that calls `entry(arg)`.
    ///
    /// # Safety
    ///
    /// `entry` must run the body, mark the fiber finished and switch
    /// away without ever returning; `arg` must stay valid for as long as
    /// the fiber can be resumed.
    pub(crate) unsafe fn new(
        body: Body,
        stack_size: usize,
        name: Option<String>,
        entry: Entry,
        arg: *mut c_void,
    ) -> Box<Self> {
        let stack = Stack::new(stack_size);
        let context = unsafe { Context::prepare(&stack, entry, arg) };

        let seq = NEXT_SEQ.with(|next| {
            let seq = next.get();
            next.set(seq + 1);
            seq
        });
        let name = name.unwrap_or_else(|| format!("fiber-{seq}"));

        log::trace!(
            "fiber[{seq}] `{name}` allocated {} byte stack",
            stack.size()
        );

        Box::new(Self {
            seq,
            name,
            status: FiberStatus::Init,
            waiting: WaitingEvents::default(),
            wakeup: None,
            body: Some(body),
            context,
            stack,
        })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.status.is_finished()
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("seq", &self.seq)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("waiting", &self.waiting)
            .field("stack_size", &self.stack.size())
            .finish()
    }
}
