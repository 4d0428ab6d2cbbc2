use super::builder::{Config, SchedulerBuilder};
use crate::error::{Error, Result};
use crate::fiber::context::Context;
use crate::fiber::{Body, Fiber, FiberId, FiberStatus, WaitingEvents, Wakeup};
use crate::reactor::event::Event;
use crate::reactor::io::{Direction, IoTable};
use crate::reactor::poller::{Interest, Poller};
use crate::reactor::timer::ExpiryTable;
use crate::time::{Clock, Deadline};
use crate::utils::Slab;

use libc::c_void;
use log::{debug, error, trace, warn};

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;
use std::{mem, process};

/// A single-threaded fiber scheduler.
///
/// `Scheduler` is a cheap, clonable handle. Every fiber body receives a
/// reference to the scheduler that runs it, and the socket primitives
/// keep a clone of it, so no global lookup is ever needed.
///
/// The scheduler is responsible for:
/// - creating fibers and reclaiming them once their body returns,
/// - running ready fibers in FIFO order, one batch per dispatch cycle,
/// - turning expired deadlines and fd readiness into wake-ups,
/// - keeping the ready queue, the IO table and the expiry table
///   consistent across every suspension and resumption.
///
/// A scheduler is bound to the thread that created it (it is neither
/// `Send` nor `Sync`). Threads that need fibers create their own.
///
/// # Examples
///
/// ```rust,ignore
/// let scheduler = Scheduler::new();
///
/// scheduler.spawn(|s| {
///     s.sleep_ms(10);
///     println!("woke up");
/// });
///
/// scheduler.run();
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

/// Scheduler-owned resources, shared by every handle.
struct Inner {
    /// Fibers, queues and waiting tables.
    state: RefCell<State>,

    /// Readiness multiplexer.
    poller: RefCell<Poller>,

    /// Reusable buffer for polled events.
    events: RefCell<Vec<Event>>,

    /// Context of the dispatch loop, resumed whenever a fiber suspends.
    context: Context,

    clock: Clock,
    config: Config,

    /// Set while a dispatch loop runs on this scheduler.
    dispatching: Cell<bool>,

    /// First panic payload caught at a fiber boundary, not yet re-raised.
    panic: RefCell<Option<Box<dyn Any + Send>>>,
}

/// Bookkeeping mutated by the dispatch loop and the running fiber.
///
/// No borrow of this state is ever held across a context switch.
struct State {
    fibers: Slab<Box<Fiber>>,

    /// Fibers due to run in the next dispatch cycle.
    ready: VecDeque<FiberId>,

    /// Fiber currently executing, if any.
    current: Option<FiberId>,

    io: IoTable,
    timers: ExpiryTable,
}

/// A snapshot of the scheduler's bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Fibers created and not yet reclaimed.
    pub fibers: usize,

    /// Fibers queued for the next dispatch cycle.
    pub ready: usize,

    /// Occupied (fd, direction) slots in the IO table.
    pub io_waiters: usize,

    /// Entries in the expiry table.
    pub timers: usize,

    /// Fds admitted to the readiness multiplexer.
    pub registered_fds: usize,
}

impl Scheduler {
    /// Creates a scheduler with the default configuration.
    ///
    /// A scheduler that cannot create its multiplexer cannot do anything
    /// useful, so that failure is logged and the process is aborted. Use
    /// [`SchedulerBuilder::build`] to handle it instead.
    pub fn new() -> Self {
        match SchedulerBuilder::new().build() {
            Ok(scheduler) => scheduler,
            Err(e) => {
                error!("failed to create scheduler: {e}");
                process::abort();
            }
        }
    }

    /// Returns a builder to configure a scheduler.
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub(crate) fn with_config(config: Config) -> Result<Self> {
        let poller = Poller::new(config.max_events)?;

        debug!(
            "scheduler created (stack_size={}, poll_timeout={:?}, max_events={})",
            config.stack_size, config.poll_timeout, config.max_events
        );

        Ok(Self {
            inner: Rc::new(Inner {
                state: RefCell::new(State {
                    fibers: Slab::new(config.capacity),
                    ready: VecDeque::with_capacity(config.capacity),
                    current: None,
                    io: IoTable::new(),
                    timers: ExpiryTable::new(),
                }),
                poller: RefCell::new(poller),
                events: RefCell::new(Vec::with_capacity(config.max_events)),
                context: Context::empty(),
                clock: Clock::new(),
                config,
                dispatching: Cell::new(false),
                panic: RefCell::new(None),
            }),
        })
    }

    /// Creates a fiber running `body` and queues it for the next
    /// dispatch cycle.
    ///
    /// Never suspends the caller. Can be called before dispatching
    /// starts or from inside a running fiber to spawn a sibling.
    pub fn spawn<F>(&self, body: F) -> FiberId
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        self.spawn_fiber(Box::new(body), None, None)
    }

    pub(crate) fn spawn_fiber(
        &self,
        body: Body,
        stack_size: Option<usize>,
        name: Option<String>,
    ) -> FiberId {
        let stack_size = stack_size
            .filter(|&size| size > 0)
            .unwrap_or(self.inner.config.stack_size);
        let arg = Rc::as_ptr(&self.inner) as *mut c_void;

        // `arg` stays valid: fibers are only resumed through a live handle.
        let mut fiber = unsafe { Fiber::new(body, stack_size, name, fiber_main, arg) };
        fiber.status = FiberStatus::Ready;

        let mut state = self.inner.state.borrow_mut();
        let id = FiberId(state.fibers.insert(fiber));
        state.ready.push_back(id);

        if let Some(fiber) = state.fibers.get(id.key()) {
            debug!("spawned {id} `{}` (seq {})", fiber.name, fiber.seq);
        }

        id
    }

    /// Runs dispatch cycles forever.
    ///
    /// This is the entry point of a server process: once the initial
    /// fibers are spawned, the thread hands itself over to the scheduler.
    ///
    /// # Panics
    ///
    /// Re-raises the panic of a fiber body, and panics if called from
    /// inside a fiber or while another dispatch loop runs.
    pub fn dispatch(&self) -> ! {
        let _guard = self.enter();

        loop {
            self.cycle();
        }
    }

    /// Runs dispatch cycles until every fiber has finished.
    ///
    /// # Panics
    ///
    /// Same as [`dispatch`](Self::dispatch).
    pub fn run(&self) {
        let _guard = self.enter();

        while !self.inner.state.borrow().fibers.is_empty() {
            self.cycle();
        }
    }

    /// Runs exactly one dispatch cycle.
    ///
    /// # Panics
    ///
    /// Same as [`dispatch`](Self::dispatch).
    pub fn run_once(&self) {
        let _guard = self.enter();

        self.cycle();
    }

    fn enter(&self) -> Dispatching<'_> {
        assert!(
            self.inner.state.borrow().current.is_none(),
            "cannot dispatch from inside a fiber"
        );
        assert!(
            !self.inner.dispatching.replace(true),
            "scheduler is already dispatching"
        );

        Dispatching(&self.inner.dispatching)
    }

    /// One dispatch cycle: ready batch, timer sweep, readiness poll.
    fn cycle(&self) {
        self.run_ready();
        self.expire_timers();
        self.poll_io();
    }

    /// Runs every fiber that was ready when the cycle started.
    ///
    /// Fibers made ready while the batch runs are left for the next cycle.
    fn run_ready(&self) {
        let mut batch = mem::take(&mut self.inner.state.borrow_mut().ready).into_iter();

        while let Some(id) = batch.next() {
            self.resume(id);

            let caught = self.inner.panic.borrow_mut().take();
            if let Some(payload) = caught {
                let mut state = self.inner.state.borrow_mut();
                for id in batch.rev() {
                    state.ready.push_front(id);
                }
                drop(state);

                panic::resume_unwind(payload);
            }
        }
    }

    /// Switches into `id` and reclaims it if it finished.
    fn resume(&self, id: FiberId) {
        let target = {
            let mut state = self.inner.state.borrow_mut();

            let target = match state.fibers.get(id.key()) {
                Some(fiber) if fiber.status == FiberStatus::Ready => {
                    &fiber.context as *const Context
                }
                Some(fiber) => {
                    warn!("{id} queued while {:?}, skipping", fiber.status);
                    return;
                }
                None => {
                    warn!("{id} queued but no longer exists, skipping");
                    return;
                }
            };

            state.current = Some(id);
            target
        };

        trace!("switch scheduler -> {id}");

        // Fibers are boxed, so `target` survives arena growth while the
        // fiber runs; it is only removed below, after the switch returns.
        unsafe { Context::switch(&self.inner.context, &*target) };

        trace!("switch {id} -> scheduler");

        let finished = {
            let mut state = self.inner.state.borrow_mut();
            state.current = None;

            let finished = state
                .fibers
                .get(id.key())
                .is_some_and(|fiber| fiber.is_finished());

            if finished {
                state.fibers.remove(id.key())
            } else {
                None
            }
        };

        if let Some(fiber) = finished {
            debug!("{id} `{}` finished", fiber.name);
            drop(fiber);
        }
    }

    /// Wakes every fiber whose deadline has passed.
    ///
    /// Fds left without any waiter by a timed-out fiber are dropped from
    /// the multiplexer; they are admitted again on their next wait.
    fn expire_timers(&self) {
        let now = self.inner.clock.now_ms();
        let mut evicted = Vec::new();

        {
            let mut state = self.inner.state.borrow_mut();

            while let Some((deadline, id)) = state.timers.first_expired(now) {
                let Some(waiting) = state.wake(id, Wakeup::TimedOut) else {
                    state.timers.remove(deadline, id);
                    continue;
                };

                for (fd, _) in waiting.fds() {
                    if state.io.has_waiters(fd) {
                        continue;
                    }

                    let (admitted, _) = state.io.evict(fd);
                    if admitted {
                        evicted.push(fd);
                    }
                }
            }
        }

        let poller = self.inner.poller.borrow();
        for fd in evicted {
            match poller.deregister(fd) {
                Ok(()) => debug!("fd {fd} deregistered after timeout"),
                Err(e) => debug!("fd {fd} deregister after timeout failed: {e}"),
            }
        }
    }

    /// Polls the multiplexer and wakes the fibers parked on ready fds.
    fn poll_io(&self) {
        let timeout = {
            let state = self.inner.state.borrow();

            if !state.ready.is_empty() {
                Duration::ZERO
            } else {
                let bound = self.inner.config.poll_timeout;

                match state.timers.next_deadline() {
                    Some(deadline) => bound.min(self.inner.clock.remaining(deadline)),
                    None => bound,
                }
            }
        };

        let mut events = self.inner.events.borrow_mut();

        if let Err(e) = self.inner.poller.borrow_mut().poll(&mut events, timeout) {
            error!("epoll_wait failed: {e}");
            return;
        }

        let mut state = self.inner.state.borrow_mut();

        for event in events.iter() {
            if event.readable {
                if let Some(id) = state.io.waiter(event.fd, Direction::Read) {
                    state.wake(id, Wakeup::Ready);
                }
            }

            if event.writable {
                match state.io.waiter(event.fd, Direction::Write) {
                    Some(id) => {
                        state.wake(id, Wakeup::Ready);
                    }
                    None => trace!("write readiness on fd {} with no writer", event.fd),
                }
            }
        }
    }

    /// Appends the running fiber `id` to the ready queue.
    ///
    /// Registrations it made without suspending are dropped. A fiber
    /// that such a registration already woke is queued once, not twice.
    pub(super) fn requeue(&self, id: FiberId) {
        let mut state = self.inner.state.borrow_mut();

        let Some(fiber) = state.fibers.get_mut(id.key()) else {
            return;
        };

        let parked = fiber.status == FiberStatus::Waiting;
        let woken = fiber.wakeup.take().is_some();

        if parked {
            state.unpark(id);
        }

        if !woken {
            state.ready.push_back(id);
        }
    }

    /// Saves the running fiber `id` and resumes the dispatch loop.
    pub(super) fn switch_out(&self, id: FiberId) {
        let from = {
            let state = self.inner.state.borrow();

            match state.fibers.get(id.key()) {
                Some(fiber) => &fiber.context as *const Context,
                None => panic!("running {id} is missing from the fiber table"),
            }
        };

        unsafe { Context::switch(&*from, &self.inner.context) };
    }

    /// Admits `fd` to the readiness multiplexer.
    ///
    /// Both directions are armed, edge-triggered. Admitting an fd twice
    /// is a no-op. Sockets created by [`net`](crate::net) are admitted
    /// at creation; raw fds are admitted by their first wait.
    pub fn register_fd(&self, fd: RawFd) -> Result<()> {
        let mut state = self.inner.state.borrow_mut();

        if state.io.is_admitted(fd) {
            return Ok(());
        }

        self.inner.poller.borrow().register(fd, Interest::BOTH)?;
        state.io.admit(fd);

        debug!("fd {fd} registered");

        Ok(())
    }

    /// Registers the running fiber as the `direction` waiter of `fd`,
    /// optionally with a deadline.
    ///
    /// The fiber becomes `Waiting` and must [`suspend`](Self::suspend)
    /// right after. Several fds may be registered before suspending;
    /// whichever fires first wakes the fiber and clears every
    /// registration. A new deadline replaces the previous one.
    ///
    /// On error the fiber's pending registrations are dropped and it
    /// stays runnable.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInFiber`] outside of a running fiber,
    /// - [`Error::WaiterConflict`] if another fiber waits on the same
    ///   fd and direction,
    /// - [`Error::Io`] if the fd cannot be admitted to the multiplexer.
    pub fn register_wait(
        &self,
        fd: RawFd,
        direction: Direction,
        deadline: Option<Deadline>,
    ) -> Result<()> {
        let id = self.current().ok_or(Error::NotInFiber)?;

        let registered = self.register_fd(fd).and_then(|()| {
            self.inner
                .state
                .borrow_mut()
                .park(id, Some((fd, direction)), deadline)
        });

        if let Err(e) = registered {
            self.inner.state.borrow_mut().unpark(id);
            return Err(e);
        }

        debug!("{id} waits for {direction} on fd {fd} (deadline: {deadline:?})");

        Ok(())
    }

    /// Registers the running fiber in the expiry table only.
    pub(crate) fn register_deadline(&self, deadline: Deadline) -> Result<()> {
        let id = self.current().ok_or(Error::NotInFiber)?;

        self.inner.state.borrow_mut().park(id, None, Some(deadline))
    }

    /// Suspends the running fiber until one of its registrations fires,
    /// and reports which kind did.
    ///
    /// A fiber with no registration is simply re-queued, as with
    /// [`yield_now`](Self::yield_now), and resumes with [`Wakeup::Ready`].
    pub fn suspend(&self) -> Result<Wakeup> {
        let id = self.current().ok_or(Error::NotInFiber)?;

        {
            let mut state = self.inner.state.borrow_mut();

            let requeue = match state.fibers.get_mut(id.key()) {
                Some(fiber)
                    if fiber.status == FiberStatus::Waiting && !fiber.waiting.is_empty() =>
                {
                    false
                }
                // Already woken (and queued) before it got to suspend.
                Some(fiber) if fiber.wakeup.is_some() => false,
                Some(fiber) => {
                    fiber.status = FiberStatus::Ready;
                    true
                }
                None => false,
            };

            if requeue {
                state.ready.push_back(id);
            }
        }

        self.switch_out(id);

        let wakeup = self
            .inner
            .state
            .borrow_mut()
            .fibers
            .get_mut(id.key())
            .and_then(|fiber| fiber.wakeup.take());

        Ok(wakeup.unwrap_or(Wakeup::Ready))
    }

    /// [`register_wait`](Self::register_wait) followed by
    /// [`suspend`](Self::suspend).
    pub fn wait_fd(
        &self,
        fd: RawFd,
        direction: Direction,
        deadline: Option<Deadline>,
    ) -> Result<Wakeup> {
        self.register_wait(fd, direction, deadline)?;
        self.suspend()
    }

    /// Forgets `fd`: wakes its pending reader and writer with
    /// [`Wakeup::Closed`], then drops it from the multiplexer and the
    /// IO table.
    ///
    /// Must be called before the fd is closed. Unknown fds are ignored.
    pub fn unregister_fd(&self, fd: RawFd) {
        let admitted = {
            let mut state = self.inner.state.borrow_mut();

            let reader = state.io.waiter(fd, Direction::Read);
            let writer = state
                .io
                .waiter(fd, Direction::Write)
                .filter(|&w| Some(w) != reader);

            for id in reader.into_iter().chain(writer) {
                state.wake(id, Wakeup::Closed);
            }

            let (admitted, _) = state.io.evict(fd);
            admitted
        };

        if !admitted {
            return;
        }

        match self.inner.poller.borrow().deregister(fd) {
            Ok(()) => debug!("fd {fd} unregistered"),
            Err(e) => warn!("fd {fd} deregister failed: {e}"),
        }
    }

    /// The fiber currently executing, if any.
    pub fn current(&self) -> Option<FiberId> {
        self.inner.state.borrow().current
    }

    /// Status of fiber `id`, or `None` once it has been reclaimed.
    pub fn fiber_status(&self, id: FiberId) -> Option<FiberStatus> {
        self.inner
            .state
            .borrow()
            .fibers
            .get(id.key())
            .map(|fiber| fiber.status)
    }

    /// Diagnostic name of fiber `id`.
    pub fn fiber_name(&self, id: FiberId) -> Option<String> {
        self.inner
            .state
            .borrow()
            .fibers
            .get(id.key())
            .map(|fiber| fiber.name.clone())
    }

    /// Counts of live fibers and table entries.
    pub fn stats(&self) -> Stats {
        let state = self.inner.state.borrow();

        Stats {
            fibers: state.fibers.len(),
            ready: state.ready.len(),
            io_waiters: state.io.waiter_count(),
            timers: state.timers.len(),
            registered_fds: state.io.admitted_count(),
        }
    }

    /// The clock deadlines are measured against.
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Deadline `timeout` from now, or `None` for no timeout.
    pub(crate) fn deadline_in(&self, timeout: Option<Duration>) -> Option<Deadline> {
        timeout.map(|t| self.inner.clock.deadline_after(t))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Files fiber `id` in the waiting tables and marks it `Waiting`.
    fn park(
        &mut self,
        id: FiberId,
        fd: Option<(RawFd, Direction)>,
        deadline: Option<Deadline>,
    ) -> Result<()> {
        if let Some((fd, direction)) = fd {
            self.io.insert(fd, direction, id)?;
        }

        let Some(fiber) = self.fibers.get_mut(id.key()) else {
            return Err(Error::NotInFiber);
        };

        if let Some((fd, direction)) = fd {
            fiber.waiting.add_fd(fd, direction);
        }

        if let Some(deadline) = deadline {
            if let Some(previous) = fiber.waiting.expire_at.replace(deadline) {
                self.timers.remove(previous, id);
            }
            self.timers.insert(deadline, id);
        }

        fiber.status = FiberStatus::Waiting;

        Ok(())
    }

    /// Drops every registration of the running fiber `id` without
    /// queueing it.
    fn unpark(&mut self, id: FiberId) {
        let Some(fiber) = self.fibers.get_mut(id.key()) else {
            return;
        };

        let waiting = mem::take(&mut fiber.waiting);
        fiber.status = FiberStatus::Ready;

        self.forget(id, &waiting);
    }

    /// Clears everything still pointing at the finishing fiber `id`:
    /// its waiting-table entries and a pending place in the ready queue.
    fn release(&mut self, id: FiberId) {
        let Some(fiber) = self.fibers.get_mut(id.key()) else {
            return;
        };

        let parked = fiber.status == FiberStatus::Waiting;
        let woken = fiber.wakeup.take().is_some();

        if parked {
            debug!("{id} finished while registered, dropping its waits");
            self.unpark(id);
        }

        if woken {
            self.ready.retain(|queued| *queued != id);
        }
    }

    /// Moves a `Waiting` fiber to the ready queue, removing all of its
    /// IO and expiry entries.
    ///
    /// This is the only way out of `Waiting`. Returns the registrations
    /// that were cleared, or `None` if `id` was not waiting.
    fn wake(&mut self, id: FiberId, reason: Wakeup) -> Option<WaitingEvents> {
        let Some(fiber) = self.fibers.get_mut(id.key()) else {
            warn!("cannot wake {id}: no such fiber");
            return None;
        };

        if fiber.status != FiberStatus::Waiting {
            warn!("cannot wake {id}: it is {:?}", fiber.status);
            return None;
        }

        let waiting = mem::take(&mut fiber.waiting);
        fiber.status = FiberStatus::Ready;
        fiber.wakeup = Some(reason);

        self.forget(id, &waiting);
        self.ready.push_back(id);

        debug!("{id} woken ({reason:?})");

        Some(waiting)
    }

    /// Removes `id`'s entries from both waiting tables.
    fn forget(&mut self, id: FiberId, waiting: &WaitingEvents) {
        for (fd, direction) in waiting.fds() {
            if !self.io.remove(fd, direction, id) {
                warn!("{id} missing from the {direction} waiters of fd {fd}");
            }
        }

        if let Some(deadline) = waiting.expire_at {
            if !self.timers.remove(deadline, id) {
                warn!("{id} missing from the expiry table at {deadline}");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();

        for fiber in state.fibers.drain() {
            warn!(
                "scheduler dropped with fiber `{}` still {:?}",
                fiber.name, fiber.status
            );
        }
    }
}

/// Clears the dispatching flag when a dispatch loop exits, even by
/// unwinding.
struct Dispatching<'a>(&'a Cell<bool>);

impl Drop for Dispatching<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// First frame of every fiber.
///
/// Runs the body with a scheduler handle, catches a panic at the fiber
/// boundary, marks the fiber finished and switches away for good.
unsafe extern "C" fn fiber_main(arg: *mut c_void) -> ! {
    let inner = arg as *const Inner;

    let scheduler = unsafe {
        Rc::increment_strong_count(inner);
        Scheduler {
            inner: Rc::from_raw(inner),
        }
    };

    let started = {
        let mut state = scheduler.inner.state.borrow_mut();

        state.current.and_then(|id| {
            let body = state.fibers.get_mut(id.key())?.body.take()?;
            Some((id, body))
        })
    };

    let Some((id, body)) = started else {
        error!("fiber entered without a runnable body");
        process::abort();
    };

    trace!("{id} started");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&scheduler)));

    if let Err(payload) = outcome {
        error!("{id} panicked");

        let mut stash = scheduler.inner.panic.borrow_mut();
        if stash.is_none() {
            *stash = Some(payload);
        }
    }

    let from = {
        let mut state = scheduler.inner.state.borrow_mut();

        // A body may return while still registered, or after a
        // registration already queued it. Neither may outlive the fiber.
        state.release(id);

        match state.fibers.get_mut(id.key()) {
            Some(fiber) => {
                fiber.status = FiberStatus::Finished;
                &fiber.context as *const Context
            }
            None => {
                error!("finished {id} is missing from the fiber table");
                process::abort();
            }
        }
    };

    // The dispatch loop's handle keeps `inner` alive past this drop.
    drop(scheduler);

    unsafe { Context::switch(&*from, &(*inner).context) };

    error!("finished {id} was resumed");
    process::abort();
}
