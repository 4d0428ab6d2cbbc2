use super::Scheduler;
use crate::error::Result;
use crate::fiber::FiberId;

use std::time::Duration;

/// Stack size given to fibers unless configured otherwise (1 MiB).
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Upper bound on a single multiplexer wait.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(2);

/// Readiness events handled per poll.
pub const DEFAULT_MAX_EVENTS: usize = 512;

/// Resolved scheduler configuration.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Config {
    pub(crate) stack_size: usize,
    pub(crate) poll_timeout: Duration,
    pub(crate) max_events: usize,
    pub(crate) capacity: usize,
}

/// Builder for configuring and creating a [`Scheduler`].
///
/// # Examples
///
/// ```rust,ignore
/// let scheduler = SchedulerBuilder::new()
///     .stack_size(256 * 1024)
///     .poll_timeout(Duration::from_millis(5))
///     .build()?;
/// ```
#[derive(Clone, Debug)]
pub struct SchedulerBuilder {
    config: Config,
}

impl SchedulerBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: Config {
                stack_size: DEFAULT_STACK_SIZE,
                poll_timeout: DEFAULT_POLL_TIMEOUT,
                max_events: DEFAULT_MAX_EVENTS,
                capacity: 64,
            },
        }
    }

    /// Sets the default fiber stack size in bytes.
    ///
    /// `0` restores the default of 1 MiB.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = if bytes == 0 {
            DEFAULT_STACK_SIZE
        } else {
            bytes
        };
        self
    }

    /// Sets how long one dispatch cycle may block waiting for readiness.
    ///
    /// The wait never blocks while fibers are ready, and never extends
    /// past the earliest pending deadline.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    /// Sets how many readiness events one poll may report.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_events(mut self, n: usize) -> Self {
        assert!(n > 0, "max_events must be > 0");

        self.config.max_events = n;
        self
    }

    /// Sets the initial capacity of the fiber table.
    pub fn capacity(mut self, n: usize) -> Self {
        self.config.capacity = n;
        self
    }

    /// Builds the scheduler, creating its readiness multiplexer.
    pub fn build(self) -> Result<Scheduler> {
        Scheduler::with_config(self.config)
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-fiber configuration, in the manner of `std::thread::Builder`.
///
/// # Examples
///
/// ```rust,ignore
/// FiberBuilder::new()
///     .name("acceptor")
///     .stack_size(64 * 1024)
///     .spawn(&scheduler, |s| { /* ... */ });
/// ```
#[derive(Clone, Debug, Default)]
pub struct FiberBuilder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl FiberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the diagnostic name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets this fiber's stack size; `0` uses the scheduler default.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Creates the fiber on `scheduler` and queues it.
    pub fn spawn<F>(self, scheduler: &Scheduler, body: F) -> FiberId
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        scheduler.spawn_fiber(Box::new(body), self.stack_size, self.name)
    }
}
