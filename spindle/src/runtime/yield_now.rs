use super::Scheduler;

use log::trace;

impl Scheduler {
    /// Yields execution back to the scheduler.
    ///
    /// The running fiber goes to the back of the ready queue, after any
    /// sibling queued earlier in the same cycle, and resumes in the next
    /// dispatch cycle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a running fiber.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// scheduler.spawn(|s| {
    ///     for _ in 0..3 {
    ///         // Allow other fibers to run
    ///         s.yield_now();
    ///     }
    /// });
    /// ```
    pub fn yield_now(&self) {
        let Some(id) = self.current() else {
            panic!("yield_now called outside of a fiber");
        };

        trace!("{id} yields");

        self.requeue(id);
        self.switch_out(id);
    }
}
