use crate::Scheduler;

use std::time::Duration;

impl Scheduler {
    /// Suspends the running fiber for at least `duration`.
    ///
    /// The fiber is filed in the expiry table only; it takes no place in
    /// the ready queue until the deadline passes.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a running fiber.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// use std::time::Duration;
    ///
    /// scheduler.spawn(|s| s.sleep(Duration::from_millis(10)));
    /// ```
    pub fn sleep(&self, duration: Duration) {
        let deadline = self.clock().deadline_after(duration);

        if self.register_deadline(deadline).is_err() {
            panic!("sleep called outside of a fiber");
        }

        log::trace!("{:?} sleeps until {deadline}", self.current());

        // Only the deadline is registered, so the only possible wake-up
        // is the timer.
        let _ = self.suspend();
    }

    /// Suspends the running fiber for at least `ms` milliseconds.
    pub fn sleep_ms(&self, ms: u64) {
        self.sleep(Duration::from_millis(ms));
    }
}
