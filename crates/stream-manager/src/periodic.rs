//! Next-due scheduling for periodic monitor work

use std::time::{Duration, Instant};

/// A task that runs every `interval`, tracked by its next due time
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    interval: Duration,
    next_due: Instant,
}

impl PeriodicTask {
    /// Create a task that is due immediately
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, first_due: Instant) -> Self {
        Self {
            interval,
            next_due: first_due,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    /// Record a run at `now` and schedule the next one.
    ///
    /// Missed intervals are skipped rather than replayed.
    pub fn mark_run(&mut self, now: Instant) {
        let next = self.next_due + self.interval;
        self.next_due = if next <= now { now + self.interval } else { next };
    }

    /// Run the task if due; returns whether it ran
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.mark_run(now);
            true
        } else {
            false
        }
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }
}
