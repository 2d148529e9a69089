//! Fixed-rate clocks for the control loop.
//!
//! A clock's due time advances by whole periods from its anchor, never from
//! "now", so a late iteration does not push later firings back.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct FixedRate {
    period: Duration,
    next_due: Instant,
}

impl FixedRate {
    /// First firing at `first_due`, then every `period`.
    pub fn new(period: Duration, first_due: Instant) -> Self {
        Self {
            period,
            next_due: first_due,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    /// Fires at most once: returns `true` and moves to the next slot when due.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.next_due += self.period;
            true
        } else {
            false
        }
    }
}
