use std::time::Duration;

use companion_core::Millis;

use crate::clock::duration_millis;

/// Debounces persistence: every `schedule` pushes the deadline out by one
/// interval, so a burst of updates ends in a single write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteScheduler {
    interval: Millis,
    deadline: Option<Millis>,
}

impl WriteScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: duration_millis(interval),
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: Millis) {
        self.deadline = Some(now.saturating_add(self.interval));
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Millis> {
        self.deadline
    }

    /// Consume the pending write if its deadline has passed.
    pub fn take_due(&mut self, now: Millis) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Consume the pending write regardless of its deadline.
    pub fn take_pending(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}
