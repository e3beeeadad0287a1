//! Monotonic time source and deadline sleep for the tick loops.
//!
//! All pacing decisions in the engine are made against a single
//! `MonotonicClock` so that timestamps never retreat and both tick
//! accumulators share one notion of "now".

use crossbeam::utils::Backoff;
use std::time::{Duration, Instant};

/// How far ahead of a deadline `sleep_until` hands control back to the OS.
/// The residual is burned in a bounded spin so a late scheduler wakeup
/// cannot push a tick past its boundary.
pub const SPIN_MARGIN_NS: u64 = 200_000;

/// Monotonic clock anchored at construction time.
///
/// `now_ns` is the number of nanoseconds elapsed since the clock was
/// created. Backed by `Instant`, so it is immune to wall-clock steps.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            epoch: Instant::now(),
        }
    }

    /// Nanoseconds since this clock's epoch. Never decreases.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Sleep until `deadline_ns` on this clock's timeline.
    ///
    /// Sleeps coarsely to `deadline - SPIN_MARGIN_NS`, then spins the
    /// remainder. Returns immediately if the deadline has already passed.
    pub fn sleep_until(&self, deadline_ns: u64) {
        let now = self.now_ns();
        if deadline_ns > now + SPIN_MARGIN_NS {
            std::thread::sleep(Duration::from_nanos(deadline_ns - now - SPIN_MARGIN_NS));
        }

        let backoff = Backoff::new();
        while self.now_ns() < deadline_ns {
            backoff.spin();
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
