//! Failure backoff for the sweep loop.
//!
//! While sweeps succeed the worker polls on its fixed interval. When a
//! sweep errors, the next attempt waits on this schedule instead:
//! delays double from one second up to five minutes, with a spread of
//! jitter so workers recovering from the same store outage do not all
//! sweep in lockstep.

use std::time::Duration;

use rand::Rng;

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(300);
/// Each delay is scaled by a random factor in `1.0 ± JITTER`.
const JITTER: f64 = 0.1;

/// Delay schedule for consecutive sweep failures.
#[derive(Debug)]
pub struct SweepBackoff {
    next: Duration,
    failures: u32,
}

impl SweepBackoff {
    pub fn new() -> Self {
        Self {
            next: INITIAL_DELAY,
            failures: 0,
        }
    }

    /// Delay to wait out after this failure.
    pub fn next_delay(&mut self) -> Duration {
        self.failures += 1;
        let base = self.next;
        self.next = (base * 2).min(MAX_DELAY);

        let spread = rand::rng().random_range(1.0 - JITTER..1.0 + JITTER);
        base.mul_f64(spread)
    }

    /// Forget the failure streak after a successful sweep.
    pub fn reset(&mut self) {
        self.next = INITIAL_DELAY;
        self.failures = 0;
    }

    /// Consecutive failures since the last successful sweep.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for SweepBackoff {
    fn default() -> Self {
        Self::new()
    }
}
