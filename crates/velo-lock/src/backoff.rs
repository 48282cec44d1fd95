//! Exponential backoff with jitter for lock polling.

use rand::Rng;
use std::time::Duration;

/// Initial poll delay in milliseconds.
const INITIAL_DELAY_MS: u64 = 1;

/// Delay ceiling in milliseconds.
const MAX_DELAY_MS: u64 = 128;

/// Doubling backoff with random jitter, capped at a small ceiling.
///
/// On a long-held lock the expected total wait is about 1.5x the time
/// between the first attempt and the actual release, which is the
/// accepted cost of polling a non-blocking lock table.
#[derive(Debug)]
pub struct Backoff {
    next_ms: u64,
}

impl Backoff {
    /// Creates a backoff at the initial delay.
    pub fn new() -> Self {
        Self {
            next_ms: INITIAL_DELAY_MS,
        }
    }

    /// Returns the next delay and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next_ms;
        self.next_ms = (self.next_ms * 2).min(MAX_DELAY_MS);
        // Jitter of up to half the base delay avoids herds of waiters
        // polling in lockstep.
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
