//! Reconnect backoff
//!
//! Exponential delay, capped, with jitter: attempt `n` waits a random time in
//! `[d/2, d]` where `d = min(initial * 2^n, max)`. Spreading the retries keeps
//! a fleet of clients from reconnecting to a recovering server in lockstep.

use std::time::Duration;

use rand::Rng;

/// Backoff state for one connection
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempts: u32,
}

impl Backoff {
    /// Create a backoff starting at `initial` and capped at `max` (raised to
    /// `initial` if smaller)
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempts: 0,
        }
    }

    /// Upper bound of the delay for the current attempt, without jitter
    pub fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempts.min(31)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempts = self.attempts.saturating_add(1);

        let upper = ceiling.as_nanos().min(u64::MAX as u128) as u64;
        if upper == 0 {
            return Duration::ZERO;
        }
        let nanos = rand::thread_rng().gen_range(upper / 2..=upper);
        Duration::from_nanos(nanos)
    }

    /// Forget previous failures (after a successful connect)
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consecutive failed attempts so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
