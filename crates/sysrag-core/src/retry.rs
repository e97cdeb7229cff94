//! Caller-side retries for external calls (search, embedding).
//!
//! The pipeline never retries on its own; entry points wrap a whole call
//! with a [`RetryPolicy`] so latency stays predictable inside it.

use std::thread;
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, ..Self::default() }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(5);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retriable error, or
    /// `max_attempts` calls have been made.
    pub fn run<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(attempt, ?delay, error = %err, "retrying");
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}
