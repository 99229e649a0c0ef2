//! Exponential backoff with jitter for repeated accept failures.

use std::time::Duration;

use rand::Rng;

/// Calculate exponential backoff delay with jitter.
///
/// Attempt 0 means no failure yet and yields no delay.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    // up to 10% extra
    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

/// Tracks consecutive failures of one loop.
#[derive(Debug, Clone)]
pub struct FailureBackoff {
    failures: u32,
    base_ms: u64,
    max_ms: u64,
}

impl FailureBackoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            failures: 0,
            base_ms,
            max_ms,
        }
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn failed(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        calculate_backoff(self.failures, self.base_ms, self.max_ms)
    }

    pub fn succeeded(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
