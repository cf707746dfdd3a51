use rand::{thread_rng, Rng};
use std::time::Duration;

/// Exponential back-off with jitter for retrying lost serialization races
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

/// Delays are spread uniformly over +/- this fraction
const JITTER_FRACTION: f64 = 0.5;

impl RetryPolicy {
    pub fn exponential(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(1),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the budget is spent
    pub fn delay_after(&self, attempt: usize) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        if self.base_delay.is_zero() {
            return Some(Duration::ZERO);
        }
        let shift = attempt.saturating_sub(1).min(16) as u32;
        let raw = self.base_delay.saturating_mul(1u32 << shift).min(self.max_delay);
        let factor = thread_rng().gen_range((1.0 - JITTER_FRACTION)..=(1.0 + JITTER_FRACTION));
        Some(raw.mul_f64(factor))
    }
}
