//! Reconnect backoff schedule.

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Capped exponential backoff for reconnect attempts.
///
/// `delay(n) = min(base * 2^n, max)`, optionally spread by up to
/// `jitter_factor` in either direction and then capped again.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 disables jitter.
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before zero-based `attempt`, without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(20);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before zero-based `attempt`, with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = self.base_delay_for(attempt);
        if self.jitter_factor <= 0.0 {
            return capped;
        }
        let spread = rand::rng().random_range(-1.0..=1.0) * self.jitter_factor;
        capped.mul_f64((1.0 + spread).max(0.0)).min(self.max_delay)
    }

    /// Whether zero-based `attempt` is still within budget.
    pub const fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
