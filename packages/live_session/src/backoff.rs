//! Reconnect delay policy.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff: `min(max_delay, base_delay * 2^attempt)`, then
/// spread by up to `jitter` (a fraction of the delay) in either direction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 disables jitter; 0.2 means +/-20%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// The un-jittered delay before reconnect attempt `attempt + 1`.
    pub fn base_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_for(attempt);
        // NaN fails this test as well as zero
        if !(self.jitter > 0.0) || base.is_zero() {
            return base;
        }
        let jitter = self.jitter.min(1.0);
        let spread = rand::rng().random_range(-jitter..=jitter);
        base.mul_f64(1.0 + spread).min(self.max_delay)
    }
}
