//! Exponential backoff calculation with jitter

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay policy for retries: `min(base · factorᵃᵗᵗᵉᵐᵖᵗ, max)` with
/// 50–150 % jitter when enabled. Attempts are zero-indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Base delay for the first retry.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Ceiling applied before jitter.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Exponential growth factor.
    pub factor: f64,

    /// Whether to apply 50–150 % jitter.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Session-pool policy: 0.5 s doubling up to 5 s.
    pub fn session_pool() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
            jitter: false,
        }
    }

    /// Compute the delay before retrying after `attempt` failures.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt as i32);
        let raw = self.base_delay.as_secs_f64() * exp;
        let capped = raw.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter {
            capped * (0.5 + fastrand::f64())
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }
}
