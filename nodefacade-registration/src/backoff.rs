//! Exponential backoff with jitter for registry retries.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Ceiling for any single delay, jitter included.
    pub max_delay_ms: u64,
    /// Growth per attempt.
    pub multiplier: f64,
    /// Randomizes each delay by +/- this fraction (0.0-1.0).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based). Attempt 0 is immediate.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..=1.0);
        self.delay_for_attempt_with_jitter(attempt, jitter)
    }

    /// Same as [`delay_for_attempt`](Self::delay_for_attempt) with the random
    /// draw supplied, `jitter` in `[0.0, 1.0]`.
    pub fn delay_for_attempt_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let max_ms = self.max_delay_ms as f64;
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_ms = (self.initial_delay_ms as f64 * self.multiplier.powi(exponent)).min(max_ms);

        // jitter in [0, 1] maps to an offset in [-range, +range]
        let range = base_ms * self.jitter_factor.clamp(0.0, 1.0);
        let offset = (jitter.clamp(0.0, 1.0) * 2.0 - 1.0) * range;
        let final_ms = (base_ms + offset).clamp(1.0, max_ms.max(1.0));

        Duration::from_micros((final_ms * 1_000.0) as u64)
    }

    /// The largest delay this configuration can produce.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}
