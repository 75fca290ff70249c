//! Bounded exponential backoff for live channel reconnects.
//!
//! Attempts are unlimited (a dropped channel is never fatal), but the delay
//! between them grows geometrically up to `max_delay_ms`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Growth factor per attempt (values below 1.0 are treated as 1.0).
    pub multiplier: f64,
    /// Random jitter as a fraction of the delay, `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as i32;
        let base_ms = (self.initial_delay_ms as f64) * self.multiplier.max(1.0).powi(exp);
        let base_ms = base_ms.min(self.max_delay_ms as f64);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let offset = if jitter > 0.0 && base_ms > 0.0 {
            let spread = base_ms * jitter;
            rand::rng().random_range(-spread..=spread)
        } else {
            0.0
        };

        let delay_ms = (base_ms + offset).clamp(0.0, self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}
