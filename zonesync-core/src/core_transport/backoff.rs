//! Reconnect backoff policy
//!
//! Exponential backoff (`base * 2^attempt`, capped at `max_delay`) with
//! symmetric random jitter, and a bounded number of consecutive attempts.

use crate::config::TransportConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Fraction of the delay to randomize, in `[0, 1]`
    pub jitter: f64,
}

impl ReconnectPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        ReconnectPolicy {
            base_delay: config.reconnect_base_delay,
            max_delay: config.reconnect_max_delay,
            max_attempts: config.max_reconnect_attempts,
            jitter: config.reconnect_jitter,
        }
    }

    /// Delay before retry number `attempt` (0-indexed), without jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retry number `attempt`, with jitter applied
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        base.mul_f64(factor).min(self.max_delay)
    }

    /// Whether `attempts` consecutive failures use up the budget
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}
