//! Exponential backoff policy for page fetches.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often and how patiently a GET is retried.
///
/// The delay before attempt `n` (1-based, `n >= 2`) is
/// `base_delay * 2^(n - 2)`, capped at `max_delay`, plus up to 50% random
/// jitter when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }

    /// Delay to wait before `attempt` (1-based). The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(20);
        let raw = self.base_delay_ms.saturating_mul(1u64 << exp);
        let capped = raw.min(self.max_delay_ms);
        let jitter = if self.jitter && capped > 0 {
            rand::thread_rng().gen_range(0..=capped / 2)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
