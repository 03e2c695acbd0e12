//! Phase-2 retry policy

use rand::Rng;
use std::time::Duration;

use crate::config::TpcKvConfig;

/// Exponential backoff with jitter between phase-2 delivery attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 0 retries until the decision is acknowledged
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(5000),
            max_attempts: 0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &TpcKvConfig) -> Self {
        Self {
            initial_backoff: config.retry_initial_backoff(),
            max_backoff: config.retry_max_backoff(),
            max_attempts: config.network.retry_max_attempts,
        }
    }

    /// Whether `attempts` failed deliveries use up the budget
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }

    /// Delay before the next attempt, after `attempt` failures.
    ///
    /// Doubles from `initial_backoff` up to `max_backoff`, then picks a
    /// random point in the upper half of that window.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ceiling = self
            .initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff);

        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms < 2 {
            return ceiling;
        }
        let ms = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(ms)
    }
}
