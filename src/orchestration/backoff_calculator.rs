//! # Backoff Calculator
//!
//! Delay policy used while waiting on a remote conversion job.
//!
//! - Before the first status poll: random jitter in `[0, initial_jitter_max)`.
//! - Before retry `n` (zero-based): `min(step * (n + 1) + jitter, max_delay)`
//!   with jitter in `[0, retry_jitter_max)`.
//! - The whole wait is bounded by a wall-clock `budget`; once exceeded, the
//!   next poll is not made and the wait ends in a timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::PollingConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffCalculatorConfig {
    pub initial_jitter_max: Duration,
    pub step: Duration,
    pub retry_jitter_max: Duration,
    pub max_delay: Duration,
    pub budget: Duration,
}

impl Default for BackoffCalculatorConfig {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for BackoffCalculatorConfig {
    fn from(config: &PollingConfig) -> Self {
        Self {
            initial_jitter_max: Duration::from_millis(config.initial_jitter_max_ms),
            step: Duration::from_millis(config.step_ms),
            retry_jitter_max: Duration::from_millis(config.retry_jitter_max_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            budget: Duration::from_secs(config.budget_seconds),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackoffCalculator {
    config: BackoffCalculatorConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffCalculatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffCalculatorConfig {
        &self.config
    }

    /// Delay before retry number `attempt` (zero-based) for a given jitter
    pub fn retry_delay(&self, attempt: u32, jitter: Duration) -> Duration {
        let linear = self.config.step.saturating_mul(attempt.saturating_add(1));
        linear.saturating_add(jitter).min(self.config.max_delay)
    }

    /// Whether the wait has run past its budget
    pub fn budget_exceeded(&self, elapsed: Duration) -> bool {
        elapsed > self.config.budget
    }

    pub fn initial_delay(&self) -> Duration {
        random_jitter(self.config.initial_jitter_max)
    }

    pub fn next_retry_delay(&self, attempt: u32) -> Duration {
        self.retry_delay(attempt, random_jitter(self.config.retry_jitter_max))
    }
}

/// Uniform random duration in `[0, max)`
fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    max.mul_f64(fastrand::f64())
}
