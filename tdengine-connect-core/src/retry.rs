//! Retry strategies.
//!
//! Two flavours are provided:
//! - [`RetryPolicy`]: a fixed number of attempts separated by a fixed interval,
//!   used when establishing connections.
//! - [`RetryStrategy`]: exponential backoff with jitter, used by the runtimes
//!   when a whole record or batch has to be processed again.

use crate::{ConnectorError, ConnectorResult};
use rand::Rng;
use std::time::Duration;

/// Fixed-interval attempt policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` must be at least 1
    pub fn new(max_attempts: u32, backoff: Duration) -> ConnectorResult<Self> {
        if max_attempts == 0 {
            return Err(ConnectorError::config("max connection attempts must be >= 1"));
        }
        Ok(Self {
            max_attempts,
            backoff,
        })
    }

    /// Single attempt, no waiting
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (not counting the first attempt)
    pub max_retries: u32,
    /// Base backoff in milliseconds
    pub base_backoff_ms: u64,
    /// Upper bound for a single backoff in milliseconds
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            base_backoff_ms,
            max_backoff_ms,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, 1000, 30000)
    }
}

/// Exponential backoff with +/-10% jitter
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Whether another retry is allowed after `attempt` retries so far
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_retries
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let base = self
            .config
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_backoff_ms);

        if base == 0 {
            return Duration::ZERO;
        }

        let jitter_range = (base / 10).max(1);
        let jitter = rand::rng().random_range(0..=jitter_range * 2);
        let millis = (base + jitter)
            .saturating_sub(jitter_range)
            .min(self.config.max_backoff_ms);

        Duration::from_millis(millis)
    }
}
