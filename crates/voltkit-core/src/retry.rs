//! Retry policy for transient transport failures.

use std::time::Duration;

use crate::error::ConfigError;

/// Geometric backoff policy: attempt, then sleep
/// `initial_delay * backoff_factor^k` (capped at `max_delay`) before each
/// retry, for `max_attempts` total attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_factor: f64,
        max_delay: Duration,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry backoff_factor must be >= 1.0, got {backoff_factor}"
            )));
        }
        if max_delay < initial_delay {
            return Err(ConfigError::Invalid(
                "retry max_delay must be >= initial_delay".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            backoff_factor,
            max_delay,
        })
    }

    /// Delay before retry `k` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(retry as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// The sleep series between attempts: `max_attempts - 1` entries.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(|k| self.delay(k))
    }
}
