//! Retry policy: exponential backoff and per-difficulty attempt budgets.

use std::time::Duration;

use crate::catalog::Difficulty;
use crate::config::{MaxAttemptsConfig, RetryConfig};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: MaxAttemptsConfig,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: MaxAttemptsConfig) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (1-based): `min(cap, base * 2^(attempt - 1))`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    pub fn max_attempts(&self, difficulty: Difficulty) -> u32 {
        self.max_attempts.for_difficulty(difficulty)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts.clone(),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(6), Duration::from_secs(32));
        assert_eq!(policy.delay(7), Duration::from_secs(60));
        assert_eq!(policy.delay(40), Duration::from_secs(60));
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), policy.delay(1));
    }

    #[test]
    fn test_zero_base_means_no_wait() {
        let policy = RetryPolicy::new(
            Duration::ZERO,
            Duration::from_secs(10),
            MaxAttemptsConfig::default(),
        );
        assert_eq!(policy.delay(5), Duration::ZERO);
    }

    #[test]
    fn test_default_budgets() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(Difficulty::Easy), 2);
        assert_eq!(policy.max_attempts(Difficulty::Medium), 3);
        assert_eq!(policy.max_attempts(Difficulty::Hard), 4);
    }
}
