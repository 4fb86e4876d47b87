//! Retry policy with exponential backoff and jitter.

use std::time::Duration;

use dumdoors_core::config::RetryConfig;
use dumdoors_core::rng::DeterministicRng;
use dumdoors_core::scoring::ScoringError;

/// Largest fraction of the delay added as jitter.
const JITTER_FRACTION: f64 = 0.1;

/// Bounded retry decisions for one call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Wraps a retry configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Total attempts allowed, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Returns true if a call that failed with `error` on attempt number
    /// `attempt` (1-based) should be tried again.
    #[must_use]
    pub fn should_retry(&self, error: &ScoringError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_attempts()
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// `initial × factor^(retry − 1)`, capped at the maximum delay, plus up
    /// to 10% jitter when enabled.
    pub fn delay(&self, retry: u32, rng: &mut dyn DeterministicRng) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let base = self.config.initial_delay_ms as f64 * self.config.backoff_factor.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let capped = base.min(self.config.max_delay_ms as f64);
        let jitter = if self.config.jitter {
            capped * JITTER_FRACTION * rng.next_f64()
        } else {
            0.0
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let micros = ((capped + jitter).max(0.0) * 1000.0).round() as u64;
        Duration::from_micros(micros)
    }
}

#[cfg(test)]
mod tests {
    use dumdoors_test_support::{MockRng, SequenceRng};

    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_factor: 2.0,
            jitter,
        })
    }

    #[test]
    fn test_delay_grows_exponentially_without_jitter() {
        let policy = policy(false);
        let mut rng = MockRng;

        assert_eq!(policy.delay(1, &mut rng), Duration::from_millis(100));
        assert_eq!(policy.delay(2, &mut rng), Duration::from_millis(200));
        assert_eq!(policy.delay(3, &mut rng), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = policy(false);
        assert_eq!(policy.delay(20, &mut MockRng), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_adds_at_most_ten_percent() {
        // Arrange: next_f64 yields 0.5 then 0.99.
        let policy = policy(true);
        let mut rng = SequenceRng::new(vec![50, 99]);

        // Act
        let half = policy.delay(1, &mut rng);
        let near_max = policy.delay(1, &mut rng);

        // Assert
        assert_eq!(half, Duration::from_millis(105));
        assert!(near_max > Duration::from_millis(109));
        assert!(near_max <= Duration::from_millis(110));
    }

    #[test]
    fn test_only_transient_errors_are_retried_within_bound() {
        let policy = policy(false);

        assert!(policy.should_retry(&ScoringError::Timeout, 1));
        assert!(policy.should_retry(&ScoringError::Unavailable("503".into()), 2));
        assert!(!policy.should_retry(&ScoringError::Timeout, 3));
        assert!(!policy.should_retry(&ScoringError::Rejected("empty".into()), 1));
        assert!(!policy.should_retry(&ScoringError::CircuitOpen("scoring".into()), 1));
    }
}
