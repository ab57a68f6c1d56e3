//! Retry policy with exponential backoff and jitter.

use rand::Rng;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_attempts: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff strategy to use.
    pub backoff: BackoffStrategy,
    /// Cap applied to server-provided Retry-After values.
    pub max_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff: BackoffStrategy::ExponentialWithJitter { factor: 2.0 },
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Backoff strategy for determining retry delays.
#[derive(Debug, Clone, Copy)]
pub enum BackoffStrategy {
    /// Constant delay between retries.
    Constant,
    /// Exponential increase in delay (delay * factor^attempt).
    Exponential { factor: f64 },
    /// Exponential with random jitter to avoid thundering herd.
    ExponentialWithJitter { factor: f64 },
}

impl BackoffStrategy {
    /// Delay before retry number `attempt` (0-indexed), capped at `max_delay`.
    pub fn delay(&self, attempt: u32, initial_delay: Duration, max_delay: Duration) -> Duration {
        let base = initial_delay.as_secs_f64();
        let seconds = match self {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Exponential { factor } => base * factor.powi(attempt as i32),
            BackoffStrategy::ExponentialWithJitter { factor } => {
                let scaled = base * factor.powi(attempt as i32);
                scaled + rand::rng().random::<f64>() * scaled
            }
        };

        // Clamped in f64 so an overflowing power never reaches the conversion.
        Duration::from_secs_f64(seconds.min(max_delay.as_secs_f64()).max(0.0))
    }
}

/// Tracks attempts for one request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    attempt: u32,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of retries already taken.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return how long to wait before the next try,
    /// or `None` once attempts are exhausted.
    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }

        let delay = match retry_after {
            Some(server_delay) => std::cmp::min(server_delay, self.config.max_retry_after),
            None => self.config.backoff.delay(
                self.attempt,
                self.config.initial_delay,
                self.config.max_delay,
            ),
        };

        self.attempt += 1;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles_and_caps() {
        let strategy = BackoffStrategy::Exponential { factor: 2.0 };
        let initial = Duration::from_millis(100);
        let max = Duration::from_secs(1);

        assert_eq!(strategy.delay(0, initial, max), Duration::from_millis(100));
        assert_eq!(strategy.delay(2, initial, max), Duration::from_millis(400));
        assert_eq!(strategy.delay(8, initial, max), max);
    }

    #[test]
    fn test_huge_attempt_is_capped_instead_of_overflowing() {
        let max = Duration::from_secs(30);
        for strategy in [
            BackoffStrategy::Exponential { factor: 2.0 },
            BackoffStrategy::ExponentialWithJitter { factor: 2.0 },
        ] {
            assert_eq!(strategy.delay(5_000, Duration::from_secs(1), max), max);
        }
    }

    #[test]
    fn test_jitter_stays_within_double() {
        let strategy = BackoffStrategy::ExponentialWithJitter { factor: 2.0 };
        let delay = strategy.delay(1, Duration::from_secs(1), Duration::from_secs(60));
        assert!(delay >= Duration::from_secs(2));
        assert!(delay <= Duration::from_secs(4));
    }

    #[test]
    fn test_policy_exhausts() {
        let mut policy = RetryPolicy::new(
            RetryConfig::default()
                .with_max_attempts(2)
                .with_backoff(BackoffStrategy::Constant),
        );

        assert_eq!(policy.next_delay(None), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(None), Some(Duration::from_millis(500)));
        assert_eq!(policy.attempt(), 2);
        assert_eq!(policy.next_delay(None), None);
    }

    #[test]
    fn test_retry_after_is_capped() {
        let mut policy = RetryPolicy::new(RetryConfig::default());
        assert_eq!(
            policy.next_delay(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            policy.next_delay(Some(Duration::from_secs(600))),
            Some(Duration::from_secs(60))
        );
    }
}
