//! Retry policy for retryable upstream failures.

use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^(attempt - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },

    /// Same delay after every failure
    Fixed(Duration),
}

impl Backoff {
    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(31);
                base.saturating_mul(1u32 << exponent).min(max)
            }
            Backoff::Fixed(delay) => delay,
        }
    }

    /// Upper bound on any single delay.
    pub fn cap(&self) -> Duration {
        match *self {
            Backoff::Exponential { max, .. } => max,
            Backoff::Fixed(delay) => delay,
        }
    }
}

/// Bounded retry policy injected into the [`Fetcher`](super::Fetcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,

    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(500),
                max: Duration::from_secs(30),
            },
        }
    }
}

impl RetryPolicy {
    /// Create an exponential policy.
    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential { base, max },
        }
    }

    /// Create a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the next attempt after `attempt` failed.
    ///
    /// An upstream `retry_after` hint raises the delay, but never above the
    /// policy's cap.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.backoff.delay(attempt);
        match retry_after {
            Some(hint) => delay.max(hint.min(self.backoff.cap())),
            None => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles_and_caps() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_millis(500));

        assert_eq!(policy.delay_for(1, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, None), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40, None), Duration::from_millis(500));
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(100), Duration::from_secs(2));

        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(1))),
            Duration::from_secs(1)
        );
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(60))),
            Duration::from_secs(2)
        );
        // A hint shorter than the backoff does not shorten it
        assert_eq!(
            policy.delay_for(3, Some(Duration::from_millis(10))),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn test_attempt_bounds() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(1), Duration::from_millis(1));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        assert!(!RetryPolicy::no_retry().should_retry(1));
        assert_eq!(RetryPolicy::exponential(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }
}
