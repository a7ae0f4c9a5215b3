//! Shared request budget.
//!
//! A token bucket built on the governor crate: `requests` tokens per rolling
//! `window`, with a burst of the same size. The upstream limit is
//! per-credential, so one budget is shared (via `Arc`) by every query in the
//! process.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::error::{ConfigError, ConfigResult};

type DirectLimiter<C> =
    RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Token bucket gating every upstream request.
///
/// Generic over the clock so tests can drive it with
/// `governor::clock::FakeRelativeClock`.
pub struct RateBudget<C: Clock = DefaultClock> {
    limiter: DirectLimiter<C>,
    clock: C,
    requests: u32,
    window: Duration,
}

impl RateBudget<DefaultClock> {
    /// Create a budget of `requests` per `window` on the real clock.
    pub fn new(requests: u32, window: Duration) -> ConfigResult<Self> {
        Self::with_clock(requests, window, DefaultClock::default())
    }
}

impl<C: Clock + Clone> RateBudget<C> {
    /// Create a budget driven by a custom clock.
    pub fn with_clock(requests: u32, window: Duration, clock: C) -> ConfigResult<Self> {
        let quota = quota_for(requests, window)?;
        Ok(Self {
            limiter: RateLimiter::direct_with_clock(quota, clock.clone()),
            clock,
            requests,
            window,
        })
    }

    /// Take a token if one is available right now.
    ///
    /// On failure returns how long until the next token frees up.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Wait until a token is available, then take it.
    ///
    /// This is the only place the fetch path blocks besides the request
    /// itself.
    pub async fn acquire(&self) {
        loop {
            match self.limiter.check() {
                Ok(()) => return,
                Err(not_until) => {
                    let wait = not_until.wait_time_from(self.clock.now());
                    tracing::debug!(wait_ms = wait.as_millis() as u64, "rate budget exhausted, waiting");
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Requests allowed per window.
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Rolling window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl<C: Clock> std::fmt::Debug for RateBudget<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateBudget")
            .field("requests", &self.requests)
            .field("window", &self.window)
            .finish()
    }
}

fn quota_for(requests: u32, window: Duration) -> ConfigResult<Quota> {
    let burst = NonZeroU32::new(requests)
        .ok_or_else(|| ConfigError::invalid("rate_limit_requests", "must be > 0"))?;
    let period = window / requests;
    let quota = Quota::with_period(period).ok_or_else(|| {
        ConfigError::invalid(
            "rate_limit_window",
            format!("{window:?} is too short for {requests} requests"),
        )
    })?;
    Ok(quota.allow_burst(burst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;
    use std::time::Instant;

    #[test]
    fn test_rejects_zero_requests() {
        assert!(RateBudget::new(0, Duration::from_secs(60)).is_err());
    }

    #[test]
    fn test_rejects_zero_window() {
        assert!(RateBudget::new(10, Duration::ZERO).is_err());
    }

    #[test]
    fn test_budget_exhausts_and_refills_with_fake_clock() {
        let clock = FakeRelativeClock::default();
        let budget = RateBudget::with_clock(3, Duration::from_secs(60), clock.clone()).unwrap();

        assert!(budget.try_acquire().is_ok());
        assert!(budget.try_acquire().is_ok());
        assert!(budget.try_acquire().is_ok());
        assert_eq!(budget.try_acquire(), Err(Duration::from_secs(20)));

        // One period replenishes one token
        clock.advance(Duration::from_secs(20));
        assert!(budget.try_acquire().is_ok());
        assert!(budget.try_acquire().is_err());

        // A full window replenishes the whole burst
        clock.advance(Duration::from_secs(60));
        assert!(budget.try_acquire().is_ok());
        assert!(budget.try_acquire().is_ok());
        assert!(budget.try_acquire().is_ok());
        assert!(budget.try_acquire().is_err());
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_token_available() {
        // 2 requests per 400ms: the third waits for a 200ms period
        let budget = RateBudget::new(2, Duration::from_millis(400)).unwrap();

        let start = Instant::now();
        budget.acquire().await;
        budget.acquire().await;
        budget.acquire().await;
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(150),
            "Rate limiting not working: {:?}",
            elapsed
        );
    }
}
