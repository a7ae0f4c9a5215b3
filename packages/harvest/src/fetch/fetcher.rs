//! Rate-limited fetcher with timeouts and bounded retries.

use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use tracing::{debug, warn};

use crate::error::{FailureKind, FetchError, QueryError};
use crate::fetch::rate_limit::RateBudget;
use crate::fetch::retry::RetryPolicy;
use crate::traits::source::{ContentSource, Cursor, Page};
use crate::types::query::SourceQuery;

/// Default per-call timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Wraps a [`ContentSource`] with the shared rate budget, a per-call timeout
/// and the retry policy.
///
/// Every attempt (including retries) draws one token from the budget, so
/// the budget bounds upstream traffic regardless of how many queries run.
/// The clock parameter follows the budget's, so a fake-clock budget can be
/// shared through the whole fetch path.
pub struct Fetcher<C: Clock = DefaultClock> {
    source: Arc<dyn ContentSource>,
    budget: Arc<RateBudget<C>>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<C: Clock> Clone for Fetcher<C> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            budget: self.budget.clone(),
            retry: self.retry,
            timeout: self.timeout,
        }
    }
}

impl<C: Clock + Clone> Fetcher<C> {
    /// Create a fetcher with the default retry policy and timeout.
    pub fn new(source: Arc<dyn ContentSource>, budget: Arc<RateBudget<C>>) -> Self {
        Self {
            source,
            budget,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The shared budget.
    pub fn budget(&self) -> &Arc<RateBudget<C>> {
        &self.budget
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fetch one page, retrying retryable failures per the policy.
    pub async fn fetch(
        &self,
        query: &SourceQuery,
        cursor: Option<&Cursor>,
    ) -> Result<Page, QueryError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.budget.acquire().await;

            let error = match self.attempt(query, cursor).await {
                Ok(page) => {
                    debug!(
                        query = %query.label(),
                        attempt,
                        records = page.records.len(),
                        has_next = page.next_cursor.is_some(),
                        "Fetched page"
                    );
                    return Ok(page);
                }
                Err(e) => e,
            };

            match error.failure_kind() {
                FailureKind::Fatal => {
                    warn!(
                        query = %query.label(),
                        source = self.source.name(),
                        error = %error,
                        "Upstream rejected request"
                    );
                    return Err(QueryError::SourceRejected {
                        reason: error.to_string(),
                    });
                }
                FailureKind::Retryable if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt, error.retry_after());
                    warn!(
                        query = %query.label(),
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retryable fetch failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                FailureKind::Retryable => {
                    warn!(
                        query = %query.label(),
                        attempts = attempt,
                        error = %error,
                        "Retries exhausted"
                    );
                    return Err(QueryError::SourceUnavailable {
                        attempts: attempt,
                        reason: error.to_string(),
                    });
                }
            }
        }
    }

    async fn attempt(&self, query: &SourceQuery, cursor: Option<&Cursor>) -> Result<Page, FetchError> {
        match tokio::time::timeout(self.timeout, self.source.fetch_page(query, cursor)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        }
    }
}

impl<C: Clock> std::fmt::Debug for Fetcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("source", &self.source.name())
            .field("budget", &self.budget)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post, MockSource};
    use governor::clock::FakeRelativeClock;
    use tokio::time::Instant;

    fn budget() -> Arc<RateBudget> {
        Arc::new(RateBudget::new(1000, Duration::from_secs(1)).unwrap())
    }

    fn fetcher(source: &MockSource, retry: RetryPolicy) -> Fetcher {
        Fetcher::new(Arc::new(source.clone()), budget()).with_retry(retry)
    }

    fn query() -> SourceQuery {
        SourceQuery::builder("rust").build().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let source = MockSource::new()
            .with_records("rust", vec![post("a", "rust")])
            .with_failures(
                "rust",
                vec![
                    FetchError::Transient("reset".into()),
                    FetchError::Transient("reset".into()),
                ],
            );
        let retry = RetryPolicy::exponential(3, Duration::from_millis(100), Duration::from_secs(5));

        let start = Instant::now();
        let page = fetcher(&source, retry).fetch(&query(), None).await.unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(source.calls_for("rust"), 3);
        // 100ms + 200ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_are_unavailable() {
        let source = MockSource::new()
            .with_records("rust", vec![post("a", "rust")])
            .with_failures("rust", vec![FetchError::Transient("down".into()); 5]);
        let retry = RetryPolicy::exponential(3, Duration::from_millis(10), Duration::from_millis(10));

        let err = fetcher(&source, retry).fetch(&query(), None).await.unwrap_err();

        assert!(matches!(err, QueryError::SourceUnavailable { attempts: 3, .. }));
        assert_eq!(source.calls_for("rust"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let source = MockSource::new()
            .with_records("rust", vec![post("a", "rust")])
            .with_failures("rust", vec![FetchError::Rejected("403 forbidden".into())]);

        let err = fetcher(&source, RetryPolicy::default())
            .fetch(&query(), None)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            QueryError::SourceRejected {
                reason: "rejected by upstream: 403 forbidden".into()
            }
        );
        assert_eq!(source.calls_for("rust"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_hint_lengthens_backoff() {
        let source = MockSource::new()
            .with_records("rust", vec![post("a", "rust")])
            .with_failures(
                "rust",
                vec![FetchError::Throttled {
                    retry_after: Some(Duration::from_secs(2)),
                }],
            );
        let retry = RetryPolicy::exponential(2, Duration::from_millis(10), Duration::from_secs(10));

        let start = Instant::now();
        fetcher(&source, retry).fetch(&query(), None).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_every_attempt_draws_from_fake_clock_budget() {
        let clock = FakeRelativeClock::default();
        let budget = Arc::new(RateBudget::with_clock(5, Duration::from_secs(60), clock.clone()).unwrap());
        let source = MockSource::new()
            .with_records("rust", vec![post("a", "rust")])
            .with_failures("rust", vec![FetchError::Transient("reset".into())]);
        let retry = RetryPolicy::exponential(3, Duration::from_millis(1), Duration::from_millis(1));

        let fetcher = Fetcher::new(Arc::new(source.clone()), budget.clone()).with_retry(retry);
        fetcher.fetch(&query(), None).await.unwrap();

        // One failed attempt plus the retry took two of the five tokens
        assert_eq!(source.calls_for("rust"), 2);
        for _ in 0..3 {
            assert!(budget.try_acquire().is_ok());
        }
        assert_eq!(budget.try_acquire(), Err(Duration::from_secs(12)));

        clock.advance(Duration::from_secs(12));
        assert!(fetcher.budget().try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out() {
        let source = MockSource::new()
            .with_records("rust", vec![post("a", "rust")])
            .with_latency(Duration::from_secs(60));

        let err = fetcher(&source, RetryPolicy::exponential(2, Duration::from_millis(1), Duration::from_millis(1)))
            .with_timeout(Duration::from_secs(1))
            .fetch(&query(), None)
            .await
            .unwrap_err();

        match err {
            QueryError::SourceUnavailable { attempts, reason } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }
}
