//! Testing utilities including a scripted mock feed.
//!
//! These are useful for testing applications that use the harvest library
//! without making real network calls.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, FetchResult};
use crate::traits::source::{ContentSource, Cursor, Page};
use crate::types::{query::SourceQuery, record::CandidateRecord};

/// How a mocked subreddit produces pages.
#[derive(Debug, Clone)]
enum Feed {
    /// Fixed pages chained with generated cursors
    Pages(Vec<Vec<CandidateRecord>>),

    /// Never-ending feed of fresh records
    Endless { per_page: usize },

    /// Every page returns the same cursor
    Looping(Vec<CandidateRecord>),
}

/// A mock content source for testing.
///
/// Feeds are scripted per subreddit. Failures can be queued (consumed one per
/// call) or pinned to a page index (returned on every request for that page).
/// Unknown subreddits are rejected.
#[derive(Default, Clone)]
pub struct MockSource {
    feeds: Arc<RwLock<HashMap<String, Feed>>>,

    /// Failures returned before serving, consumed in order
    queued_failures: Arc<RwLock<HashMap<String, VecDeque<FetchError>>>>,

    /// Failures returned every time a given page index is requested
    page_failures: Arc<RwLock<HashMap<(String, usize), FetchError>>>,

    /// Simulated request latency
    latency: Option<Duration>,

    /// Token cancelled once the call count reaches the threshold
    cancel_after: Option<(usize, CancellationToken)>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockSourceCall>>>,
}

/// Record of a call made to the mock source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSourceCall {
    pub subreddit: String,
    pub cursor: Option<String>,
}

impl MockSource {
    /// Create a mock with no feeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a single page for a subreddit.
    pub fn with_records(self, subreddit: &str, records: Vec<CandidateRecord>) -> Self {
        self.with_pages(subreddit, vec![records])
    }

    /// Serve several pages for a subreddit, chained by cursors.
    pub fn with_pages(self, subreddit: &str, pages: Vec<Vec<CandidateRecord>>) -> Self {
        self.feeds
            .write()
            .unwrap()
            .insert(subreddit.to_string(), Feed::Pages(pages));
        self
    }

    /// Serve an endless feed of fresh records.
    pub fn with_endless_feed(self, subreddit: &str, per_page: usize) -> Self {
        self.feeds
            .write()
            .unwrap()
            .insert(subreddit.to_string(), Feed::Endless { per_page });
        self
    }

    /// Serve the same records forever, always returning the same cursor.
    pub fn with_looping_feed(self, subreddit: &str, records: Vec<CandidateRecord>) -> Self {
        self.feeds
            .write()
            .unwrap()
            .insert(subreddit.to_string(), Feed::Looping(records));
        self
    }

    /// Queue failures returned by the next calls for a subreddit.
    pub fn with_failures(self, subreddit: &str, failures: Vec<FetchError>) -> Self {
        self.queued_failures
            .write()
            .unwrap()
            .entry(subreddit.to_string())
            .or_default()
            .extend(failures);
        self
    }

    /// Fail every request for one page index (0 = first page).
    pub fn fail_page(self, subreddit: &str, page: usize, error: FetchError) -> Self {
        self.page_failures
            .write()
            .unwrap()
            .insert((subreddit.to_string(), page), error);
        self
    }

    /// Delay every response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Cancel `token` when the `calls`-th request arrives.
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockSourceCall> {
        self.calls.read().unwrap().clone()
    }

    /// Number of calls made for one subreddit.
    pub fn calls_for(&self, subreddit: &str) -> usize {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.subreddit == subreddit)
            .count()
    }

    /// Clear call history.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    fn page_index(subreddit: &str, cursor: Option<&Cursor>) -> FetchResult<usize> {
        match cursor {
            None => Ok(0),
            Some(cursor) => cursor
                .as_str()
                .strip_prefix(subreddit)
                .and_then(|rest| rest.strip_prefix(':'))
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| FetchError::Rejected(format!("bad cursor {}", cursor.as_str()))),
        }
    }

    /// Resolve the page index, applying any failure pinned to it.
    fn serve_index(&self, subreddit: &str, cursor: Option<&Cursor>) -> FetchResult<usize> {
        let index = Self::page_index(subreddit, cursor)?;
        match self
            .page_failures
            .read()
            .unwrap()
            .get(&(subreddit.to_string(), index))
        {
            Some(error) => Err(error.clone()),
            None => Ok(index),
        }
    }

    fn next_cursor(subreddit: &str, index: usize) -> Cursor {
        Cursor::new(format!("{subreddit}:{}", index + 1))
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn fetch_page(&self, query: &SourceQuery, cursor: Option<&Cursor>) -> FetchResult<Page> {
        let subreddit = query.subreddit().to_string();
        let call_count = {
            let mut calls = self.calls.write().unwrap();
            calls.push(MockSourceCall {
                subreddit: subreddit.clone(),
                cursor: cursor.map(|c| c.as_str().to_string()),
            });
            calls.len()
        };

        if let Some((threshold, token)) = &self.cancel_after {
            if call_count >= *threshold {
                token.cancel();
            }
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let queued = self
            .queued_failures
            .write()
            .unwrap()
            .get_mut(&subreddit)
            .and_then(|q| q.pop_front());
        if let Some(error) = queued {
            return Err(error);
        }

        let feed = self.feeds.read().unwrap().get(&subreddit).cloned();
        let Some(feed) = feed else {
            return Err(FetchError::Rejected(format!("unknown subreddit r/{subreddit}")));
        };

        match feed {
            Feed::Looping(records) => Ok(Page::new(records, Some(Cursor::new("loop")))),
            Feed::Pages(pages) => {
                let index = self.serve_index(&subreddit, cursor)?;
                let records = pages.get(index).cloned().unwrap_or_default();
                let next = (index + 1 < pages.len()).then(|| Self::next_cursor(&subreddit, index));
                Ok(Page::new(records, next))
            }
            Feed::Endless { per_page } => {
                let index = self.serve_index(&subreddit, cursor)?;
                let records = (0..per_page)
                    .map(|n| post(&format!("{subreddit}-{index}-{n}"), &subreddit).with_score(100))
                    .collect();
                Ok(Page::new(records, Some(Self::next_cursor(&subreddit, index))))
            }
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A post with a generated title, created now.
pub fn post(id: &str, subreddit: &str) -> CandidateRecord {
    CandidateRecord::post(id, subreddit, format!("Post {id}"))
}

/// A post with a title, score and age relative to `now`.
pub fn scored_post(
    id: &str,
    subreddit: &str,
    title: &str,
    score: i64,
    created_at: DateTime<Utc>,
) -> CandidateRecord {
    CandidateRecord::post(id, subreddit, title)
        .with_score(score)
        .with_created_at(created_at)
        .with_author("tester")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(subreddit: &str) -> SourceQuery {
        SourceQuery::builder(subreddit).build().unwrap()
    }

    #[tokio::test]
    async fn test_pages_chain_with_cursors() {
        let source = MockSource::new().with_pages(
            "rust",
            vec![vec![post("a", "rust")], vec![post("b", "rust")]],
        );
        let q = query("rust");

        let first = source.fetch_page(&q, None).await.unwrap();
        assert_eq!(first.records[0].id, "a");
        let cursor = first.next_cursor.unwrap();

        let second = source.fetch_page(&q, Some(&cursor)).await.unwrap();
        assert_eq!(second.records[0].id, "b");
        assert!(second.next_cursor.is_none());
        assert_eq!(source.calls_for("rust"), 2);
    }

    #[tokio::test]
    async fn test_queued_failures_are_consumed() {
        let source = MockSource::new()
            .with_records("rust", vec![post("a", "rust")])
            .with_failures("rust", vec![FetchError::Transient("reset".into())]);
        let q = query("rust");

        assert!(source.fetch_page(&q, None).await.is_err());
        assert!(source.fetch_page(&q, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_subreddit_is_rejected() {
        let source = MockSource::new();
        let err = source.fetch_page(&query("nope"), None).await.unwrap_err();
        assert!(matches!(err, FetchError::Rejected(_)));
    }
}
