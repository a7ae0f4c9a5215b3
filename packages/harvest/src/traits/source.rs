//! Upstream content source trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchResult;
use crate::types::{query::SourceQuery, record::CandidateRecord};

/// Opaque continuation token for paginated fetches.
///
/// No structure is assumed; it is only handed back to the source that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of upstream results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub records: Vec<CandidateRecord>,

    /// Absent when the feed has no more results
    #[serde(default)]
    pub next_cursor: Option<Cursor>,
}

impl Page {
    /// Create a page.
    pub fn new(records: Vec<CandidateRecord>, next_cursor: Option<Cursor>) -> Self {
        Self {
            records,
            next_cursor,
        }
    }

    /// A page that ends the feed.
    pub fn last(records: Vec<CandidateRecord>) -> Self {
        Self::new(records, None)
    }
}

/// Paginated feed of post and comment records.
///
/// Implementations only perform the request and classify failures; rate
/// limiting, timeouts and retries are layered on by
/// [`Fetcher`](crate::fetch::Fetcher).
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the page after `cursor` (first page when `None`).
    async fn fetch_page(&self, query: &SourceQuery, cursor: Option<&Cursor>) -> FetchResult<Page>;

    /// Short name for logs.
    fn name(&self) -> &str;
}
