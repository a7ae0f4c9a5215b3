//! Incremental store trait: the durable seen index plus accepted records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::types::record::CandidateRecord;

/// An accepted record as persisted, with the time it entered the seen index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record: CandidateRecord,
    pub seen_at: DateTime<Utc>,
}

/// Filter for reading stored records back (for export collaborators).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Only records from this subreddit (case-insensitive)
    pub subreddit: Option<String>,

    /// Only records with at least this score
    pub min_score: Option<i64>,

    /// Lower-cased keywords, any of which must appear in title or body
    pub keywords: Vec<String>,
}

impl RecordFilter {
    /// Create a new empty filter (matches all).
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one subreddit.
    pub fn for_subreddit(mut self, subreddit: impl Into<String>) -> Self {
        self.subreddit = Some(subreddit.into());
        self
    }

    /// Restrict to a minimum score.
    pub fn with_min_score(mut self, min_score: i64) -> Self {
        self.min_score = Some(min_score);
        self
    }

    /// Restrict to records mentioning any keyword.
    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords = keywords
            .into_iter()
            .map(|k| k.into().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    /// Check a record against the filter.
    pub fn matches(&self, record: &CandidateRecord) -> bool {
        if let Some(subreddit) = &self.subreddit {
            if !record.subreddit.eq_ignore_ascii_case(subreddit) {
                return false;
            }
        }
        if let Some(min_score) = self.min_score {
            if record.score < min_score {
                return false;
            }
        }
        record.mentions_any(&self.keywords)
    }
}

/// Durable record of seen ids and accepted records.
///
/// Single writer per storage location: concurrent runs against the same
/// location must be serialized by the caller.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether `id` was appended by this or any prior run.
    async fn has(&self, id: &str) -> StoreResult<bool>;

    /// Append an accepted record, stamped with the current time.
    ///
    /// Durable before returning. Returns `false` without writing when the id
    /// is already present, so concurrent writers of one id see exactly one
    /// `true`.
    async fn append(&self, record: &CandidateRecord) -> StoreResult<bool> {
        self.append_at(record, Utc::now()).await
    }

    /// Append with an explicit `seen_at` timestamp.
    async fn append_at(&self, record: &CandidateRecord, seen_at: DateTime<Utc>) -> StoreResult<bool>;

    /// Evict ids (and their records) seen before `older_than`.
    ///
    /// Returns the number of ids evicted.
    async fn prune(&self, older_than: DateTime<Utc>) -> StoreResult<usize>;

    /// Stored records matching a filter, in append order.
    async fn records(&self, filter: &RecordFilter) -> StoreResult<Vec<StoredRecord>>;

    /// Number of ids in the seen index.
    async fn seen_count(&self) -> StoreResult<usize>;
}
