//! Record types - posts and comments fetched from upstream.

use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// One post or comment fetched from the upstream feed, prior to filtering.
///
/// Comments share the post shape: they carry a `parent_id` and usually an
/// empty title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Upstream id, globally unique per source
    pub id: String,

    /// Subreddit the record was posted in
    pub subreddit: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub body: String,

    pub author: String,

    /// Link target (posts) or permalink
    #[serde(default)]
    pub url: Option<String>,

    pub score: i64,

    /// Creation time in whole seconds, unix seconds on the wire
    #[serde(rename = "created_utc", with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,

    /// Post id for comments; absent for top-level posts
    #[serde(default)]
    pub parent_id: Option<String>,

    /// Comment count reported upstream (posts only)
    #[serde(default)]
    pub num_comments: u32,
}

impl CandidateRecord {
    /// Create a top-level post.
    pub fn post(
        id: impl Into<String>,
        subreddit: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            subreddit: subreddit.into(),
            title: title.into(),
            body: String::new(),
            author: String::from("[deleted]"),
            url: None,
            score: 0,
            created_at: Utc::now().trunc_subsecs(0),
            parent_id: None,
            num_comments: 0,
        }
    }

    /// Create a comment on `parent_id`.
    pub fn comment(
        id: impl Into<String>,
        parent_id: impl Into<String>,
        subreddit: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            subreddit: subreddit.into(),
            title: String::new(),
            body: body.into(),
            author: String::from("[deleted]"),
            url: None,
            score: 0,
            created_at: Utc::now().trunc_subsecs(0),
            parent_id: Some(parent_id.into()),
            num_comments: 0,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_score(mut self, score: i64) -> Self {
        self.score = score;
        self
    }

    /// Set the creation time. Sub-second precision is dropped.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at.trunc_subsecs(0);
        self
    }

    pub fn with_num_comments(mut self, num_comments: u32) -> Self {
        self.num_comments = num_comments;
        self
    }

    /// Whether this record is a comment rather than a post.
    pub fn is_comment(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Case-insensitive substring match of any keyword against the title or
    /// the body. Keywords must already be lower-cased.
    pub fn mentions_any(&self, keywords: &[String]) -> bool {
        if keywords.is_empty() {
            return true;
        }
        let title = self.title.to_lowercase();
        let body = self.body.to_lowercase();
        keywords
            .iter()
            .any(|k| title.contains(k.as_str()) || body.contains(k.as_str()))
    }
}

/// A comment flattened for export, nested under its post's row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportComment {
    pub id: String,
    pub author: String,
    pub score: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<&CandidateRecord> for ExportComment {
    fn from(record: &CandidateRecord) -> Self {
        Self {
            id: record.id.clone(),
            author: record.author.clone(),
            score: record.score,
            body: record.body.clone(),
            created_at: record.created_at,
        }
    }
}

/// Flat mapping of named fields handed to format writers (CSV, JSON,
/// Markdown). The core does not concern itself with serialization syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub url: Option<String>,
    pub author: String,
    pub score: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub comments: Vec<ExportComment>,
}

impl From<&CandidateRecord> for ExportRow {
    fn from(record: &CandidateRecord) -> Self {
        Self {
            id: record.id.clone(),
            subreddit: record.subreddit.clone(),
            title: record.title.clone(),
            url: record.url.clone(),
            author: record.author.clone(),
            score: record.score,
            body: record.body.clone(),
            created_at: record.created_at,
            comments: Vec::new(),
        }
    }
}

/// Group records into export rows, nesting comments under their parent
/// post when that post is part of the same set. Orphan comments become
/// rows of their own. Row order follows the first appearance of each post.
pub fn export_rows<'a>(records: impl IntoIterator<Item = &'a CandidateRecord>) -> Vec<ExportRow> {
    let records: Vec<&CandidateRecord> = records.into_iter().collect();
    let mut rows: Vec<ExportRow> = Vec::with_capacity(records.len());
    let mut post_index: HashMap<&str, usize> = HashMap::new();

    for record in records.iter().filter(|r| !r.is_comment()) {
        post_index.insert(record.id.as_str(), rows.len());
        rows.push(ExportRow::from(*record));
    }

    for record in records.iter().filter(|r| r.is_comment()) {
        let parent = record.parent_id.as_deref().unwrap_or_default();
        match post_index.get(parent) {
            Some(&idx) => rows[idx].comments.push(ExportComment::from(*record)),
            None => rows.push(ExportRow::from(*record)),
        }
    }

    rows
}
