//! Subreddit Harvest Library
//!
//! A bounded, resumable pipeline that polls subreddits through a
//! rate-limited upstream feed, filters posts and comments by keyword, score
//! and age, and persists accepted records incrementally so that repeated
//! scheduled runs are idempotent.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use harvest::{Fetcher, MemoryStore, RateBudget, ScanOrchestrator, SourceQuery};
//! use harvest::testing::MockSource;
//!
//! let source = Arc::new(MockSource::new());
//! let budget = Arc::new(RateBudget::new(60, Duration::from_secs(60))?);
//! let fetcher = Arc::new(Fetcher::new(source, budget));
//! let store = Arc::new(MemoryStore::new());
//!
//! let query = SourceQuery::builder("rust").keywords(["async"]).min_score(10).build()?;
//! let summary = ScanOrchestrator::new(fetcher, store).run(&[query]).await?;
//!
//! for row in summary.export_rows() {
//!     println!("{} ({} comments)", row.title, row.comments.len());
//! }
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Seams for the upstream feed and the durable store
//! - [`types`] - Queries, records and run outcomes
//! - [`fetch`] - Rate budget, retries and the HTTP transport
//! - [`pipeline`] - Dedup/filter engine and the scan orchestrator
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`config`] - Environment and query-file configuration
//! - [`testing`] - Mock feed for testing

pub mod config;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use config::{HarvestConfig, QueryEntry, QueryFile};
pub use error::{
    ConfigError, FailureKind, FetchError, HarvestError, QueryError, Result, StoreError,
};
pub use fetch::{Backoff, Fetcher, HttpFeedSource, RateBudget, RetryPolicy};
pub use pipeline::{FilterEngine, FilterOutcome, OrchestratorConfig, ScanOrchestrator, Verdict};
pub use stores::{MemoryStore, SqliteStore};
pub use traits::{
    source::{ContentSource, Cursor, Page},
    store::{RecordFilter, RecordStore, StoredRecord},
};
pub use types::{
    query::{SourceQuery, SourceQueryBuilder, TimeWindow},
    record::{export_rows, CandidateRecord, ExportComment, ExportRow},
    summary::{FilterStats, QueryState, RunStatus, RunSummary, ScanResult, ScanStats},
};
