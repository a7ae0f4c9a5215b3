//! Scan orchestrator - fetch → filter → append, per query, concurrently.
//!
//! Each query walks its own state machine (see [`QueryState`]). Queries share
//! one [`Fetcher`] (and therefore one rate budget) and one store. A failing
//! query never stops its siblings; a failing store stops the whole run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use governor::clock::{Clock, DefaultClock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{QueryError, Result, StoreResult};
use crate::fetch::Fetcher;
use crate::pipeline::filter::{FilterEngine, FilterOutcome};
use crate::traits::source::Cursor;
use crate::traits::store::RecordStore;
use crate::types::{
    query::SourceQuery,
    summary::{QueryState, RunSummary, ScanResult},
};

/// Default page-count safety limit per query.
pub const DEFAULT_MAX_PAGES: usize = 20;

/// Default number of queries scanned at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Configuration for scan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Maximum pages fetched per query before pagination stops
    pub max_pages: usize,

    /// Number of queries scanned concurrently
    pub concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl OrchestratorConfig {
    /// Set the page-count safety limit.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Set concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Drives queries through fetch, filter and append.
pub struct ScanOrchestrator<C: Clock = DefaultClock> {
    fetcher: Arc<Fetcher<C>>,
    store: Arc<dyn RecordStore>,
    filter: FilterEngine,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl<C: Clock + Clone> ScanOrchestrator<C> {
    /// Create an orchestrator with the default config.
    pub fn new(fetcher: Arc<Fetcher<C>>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            fetcher,
            store,
            filter: FilterEngine::new(),
            config: OrchestratorConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the run config.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels the run at the next page boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run all queries against the current time.
    pub async fn run(&self, queries: &[SourceQuery]) -> Result<RunSummary> {
        self.run_at(queries, Utc::now()).await
    }

    /// Run all queries, judging record age against `now`.
    ///
    /// Results are reported in input order. Returns `Err` only when the
    /// store fails; upstream failures are folded into the summary.
    pub async fn run_at(&self, queries: &[SourceQuery], now: DateTime<Utc>) -> Result<RunSummary> {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        info!(
            %run_id,
            queries = queries.len(),
            concurrency = self.config.concurrency,
            max_pages = self.config.max_pages,
            "Starting scan run"
        );

        // Cancelled by the caller, or by any query whose store write fails
        let abort = self.cancel.child_token();

        let outcomes: Vec<StoreResult<ScanResult>> = stream::iter(queries)
            .map(|query| self.scan_query(query, now, &abort))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(%run_id, error = %e, "Store failure, scan run aborted");
                    return Err(e.into());
                }
            }
        }

        let summary =
            RunSummary::from_results(run_id, started_at, results, self.cancel.is_cancelled());

        info!(
            %run_id,
            status = ?summary.status,
            requested = summary.totals.requested,
            fetched = summary.totals.fetched,
            accepted = summary.totals.accepted,
            duplicates = summary.totals.duplicates,
            filtered_out = summary.totals.filtered_out,
            errors = summary.totals.errors,
            "Scan run complete"
        );

        Ok(summary)
    }

    async fn scan_query(
        &self,
        query: &SourceQuery,
        now: DateTime<Utc>,
        abort: &CancellationToken,
    ) -> StoreResult<ScanResult> {
        let mut result = ScanResult::new(query.label());

        if abort.is_cancelled() {
            transition(&mut result, QueryState::Cancelled);
            result.failure = Some("cancelled before start".to_string());
            return Ok(result);
        }

        let mut cursor: Option<Cursor> = None;
        let mut pages = 0usize;

        loop {
            if pages >= self.config.max_pages.max(1) {
                warn!(
                    query = %result.query,
                    pages,
                    "Page limit reached, stopping pagination"
                );
                result.truncated = true;
                transition(&mut result, QueryState::Done);
                break;
            }

            transition(&mut result, QueryState::Fetching);
            if abort.is_cancelled() {
                transition(&mut result, QueryState::Cancelled);
                result.failure = Some(format!("cancelled after {pages} pages"));
                break;
            }

            result.stats.requested += 1;
            let page = match self.fetcher.fetch(query, cursor.as_ref()).await {
                Ok(page) => page,
                Err(e) => {
                    result.stats.errors += 1;
                    let next = match e {
                        QueryError::SourceUnavailable { .. } if pages > 0 => {
                            QueryState::PartiallyDone
                        }
                        _ => QueryState::Failed,
                    };
                    warn!(query = %result.query, pages, error = %e, "Query failed");
                    result.failure = Some(e.to_string());
                    transition(&mut result, next);
                    break;
                }
            };
            pages += 1;

            transition(&mut result, QueryState::Filtering);
            let fetched = page.records.len();
            let outcome = match self.filter.process(page.records, query, self.store.as_ref(), now).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    abort.cancel();
                    return Err(e);
                }
            };
            transition(&mut result, QueryState::Appending);
            let FilterOutcome { accepted, mut stats } = outcome;
            for record in accepted {
                let inserted = match self.store.append(&record).await {
                    Ok(inserted) => inserted,
                    Err(e) => {
                        abort.cancel();
                        return Err(e);
                    }
                };
                if !inserted {
                    // A concurrent query stored this id after our filter pass
                    debug!(query = %result.query, id = %record.id, "Record stored by a sibling query");
                    stats.accepted -= 1;
                    stats.duplicates += 1;
                    continue;
                }
                result.stats.accepted += 1;
                result.accepted.push(record);
            }
            result.stats.record_page(fetched, &stats);
            result.filter += stats;

            match page.next_cursor {
                None => {
                    transition(&mut result, QueryState::Done);
                    break;
                }
                Some(next) if cursor.as_ref() == Some(&next) => {
                    warn!(
                        query = %result.query,
                        cursor = next.as_str(),
                        "Feed repeated its cursor, treating as end of feed"
                    );
                    transition(&mut result, QueryState::Done);
                    break;
                }
                Some(next) => cursor = Some(next),
            }
        }

        info!(
            query = %result.query,
            state = %result.state,
            pages,
            accepted = result.stats.accepted,
            duplicates = result.stats.duplicates,
            filtered_out = result.stats.filtered_out,
            "Query finished"
        );

        Ok(result)
    }
}

fn transition(result: &mut ScanResult, next: QueryState) {
    debug_assert!(
        result.state.can_transition_to(next),
        "illegal transition {} -> {}",
        result.state,
        next
    );
    debug!(query = %result.query, from = %result.state, to = %next, "Query state");
    result.state = next;
}
