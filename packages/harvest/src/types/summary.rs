//! Scan outcome types - per-query results and the run-level summary.

use std::fmt;
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::{export_rows, CandidateRecord, ExportRow};

/// Lifecycle of one query within a run.
///
/// ```text
/// Pending -> Fetching -> Filtering -> Appending -> Fetching ... -> Done
///               |-> Failed          (rejected, or unavailable before any page)
///               |-> PartiallyDone   (unavailable after at least one page)
/// Pending | Fetching -> Cancelled   (page boundary only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Pending,
    Fetching,
    Filtering,
    Appending,
    Done,
    Failed,
    PartiallyDone,
    Cancelled,
}

impl QueryState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: QueryState) -> bool {
        use QueryState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Pending, Cancelled)
                | (Fetching, Filtering)
                | (Fetching, Done)
                | (Fetching, Failed)
                | (Fetching, PartiallyDone)
                | (Fetching, Cancelled)
                | (Filtering, Appending)
                | (Appending, Fetching)
                | (Appending, Done)
        )
    }

    /// Whether the query has finished.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueryState::Done | QueryState::Failed | QueryState::PartiallyDone | QueryState::Cancelled
        )
    }

    /// Whether this terminal state counts against the run.
    pub fn is_failure(self) -> bool {
        matches!(self, QueryState::Failed | QueryState::PartiallyDone)
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryState::Pending => "pending",
            QueryState::Fetching => "fetching",
            QueryState::Filtering => "filtering",
            QueryState::Appending => "appending",
            QueryState::Done => "done",
            QueryState::Failed => "failed",
            QueryState::PartiallyDone => "partially_done",
            QueryState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every query completed
    Done,
    /// At least one query ended failed or partially done
    PartialFailure,
    /// The run was cancelled at a page boundary
    Cancelled,
}

/// Per-predicate tally from the filter engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    /// Records already in the seen index (or repeated within the batch)
    pub duplicates: usize,
    pub below_score: usize,
    pub outside_window: usize,
    pub keyword_miss: usize,
    pub accepted: usize,
}

impl FilterStats {
    /// Records rejected by a content predicate (excludes duplicates).
    pub fn filtered_out(&self) -> usize {
        self.below_score + self.outside_window + self.keyword_miss
    }

    /// Total records evaluated.
    pub fn total(&self) -> usize {
        self.duplicates + self.filtered_out() + self.accepted
    }
}

impl AddAssign for FilterStats {
    fn add_assign(&mut self, rhs: Self) {
        self.duplicates += rhs.duplicates;
        self.below_score += rhs.below_score;
        self.outside_window += rhs.outside_window;
        self.keyword_miss += rhs.keyword_miss;
        self.accepted += rhs.accepted;
    }
}

/// Counters reported per query and aggregated per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Pages requested from the fetcher
    pub requested: usize,
    /// Records returned by successful pages
    pub fetched: usize,
    /// Records rejected by score, age or keyword predicates
    pub filtered_out: usize,
    /// Records skipped because their id was already seen
    pub duplicates: usize,
    /// Records appended to the store
    pub accepted: usize,
    /// Terminal fetch failures
    pub errors: usize,
}

impl ScanStats {
    /// Fold one page's filter tally into the counters.
    pub fn record_page(&mut self, fetched: usize, filter: &FilterStats) {
        self.fetched += fetched;
        self.filtered_out += filter.filtered_out();
        self.duplicates += filter.duplicates;
    }
}

impl AddAssign for ScanStats {
    fn add_assign(&mut self, rhs: Self) {
        self.requested += rhs.requested;
        self.fetched += rhs.fetched;
        self.filtered_out += rhs.filtered_out;
        self.duplicates += rhs.duplicates;
        self.accepted += rhs.accepted;
        self.errors += rhs.errors;
    }
}

/// Outcome of scanning one query. Immutable once the run completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Query label (e.g. `r/rust`)
    pub query: String,

    pub state: QueryState,

    /// Accepted records in fetch order
    pub accepted: Vec<CandidateRecord>,

    pub stats: ScanStats,

    /// Per-predicate breakdown of everything filtered for this query
    pub filter: FilterStats,

    /// Human-readable failure reason for failed/partial/cancelled queries
    pub failure: Option<String>,

    /// Pagination stopped at the page-count safety limit
    pub truncated: bool,
}

impl ScanResult {
    /// Create an empty pending result for a query label.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            state: QueryState::Pending,
            accepted: Vec::new(),
            stats: ScanStats::default(),
            filter: FilterStats::default(),
            failure: None,
            truncated: false,
        }
    }

    /// Flat export rows for the accepted records.
    pub fn export_rows(&self) -> Vec<ExportRow> {
        export_rows(&self.accepted)
    }
}

/// Aggregate outcome of one orchestrated run across all queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Per-query results in input order
    pub results: Vec<ScanResult>,
    pub totals: ScanStats,
}

impl RunSummary {
    /// Build a summary, deriving status and totals from the results.
    pub fn from_results(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        results: Vec<ScanResult>,
        cancelled: bool,
    ) -> Self {
        let mut totals = ScanStats::default();
        for result in &results {
            totals += result.stats;
        }

        let status = if cancelled || results.iter().any(|r| r.state == QueryState::Cancelled) {
            RunStatus::Cancelled
        } else if results.iter().any(|r| r.state.is_failure()) {
            RunStatus::PartialFailure
        } else {
            RunStatus::Done
        };

        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            status,
            results,
            totals,
        }
    }

    /// All accepted records across queries, in query then fetch order.
    pub fn accepted_records(&self) -> impl Iterator<Item = &CandidateRecord> {
        self.results.iter().flat_map(|r| r.accepted.iter())
    }

    /// Flat export rows across all queries.
    pub fn export_rows(&self) -> Vec<ExportRow> {
        export_rows(self.accepted_records())
    }

    /// Results that ended failed or partially done.
    pub fn failures(&self) -> impl Iterator<Item = &ScanResult> {
        self.results.iter().filter(|r| r.state.is_failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_in(state: QueryState, accepted: usize) -> ScanResult {
        let mut result = ScanResult::new("r/test");
        result.state = state;
        result.stats.accepted = accepted;
        result.stats.requested = 1;
        result
    }

    #[test]
    fn test_allowed_transitions() {
        assert!(QueryState::Pending.can_transition_to(QueryState::Fetching));
        assert!(QueryState::Fetching.can_transition_to(QueryState::PartiallyDone));
        assert!(QueryState::Appending.can_transition_to(QueryState::Fetching));
        assert!(!QueryState::Done.can_transition_to(QueryState::Fetching));
        assert!(!QueryState::Filtering.can_transition_to(QueryState::Cancelled));
        assert!(!QueryState::Pending.can_transition_to(QueryState::Done));
    }

    #[test]
    fn test_run_status_derivation() {
        let done = RunSummary::from_results(
            Uuid::now_v7(),
            Utc::now(),
            vec![result_in(QueryState::Done, 2), result_in(QueryState::Done, 1)],
            false,
        );
        assert_eq!(done.status, RunStatus::Done);
        assert_eq!(done.totals.accepted, 3);
        assert_eq!(done.totals.requested, 2);

        let partial = RunSummary::from_results(
            Uuid::now_v7(),
            Utc::now(),
            vec![result_in(QueryState::Done, 2), result_in(QueryState::Failed, 0)],
            false,
        );
        assert_eq!(partial.status, RunStatus::PartialFailure);
        assert_eq!(partial.failures().count(), 1);

        let cancelled = RunSummary::from_results(
            Uuid::now_v7(),
            Utc::now(),
            vec![result_in(QueryState::PartiallyDone, 1)],
            true,
        );
        assert_eq!(cancelled.status, RunStatus::Cancelled);
    }

    #[test]
    fn test_filter_stats_separate_duplicates() {
        let stats = FilterStats {
            duplicates: 2,
            below_score: 1,
            outside_window: 1,
            keyword_miss: 3,
            accepted: 4,
        };
        assert_eq!(stats.filtered_out(), 5);
        assert_eq!(stats.total(), 11);
    }
}
