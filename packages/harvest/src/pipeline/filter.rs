//! Dedup & filter engine.
//!
//! Predicates run in a fixed order and short-circuit:
//!
//! 1. already seen (store, or earlier in the same batch)
//! 2. score below the minimum
//! 3. age outside the window
//! 4. no keyword match
//!
//! The reference time is always passed in, so runs are reproducible.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::traits::store::RecordStore;
use crate::types::{query::SourceQuery, record::CandidateRecord, summary::FilterStats};

/// Outcome of evaluating one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Accept,
    Duplicate,
    BelowScore,
    OutsideWindow,
    KeywordMiss,
}

/// Records accepted from one batch, plus the tally of everything dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Accepted records in input order
    pub accepted: Vec<CandidateRecord>,
    pub stats: FilterStats,
}

/// Stateless filter over candidate records.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterEngine;

impl FilterEngine {
    pub fn new() -> Self {
        Self
    }

    /// Pure acceptance predicate.
    pub fn evaluate(
        &self,
        record: &CandidateRecord,
        query: &SourceQuery,
        already_seen: bool,
        now: DateTime<Utc>,
    ) -> Verdict {
        if already_seen {
            return Verdict::Duplicate;
        }
        if record.score < query.min_score() {
            return Verdict::BelowScore;
        }
        if !Self::within_window(record, query, now) {
            return Verdict::OutsideWindow;
        }
        if !record.mentions_any(query.keywords()) {
            return Verdict::KeywordMiss;
        }
        Verdict::Accept
    }

    /// Filter a batch against the store's seen index.
    ///
    /// Does not append: the caller appends accepted records so it controls
    /// when they become durable.
    pub async fn process<S>(
        &self,
        records: Vec<CandidateRecord>,
        query: &SourceQuery,
        store: &S,
        now: DateTime<Utc>,
    ) -> StoreResult<FilterOutcome>
    where
        S: RecordStore + ?Sized,
    {
        let mut outcome = FilterOutcome::default();
        let mut batch_ids: HashSet<String> = HashSet::with_capacity(records.len());

        for record in records {
            let already_seen = batch_ids.contains(&record.id) || store.has(&record.id).await?;

            match self.evaluate(&record, query, already_seen, now) {
                Verdict::Accept => {
                    batch_ids.insert(record.id.clone());
                    outcome.stats.accepted += 1;
                    outcome.accepted.push(record);
                }
                Verdict::Duplicate => outcome.stats.duplicates += 1,
                Verdict::BelowScore => outcome.stats.below_score += 1,
                Verdict::OutsideWindow => outcome.stats.outside_window += 1,
                Verdict::KeywordMiss => outcome.stats.keyword_miss += 1,
            }
        }

        Ok(outcome)
    }

    fn within_window(record: &CandidateRecord, query: &SourceQuery, now: DateTime<Utc>) -> bool {
        match query.effective_max_age() {
            // Future timestamps have negative age and pass
            Some(max_age) => now.signed_duration_since(record.created_at) <= max_age,
            None => true,
        }
    }
}
