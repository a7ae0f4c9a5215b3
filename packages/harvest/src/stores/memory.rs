//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{StoreError, StoreResult};
use crate::traits::store::{RecordFilter, RecordStore, StoredRecord};
use crate::types::record::CandidateRecord;

#[derive(Default)]
struct State {
    seen: HashMap<String, DateTime<Utc>>,
    /// Append order
    records: Vec<StoredRecord>,
}

/// In-memory seen index and record store.
///
/// Same semantics as [`SqliteStore`](super::SqliteStore) minus durability:
/// data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored records.
    pub fn record_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.records.len())
    }

    /// Clear all stored data.
    pub fn clear(&self) -> StoreResult<()> {
        let mut state = self.write()?;
        state.seen.clear();
        state.records.clear();
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn has(&self, id: &str) -> StoreResult<bool> {
        Ok(self.read()?.seen.contains_key(id))
    }

    async fn append_at(&self, record: &CandidateRecord, seen_at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.write()?;
        if state.seen.contains_key(&record.id) {
            return Ok(false);
        }
        state.seen.insert(record.id.clone(), seen_at);
        state.records.push(StoredRecord {
            record: record.clone(),
            seen_at,
        });
        Ok(true)
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        let mut state = self.write()?;
        let before = state.seen.len();
        state.seen.retain(|_, seen_at| *seen_at >= older_than);
        state.records.retain(|r| r.seen_at >= older_than);
        Ok(before - state.seen.len())
    }

    async fn records(&self, filter: &RecordFilter) -> StoreResult<Vec<StoredRecord>> {
        Ok(self
            .read()?
            .records
            .iter()
            .filter(|r| filter.matches(&r.record))
            .cloned()
            .collect())
    }

    async fn seen_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.seen.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_append_is_idempotent() {
        let store = MemoryStore::new();
        let record = CandidateRecord::post("p1", "rust", "Hello");

        assert!(store.append(&record).await.unwrap());
        assert!(!store.append(&record).await.unwrap());

        assert!(store.has("p1").await.unwrap());
        assert_eq!(store.seen_count().await.unwrap(), 1);
        assert_eq!(store.record_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_evicts_old_ids() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .append_at(&CandidateRecord::post("old", "rust", "a"), now - Duration::days(40))
            .await
            .unwrap();
        store
            .append_at(&CandidateRecord::post("new", "rust", "b"), now - Duration::days(1))
            .await
            .unwrap();

        let evicted = store.prune(now - Duration::days(30)).await.unwrap();

        assert_eq!(evicted, 1);
        assert!(!store.has("old").await.unwrap());
        assert!(store.has("new").await.unwrap());
        assert_eq!(store.records(&RecordFilter::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_records_keep_append_order() {
        let store = MemoryStore::new();
        for id in ["c", "a", "b"] {
            store
                .append(&CandidateRecord::post(id, "rust", "t").with_score(10))
                .await
                .unwrap();
        }

        let ids: Vec<String> = store
            .records(&RecordFilter::new().with_min_score(5))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.record.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
