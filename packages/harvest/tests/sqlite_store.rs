//! Durability tests for the SQLite store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use harvest::{
    testing::{post, MockSource},
    CandidateRecord, Fetcher, OrchestratorConfig, RateBudget, RecordFilter, RecordStore,
    RunStatus, ScanOrchestrator, SourceQuery, SqliteStore,
};

#[tokio::test]
async fn test_appends_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("harvest.db");

    {
        let store = SqliteStore::open(&path).await.unwrap();
        store
            .append(&CandidateRecord::post("p1", "rust", "Durable").with_score(7))
            .await
            .unwrap();
        store.close().await;
    }

    let reopened = SqliteStore::open(&path).await.unwrap();
    assert!(reopened.has("p1").await.unwrap());
    assert_eq!(reopened.seen_count().await.unwrap(), 1);

    let records = reopened.records(&RecordFilter::new()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record.title, "Durable");
    assert_eq!(records[0].record.score, 7);
}

#[tokio::test]
async fn test_second_process_skips_seen_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("harvest.db");
    let source = MockSource::new().with_records("rust", vec![post("a", "rust"), post("b", "rust")]);
    let query = SourceQuery::builder("rust").build().unwrap();

    let run = |store: Arc<SqliteStore>| {
        let budget = Arc::new(RateBudget::new(100, Duration::from_secs(1)).unwrap());
        let fetcher = Arc::new(Fetcher::new(Arc::new(source.clone()), budget));
        ScanOrchestrator::new(fetcher, store)
    };

    let first_store = Arc::new(SqliteStore::open(&path).await.unwrap());
    let first = run(first_store.clone()).run(&[query.clone()]).await.unwrap();
    assert_eq!(first.totals.accepted, 2);
    first_store.close().await;

    let second_store = Arc::new(SqliteStore::open(&path).await.unwrap());
    let second = run(second_store).run(&[query]).await.unwrap();
    assert_eq!(second.status, RunStatus::Done);
    assert_eq!(second.totals.accepted, 0);
    assert_eq!(second.totals.duplicates, 2);
}

#[tokio::test]
async fn test_pruned_ids_become_unseen() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("harvest.db")).await.unwrap();
    let now = Utc::now();

    store
        .append_at(&post("old", "rust"), now - chrono::Duration::days(45))
        .await
        .unwrap();
    store.append_at(&post("recent", "rust"), now).await.unwrap();

    let evicted = store.prune(now - chrono::Duration::days(30)).await.unwrap();

    assert_eq!(evicted, 1);
    assert!(!store.has("old").await.unwrap());
    assert!(store.has("recent").await.unwrap());
    // A pruned id can be appended again
    store.append(&post("old", "rust")).await.unwrap();
    assert!(store.has("old").await.unwrap());
}

#[tokio::test]
async fn test_overlapping_queries_accept_each_id_once() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("harvest.db")).await.unwrap());
    let shared: Vec<CandidateRecord> = (0..50).map(|i| post(&format!("p{i}"), "rust")).collect();
    let source = MockSource::new()
        .with_records("rust", shared)
        .with_latency(Duration::from_millis(2));

    // Same subreddit, different keyword sets: both see every id
    let queries = vec![
        SourceQuery::builder("rust").build().unwrap(),
        SourceQuery::builder("r/rust").keywords(["post"]).build().unwrap(),
    ];
    let budget = Arc::new(RateBudget::new(100, Duration::from_secs(1)).unwrap());
    let fetcher = Arc::new(Fetcher::new(Arc::new(source), budget));
    let summary = ScanOrchestrator::new(fetcher, store.clone())
        .with_config(OrchestratorConfig::default().with_concurrency(2))
        .run(&queries)
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Done);
    assert_eq!(summary.totals.accepted, 50);
    assert_eq!(summary.totals.duplicates, 50);
    assert_eq!(store.seen_count().await.unwrap(), 50);

    let ids: HashSet<&str> = summary.accepted_records().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), 50);
    assert_eq!(summary.export_rows().len(), 50);
    for result in &summary.results {
        assert_eq!(result.stats.accepted + result.stats.duplicates, 50);
        assert_eq!(result.filter.accepted, result.stats.accepted);
    }
}
