//! SQLite storage implementation.
//!
//! The durable backend. Journaling is WAL with `synchronous = FULL`, so a
//! committed append survives a crash. The pool holds a single connection:
//! appends are serialized and reads always observe this process's writes.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::FromRow;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::{RecordFilter, RecordStore, StoredRecord};
use crate::types::record::CandidateRecord;

/// SQLite-backed seen index and record store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        Self::connect(options).await
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(StoreError::io)?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> StoreResult<Self> {
        // One connection: the in-memory database lives as long as it does
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StoreError::io)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_ids (
                id TEXT PRIMARY KEY,
                seen_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_seen_ids_seen_at ON seen_ids(seen_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::io)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                subreddit TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL,
                url TEXT,
                score INTEGER NOT NULL,
                created_utc INTEGER NOT NULL,
                parent_id TEXT,
                num_comments INTEGER NOT NULL DEFAULT 0,
                seen_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_subreddit ON records(subreddit);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::io)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct RecordRow {
    id: String,
    subreddit: String,
    title: String,
    body: String,
    author: String,
    url: Option<String>,
    score: i64,
    created_utc: i64,
    parent_id: Option<String>,
    num_comments: i64,
    seen_at: i64,
}

impl TryFrom<RecordRow> for StoredRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> StoreResult<Self> {
        let created_at = DateTime::<Utc>::from_timestamp(row.created_utc, 0).ok_or_else(|| {
            StoreError::Corrupt(format!("record {}: bad created_utc {}", row.id, row.created_utc))
        })?;
        let seen_at = DateTime::<Utc>::from_timestamp_micros(row.seen_at).ok_or_else(|| {
            StoreError::Corrupt(format!("record {}: bad seen_at {}", row.id, row.seen_at))
        })?;
        let num_comments = u32::try_from(row.num_comments).map_err(|_| {
            StoreError::Corrupt(format!(
                "record {}: bad num_comments {}",
                row.id, row.num_comments
            ))
        })?;

        Ok(StoredRecord {
            record: CandidateRecord {
                id: row.id,
                subreddit: row.subreddit,
                title: row.title,
                body: row.body,
                author: row.author,
                url: row.url,
                score: row.score,
                created_at,
                parent_id: row.parent_id,
                num_comments,
            },
            seen_at,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn has(&self, id: &str) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM seen_ids WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::io)?;
        Ok(found.is_some())
    }

    async fn append_at(&self, record: &CandidateRecord, seen_at: DateTime<Utc>) -> StoreResult<bool> {
        let seen_micros = seen_at.timestamp_micros();
        let mut tx = self.pool.begin().await.map_err(StoreError::io)?;

        let inserted = sqlx::query(
            "INSERT INTO seen_ids (id, seen_at) VALUES (?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(&record.id)
        .bind(seen_micros)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::io)?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await.map_err(StoreError::io)?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO records (
                id, subreddit, title, body, author, url, score,
                created_utc, parent_id, num_comments, seen_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.subreddit)
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.author)
        .bind(&record.url)
        .bind(record.score)
        .bind(record.created_at.timestamp())
        .bind(&record.parent_id)
        .bind(i64::from(record.num_comments))
        .bind(seen_micros)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::io)?;

        tx.commit().await.map_err(StoreError::io)?;
        Ok(true)
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        let cutoff = older_than.timestamp_micros();
        let mut tx = self.pool.begin().await.map_err(StoreError::io)?;

        sqlx::query("DELETE FROM records WHERE id IN (SELECT id FROM seen_ids WHERE seen_at < ?)")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::io)?;

        let evicted = sqlx::query("DELETE FROM seen_ids WHERE seen_at < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::io)?
            .rows_affected();

        tx.commit().await.map_err(StoreError::io)?;
        Ok(evicted as usize)
    }

    async fn records(&self, filter: &RecordFilter) -> StoreResult<Vec<StoredRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, subreddit, title, body, author, url, score,
                   created_utc, parent_id, num_comments, seen_at
            FROM records
            WHERE (?1 IS NULL OR subreddit = ?1 COLLATE NOCASE)
              AND (?2 IS NULL OR score >= ?2)
            ORDER BY seq
            "#,
        )
        .bind(filter.subreddit.as_deref())
        .bind(filter.min_score)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::io)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let stored = StoredRecord::try_from(row)?;
            // Keyword matching needs the same case folding as the filter engine
            if filter.matches(&stored.record) {
                records.push(stored);
            }
        }
        Ok(records)
    }

    async fn seen_count(&self) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_ids")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::io)?;
        Ok(count as usize)
    }
}
