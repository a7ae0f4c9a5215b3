//! CLI for running subreddit scans.
//!
//! Logs go to stderr; command output is JSON on stdout so it can be piped
//! into a format writer.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvest::{
    export_rows, Fetcher, HarvestConfig, QueryFile, RecordFilter, RecordStore, RunStatus,
    ScanOrchestrator, SqliteStore,
};

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Rate-limited, resumable subreddit harvesting")]
struct Cli {
    /// Override HARVEST_DATABASE_PATH
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan every query in a TOML query file
    Scan {
        /// Path to the query file
        #[arg(short, long, default_value = "queries.toml")]
        queries: PathBuf,
    },

    /// Print stored records as export rows
    List {
        #[arg(long)]
        subreddit: Option<String>,

        #[arg(long)]
        min_score: Option<i64>,

        /// Keep records mentioning any of these keywords
        #[arg(long = "keyword")]
        keywords: Vec<String>,
    },

    /// Evict seen ids older than the retention period
    Prune {
        /// Override HARVEST_RETENTION_DAYS
        #[arg(long)]
        older_than_days: Option<u32>,
    },
}

#[derive(Serialize)]
struct PruneResponse {
    evicted: usize,
    remaining: usize,
    cutoff: chrono::DateTime<Utc>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvest=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = HarvestConfig::from_env().context("Invalid HARVEST_* configuration")?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    match cli.command {
        Commands::Scan { queries } => scan(&config, &queries).await,
        Commands::List {
            subreddit,
            min_score,
            keywords,
        } => {
            let mut filter = RecordFilter::new().with_keywords(keywords);
            if let Some(subreddit) = subreddit {
                filter = filter.for_subreddit(subreddit);
            }
            if let Some(min_score) = min_score {
                filter = filter.with_min_score(min_score);
            }
            list(&config, &filter).await
        }
        Commands::Prune { older_than_days } => {
            if let Some(days) = older_than_days {
                config.retention_days = days;
                config.validate().context("Invalid --older-than-days")?;
            }
            prune(&config).await
        }
    }
}

async fn open_store(config: &HarvestConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open store at {}", config.database_path.display()))
}

async fn scan(config: &HarvestConfig, queries_path: &Path) -> Result<ExitCode> {
    let queries = QueryFile::load(queries_path)
        .and_then(|file| file.to_queries())
        .with_context(|| format!("Invalid query file {}", queries_path.display()))?;

    let source = config.http_source().context("Failed to build feed source")?;
    let budget = Arc::new(config.rate_budget().context("Invalid rate limit")?);
    let fetcher = Fetcher::new(Arc::new(source), budget)
        .with_retry(config.retry_policy())
        .with_timeout(config.fetch_timeout);
    let store = Arc::new(open_store(config).await?);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping at the next page boundary");
            on_signal.cancel();
        }
    });

    let orchestrator = ScanOrchestrator::new(Arc::new(fetcher), store.clone())
        .with_config(config.orchestrator_config())
        .with_cancellation(cancel);

    let summary = orchestrator.run(&queries).await.context("Scan aborted")?;
    store.close().await;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(match summary.status {
        RunStatus::Done => ExitCode::SUCCESS,
        RunStatus::PartialFailure => ExitCode::from(2),
        RunStatus::Cancelled => ExitCode::from(130),
    })
}

async fn list(config: &HarvestConfig, filter: &RecordFilter) -> Result<ExitCode> {
    let store = open_store(config).await?;
    let stored = store.records(filter).await.context("Failed to read records")?;
    let rows = export_rows(stored.iter().map(|s| &s.record));

    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(ExitCode::SUCCESS)
}

async fn prune(config: &HarvestConfig) -> Result<ExitCode> {
    let store = open_store(config).await?;
    let cutoff = config
        .retention_cutoff(Utc::now())
        .context("Invalid retention period")?;
    let evicted = store.prune(cutoff).await.context("Failed to prune seen index")?;
    let remaining = store.seen_count().await?;

    tracing::info!(evicted, remaining, %cutoff, "Pruned seen index");
    println!(
        "{}",
        serde_json::to_string_pretty(&PruneResponse {
            evicted,
            remaining,
            cutoff,
        })?
    );
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_list_filters() {
        let cli = Cli::parse_from([
            "harvest", "list", "--subreddit", "rust", "--keyword", "async", "--keyword", "tokio",
        ]);
        match cli.command {
            Commands::List {
                subreddit,
                keywords,
                min_score,
            } => {
                assert_eq!(subreddit.as_deref(), Some("rust"));
                assert_eq!(keywords, vec!["async", "tokio"]);
                assert_eq!(min_score, None);
            }
            _ => panic!("expected list"),
        }
    }
}
