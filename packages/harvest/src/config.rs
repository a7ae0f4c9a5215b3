//! Configuration loaded from the environment and TOML query files.
//!
//! All validation happens here, before any request is made.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};
use crate::fetch::http::DEFAULT_USER_AGENT;
use crate::fetch::{HttpFeedSource, RateBudget, RetryPolicy};
use crate::pipeline::OrchestratorConfig;
use crate::types::query::{SourceQuery, TimeWindow, DEFAULT_PAGE_SIZE};

/// Longest accepted retention period (about a century).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Runtime settings loaded from `HARVEST_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    pub database_path: PathBuf,
    pub feed_url: Option<String>,
    pub user_agent: String,
    pub api_token: Option<String>,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub retry_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub fetch_timeout: Duration,
    pub max_pages: usize,
    pub concurrency: usize,
    pub retention_days: u32,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("harvest.db"),
            feed_url: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            api_token: None,
            rate_limit_requests: 60,
            rate_limit_window: Duration::from_secs(60),
            retry_attempts: 4,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(30),
            max_pages: 20,
            concurrency: 4,
            retention_days: 30,
        }
    }
}

impl HarvestConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            database_path: get("HARVEST_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            feed_url: get("HARVEST_FEED_URL"),
            user_agent: get("HARVEST_USER_AGENT").unwrap_or(defaults.user_agent),
            api_token: get("HARVEST_API_TOKEN"),
            rate_limit_requests: parse_or(
                get("HARVEST_RATE_LIMIT_REQUESTS"),
                "HARVEST_RATE_LIMIT_REQUESTS",
                defaults.rate_limit_requests,
            )?,
            rate_limit_window: Duration::from_secs(parse_or(
                get("HARVEST_RATE_LIMIT_WINDOW_SECS"),
                "HARVEST_RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window.as_secs(),
            )?),
            retry_attempts: parse_or(
                get("HARVEST_RETRY_ATTEMPTS"),
                "HARVEST_RETRY_ATTEMPTS",
                defaults.retry_attempts,
            )?,
            retry_base: Duration::from_millis(parse_or(
                get("HARVEST_RETRY_BASE_MS"),
                "HARVEST_RETRY_BASE_MS",
                defaults.retry_base.as_millis() as u64,
            )?),
            retry_max: Duration::from_millis(parse_or(
                get("HARVEST_RETRY_MAX_MS"),
                "HARVEST_RETRY_MAX_MS",
                defaults.retry_max.as_millis() as u64,
            )?),
            fetch_timeout: Duration::from_secs(parse_or(
                get("HARVEST_FETCH_TIMEOUT_SECS"),
                "HARVEST_FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout.as_secs(),
            )?),
            max_pages: parse_or(get("HARVEST_MAX_PAGES"), "HARVEST_MAX_PAGES", defaults.max_pages)?,
            concurrency: parse_or(
                get("HARVEST_CONCURRENCY"),
                "HARVEST_CONCURRENCY",
                defaults.concurrency,
            )?,
            retention_days: parse_or(
                get("HARVEST_RETENTION_DAYS"),
                "HARVEST_RETENTION_DAYS",
                defaults.retention_days,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.rate_limit_requests == 0 {
            return Err(ConfigError::invalid("HARVEST_RATE_LIMIT_REQUESTS", "must be > 0"));
        }
        if self.rate_limit_window.is_zero() {
            return Err(ConfigError::invalid("HARVEST_RATE_LIMIT_WINDOW_SECS", "must be > 0"));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::invalid("HARVEST_RETRY_ATTEMPTS", "must be > 0"));
        }
        if self.retry_base > self.retry_max {
            return Err(ConfigError::invalid(
                "HARVEST_RETRY_BASE_MS",
                "must not exceed HARVEST_RETRY_MAX_MS",
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::invalid("HARVEST_FETCH_TIMEOUT_SECS", "must be > 0"));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::invalid("HARVEST_MAX_PAGES", "must be > 0"));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("HARVEST_CONCURRENCY", "must be > 0"));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::invalid(
                "HARVEST_RETENTION_DAYS",
                format!("must be <= {MAX_RETENTION_DAYS}"),
            ));
        }
        Ok(())
    }

    /// Build the shared rate budget.
    pub fn rate_budget(&self) -> ConfigResult<RateBudget> {
        RateBudget::new(self.rate_limit_requests, self.rate_limit_window)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.retry_attempts, self.retry_base, self.retry_max)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_max_pages(self.max_pages)
            .with_concurrency(self.concurrency)
    }

    /// Build the HTTP feed source. Requires `HARVEST_FEED_URL`.
    pub fn http_source(&self) -> ConfigResult<HttpFeedSource> {
        let url = self
            .feed_url
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("HARVEST_FEED_URL".to_string()))?;

        let source = HttpFeedSource::new(url, &self.user_agent)?;
        Ok(match &self.api_token {
            Some(token) => source.with_token(token.clone()),
            None => source,
        })
    }

    /// Seen ids older than this are eligible for pruning.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> ConfigResult<DateTime<Utc>> {
        chrono::Duration::try_days(i64::from(self.retention_days))
            .and_then(|retention| now.checked_sub_signed(retention))
            .ok_or_else(|| {
                ConfigError::invalid(
                    "HARVEST_RETENTION_DAYS",
                    format!("{} days reaches before the earliest date", self.retention_days),
                )
            })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

/// One `[[query]]` entry of a query file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryEntry {
    pub subreddit: String,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub min_score: i64,

    /// Maximum record age in hours
    #[serde(default)]
    pub max_age_hours: Option<i64>,

    #[serde(default)]
    pub window: Option<String>,

    #[serde(default)]
    pub page_size: Option<u32>,

    #[serde(default)]
    pub comment_limit: u32,
}

impl QueryEntry {
    /// Validate into a [`SourceQuery`].
    pub fn to_query(&self) -> ConfigResult<SourceQuery> {
        let window = match &self.window {
            Some(w) => TimeWindow::from_str(w)?,
            None => TimeWindow::default(),
        };

        let mut builder = SourceQuery::builder(self.subreddit.as_str())
            .keywords(self.keywords.iter().cloned())
            .min_score(self.min_score)
            .window(window)
            .page_size(self.page_size.unwrap_or(DEFAULT_PAGE_SIZE))
            .comment_limit(self.comment_limit);
        if let Some(hours) = self.max_age_hours {
            let max_age = chrono::Duration::try_hours(hours)
                .ok_or_else(|| ConfigError::invalid("max_age_hours", format!("{hours} is out of range")))?;
            builder = builder.max_age(max_age);
        }
        builder.build()
    }
}

/// TOML file listing the queries to scan.
///
/// ```toml
/// [[query]]
/// subreddit = "rust"
/// keywords = ["async", "tokio"]
/// min_score = 10
/// window = "week"
/// max_age_hours = 72
/// comment_limit = 5
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryFile {
    #[serde(default, rename = "query")]
    pub queries: Vec<QueryEntry>,
}

impl QueryFile {
    /// Read and parse a query file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    /// Parse query file contents.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Validate every entry. An empty file is an error.
    pub fn to_queries(&self) -> ConfigResult<Vec<SourceQuery>> {
        if self.queries.is_empty() {
            return Err(ConfigError::Missing("[[query]] entries".to_string()));
        }
        self.queries.iter().map(QueryEntry::to_query).collect()
    }
}
