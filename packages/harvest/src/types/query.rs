//! Query types - what to scan and which records qualify.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default number of records requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Upper bound on records per page accepted by the upstream feed.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Listing window requested from upstream ("top of the last week").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Hour,
    Day,
    #[default]
    Week,
    Month,
    Year,
    All,
}

impl TimeWindow {
    /// Wire name of the window.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::Year => "year",
            TimeWindow::All => "all",
        }
    }

    /// Span covered by the window. `None` for [`TimeWindow::All`].
    pub fn span(&self) -> Option<Duration> {
        match self {
            TimeWindow::Hour => Some(Duration::hours(1)),
            TimeWindow::Day => Some(Duration::days(1)),
            TimeWindow::Week => Some(Duration::weeks(1)),
            TimeWindow::Month => Some(Duration::days(30)),
            TimeWindow::Year => Some(Duration::days(365)),
            TimeWindow::All => None,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeWindow {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(TimeWindow::Hour),
            "day" => Ok(TimeWindow::Day),
            "week" => Ok(TimeWindow::Week),
            "month" => Ok(TimeWindow::Month),
            "year" => Ok(TimeWindow::Year),
            "all" => Ok(TimeWindow::All),
            other => Err(ConfigError::invalid(
                "window",
                format!("unknown time window '{other}' (expected hour|day|week|month|year|all)"),
            )),
        }
    }
}

/// One scan target with its acceptance criteria.
///
/// Immutable once built; construct through [`SourceQuery::builder`], which
/// enforces that the maximum age fits inside the time window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    subreddit: String,
    keywords: Vec<String>,
    min_score: i64,
    max_age: Option<Duration>,
    window: TimeWindow,
    page_size: u32,
    comment_limit: u32,
}

impl SourceQuery {
    /// Start building a query for a subreddit.
    pub fn builder(subreddit: impl Into<String>) -> SourceQueryBuilder {
        SourceQueryBuilder::new(subreddit)
    }

    /// Subreddit name without the `r/` prefix.
    pub fn subreddit(&self) -> &str {
        &self.subreddit
    }

    /// Lower-cased keywords; empty means "match everything".
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn min_score(&self) -> i64 {
        self.min_score
    }

    /// Explicit maximum age, if one was configured.
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Top comments requested per post (0 = posts only).
    pub fn comment_limit(&self) -> u32 {
        self.comment_limit
    }

    /// Age bound applied by the filter: the explicit max age, else the
    /// window span. `None` means unbounded.
    pub fn effective_max_age(&self) -> Option<Duration> {
        self.max_age.or_else(|| self.window.span())
    }

    /// Human-readable label used in logs and summaries.
    pub fn label(&self) -> String {
        format!("r/{}", self.subreddit)
    }
}

/// Builder for [`SourceQuery`].
#[derive(Debug, Clone)]
pub struct SourceQueryBuilder {
    subreddit: String,
    keywords: Vec<String>,
    min_score: i64,
    max_age: Option<Duration>,
    window: TimeWindow,
    page_size: u32,
    comment_limit: u32,
}

impl SourceQueryBuilder {
    fn new(subreddit: impl Into<String>) -> Self {
        Self {
            subreddit: subreddit.into(),
            keywords: Vec::new(),
            min_score: 0,
            max_age: None,
            window: TimeWindow::default(),
            page_size: DEFAULT_PAGE_SIZE,
            comment_limit: 0,
        }
    }

    /// Set keywords (OR semantics, case-insensitive).
    pub fn keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Set the minimum score (inclusive).
    pub fn min_score(mut self, min_score: i64) -> Self {
        self.min_score = min_score;
        self
    }

    /// Set the maximum record age.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Set the listing window.
    pub fn window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    /// Set the number of records requested per page.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the number of top comments fetched per post.
    pub fn comment_limit(mut self, comment_limit: u32) -> Self {
        self.comment_limit = comment_limit;
        self
    }

    /// Validate and build the query.
    pub fn build(self) -> ConfigResult<SourceQuery> {
        let trimmed = self.subreddit.trim();
        let subreddit = trimmed
            .strip_prefix("r/")
            .or_else(|| trimmed.strip_prefix("/r/"))
            .unwrap_or(trimmed)
            .trim_matches('/')
            .to_string();

        if subreddit.is_empty() {
            return Err(ConfigError::invalid("subreddit", "must not be empty"));
        }
        if subreddit.contains(char::is_whitespace) {
            return Err(ConfigError::invalid(
                "subreddit",
                format!("'{subreddit}' contains whitespace"),
            ));
        }

        if let Some(max_age) = self.max_age {
            if max_age <= Duration::zero() {
                return Err(ConfigError::invalid("max_age", "must be positive"));
            }
            if let Some(span) = self.window.span() {
                if max_age > span {
                    return Err(ConfigError::invalid(
                        "max_age",
                        format!(
                            "{}h exceeds the '{}' window",
                            max_age.num_hours(),
                            self.window
                        ),
                    ));
                }
            }
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::invalid(
                "page_size",
                format!("must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }

        let mut keywords: Vec<String> = Vec::with_capacity(self.keywords.len());
        for keyword in self.keywords {
            let keyword = keyword.trim().to_lowercase();
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }

        Ok(SourceQuery {
            subreddit,
            keywords,
            min_score: self.min_score,
            max_age: self.max_age,
            window: self.window,
            page_size: self.page_size,
            comment_limit: self.comment_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_subreddit_and_keywords() {
        let query = SourceQuery::builder(" r/rust ")
            .keywords([" AI ", "", "ai", "Tokio"])
            .build()
            .unwrap();

        assert_eq!(query.subreddit(), "rust");
        assert_eq!(query.keywords(), &["ai".to_string(), "tokio".to_string()]);
        assert_eq!(query.label(), "r/rust");
    }

    #[test]
    fn test_rejects_empty_subreddit() {
        assert!(SourceQuery::builder("  ").build().is_err());
        assert!(SourceQuery::builder("r/").build().is_err());
    }

    #[test]
    fn test_max_age_must_fit_window() {
        let err = SourceQuery::builder("test")
            .window(TimeWindow::Day)
            .max_age(Duration::hours(48))
            .build();
        assert!(matches!(err, Err(ConfigError::Invalid { ref field, .. }) if field == "max_age"));

        let ok = SourceQuery::builder("test")
            .window(TimeWindow::Day)
            .max_age(Duration::hours(12))
            .build()
            .unwrap();
        assert_eq!(ok.effective_max_age(), Some(Duration::hours(12)));
    }

    #[test]
    fn test_all_window_is_unbounded() {
        let query = SourceQuery::builder("test")
            .window(TimeWindow::All)
            .build()
            .unwrap();
        assert_eq!(query.effective_max_age(), None);

        let bounded = SourceQuery::builder("test")
            .window(TimeWindow::All)
            .max_age(Duration::days(3650))
            .build()
            .unwrap();
        assert_eq!(bounded.effective_max_age(), Some(Duration::days(3650)));
    }

    #[test]
    fn test_page_size_bounds() {
        assert!(SourceQuery::builder("test").page_size(0).build().is_err());
        assert!(SourceQuery::builder("test").page_size(101).build().is_err());
        assert!(SourceQuery::builder("test").page_size(100).build().is_ok());
    }

    #[test]
    fn test_window_parses_case_insensitively() {
        assert_eq!("WEEK".parse::<TimeWindow>().unwrap(), TimeWindow::Week);
        assert_eq!(" all ".parse::<TimeWindow>().unwrap(), TimeWindow::All);
        assert!("fortnight".parse::<TimeWindow>().is_err());
    }
}
