//! Typed errors for the harvest library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell a
//! per-query upstream failure apart from a run-ending storage failure.

use std::time::Duration;

use thiserror::Error;

/// Classification of upstream failures for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Failure may be transient; the request should be retried.
    ///
    /// Examples: throttling, network timeout, 5xx responses
    Retryable,

    /// Failure is permanent; retrying cannot help.
    ///
    /// Examples: bad credentials, unknown subreddit
    Fatal,
}

/// Errors reported by a [`ContentSource`](crate::traits::source::ContentSource)
/// for a single page request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Upstream signalled that the request budget was exceeded
    #[error("throttled by upstream")]
    Throttled { retry_after: Option<Duration> },

    /// Network failure or temporary upstream unavailability
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// The per-call timeout elapsed
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream permanently refused the request
    #[error("rejected by upstream: {0}")]
    Rejected(String),
}

impl FetchError {
    /// Returns whether this failure is worth retrying.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FetchError::Throttled { .. } | FetchError::Transient(_) | FetchError::Timeout(_) => {
                FailureKind::Retryable
            }
            FetchError::Rejected(_) => FailureKind::Fatal,
        }
    }

    /// Upstream hint for how long to wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Errors that end a single query without affecting its siblings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Non-retryable rejection; the query stops immediately
    #[error("source rejected: {reason}")]
    SourceRejected { reason: String },

    /// Retries exhausted on a retryable failure
    #[error("source unavailable after {attempts} attempts: {reason}")]
    SourceUnavailable { attempts: u32, reason: String },
}

/// Errors from the incremental store.
///
/// Any of these ends the whole run: without durable appends the seen index
/// can no longer guarantee deduplication for future runs.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Disk, permission or database failure
    #[error("store I/O error: {0}")]
    Io(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Persisted data could not be decoded
    #[error("corrupt store data: {0}")]
    Corrupt(String),

    /// An in-process lock was poisoned by a panicking writer
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Wrap any backend error as an I/O failure.
    pub fn io(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StoreError::Io(err.into())
    }
}

/// Errors detected while loading configuration, before any fetching.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is absent
    #[error("missing setting: {0}")]
    Missing(String),

    /// A setting is present but unusable
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// A config file could not be parsed
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A config file could not be read
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Create an invalid-setting error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Top-level errors that abort a run.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Storage failed; durability cannot be guaranteed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration was rejected at startup
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias for harvest operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for a single page request.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_retryable_failures() {
        assert_eq!(
            FetchError::Throttled { retry_after: None }.failure_kind(),
            FailureKind::Retryable
        );
        assert_eq!(
            FetchError::Transient("reset".into()).failure_kind(),
            FailureKind::Retryable
        );
        assert_eq!(
            FetchError::Timeout(Duration::from_secs(5)).failure_kind(),
            FailureKind::Retryable
        );
    }

    #[test]
    fn test_rejection_is_fatal() {
        assert_eq!(
            FetchError::Rejected("403".into()).failure_kind(),
            FailureKind::Fatal
        );
    }

    #[test]
    fn test_retry_after_only_from_throttle() {
        let hint = Duration::from_secs(7);
        assert_eq!(
            FetchError::Throttled {
                retry_after: Some(hint)
            }
            .retry_after(),
            Some(hint)
        );
        assert_eq!(FetchError::Transient("x".into()).retry_after(), None);
    }
}
