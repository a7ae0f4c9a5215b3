//! HTTP transport for a JSON feed gateway.
//!
//! The gateway exposes `GET {base_url}/feed` returning
//! `{"records": [...], "next_cursor": "..."}`. Authentication is an opaque
//! bearer token passed through as-is.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult, FetchError, FetchResult};
use crate::traits::source::{ContentSource, Cursor, Page};
use crate::types::query::SourceQuery;

/// Default User-Agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("harvest/", env!("CARGO_PKG_VERSION"));

/// [`ContentSource`] backed by reqwest.
pub struct HttpFeedSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpFeedSource {
    /// Create a source for `base_url` with the given User-Agent.
    pub fn new(base_url: impl Into<String>, user_agent: &str) -> ConfigResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "feed_url",
                format!("'{base_url}' is not an http(s) URL"),
            ));
        }

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| ConfigError::invalid("feed_url", e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Attach an opaque bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn feed_url(&self) -> String {
        format!("{}/feed", self.base_url)
    }
}

#[async_trait]
impl ContentSource for HttpFeedSource {
    async fn fetch_page(&self, query: &SourceQuery, cursor: Option<&Cursor>) -> FetchResult<Page> {
        let mut params: Vec<(&str, String)> = vec![
            ("subreddit", query.subreddit().to_string()),
            ("window", query.window().as_str().to_string()),
            ("limit", query.page_size().to_string()),
            ("comments", query.comment_limit().to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.as_str().to_string()));
        }

        let mut request = self.client.get(self.feed_url()).query(&params);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        let page: Page = resp
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("invalid feed body: {e}")))?;

        debug!(
            query = %query.label(),
            records = page.records.len(),
            "Feed page decoded"
        );
        Ok(page)
    }

    fn name(&self) -> &str {
        "http-feed"
    }
}

/// Map a non-success HTTP status to a classified [`FetchError`].
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> FetchError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", truncate(body, 200))
    };

    if status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::Throttled { retry_after }
    } else if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        FetchError::Transient(message)
    } else {
        FetchError::Rejected(message)
    }
}

/// Parse a `Retry-After` value given in seconds. HTTP dates are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_carries_retry_after() {
        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(12)),
            "",
        );
        assert_eq!(
            err,
            FetchError::Throttled {
                retry_after: Some(Duration::from_secs(12))
            }
        );
    }

    #[test]
    fn test_server_errors_are_transient() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::REQUEST_TIMEOUT,
        ] {
            assert!(
                matches!(classify_status(status, None, ""), FetchError::Transient(_)),
                "{status} should be transient"
            );
        }
    }

    #[test]
    fn test_client_errors_are_rejected() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ] {
            assert!(
                matches!(classify_status(status, None, "nope"), FetchError::Rejected(_)),
                "{status} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        assert!(HttpFeedSource::new("ftp://example.com", DEFAULT_USER_AGENT).is_err());
        let source = HttpFeedSource::new("https://feeds.example.com/", DEFAULT_USER_AGENT).unwrap();
        assert_eq!(source.base_url(), "https://feeds.example.com");
        assert_eq!(source.feed_url(), "https://feeds.example.com/feed");
    }
}
