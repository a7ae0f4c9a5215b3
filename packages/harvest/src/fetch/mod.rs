//! Fetch layer: shared rate budget, retries and transports.

pub mod fetcher;
pub mod http;
pub mod rate_limit;
pub mod retry;

pub use fetcher::{Fetcher, DEFAULT_FETCH_TIMEOUT};
pub use http::HttpFeedSource;
pub use rate_limit::RateBudget;
pub use retry::{Backoff, RetryPolicy};
