//! Structured error types for the candle acquisition pipeline.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the fetch pipeline.
///
/// Callers receive either a complete normalized candle series or exactly one
/// of the fatal variants; there is no partial-success contract. `RateLimited`
/// never escapes the retry loop, it only exists so the per-request layer can
/// report the provider's suggested wait.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("start date {start} must be before end date {end}")]
    InvalidRange { start: String, end: String },

    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("no data available for the specified time range")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("HTTP error! status: {0}")]
    Http(u16),

    #[error("invalid response format: expected JSON")]
    InvalidContentType,

    #[error("invalid response format from exchange API")]
    InvalidBody,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("too many consecutive errors while fetching data")]
    ConsecutiveFailures,

    #[error("no valid candle data received for the entire time range")]
    NoData,

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether the per-chunk retry loop should try again after this error.
    ///
    /// 404 and 400 are terminal for a chunk; rate limiting is handled by a
    /// dedicated wait path rather than the failure path.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Http(_)
                | FetchError::InvalidContentType
                | FetchError::InvalidBody
                | FetchError::Network(_)
        )
    }
}
