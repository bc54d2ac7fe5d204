use std::time::Duration;
use thiserror::Error;

/// HTTP client error types.
///
/// The transport-level variants mirror the failure classification the
/// execution pipeline retries on: [`Timeout`](HttpError::Timeout),
/// [`Io`](HttpError::Io) and [`PoolExhausted`](HttpError::PoolExhausted) are
/// transient and consume the retry budget, while
/// [`Protocol`](HttpError::Protocol) signals a malformed exchange and is
/// surfaced immediately.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Connect or read deadline exceeded
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Transport-level I/O failure (connection refused, reset, etc)
    #[error("i/o failure: {0}")]
    Io(String),

    /// Malformed HTTP exchange reported by the transport
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// No connection slot freed up within the acquisition timeout
    #[error("connection pool exhausted: no slot for {route} within {timeout:?}")]
    PoolExhausted {
        /// The pooling partition the caller waited on
        route: String,
        /// The configured acquisition timeout that elapsed
        timeout: Duration,
    },

    /// Response body is not valid JSON (raised by `json_body`, never at
    /// response construction)
    #[error("response body is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    /// Client used after `shutdown()`
    #[error("client has been shut down")]
    Closed,

    /// `pool_stats()` called on a client without connection pooling
    #[error("connection pooling is not enabled for this client")]
    PoolingDisabled,

    /// Request building failed
    #[error("failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Invalid URL (failed to parse, or missing scheme/authority)
    ///
    /// The `reason` field is a diagnostic message for logging; its format is
    /// unstable, do not match on it.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed validation
        url: String,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// URL scheme not usable with the configured transport
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme {
        /// The URL scheme that was rejected
        scheme: String,
        /// Reason the scheme was rejected
        reason: String,
    },

    /// Outgoing JSON body serialization failed
    #[error("JSON serialization failed: {0}")]
    Json(#[source] serde_json::Error),

    /// Outgoing form body encoding failed
    #[error("form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),
}

impl HttpError {
    /// Whether the execution pipeline may re-issue the request after this
    /// failure.
    ///
    /// Pool exhaustion is treated as an I/O-class failure for retry purposes
    /// while keeping its own variant for diagnostics.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HttpError::Timeout(_) | HttpError::Io(_) | HttpError::PoolExhausted { .. }
        )
    }
}
