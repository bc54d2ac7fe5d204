use crate::error::HttpError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Client configuration, resolved once at construction.
///
/// A built client never mutates its config; to change behavior, build a new
/// client. Defaults mirror a conservative non-pooled client: pooling off,
/// no retries, 1s connect / 2s socket / 100ms acquisition timeouts and a
/// 5s idle-reap floor.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Share connections across requests, partitioned by route
    pub use_connection_pool: bool,

    /// Cap on connections across all routes (pooled mode)
    pub max_connections: usize,

    /// Per-route connection cap; `None` falls back to `max_connections`
    pub max_connections_per_route: Option<usize>,

    /// Retries after the initial attempt; total attempts = `max_retries` + 1
    pub max_retries: usize,

    /// How long an acquisition may wait for a free pool slot
    pub connection_request_timeout: Duration,

    /// Connect-phase deadline
    pub connect_timeout: Duration,

    /// Read-phase deadline (response head and body)
    pub socket_timeout: Duration,

    /// Idle age past which the reaper closes a pooled connection
    pub max_idle: Duration,

    /// Register with the shared background reaper (pooled mode only)
    pub use_connection_reaper: bool,

    /// Options layered under every request's own options
    pub default_request_options: RequestOptions,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            use_connection_pool: false,
            max_connections: 20,
            max_connections_per_route: None,
            max_retries: 0,
            connection_request_timeout: Duration::from_millis(100),
            connect_timeout: Duration::from_millis(1000),
            socket_timeout: Duration::from_millis(2000),
            max_idle: Duration::from_secs(5),
            use_connection_reaper: true,
            default_request_options: RequestOptions::default(),
        }
    }
}

impl HttpClientConfig {
    /// Effective per-route cap.
    #[must_use]
    pub fn max_per_route(&self) -> usize {
        self.max_connections_per_route.unwrap_or(self.max_connections)
    }
}

/// Basic-auth credentials.
#[derive(Clone)]
pub struct BasicAuth {
    /// User name
    pub user: String,
    /// Password
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-request options: headers, credentials and at most one body
/// descriptor.
///
/// When several body descriptors are set, the first applicable wins:
/// raw `body`, then `form`, then `json`.
///
/// # Example
///
/// ```ignore
/// let options = RequestOptions::new()
///     .header("x-request-id", "abc123")
///     .basic_auth("service", "hunter2")
///     .json(&payload)?;
/// let resp = client.post("http://api.internal/jobs", options).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Headers; names normalize `_` to `-` when the request is built
    pub headers: Vec<(String, String)>,

    /// Query parameters; replace any query string present on the target
    pub params: Option<Vec<(String, String)>>,

    /// Basic-auth credentials, applied as an `Authorization` header that
    /// overrides any header of that name
    pub basic_auth: Option<BasicAuth>,

    /// Raw string body
    pub body: Option<String>,

    /// Media type for the raw body (defaults to `text/plain`)
    pub content_type: Option<String>,

    /// URL-encoded form body
    pub form: Option<Vec<(String, String)>>,

    /// JSON body
    pub json: Option<serde_json::Value>,
}

impl RequestOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }

    /// Set basic-auth credentials.
    #[must_use]
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(BasicAuth {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    /// Set a raw string body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the media type for a raw string body.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set a URL-encoded form body.
    #[must_use]
    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.form = Some(fields);
        self
    }

    /// Set a JSON body by serializing `value`.
    ///
    /// # Errors
    /// Returns [`HttpError::Json`] if serialization fails.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, HttpError> {
        self.json = Some(serde_json::to_value(value).map_err(HttpError::Json)?);
        Ok(self)
    }

    /// Layer these options over `defaults`: every key set here wins,
    /// key-by-key; header comparison is case-insensitive after `_` → `-`
    /// normalization.
    #[must_use]
    pub(crate) fn layered_over(self, defaults: &Self) -> Self {
        let mut headers = defaults.headers.clone();
        for (name, value) in self.headers {
            let key = header_key(&name);
            headers.retain(|(existing, _)| header_key(existing) != key);
            headers.push((name, value));
        }

        Self {
            headers,
            params: self.params.or_else(|| defaults.params.clone()),
            basic_auth: self.basic_auth.or_else(|| defaults.basic_auth.clone()),
            body: self.body.or_else(|| defaults.body.clone()),
            content_type: self.content_type.or_else(|| defaults.content_type.clone()),
            form: self.form.or_else(|| defaults.form.clone()),
            json: self.json.or_else(|| defaults.json.clone()),
        }
    }
}

/// Canonical comparison key for a header name.
pub(crate) fn header_key(name: &str) -> String {
    name.replace('_', "-").to_ascii_lowercase()
}
