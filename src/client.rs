use crate::builder::HttpClientBuilder;
use crate::config::{HttpClientConfig, RequestOptions};
use crate::error::HttpError;
use crate::pool::{ConnectionPool, PoolStats, Route};
use crate::reaper;
use crate::request;
use crate::response::{self, HttpResponse};
use crate::transport::{HyperTransport, Transport};
use http::Method;
use std::sync::Arc;
use std::time::Duration;

/// HTTP client over a connection pool.
///
/// One client owns one resolved [`HttpClientConfig`] and one connection
/// pool. Cloning is cheap and clones share the pool. Pooled clients
/// register with the process-wide idle reaper at construction (unless
/// disabled); registration never extends the client's lifetime.
///
/// Construction must happen inside a Tokio runtime — connection driver
/// tasks and the lazily-started reaper are spawned onto it.
///
/// # Example
///
/// ```ignore
/// use wirepool::{HttpClient, HttpClientConfig, RequestOptions};
///
/// let client = HttpClient::builder()
///     .connection_pool(true)
///     .max_retries(2)
///     .build();
///
/// let resp = client
///     .get("http://api.internal/users", RequestOptions::new())
///     .await?;
/// if resp.is_success() {
///     println!("{}", resp.json_body()?);
/// }
/// client.shutdown();
/// ```
#[derive(Clone)]
pub struct HttpClient {
    config: Arc<HttpClientConfig>,
    pool: Arc<ConnectionPool>,
}

impl HttpClient {
    /// Create a client with the default cleartext HTTP/1.1 transport.
    #[must_use]
    pub fn new(config: HttpClientConfig) -> Self {
        let transport = Arc::new(HyperTransport::new(
            config.connect_timeout,
            config.socket_timeout,
        ));
        Self::with_transport(config, transport)
    }

    /// Create a builder with default configuration.
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Create a client over a caller-supplied transport (e.g. one that
    /// speaks TLS).
    #[must_use]
    pub fn with_transport(config: HttpClientConfig, transport: Arc<dyn Transport>) -> Self {
        let pool = Arc::new(ConnectionPool::new(&config, transport));
        if pool.is_pooled() && config.use_connection_reaper {
            reaper::register(&pool, config.max_idle);
        }
        Self {
            config: Arc::new(config),
            pool,
        }
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Execute a GET request.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<HttpResponse, HttpError> {
        self.execute(Method::GET, url, options).await
    }

    /// Execute a POST request.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn post(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, HttpError> {
        self.execute(Method::POST, url, options).await
    }

    /// Execute a PUT request.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn put(&self, url: &str, options: RequestOptions) -> Result<HttpResponse, HttpError> {
        self.execute(Method::PUT, url, options).await
    }

    /// Execute a PATCH request.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn patch(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, HttpError> {
        self.execute(Method::PATCH, url, options).await
    }

    /// Execute a DELETE request.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn delete(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, HttpError> {
        self.execute(Method::DELETE, url, options).await
    }

    /// Execute a HEAD request.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn head(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, HttpError> {
        self.execute(Method::HEAD, url, options).await
    }

    /// Execute an OPTIONS request.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn options(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, HttpError> {
        self.execute(Method::OPTIONS, url, options).await
    }

    /// Execute a request with an arbitrary method.
    ///
    /// Options are layered over the client's default request options
    /// (explicit key wins). A transient failure — timeout, I/O fault, pool
    /// exhaustion — consumes one unit of the retry budget and the request
    /// is rebuilt and re-issued on a freshly acquired connection; with
    /// `max_retries = n` the transport sees at most `n + 1` attempts.
    /// Protocol failures are surfaced immediately.
    ///
    /// # Errors
    /// [`HttpError::Timeout`], [`HttpError::Io`] or
    /// [`HttpError::PoolExhausted`] once the retry budget is exhausted
    /// (most recent failure wins, message preserved);
    /// [`HttpError::Protocol`] on a malformed exchange;
    /// [`HttpError::Closed`] after `shutdown`; request-construction errors
    /// for invalid URLs, headers or bodies.
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, HttpError> {
        let options = options.layered_over(&self.config.default_request_options);
        let target = match &options.params {
            Some(params) => request::with_query(url, params)?,
            None => url.to_owned(),
        };
        let (uri, route) = request::parse_target(&target)?;

        let mut attempts_remaining = self.config.max_retries;
        loop {
            match self.attempt(&method, &uri, &route, &options).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempts_remaining > 0 => {
                    attempts_remaining -= 1;
                    tracing::warn!(
                        method = %method,
                        url = %target,
                        error = %err,
                        remaining = attempts_remaining,
                        "transient failure, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One attempt: acquire, send, drain, restore.
    ///
    /// The lease guard releases the connection on every exit path; it is
    /// only restored to the idle set after the body has been fully drained,
    /// so a reused connection never carries leftover response bytes.
    async fn attempt(
        &self,
        method: &Method,
        uri: &http::Uri,
        route: &Route,
        options: &RequestOptions,
    ) -> Result<HttpResponse, HttpError> {
        let outgoing = request::build_request(method, uri, options)?;
        let mut lease = self.pool.acquire(route).await?;
        let raw = lease.connection().send(outgoing).await?;
        let collected = response::read_raw(raw, self.config.socket_timeout).await?;
        lease.restore();
        response::finish(collected)
    }

    /// Pool counters; pooled mode only.
    ///
    /// # Errors
    /// [`HttpError::PoolingDisabled`] without connection pooling.
    pub fn pool_stats(&self) -> Result<PoolStats, HttpError> {
        self.pool.stats()
    }

    /// Close pooled connections idle longer than `max_idle` (defaults to
    /// the configured `max_idle`).
    ///
    /// # Errors
    /// [`HttpError::Closed`] after shutdown.
    pub fn cleanup_connections(&self, max_idle: Option<Duration>) -> Result<(), HttpError> {
        self.pool
            .reap_idle(max_idle.unwrap_or(self.config.max_idle))
    }

    /// Release all pooled resources and reject further requests.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
