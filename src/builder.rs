use crate::client::HttpClient;
use crate::config::{HttpClientConfig, RequestOptions};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;

/// Builder for constructing an [`HttpClient`].
///
/// Every setter maps to one [`HttpClientConfig`] field; unset fields keep
/// their defaults.
///
/// # Example
///
/// ```ignore
/// let client = HttpClient::builder()
///     .connection_pool(true)
///     .max_connections(32)
///     .max_retries(2)
///     .socket_timeout(Duration::from_secs(5))
///     .build();
/// ```
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl HttpClientBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
            transport: None,
        }
    }

    /// Create a builder from an existing configuration.
    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            transport: None,
        }
    }

    /// Enable or disable connection pooling.
    #[must_use]
    pub fn connection_pool(mut self, enabled: bool) -> Self {
        self.config.use_connection_pool = enabled;
        self
    }

    /// Cap on connections across all routes.
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Per-route connection cap.
    #[must_use]
    pub fn max_connections_per_route(mut self, max: usize) -> Self {
        self.config.max_connections_per_route = Some(max);
        self
    }

    /// Retries after the initial attempt.
    #[must_use]
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// How long an acquisition may wait for a free pool slot.
    #[must_use]
    pub fn connection_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_request_timeout = timeout;
        self
    }

    /// Connect-phase deadline.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Read-phase deadline.
    #[must_use]
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.config.socket_timeout = timeout;
        self
    }

    /// Idle age past which the reaper closes pooled connections.
    #[must_use]
    pub fn max_idle(mut self, max_idle: Duration) -> Self {
        self.config.max_idle = max_idle;
        self
    }

    /// Opt out of the shared background reaper.
    #[must_use]
    pub fn connection_reaper(mut self, enabled: bool) -> Self {
        self.config.use_connection_reaper = enabled;
        self
    }

    /// Options layered under every request's own options.
    #[must_use]
    pub fn default_request_options(mut self, options: RequestOptions) -> Self {
        self.config.default_request_options = options;
        self
    }

    /// Use a caller-supplied transport instead of the default cleartext
    /// HTTP/1.1 one.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client. Must be called within a Tokio runtime.
    #[must_use]
    pub fn build(self) -> HttpClient {
        match self.transport {
            Some(transport) => HttpClient::with_transport(self.config, transport),
            None => HttpClient::new(self.config),
        }
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn setters_map_onto_the_config() {
        let client = HttpClient::builder()
            .connection_pool(true)
            .max_connections(32)
            .max_connections_per_route(8)
            .max_retries(2)
            .connection_request_timeout(Duration::from_millis(250))
            .connect_timeout(Duration::from_secs(3))
            .socket_timeout(Duration::from_secs(10))
            .max_idle(Duration::from_secs(30))
            .connection_reaper(false)
            .default_request_options(RequestOptions::new().header("x-source", "wirepool"))
            .build();

        let config = client.config();
        assert!(config.use_connection_pool);
        assert_eq!(config.max_connections, 32);
        assert_eq!(config.max_per_route(), 8);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.connection_request_timeout, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.socket_timeout, Duration::from_secs(10));
        assert_eq!(config.max_idle, Duration::from_secs(30));
        assert!(!config.use_connection_reaper);
        assert_eq!(config.default_request_options.headers.len(), 1);
    }
}
