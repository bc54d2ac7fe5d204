//! Transport seam between the connection pool and the wire.
//!
//! The pool and execution pipeline only ever see the [`Transport`] and
//! [`Connection`] traits; the default implementation speaks cleartext
//! HTTP/1.1 via hyper's low-level `client::conn` API so the pool — not
//! hyper — owns connection reuse. TLS is out of scope for the default
//! transport; callers that need it supply their own `Transport`.

use crate::pool::Route;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Request, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Classified failure of a single transport operation.
///
/// The execution pipeline's retry decision depends on this classification:
/// timeouts and generic I/O faults are presumed transient, protocol faults
/// are not.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The connect phase did not complete within the connect timeout
    #[error("connect timed out: {0}")]
    ConnectTimeout(String),

    /// The read phase did not complete within the socket timeout
    #[error("read timed out: {0}")]
    ReadTimeout(String),

    /// Any other I/O failure
    #[error("{0}")]
    Io(String),

    /// The peer produced a malformed HTTP exchange
    #[error("{0}")]
    Protocol(String),
}

impl From<TransportError> for crate::error::HttpError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectTimeout(msg) | TransportError::ReadTimeout(msg) => {
                crate::error::HttpError::Timeout(msg)
            }
            TransportError::Io(msg) => crate::error::HttpError::Io(msg),
            TransportError::Protocol(msg) => crate::error::HttpError::Protocol(msg),
        }
    }
}

/// Body handle of a raw response, errors already classified.
pub type TransportBody = BoxBody<Bytes, TransportError>;

/// A single request/response exchange as produced by a [`Connection`],
/// before decoding.
///
/// Dropping a `RawResponse` releases the body handle; whether the
/// underlying connection can be reused afterwards is the pool's decision.
pub struct RawResponse {
    /// Status code as parsed off the wire
    pub status: StatusCode,
    /// Response headers as parsed off the wire
    pub headers: HeaderMap,
    /// Body handle; `None` when the transport knows no entity follows
    pub body: Option<TransportBody>,
}

/// Opens connections for a route.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a new connection to `route`.
    ///
    /// # Errors
    /// Returns a classified [`TransportError`]; `ConnectTimeout` when the
    /// connect deadline elapses.
    async fn open(&self, route: &Route) -> Result<Box<dyn Connection>, TransportError>;
}

/// An established connection capable of one exchange at a time.
#[async_trait]
pub trait Connection: Send {
    /// Perform one request/response exchange.
    ///
    /// # Errors
    /// Returns a classified [`TransportError`]; `ReadTimeout` when the
    /// response head does not arrive within the socket timeout.
    async fn send(
        &mut self,
        request: Request<Full<Bytes>>,
    ) -> Result<RawResponse, TransportError>;

    /// Whether the connection is still usable for another exchange.
    fn is_open(&self) -> bool;
}

/// Default transport: HTTP/1.1 over plain TCP.
///
/// One spawned driver task per connection owns the socket; dropping the
/// connection aborts the driver, which closes the socket.
pub struct HyperTransport {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HyperTransport {
    /// Create a transport with the given connect and socket-read timeouts.
    #[must_use]
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn open(&self, route: &Route) -> Result<Box<dyn Connection>, TransportError> {
        if route.scheme() != "http" {
            return Err(TransportError::Protocol(format!(
                "scheme '{}' is not supported by the cleartext transport; \
                 supply a TLS-capable Transport",
                route.scheme()
            )));
        }

        let connect = TcpStream::connect((route.host(), route.port()));
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                TransportError::ConnectTimeout(format!(
                    "connect to {route} timed out after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|err| TransportError::Io(err.to_string()))?;

        let (sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(classify_hyper)?;

        let driver = tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::debug!(error = %err, "connection driver ended with error");
            }
        });

        Ok(Box::new(HyperConnection {
            sender,
            driver,
            read_timeout: self.read_timeout,
        }))
    }
}

struct HyperConnection {
    sender: http1::SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
    read_timeout: Duration,
}

#[async_trait]
impl Connection for HyperConnection {
    async fn send(
        &mut self,
        request: Request<Full<Bytes>>,
    ) -> Result<RawResponse, TransportError> {
        let exchange = self.sender.send_request(request);
        let response = tokio::time::timeout(self.read_timeout, exchange)
            .await
            .map_err(|_| {
                TransportError::ReadTimeout(format!(
                    "no response within {:?}",
                    self.read_timeout
                ))
            })?
            .map_err(classify_hyper)?;

        let (parts, body) = response.into_parts();
        Ok(RawResponse {
            status: parts.status,
            headers: parts.headers,
            body: Some(body.map_err(classify_hyper).boxed()),
        })
    }

    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl Drop for HyperConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Map a hyper error onto the transport taxonomy.
///
/// Parse-class failures are protocol faults; everything else (resets,
/// unexpected EOF, canceled exchanges) counts as I/O.
fn classify_hyper(err: hyper::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::ReadTimeout(err.to_string())
    } else if err.is_parse() || err.is_parse_status() || err.is_parse_too_large() {
        TransportError::Protocol(err.to_string())
    } else {
        TransportError::Io(err.to_string())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod mock {
    //! Scripted transport for pipeline and pool tests.

    use super::{Connection, RawResponse, Transport, TransportError};
    use crate::pool::Route;
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
    use http_body_util::{BodyExt, Full};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Build a `RawResponse` from parts, for decoder and pipeline tests.
    pub(crate) fn raw_response(
        status: u16,
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> RawResponse {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(
                HeaderName::try_from(*name).unwrap(),
                HeaderValue::try_from(*value).unwrap(),
            );
        }
        RawResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: map,
            body: body.map(|bytes| {
                Full::new(Bytes::from(bytes))
                    .map_err(|never: std::convert::Infallible| match never {})
                    .boxed()
            }),
        }
    }

    /// One scripted outcome per `send` call.
    pub(crate) enum Outcome {
        Fail(TransportError),
        Respond {
            status: u16,
            headers: Vec<(String, String)>,
            body: Option<Vec<u8>>,
        },
    }

    impl Outcome {
        pub(crate) fn ok(status: u16) -> Self {
            Outcome::Respond {
                status,
                headers: Vec::new(),
                body: None,
            }
        }
    }

    /// What a scripted connection saw for one exchange.
    pub(crate) struct RecordedRequest {
        pub(crate) method: http::Method,
        pub(crate) uri: String,
        pub(crate) headers: HeaderMap,
        pub(crate) body: Bytes,
    }

    #[derive(Default)]
    struct ScriptState {
        outcomes: Mutex<VecDeque<Outcome>>,
        requests: Mutex<Vec<RecordedRequest>>,
        opens: AtomicUsize,
        sends: AtomicUsize,
        conns_closed: AtomicBool,
    }

    /// Cloneable handle; all clones share the same script and counters.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedTransport {
        state: Arc<ScriptState>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(outcomes: Vec<Outcome>) -> Self {
            Self {
                state: Arc::new(ScriptState {
                    outcomes: Mutex::new(outcomes.into()),
                    ..Default::default()
                }),
            }
        }

        /// Run `inspect` over the requests recorded so far.
        pub(crate) fn with_requests<T>(
            &self,
            inspect: impl FnOnce(&[RecordedRequest]) -> T,
        ) -> T {
            inspect(&self.state.requests.lock())
        }

        pub(crate) fn opens(&self) -> usize {
            self.state.opens.load(Ordering::SeqCst)
        }

        pub(crate) fn sends(&self) -> usize {
            self.state.sends.load(Ordering::SeqCst)
        }

        /// Make every connection handed out (past and future) report itself
        /// as no longer open.
        pub(crate) fn set_connections_closed(&self, closed: bool) {
            self.state.conns_closed.store(closed, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, _route: &Route) -> Result<Box<dyn Connection>, TransportError> {
            self.state.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedConnection {
                shared: Arc::clone(&self.state),
            }))
        }
    }

    struct ScriptedConnection {
        shared: Arc<ScriptState>,
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        async fn send(
            &mut self,
            request: Request<Full<Bytes>>,
        ) -> Result<RawResponse, TransportError> {
            self.shared.sends.fetch_add(1, Ordering::SeqCst);
            let (parts, body) = request.into_parts();
            let body = body.collect().await.unwrap().to_bytes();
            self.shared.requests.lock().push(RecordedRequest {
                method: parts.method,
                uri: parts.uri.to_string(),
                headers: parts.headers,
                body,
            });
            let outcome = self.shared.outcomes.lock().pop_front();
            match outcome {
                Some(Outcome::Fail(err)) => Err(err),
                Some(Outcome::Respond {
                    status,
                    headers,
                    body,
                }) => {
                    let pairs: Vec<(&str, &str)> = headers
                        .iter()
                        .map(|(n, v)| (n.as_str(), v.as_str()))
                        .collect();
                    Ok(raw_response(status, &pairs, body))
                }
                // Script exhausted: respond 200 with no entity.
                None => Ok(raw_response(200, &[], None)),
            }
        }

        fn is_open(&self) -> bool {
            !self.shared.conns_closed.load(Ordering::SeqCst)
        }
    }
}
