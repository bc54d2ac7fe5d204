//! Response decoding: status, headers, and a fully-materialized body with
//! content-encoding applied exactly once.
//!
//! Decoding happens in two stages. [`read_raw`] drains the wire body (the
//! stage that still needs the connection alive, so the pool can reclaim it
//! as soon as this returns), and [`finish`] is pure: decompression, UTF-8
//! conversion and header accumulation.

use crate::error::HttpError;
use crate::transport::{RawResponse, TransportBody};
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use http::{HeaderMap, StatusCode};
use http_body_util::BodyExt;
use std::io::Read as _;
use std::sync::OnceLock;
use std::time::Duration;

/// A raw response with its body fully drained but not yet decoded.
pub(crate) struct CollectedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

/// Drain the body off the wire, bounded by `read_timeout`.
///
/// A response that declares neither a chunked transfer-encoding nor a
/// positive Content-Length is treated as bodiless — redirects, 204 and HEAD
/// responses carry headers but no entity, and reading an undeclared body
/// risks blocking until the peer closes the connection.
pub(crate) async fn read_raw(
    raw: RawResponse,
    read_timeout: Duration,
) -> Result<CollectedResponse, HttpError> {
    let RawResponse {
        status,
        headers,
        body,
    } = raw;

    let body = match body {
        Some(body) if declares_entity(&headers) => collect_body(body, read_timeout).await?,
        Some(_) | None => Bytes::new(),
    };

    Ok(CollectedResponse {
        status,
        headers,
        body,
    })
}

/// Decode a drained response: apply the declared content-encoding once,
/// then read the bytes as UTF-8 (lossy). The stored headers keep the
/// original `Content-Encoding` — decoding is transparent, not destructive.
pub(crate) fn finish(collected: CollectedResponse) -> Result<HttpResponse, HttpError> {
    let CollectedResponse {
        status,
        headers,
        body,
    } = collected;

    let decoded = decompress(&headers, &body)?;
    let header_pairs = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    Ok(HttpResponse {
        status,
        headers: header_pairs,
        body: String::from_utf8_lossy(&decoded).into_owned(),
        json: OnceLock::new(),
    })
}

fn declares_entity(headers: &HeaderMap) -> bool {
    let chunked = headers
        .get_all(http::header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return true;
    }
    headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .is_some_and(|length| length > 0)
}

async fn collect_body(body: TransportBody, read_timeout: Duration) -> Result<Bytes, HttpError> {
    match tokio::time::timeout(read_timeout, body.collect()).await {
        Ok(Ok(collected)) => Ok(collected.to_bytes()),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(HttpError::Timeout(format!(
            "body read timed out after {read_timeout:?}"
        ))),
    }
}

/// Select a decompressor from the `Content-Encoding` header. Unrecognized
/// values pass through as identity — best effort, not an error. A declared
/// encoding whose payload fails to decode is an I/O failure.
fn decompress(headers: &HeaderMap, body: &Bytes) -> Result<Vec<u8>, HttpError> {
    let encoding = headers
        .get(http::header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_ascii_lowercase());

    let mut decoded = Vec::new();
    match encoding.as_deref() {
        Some("gzip" | "x-gzip") => {
            GzDecoder::new(&body[..])
                .read_to_end(&mut decoded)
                .map_err(|err| HttpError::Io(format!("gzip decode failed: {err}")))?;
        }
        Some("deflate") => {
            ZlibDecoder::new(&body[..])
                .read_to_end(&mut decoded)
                .map_err(|err| HttpError::Io(format!("deflate decode failed: {err}")))?;
        }
        _ => decoded.extend_from_slice(body),
    }
    Ok(decoded)
}

/// A decoded HTTP response: status, headers in wire order, and the body as
/// a string.
///
/// Immutable once produced. The JSON view is computed at most once and
/// cached for the response's lifetime.
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: String,
    json: OnceLock<serde_json::Value>,
}

impl HttpResponse {
    /// Response status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// All headers, in the order they were accumulated.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Look up a header by name (case-insensitive); when a name repeats,
    /// the last value wins.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Fully-decoded body; empty for bodiless responses.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Whether the status is in `[200, 206]` — the narrow "fully
    /// successful" range, excluding 207 and all 3xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..=206).contains(&self.status.as_u16())
    }

    /// Parse the body as JSON, caching the parsed value.
    ///
    /// # Errors
    /// [`HttpError::Decode`] when the body is not valid JSON. The failure
    /// surfaces here, never at response construction.
    pub fn json_body(&self) -> Result<&serde_json::Value, HttpError> {
        if let Some(value) = self.json.get() {
            return Ok(value);
        }
        let parsed = serde_json::from_str(&self.body).map_err(HttpError::Decode)?;
        Ok(self.json.get_or_init(|| parsed))
    }
}
