#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Pooled-connection HTTP client with bounded retries and transparent
//! response decoding.
//!
//! This crate provides a hyper-based HTTP/1.1 client with:
//! - An explicit connection pool (or a single unshared connection per
//!   request), capped per route and in total, with an acquisition timeout
//!   that converts unbounded blocking into a reported failure
//! - A process-wide background reaper that proactively closes idle pooled
//!   connections before the server does
//! - A bounded retry policy over a small failure taxonomy: timeouts and
//!   I/O faults are retried, protocol faults never are
//! - Transparent response decoding: bodiless / chunked / fixed-length
//!   detection, gzip and deflate content-encoding, and a cached JSON view
//!
//! The transport is a trait seam: the default implementation speaks
//! cleartext HTTP/1.1, and callers can plug in their own (e.g. TLS)
//! transport without touching the pool or pipeline.
//!
//! # Example
//!
//! ```ignore
//! use wirepool::{HttpClient, RequestOptions};
//!
//! let client = HttpClient::builder()
//!     .connection_pool(true)
//!     .max_retries(2)
//!     .build();
//!
//! let resp = client
//!     .get("http://api.internal/users", RequestOptions::new())
//!     .await?;
//! if resp.is_success() {
//!     for user in resp.json_body()?.as_array().into_iter().flatten() {
//!         println!("{user}");
//!     }
//! }
//!
//! let stats = client.pool_stats()?;
//! println!("idle={} in_use={}", stats.idle, stats.in_use);
//! client.shutdown();
//! ```

mod builder;
mod client;
mod config;
mod error;
mod pool;
pub mod reaper;
mod request;
mod response;
mod transport;

pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use config::{BasicAuth, HttpClientConfig, RequestOptions};
pub use error::HttpError;
pub use pool::{PoolStats, Route};
pub use response::HttpResponse;
pub use transport::{
    Connection, HyperTransport, RawResponse, Transport, TransportBody, TransportError,
};
