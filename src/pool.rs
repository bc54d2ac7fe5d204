//! Connection pool: either a single unshared connection per request, or a
//! bounded set of reusable connections partitioned by route.
//!
//! All bookkeeping lives behind one mutex per pool; the lock is never held
//! across an await. Waiters park on a [`Notify`] and re-check under the
//! lock, bounded by the acquisition timeout. Connection release is driven
//! by the [`Lease`] guard so every exit path — success, error, panic,
//! cancellation — returns or discards the connection.

use crate::config::HttpClientConfig;
use crate::error::HttpError;
use crate::transport::{Connection, Transport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// The (scheme, host, port) triple identifying a pooling partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    scheme: String,
    host: String,
    port: u16,
}

impl Route {
    /// Create a route.
    #[must_use]
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }

    /// URI scheme (`http` or `https`).
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, with the scheme default applied when the URI named none.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections sitting in the idle set
    pub idle: usize,
    /// Connections currently leased to callers
    pub in_use: usize,
    /// Configured total cap
    pub max: usize,
    /// Callers waiting for a free slot
    pub waiting: usize,
}

struct IdleConn {
    conn: Box<dyn Connection>,
    idle_since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: HashMap<Route, Vec<IdleConn>>,
    /// Idle + leased, per route
    per_route: HashMap<Route, usize>,
    /// Idle + leased, across routes
    total: usize,
    waiting: usize,
    closed: bool,
}

impl PoolState {
    fn route_count(&self, route: &Route) -> usize {
        self.per_route.get(route).copied().unwrap_or(0)
    }

    fn reserve(&mut self, route: &Route) {
        self.total += 1;
        *self.per_route.entry(route.clone()).or_insert(0) += 1;
    }

    fn release_slot(&mut self, route: &Route) {
        self.total -= 1;
        if let Some(count) = self.per_route.get_mut(route) {
            *count -= 1;
            if *count == 0 {
                self.per_route.remove(route);
            }
        }
    }

    fn pop_idle(&mut self, route: &Route) -> Option<IdleConn> {
        self.idle.get_mut(route).and_then(Vec::pop)
    }
}

struct PooledState {
    state: Mutex<PoolState>,
    slot_released: Notify,
    max_total: usize,
    max_per_route: usize,
    acquire_timeout: Duration,
}

enum PoolMode {
    /// One fresh connection per request, closed afterwards, never shared
    Single { closed: AtomicBool },
    Pooled(PooledState),
}

/// Owns the connections a client may use.
pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    mode: PoolMode,
}

impl ConnectionPool {
    pub(crate) fn new(config: &HttpClientConfig, transport: Arc<dyn Transport>) -> Self {
        let mode = if config.use_connection_pool {
            PoolMode::Pooled(PooledState {
                state: Mutex::new(PoolState::default()),
                slot_released: Notify::new(),
                max_total: config.max_connections,
                max_per_route: config.max_per_route(),
                acquire_timeout: config.connection_request_timeout,
            })
        } else {
            PoolMode::Single {
                closed: AtomicBool::new(false),
            }
        };
        Self { transport, mode }
    }

    pub(crate) fn is_pooled(&self) -> bool {
        matches!(self.mode, PoolMode::Pooled(_))
    }

    /// Borrow or open a connection for `route`.
    ///
    /// Pooled mode blocks up to the acquisition timeout for a free slot and
    /// fails with [`HttpError::PoolExhausted`] when none frees up in time.
    pub(crate) async fn acquire(self: &Arc<Self>, route: &Route) -> Result<Lease, HttpError> {
        match &self.mode {
            PoolMode::Single { closed } => {
                if closed.load(Ordering::SeqCst) {
                    return Err(HttpError::Closed);
                }
                let conn = self.transport.open(route).await?;
                Ok(Lease::new(Arc::clone(self), route.clone(), conn))
            }
            PoolMode::Pooled(pooled) => self.acquire_pooled(pooled, route).await,
        }
    }

    async fn acquire_pooled(
        self: &Arc<Self>,
        pooled: &PooledState,
        route: &Route,
    ) -> Result<Lease, HttpError> {
        enum Plan {
            Reuse(Box<dyn Connection>),
            Open,
            Wait,
        }

        let deadline = Instant::now() + pooled.acquire_timeout;
        loop {
            // The Notified future must register interest inside the same
            // critical section that observed "no slot", or a release racing
            // with the lock drop could be missed.
            let mut notified = pin!(pooled.slot_released.notified());

            let plan = {
                let mut state = pooled.state.lock();
                if state.closed {
                    return Err(HttpError::Closed);
                }

                let mut reused = None;
                while let Some(idle) = state.pop_idle(route) {
                    if idle.conn.is_open() {
                        reused = Some(idle.conn);
                        break;
                    }
                    // Went stale while idle; its slot frees up.
                    state.release_slot(route);
                }

                match reused {
                    Some(conn) => Plan::Reuse(conn),
                    None if state.route_count(route) < pooled.max_per_route
                        && state.total < pooled.max_total =>
                    {
                        state.reserve(route);
                        Plan::Open
                    }
                    None => {
                        state.waiting += 1;
                        notified.as_mut().enable();
                        Plan::Wait
                    }
                }
            };

            match plan {
                Plan::Reuse(conn) => {
                    tracing::debug!(%route, "reusing pooled connection");
                    return Ok(Lease::new(Arc::clone(self), route.clone(), conn));
                }
                Plan::Open => {
                    let mut reservation = SlotReservation {
                        pooled,
                        route,
                        armed: true,
                    };
                    let conn = self.transport.open(route).await?;
                    reservation.armed = false;
                    return Ok(Lease::new(Arc::clone(self), route.clone(), conn));
                }
                Plan::Wait => {
                    let _waiting = WaitGuard { pooled };
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero()
                        || tokio::time::timeout(remaining, notified.as_mut())
                            .await
                            .is_err()
                    {
                        return Err(HttpError::PoolExhausted {
                            route: route.to_string(),
                            timeout: pooled.acquire_timeout,
                        });
                    }
                }
            }
        }
    }

    /// Return a connection to the idle set; broken or post-shutdown
    /// connections are discarded instead.
    fn checkin(&self, route: &Route, conn: Box<dyn Connection>) {
        match &self.mode {
            PoolMode::Single { .. } => drop(conn),
            PoolMode::Pooled(pooled) => {
                let reusable = conn.is_open();
                {
                    let mut state = pooled.state.lock();
                    if state.closed || !reusable {
                        state.release_slot(route);
                        drop(state);
                        drop(conn);
                    } else {
                        state
                            .idle
                            .entry(route.clone())
                            .or_default()
                            .push(IdleConn {
                                conn,
                                idle_since: Instant::now(),
                            });
                    }
                }
                pooled.slot_released.notify_waiters();
            }
        }
    }

    /// Drop a connection and free its slot.
    fn discard(&self, route: &Route, conn: Box<dyn Connection>) {
        match &self.mode {
            PoolMode::Single { .. } => drop(conn),
            PoolMode::Pooled(pooled) => {
                pooled.state.lock().release_slot(route);
                drop(conn);
                pooled.slot_released.notify_waiters();
            }
        }
    }

    /// Current counters; defined only in pooled mode.
    ///
    /// # Errors
    /// [`HttpError::PoolingDisabled`] in single-connection mode — calling
    /// this without pooling is caller misuse, not a silent no-op.
    pub(crate) fn stats(&self) -> Result<PoolStats, HttpError> {
        match &self.mode {
            PoolMode::Single { .. } => Err(HttpError::PoolingDisabled),
            PoolMode::Pooled(pooled) => {
                let state = pooled.state.lock();
                let idle: usize = state.idle.values().map(Vec::len).sum();
                Ok(PoolStats {
                    idle,
                    in_use: state.total - idle,
                    max: pooled.max_total,
                    waiting: state.waiting,
                })
            }
        }
    }

    /// Close pooled connections idle longer than `max_idle`.
    ///
    /// No-op in single-connection mode. Safe to call concurrently with
    /// `acquire`.
    ///
    /// # Errors
    /// [`HttpError::Closed`] once the pool has shut down, so the reaper can
    /// drop its registration.
    pub(crate) fn reap_idle(&self, max_idle: Duration) -> Result<(), HttpError> {
        match &self.mode {
            PoolMode::Single { .. } => Ok(()),
            PoolMode::Pooled(pooled) => {
                let mut reaped: Vec<IdleConn> = Vec::new();
                {
                    let mut state = pooled.state.lock();
                    if state.closed {
                        return Err(HttpError::Closed);
                    }
                    let mut expired_routes: Vec<Route> = Vec::new();
                    for (route, conns) in &mut state.idle {
                        let mut kept = Vec::new();
                        for idle in conns.drain(..) {
                            if idle.idle_since.elapsed() > max_idle {
                                expired_routes.push(route.clone());
                                reaped.push(idle);
                            } else {
                                kept.push(idle);
                            }
                        }
                        *conns = kept;
                    }
                    for route in &expired_routes {
                        state.release_slot(route);
                    }
                    state.idle.retain(|_, conns| !conns.is_empty());
                }
                if !reaped.is_empty() {
                    tracing::debug!(count = reaped.len(), "reaping idle connections");
                    drop(reaped);
                    pooled.slot_released.notify_waiters();
                }
                Ok(())
            }
        }
    }

    /// Close every idle connection and reject subsequent acquisitions
    /// permanently. In-flight leases are discarded when released.
    pub(crate) fn shutdown(&self) {
        match &self.mode {
            PoolMode::Single { closed } => closed.store(true, Ordering::SeqCst),
            PoolMode::Pooled(pooled) => {
                let drained = {
                    let mut state = pooled.state.lock();
                    state.closed = true;
                    let idle = std::mem::take(&mut state.idle);
                    for (route, conns) in &idle {
                        for _ in conns {
                            state.release_slot(route);
                        }
                    }
                    idle
                };
                drop(drained);
                pooled.slot_released.notify_waiters();
            }
        }
    }
}

/// Frees a reserved-but-unopened slot if connecting fails or is cancelled.
struct SlotReservation<'a> {
    pooled: &'a PooledState,
    route: &'a Route,
    armed: bool,
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pooled.state.lock().release_slot(self.route);
            self.pooled.slot_released.notify_waiters();
        }
    }
}

/// Keeps the waiter count accurate even if the acquisition future is
/// dropped mid-wait.
struct WaitGuard<'a> {
    pooled: &'a PooledState,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.pooled.state.lock().waiting -= 1;
    }
}

/// Scoped checkout of a connection.
///
/// Dropping the lease discards the connection (the error and cancellation
/// path); [`Lease::restore`] hands a still-open connection back to the idle
/// set after a clean exchange.
pub(crate) struct Lease {
    conn: Option<Box<dyn Connection>>,
    route: Route,
    pool: Arc<ConnectionPool>,
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("route", &self.route)
            .field("held", &self.conn.is_some())
            .finish()
    }
}

impl Lease {
    fn new(pool: Arc<ConnectionPool>, route: Route, conn: Box<dyn Connection>) -> Self {
        Self {
            conn: Some(conn),
            route,
            pool,
        }
    }

    pub(crate) fn connection(&mut self) -> &mut dyn Connection {
        match self.conn.as_deref_mut() {
            Some(conn) => conn,
            None => unreachable!("lease already released"),
        }
    }

    pub(crate) fn restore(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(&self.route, conn);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(&self.route, conn);
        }
    }
}
