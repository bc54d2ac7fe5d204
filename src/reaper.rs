//! Process-wide idle-connection reaper.
//!
//! One background task services every pooled client in the process:
//! connections that sit idle risk being closed server-side without notice,
//! so each pass proactively closes anything idle past its owner's
//! threshold. Registrations hold a `Weak` to the pool, so registering a
//! client never extends its lifetime; dead or shut-down pools are pruned on
//! the next pass.
//!
//! The task starts lazily on first registration — never at load time — and
//! [`shutdown`] doubles as the reset hook for test isolation: a later
//! registration revives the loop.

use crate::pool::ConnectionPool;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

/// Sleep interval used while nothing is registered.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Lower bound on the sleep interval, so the loop never busy-spins.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

struct Registration {
    pool: Weak<ConnectionPool>,
    max_idle: Duration,
}

struct ReaperState {
    entries: Vec<Registration>,
    interval: Duration,
    running: bool,
    shutdown: bool,
}

/// Registration set plus loop bookkeeping; one per process via [`global`].
pub(crate) struct ConnectionReaper {
    state: Mutex<ReaperState>,
}

impl ConnectionReaper {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ReaperState {
                entries: Vec::new(),
                interval: DEFAULT_INTERVAL,
                running: false,
                shutdown: false,
            }),
        }
    }

    /// Add an entry and recompute the sleep interval as the minimum of all
    /// registered intervals, floored at one second. Returns whether the
    /// caller must spawn the loop task.
    pub(crate) fn register(&self, pool: &Arc<ConnectionPool>, max_idle: Duration) -> bool {
        let mut state = self.state.lock();
        state.entries.push(Registration {
            pool: Arc::downgrade(pool),
            max_idle,
        });
        state.interval = state
            .entries
            .iter()
            .map(|entry| entry.max_idle.max(MIN_INTERVAL))
            .min()
            .unwrap_or(DEFAULT_INTERVAL);
        state.shutdown = false;
        let needs_spawn = !state.running;
        state.running = true;
        needs_spawn
    }

    pub(crate) fn interval(&self) -> Duration {
        self.state.lock().interval
    }

    #[cfg(test)]
    pub(crate) fn registered_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// One reap pass. Entries whose pool is gone, or whose reap call fails
    /// (pool shut down), are dropped rather than propagated.
    pub(crate) fn run_pass(&self) {
        let mut state = self.state.lock();
        state.entries.retain(|entry| match entry.pool.upgrade() {
            Some(pool) => match pool.reap_idle(entry.max_idle) {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!(error = %err, "dropping reaper registration");
                    false
                }
            },
            None => false,
        });
    }

    /// Loop body: returns `false` once shutdown was requested.
    fn tick(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.shutdown {
                state.running = false;
                return false;
            }
        }
        self.run_pass();
        true
    }

    fn request_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        state.entries.clear();
        state.interval = DEFAULT_INTERVAL;
    }
}

fn global() -> &'static ConnectionReaper {
    static REAPER: OnceLock<ConnectionReaper> = OnceLock::new();
    REAPER.get_or_init(ConnectionReaper::new)
}

/// Register a pool with the shared reaper.
///
/// Lazily spawns the loop task on first use; must be called from within a
/// Tokio runtime.
pub(crate) fn register(pool: &Arc<ConnectionPool>, max_idle: Duration) {
    if global().register(pool, max_idle) {
        tokio::spawn(run_loop());
    }
}

/// Signal the shared reaper to exit after its current sleep and drop all
/// registrations. An in-progress pass is never interrupted. Registering a
/// new client afterwards starts a fresh loop.
pub fn shutdown() {
    global().request_shutdown();
}

async fn run_loop() {
    loop {
        let interval = global().interval();
        tokio::time::sleep(interval).await;
        if !global().tick() {
            return;
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::HttpClientConfig;
    use crate::pool::Route;
    use crate::transport::mock::ScriptedTransport;

    fn pooled_pool() -> Arc<ConnectionPool> {
        let config = HttpClientConfig {
            use_connection_pool: true,
            use_connection_reaper: false,
            ..Default::default()
        };
        let transport = ScriptedTransport::new(Vec::new());
        Arc::new(ConnectionPool::new(&config, Arc::new(transport)))
    }

    #[test]
    fn interval_is_the_floored_minimum_of_registered_intervals() {
        let reaper = ConnectionReaper::new();
        assert_eq!(reaper.interval(), Duration::from_secs(5));

        let a = pooled_pool();
        let b = pooled_pool();
        reaper.register(&a, Duration::from_secs(8));
        assert_eq!(reaper.interval(), Duration::from_secs(8));
        reaper.register(&b, Duration::from_secs(3));
        assert_eq!(reaper.interval(), Duration::from_secs(3));

        // Sub-second requests are floored so the loop never busy-spins.
        let c = pooled_pool();
        reaper.register(&c, Duration::from_millis(10));
        assert_eq!(reaper.interval(), Duration::from_secs(1));
    }

    #[test]
    fn a_pass_prunes_dropped_pools_without_error() {
        let reaper = ConnectionReaper::new();
        let keep = pooled_pool();
        let gone = pooled_pool();
        reaper.register(&keep, Duration::from_secs(3));
        reaper.register(&gone, Duration::from_secs(8));
        assert_eq!(reaper.registered_count(), 2);

        drop(gone);
        reaper.run_pass();
        assert_eq!(reaper.registered_count(), 1);
    }

    #[tokio::test]
    async fn a_pass_reaps_idle_connections_and_drops_shut_down_pools() {
        let reaper = ConnectionReaper::new();
        let pool = pooled_pool();
        reaper.register(&pool, Duration::ZERO);

        let route = Route::new("http", "example.com", 80);
        pool.acquire(&route).await.unwrap().restore();
        assert_eq!(pool.stats().unwrap().idle, 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        reaper.run_pass();
        assert_eq!(pool.stats().unwrap().idle, 0);
        assert_eq!(reaper.registered_count(), 1);

        pool.shutdown();
        reaper.run_pass();
        assert_eq!(reaper.registered_count(), 0);
    }

    #[test]
    fn shutdown_clears_registrations_and_resets_the_interval() {
        let reaper = ConnectionReaper::new();
        let pool = pooled_pool();
        reaper.register(&pool, Duration::from_secs(2));
        assert_eq!(reaper.interval(), Duration::from_secs(2));

        reaper.request_shutdown();
        assert_eq!(reaper.registered_count(), 0);
        assert_eq!(reaper.interval(), Duration::from_secs(5));
        assert!(!reaper.tick());

        // A later registration revives the loop.
        assert!(reaper.register(&pool, Duration::from_secs(3)));
        assert!(reaper.tick());
    }
}
