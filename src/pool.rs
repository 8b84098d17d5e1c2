//! Bounded pool of physical connections.
//!
//! All state lives behind one mutex per pool. Callers block on a condition
//! variable when the pool is at capacity; an idle sweeper thread closes one
//! connection per idle interval once every created connection sits unused.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::error::{NativeError, SqlBridgeError};
use crate::native::{Credentials, Driver, NativeConnection, NativeStatement};

fn default_max_connections() -> usize {
    10
}

fn default_idle_timeout_ms() -> u64 {
    2000
}

/// Pool sizing and timing.
///
/// ```rust
/// use sql_bridge::pool::PoolOptions;
///
/// let options = PoolOptions::from_json(r#"{ "max_connections": 4 }"#).unwrap();
/// assert_eq!(options.max_connections, 4);
/// assert_eq!(options.idle_timeout_ms, 2000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolOptions {
    /// Upper bound on physical connections. `0` never opens one; acquirers wait.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle interval after which one connection of a fully idle pool is closed.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Bound on how long `acquire` waits at capacity; `None` waits indefinitely.
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            idle_timeout_ms: default_idle_timeout_ms(),
            acquire_timeout_ms: None,
        }
    }
}

impl PoolOptions {
    #[must_use]
    pub fn builder() -> PoolOptionsBuilder {
        PoolOptionsBuilder::new()
    }

    /// # Errors
    /// Returns `SqlBridgeError::Config` if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self, SqlBridgeError> {
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

/// Fluent builder for [`PoolOptions`] and [`ConnectionPool`].
#[derive(Debug, Clone, Default)]
pub struct PoolOptionsBuilder {
    opts: PoolOptions,
}

impl PoolOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.opts.max_connections = max;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.opts.idle_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.opts.acquire_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn finish(self) -> PoolOptions {
        self.opts
    }

    /// Build a pool with the configured options.
    #[must_use]
    pub fn build(
        self,
        driver: Arc<dyn Driver>,
        connection_string: impl Into<String>,
        credentials: Option<Credentials>,
    ) -> ConnectionPool {
        ConnectionPool::with_credentials(driver, connection_string, credentials, self.opts)
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub total_created: usize,
    pub idle: usize,
    pub in_use: usize,
    pub disposed: bool,
}

struct PoolState {
    idle: VecDeque<Box<dyn NativeConnection>>,
    total_created: usize,
    disposed: bool,
    /// Bumped by every acquire; a pending sweep whose epoch changed stands down.
    acquire_epoch: u64,
    sweep_armed: bool,
    sweeper_running: bool,
}

struct PoolCore {
    driver: Arc<dyn Driver>,
    connection_string: String,
    credentials: Option<Credentials>,
    options: PoolOptions,
    state: Mutex<PoolState>,
    available: Condvar,
    sweep_signal: Condvar,
}

impl PoolCore {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn acquire(
        self: &Arc<Self>,
        credentials: Option<&Credentials>,
    ) -> Result<PooledNative, SqlBridgeError> {
        let deadline = self.options.acquire_timeout().map(|t| (t, Instant::now() + t));
        let mut state = self.lock();
        state.acquire_epoch = state.acquire_epoch.wrapping_add(1);
        self.sweep_signal.notify_all();

        loop {
            if state.disposed {
                return Err(SqlBridgeError::PoolDisposed);
            }
            if let Some(conn) = state.idle.pop_front() {
                trace!("reusing idle pooled connection");
                return Ok(PooledNative::new(conn, Arc::clone(self)));
            }
            if state.total_created < self.options.max_connections {
                state.total_created += 1;
                drop(state);
                return self.open_reserved(credentials);
            }

            state = match deadline {
                None => match self.available.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                },
                Some((timeout, at)) => {
                    let now = Instant::now();
                    if now >= at {
                        return Err(SqlBridgeError::PoolTimeout(timeout));
                    }
                    match self.available.wait_timeout(state, at - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
            };
        }
    }

    /// Connect for a slot already counted in `total_created`.
    fn open_reserved(
        self: &Arc<Self>,
        credentials: Option<&Credentials>,
    ) -> Result<PooledNative, SqlBridgeError> {
        let credentials = credentials.or(self.credentials.as_ref());
        match self.driver.connect(&self.connection_string, credentials) {
            Ok(conn) => {
                let mut state = self.lock();
                if state.disposed {
                    state.total_created -= 1;
                    drop(state);
                    close_quietly(conn);
                    return Err(SqlBridgeError::PoolDisposed);
                }
                debug!(
                    total_created = state.total_created,
                    "opened pooled physical connection"
                );
                Ok(PooledNative::new(conn, Arc::clone(self)))
            }
            Err(err) => {
                let mut state = self.lock();
                state.total_created -= 1;
                self.available.notify_one();
                Err(SqlBridgeError::Connection(err))
            }
        }
    }

    fn release(self: &Arc<Self>, mut conn: Box<dyn NativeConnection>) {
        let cleared = conn.clear_session_state();
        let mut state = self.lock();

        if state.disposed || cleared.is_err() {
            state.total_created -= 1;
            self.available.notify_one();
            drop(state);
            if let Err(err) = cleared {
                warn!(error = %err, "could not reset session state; closing connection");
            }
            close_quietly(conn);
            return;
        }

        state.idle.push_back(conn);
        self.available.notify_one();
        if state.idle.len() == state.total_created && state.total_created > 0 {
            self.arm_sweep(&mut state);
        }
    }

    fn arm_sweep(self: &Arc<Self>, state: &mut PoolState) {
        state.sweep_armed = true;
        if state.sweeper_running {
            self.sweep_signal.notify_all();
            return;
        }

        let core = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("sql-bridge-idle-sweep".into())
            .spawn(move || core.run_sweeper());
        match spawned {
            Ok(_) => state.sweeper_running = true,
            Err(err) => {
                state.sweep_armed = false;
                warn!(error = %err, "could not start idle sweeper; idle connections stay open");
            }
        }
    }

    fn run_sweeper(&self) {
        let idle_timeout = self.options.idle_timeout();
        let mut state = self.lock();

        loop {
            if state.disposed {
                break;
            }
            if !state.sweep_armed {
                state = match self.sweep_signal.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                continue;
            }

            state.sweep_armed = false;
            let epoch = state.acquire_epoch;
            let (guard, result) = match self.sweep_signal.wait_timeout_while(
                state,
                idle_timeout,
                |s| !s.disposed && s.acquire_epoch == epoch,
            ) {
                Ok(woken) => woken,
                Err(poisoned) => poisoned.into_inner(),
            };
            state = guard;

            if state.disposed || !result.timed_out() {
                continue;
            }
            let Some(conn) = state.idle.pop_front() else {
                continue;
            };
            state.total_created -= 1;
            debug!(
                total_created = state.total_created,
                "closing idle pooled connection"
            );
            drop(state);
            close_quietly(conn);

            state = self.lock();
            if !state.idle.is_empty()
                && state.acquire_epoch == epoch
                && state.idle.len() == state.total_created
            {
                state.sweep_armed = true;
            }
        }

        state.sweeper_running = false;
        trace!("idle sweeper stopped");
    }

    fn dispose(&self) {
        let idle: Vec<_> = {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.total_created -= idle.len();
            self.available.notify_all();
            self.sweep_signal.notify_all();
            idle
        };
        debug!(closed = idle.len(), "disposing connection pool");
        for conn in idle {
            close_quietly(conn);
        }
    }

    fn status(&self) -> PoolStatus {
        let state = self.lock();
        PoolStatus {
            total_created: state.total_created,
            idle: state.idle.len(),
            in_use: state.total_created - state.idle.len(),
            disposed: state.disposed,
        }
    }
}

fn close_quietly(mut conn: Box<dyn NativeConnection>) {
    if let Err(err) = conn.close() {
        warn!(error = %err, "failed to close physical connection");
    }
}

/// Disposes the pool when the last [`ConnectionPool`] handle goes away.
/// Issued connections keep only the core alive, so they cannot hold it open.
struct PoolInner {
    core: Arc<PoolCore>,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

/// Shared handle to a connection pool. Clones refer to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connection_string", &self.inner.core.connection_string)
            .field("options", &self.inner.core.options)
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionPool {
    #[must_use]
    pub fn new(
        driver: Arc<dyn Driver>,
        connection_string: impl Into<String>,
        options: PoolOptions,
    ) -> Self {
        Self::with_credentials(driver, connection_string, None, options)
    }

    /// Pool whose connections open with `credentials` unless the caller supplies others.
    #[must_use]
    pub fn with_credentials(
        driver: Arc<dyn Driver>,
        connection_string: impl Into<String>,
        credentials: Option<Credentials>,
        options: PoolOptions,
    ) -> Self {
        let core = PoolCore {
            driver,
            connection_string: connection_string.into(),
            credentials,
            options,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total_created: 0,
                disposed: false,
                acquire_epoch: 0,
                sweep_armed: false,
                sweeper_running: false,
            }),
            available: Condvar::new(),
            sweep_signal: Condvar::new(),
        };
        Self {
            inner: Arc::new(PoolInner {
                core: Arc::new(core),
            }),
        }
    }

    #[must_use]
    pub fn builder() -> PoolOptionsBuilder {
        PoolOptionsBuilder::new()
    }

    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        &self.inner.core.options
    }

    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.inner.core.connection_string
    }

    /// Take a physical connection, opening one if below capacity and waiting otherwise.
    ///
    /// # Errors
    /// `PoolDisposed` once the pool is disposed (including while waiting),
    /// `Connection` if opening a new physical connection fails and
    /// `PoolTimeout` if an acquire timeout is configured and elapses.
    pub fn acquire(&self) -> Result<PooledNative, SqlBridgeError> {
        self.inner.core.acquire(None)
    }

    /// As [`ConnectionPool::acquire`], opening new connections with `credentials`.
    ///
    /// # Errors
    /// See [`ConnectionPool::acquire`].
    pub fn acquire_with(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<PooledNative, SqlBridgeError> {
        self.inner.core.acquire(credentials)
    }

    /// Acquire on tokio's blocking pool so async callers never park a worker.
    ///
    /// # Errors
    /// See [`ConnectionPool::acquire`].
    pub async fn acquire_async(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<PooledNative, SqlBridgeError> {
        let core = Arc::clone(&self.inner.core);
        tokio::task::spawn_blocking(move || core.acquire(credentials.as_ref()))
            .await
            .map_err(|err| {
                SqlBridgeError::Connection(NativeError::new(format!("acquire task failed: {err}")))
            })?
    }

    /// Closed logical connection that borrows from this pool when opened.
    #[must_use]
    pub fn create_connection(&self) -> Connection {
        Connection::pooled(self)
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.core.status()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.status().disposed
    }

    /// Close idle connections and refuse further acquires. Idempotent.
    ///
    /// Connections already handed out are closed when they are returned.
    pub fn dispose(&self) {
        self.inner.core.dispose();
    }
}

/// Placeholder left in a [`PooledNative`] after its connection went back to the pool.
struct Released;

fn released() -> NativeError {
    NativeError::new("connection has been returned to the pool")
}

impl NativeConnection for Released {
    fn prepare_statement(&mut self, _sql: &str) -> Result<Box<dyn NativeStatement>, NativeError> {
        Err(released())
    }

    fn clear_session_state(&mut self) -> Result<(), NativeError> {
        Err(released())
    }

    fn set_transaction_isolation(&mut self, _level: i32) -> Result<(), NativeError> {
        Err(released())
    }

    fn set_auto_commit(&mut self, _auto_commit: bool) -> Result<(), NativeError> {
        Err(released())
    }

    fn commit(&mut self) -> Result<(), NativeError> {
        Err(released())
    }

    fn rollback(&mut self) -> Result<(), NativeError> {
        Err(released())
    }

    fn close(&mut self) -> Result<(), NativeError> {
        Ok(())
    }
}

/// A physical connection checked out of a pool; returned on drop.
pub struct PooledNative {
    conn: Box<dyn NativeConnection>,
    core: Arc<PoolCore>,
}

impl PooledNative {
    fn new(conn: Box<dyn NativeConnection>, core: Arc<PoolCore>) -> Self {
        Self { conn, core }
    }

    pub fn native(&mut self) -> &mut dyn NativeConnection {
        self.conn.as_mut()
    }
}

impl std::fmt::Debug for PooledNative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledNative").finish_non_exhaustive()
    }
}

impl Drop for PooledNative {
    fn drop(&mut self) {
        let conn = std::mem::replace(&mut self.conn, Box::new(Released));
        self.core.release(conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockDriver;

    fn pool(max: usize, idle_ms: u64) -> (MockDriver, ConnectionPool) {
        let driver = MockDriver::new();
        let options = PoolOptions::builder()
            .max_connections(max)
            .idle_timeout(Duration::from_millis(idle_ms))
            .finish();
        let pool = ConnectionPool::new(Arc::new(driver.clone()), "mock://pool", options);
        (driver, pool)
    }

    #[test]
    fn options_defaults_and_json() {
        let options = PoolOptions::default();
        assert_eq!(options.max_connections, 10);
        assert_eq!(options.idle_timeout(), Duration::from_millis(2000));
        assert_eq!(options.acquire_timeout(), None);

        let parsed =
            PoolOptions::from_json(r#"{"idle_timeout_ms": 50, "acquire_timeout_ms": 10}"#).unwrap();
        assert_eq!(parsed.max_connections, 10);
        assert_eq!(parsed.idle_timeout_ms, 50);
        assert_eq!(parsed.acquire_timeout(), Some(Duration::from_millis(10)));

        assert!(matches!(
            PoolOptions::from_json("{ not json"),
            Err(SqlBridgeError::Config(_))
        ));
    }

    #[test]
    fn released_connection_is_reused() {
        let (driver, pool) = pool(2, 10_000);
        drop(pool.acquire().unwrap());
        drop(pool.acquire().unwrap());
        assert_eq!(driver.stats().connects, 1);
        assert_eq!(driver.stats().clears, 2);

        let status = pool.status();
        assert_eq!(status.total_created, 1);
        assert_eq!(status.idle, 1);
        assert_eq!(status.in_use, 0);
    }

    #[test]
    fn failed_connect_frees_the_slot() {
        let (driver, pool) = pool(1, 10_000);
        driver.fail_next_connect("server unavailable");
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, SqlBridgeError::Connection(_)));
        assert_eq!(pool.status().total_created, 0);

        let conn = pool.acquire().unwrap();
        assert_eq!(pool.status().in_use, 1);
        drop(conn);
    }

    #[test]
    fn acquire_timeout_elapses_at_capacity() {
        let driver = MockDriver::new();
        let pool = PoolOptions::builder()
            .max_connections(1)
            .acquire_timeout(Duration::from_millis(20))
            .build(Arc::new(driver), "mock://pool", None);

        let _held = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, SqlBridgeError::PoolTimeout(_)));
    }

    #[test]
    fn failed_session_reset_closes_instead_of_pooling() {
        let (driver, pool) = pool(1, 10_000);
        let conn = pool.acquire().unwrap();
        driver.fail_next_clear("session reset failed");
        drop(conn);

        let status = pool.status();
        assert_eq!(status.idle, 0);
        assert_eq!(status.total_created, 0);
        assert_eq!(driver.stats().closes, 1);
    }

    #[test]
    fn dropping_last_handle_disposes() {
        let (driver, pool) = pool(2, 10_000);
        let conn = pool.acquire().unwrap();
        drop(pool.acquire().unwrap());
        drop(pool);
        assert_eq!(driver.stats().closes, 1);

        drop(conn);
        assert_eq!(driver.stats().closes, 2);
    }
}
