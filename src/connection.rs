use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::bridge::isolation_to_native;
use crate::command::Command;
use crate::error::{NativeError, SqlBridgeError};
use crate::native::{Credentials, Driver, NativeConnection};
use crate::pool::{ConnectionPool, PooledNative};
use crate::types::IsolationLevel;

/// Whether a logical connection currently holds a physical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

enum Source {
    Pool(ConnectionPool),
    Direct(Arc<dyn Driver>),
}

enum NativeHandle {
    Pooled(PooledNative),
    Direct(Box<dyn NativeConnection>),
}

impl NativeHandle {
    fn native(&mut self) -> &mut dyn NativeConnection {
        match self {
            NativeHandle::Pooled(pooled) => pooled.native(),
            NativeHandle::Direct(conn) => conn.as_mut(),
        }
    }

    /// Return to the pool or close the physical connection.
    fn release(self) -> Result<(), NativeError> {
        match self {
            NativeHandle::Pooled(pooled) => {
                drop(pooled);
                Ok(())
            }
            NativeHandle::Direct(mut conn) => conn.close(),
        }
    }
}

struct ConnectionInner {
    connection_string: String,
    credentials: Option<Credentials>,
    native: Option<NativeHandle>,
    active_transaction: Option<u64>,
    next_transaction: u64,
    /// Bumped on every successful open.
    opened: u64,
}

/// Logical connection handed to application code.
///
/// A pooled connection borrows a physical connection from its pool while open
/// and returns it on [`Connection::close`] or drop; a direct connection owns
/// its physical connection outright.
pub struct Connection {
    source: Source,
    inner: Mutex<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Connection")
            .field("pooled", &matches!(self.source, Source::Pool(_)))
            .field("connection_string", &inner.connection_string)
            .field("credentials", &inner.credentials)
            .field("open", &inner.native.is_some())
            .finish()
    }
}

impl Connection {
    /// Unpooled connection opened straight through `driver`.
    pub fn new(driver: Arc<dyn Driver>, connection_string: impl Into<String>) -> Self {
        Self::build(Source::Direct(driver), connection_string.into(), None)
    }

    pub fn with_credentials(
        driver: Arc<dyn Driver>,
        connection_string: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self::build(
            Source::Direct(driver),
            connection_string.into(),
            Some(credentials),
        )
    }

    /// Connection that borrows physical connections from `pool`.
    #[must_use]
    pub fn pooled(pool: &ConnectionPool) -> Self {
        let connection_string = pool.connection_string().to_string();
        Self::build(Source::Pool(pool.clone()), connection_string, None)
    }

    fn build(source: Source, connection_string: String, credentials: Option<Credentials>) -> Self {
        Self {
            source,
            inner: Mutex::new(ConnectionInner {
                connection_string,
                credentials,
                native: None,
                active_transaction: None,
                next_transaction: 0,
                opened: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[must_use]
    pub fn connection_string(&self) -> String {
        self.lock().connection_string.clone()
    }

    /// # Errors
    /// `InvalidState` while open, or for pooled connections, whose target is fixed by the pool.
    pub fn set_connection_string(&self, connection_string: impl Into<String>) -> Result<(), SqlBridgeError> {
        if matches!(self.source, Source::Pool(_)) {
            return Err(SqlBridgeError::InvalidState(
                "pooled connections use the pool's connection string".into(),
            ));
        }
        let mut inner = self.lock();
        ensure_closed(&inner)?;
        inner.connection_string = connection_string.into();
        Ok(())
    }

    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        self.lock().credentials.clone()
    }

    /// # Errors
    /// `InvalidState` while the connection is open.
    pub fn set_credentials(&self, credentials: Option<Credentials>) -> Result<(), SqlBridgeError> {
        let mut inner = self.lock();
        ensure_closed(&inner)?;
        inner.credentials = credentials;
        Ok(())
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().native.is_some()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.is_open() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    /// Open with the stored credentials, if any.
    ///
    /// # Errors
    /// `InvalidState` if already open; otherwise whatever acquiring or
    /// connecting reports (`Connection`, `PoolDisposed`, `PoolTimeout`).
    pub fn open(&self) -> Result<(), SqlBridgeError> {
        let mut inner = self.lock();
        ensure_not_open(&inner)?;
        let credentials = inner.credentials.clone();
        let handle = self.connect(&inner.connection_string, credentials.as_ref())?;
        inner.native = Some(handle);
        inner.opened += 1;
        Ok(())
    }

    /// Open with `credentials`, leaving the stored credentials untouched.
    ///
    /// # Errors
    /// See [`Connection::open`].
    pub fn open_with(&self, credentials: &Credentials) -> Result<(), SqlBridgeError> {
        let mut inner = self.lock();
        ensure_not_open(&inner)?;
        let handle = self.connect(&inner.connection_string, Some(credentials))?;
        inner.native = Some(handle);
        inner.opened += 1;
        Ok(())
    }

    /// Open without blocking the async runtime.
    ///
    /// # Errors
    /// See [`Connection::open`].
    pub async fn open_async(&self) -> Result<(), SqlBridgeError> {
        let (connection_string, credentials) = {
            let inner = self.lock();
            ensure_not_open(&inner)?;
            (inner.connection_string.clone(), inner.credentials.clone())
        };

        let handle = match &self.source {
            Source::Pool(pool) => NativeHandle::Pooled(pool.acquire_async(credentials).await?),
            Source::Direct(driver) => {
                let driver = Arc::clone(driver);
                let conn = tokio::task::spawn_blocking(move || {
                    driver.connect(&connection_string, credentials.as_ref())
                })
                .await
                .map_err(|err| {
                    SqlBridgeError::Connection(NativeError::new(format!("connect task failed: {err}")))
                })?
                .map_err(SqlBridgeError::Connection)?;
                NativeHandle::Direct(conn)
            }
        };

        let mut inner = self.lock();
        if inner.native.is_some() {
            // Lost a race with a concurrent open.
            if let Err(err) = handle.release() {
                warn!(error = %err, "failed to close surplus connection");
            }
            return Err(already_open());
        }
        inner.native = Some(handle);
        inner.opened += 1;
        Ok(())
    }

    fn connect(
        &self,
        connection_string: &str,
        credentials: Option<&Credentials>,
    ) -> Result<NativeHandle, SqlBridgeError> {
        match &self.source {
            Source::Pool(pool) => Ok(NativeHandle::Pooled(pool.acquire_with(credentials)?)),
            Source::Direct(driver) => {
                let conn = driver
                    .connect(connection_string, credentials)
                    .map_err(SqlBridgeError::Connection)?;
                debug!(connection_string, "opened direct physical connection");
                Ok(NativeHandle::Direct(conn))
            }
        }
    }

    /// Roll back any active transaction and give up the physical connection.
    /// Closing a closed connection does nothing.
    ///
    /// # Errors
    /// `Connection` if a direct physical connection fails to close. The
    /// logical connection is closed either way.
    pub fn close(&self) -> Result<(), SqlBridgeError> {
        let mut inner = self.lock();
        let Some(mut handle) = inner.native.take() else {
            return Ok(());
        };
        if inner.active_transaction.take().is_some() {
            let native = handle.native();
            if let Err(err) = native.rollback().and_then(|()| native.set_auto_commit(true)) {
                warn!(error = %err, "rollback on close failed");
            }
        }
        drop(inner);
        handle.release().map_err(SqlBridgeError::Connection)
    }

    /// Counter identifying the current opening, or `None` while closed.
    /// Native statements are only valid for the opening they were prepared in.
    pub(crate) fn open_generation(&self) -> Option<u64> {
        let inner = self.lock();
        inner.native.as_ref().map(|_| inner.opened)
    }

    /// Run `f` against the open physical connection.
    ///
    /// # Errors
    /// `InvalidState` if the connection is not open, else whatever `f` returns.
    pub fn with_native<R>(
        &self,
        f: impl FnOnce(&mut dyn NativeConnection) -> Result<R, SqlBridgeError>,
    ) -> Result<R, SqlBridgeError> {
        let mut inner = self.lock();
        match inner.native.as_mut() {
            Some(handle) => f(handle.native()),
            None => Err(not_open()),
        }
    }

    /// Command bound to this connection.
    #[must_use]
    pub fn create_command(&self, sql: impl Into<String>) -> Command<'_> {
        Command::with_connection(self, sql)
    }

    /// Begin a read-committed transaction.
    ///
    /// # Errors
    /// See [`Connection::begin_transaction_with`].
    pub fn begin_transaction(&self) -> Result<Transaction<'_>, SqlBridgeError> {
        self.begin_transaction_with(IsolationLevel::ReadCommitted)
    }

    /// Begin a transaction at `level`; `Unspecified` means read committed.
    ///
    /// # Errors
    /// `InvalidState` if the connection is closed or a transaction is already
    /// active; `Execution` if the driver rejects the isolation level.
    pub fn begin_transaction_with(
        &self,
        level: IsolationLevel,
    ) -> Result<Transaction<'_>, SqlBridgeError> {
        let level = match level {
            IsolationLevel::Unspecified => IsolationLevel::ReadCommitted,
            other => other,
        };

        let mut inner = self.lock();
        if inner.active_transaction.is_some() {
            return Err(SqlBridgeError::InvalidState(
                "a transaction is already active on this connection".into(),
            ));
        }
        let handle = inner.native.as_mut().ok_or_else(not_open)?;
        let native = handle.native();
        native
            .set_transaction_isolation(isolation_to_native(level))
            .and_then(|()| native.set_auto_commit(false))
            .map_err(SqlBridgeError::Execution)?;

        let id = inner.next_transaction;
        inner.next_transaction += 1;
        inner.active_transaction = Some(id);
        debug!(?level, "transaction started");
        Ok(Transaction {
            connection: self,
            id,
            level,
            finished: false,
        })
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.lock().active_transaction.is_some()
    }

    fn finish_transaction(&self, id: u64, commit: bool) -> Result<(), SqlBridgeError> {
        let mut inner = self.lock();
        if inner.active_transaction != Some(id) {
            return Err(SqlBridgeError::InvalidState(
                "transaction is no longer active".into(),
            ));
        }
        inner.active_transaction = None;
        let handle = inner.native.as_mut().ok_or_else(not_open)?;
        let native = handle.native();
        let outcome = if commit {
            native.commit()
        } else {
            native.rollback()
        };
        outcome
            .and_then(|()| native.set_auto_commit(true))
            .map_err(SqlBridgeError::Execution)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close connection on drop");
        }
    }
}

fn not_open() -> SqlBridgeError {
    SqlBridgeError::InvalidState("connection is not open".into())
}

fn already_open() -> SqlBridgeError {
    SqlBridgeError::InvalidState("connection is already open".into())
}

fn ensure_not_open(inner: &ConnectionInner) -> Result<(), SqlBridgeError> {
    if inner.native.is_some() {
        Err(already_open())
    } else {
        Ok(())
    }
}

fn ensure_closed(inner: &ConnectionInner) -> Result<(), SqlBridgeError> {
    if inner.native.is_some() {
        Err(SqlBridgeError::InvalidState(
            "cannot change connection settings while open".into(),
        ))
    } else {
        Ok(())
    }
}

/// An active transaction. Dropping it without committing rolls back.
#[must_use = "dropping a transaction rolls it back"]
pub struct Transaction<'c> {
    connection: &'c Connection,
    id: u64,
    level: IsolationLevel,
    finished: bool,
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("level", &self.level)
            .field("finished", &self.finished)
            .finish()
    }
}

impl<'c> Transaction<'c> {
    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.level
    }

    #[must_use]
    pub fn connection(&self) -> &'c Connection {
        self.connection
    }

    /// # Errors
    /// `Execution` if the driver fails to commit; `InvalidState` if the
    /// connection was closed in the meantime.
    pub fn commit(mut self) -> Result<(), SqlBridgeError> {
        self.finished = true;
        self.connection.finish_transaction(self.id, true)
    }

    /// # Errors
    /// `Execution` if the driver fails to roll back; `InvalidState` if the
    /// connection was closed in the meantime.
    pub fn rollback(mut self) -> Result<(), SqlBridgeError> {
        self.finished = true;
        self.connection.finish_transaction(self.id, false)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished || !self.connection.in_transaction() {
            return;
        }
        match self.connection.finish_transaction(self.id, false) {
            Ok(()) | Err(SqlBridgeError::InvalidState(_)) => {}
            Err(err) => warn!(error = %err, "rollback of dropped transaction failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockDriver;

    fn direct() -> (MockDriver, Connection) {
        let driver = MockDriver::new();
        let conn = Connection::new(Arc::new(driver.clone()), "mock://direct");
        (driver, conn)
    }

    #[test]
    fn open_close_lifecycle() {
        let (driver, conn) = direct();
        assert_eq!(conn.state(), ConnectionState::Closed);
        conn.open().unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(matches!(conn.open(), Err(SqlBridgeError::InvalidState(_))));

        conn.close().unwrap();
        conn.close().unwrap();
        assert!(!conn.is_open());
        assert_eq!(driver.stats().connects, 1);
        assert_eq!(driver.stats().closes, 1);
    }

    #[test]
    fn settings_are_frozen_while_open() {
        let (_driver, conn) = direct();
        conn.set_connection_string("mock://other").unwrap();
        conn.open().unwrap();
        assert!(matches!(
            conn.set_connection_string("mock://third"),
            Err(SqlBridgeError::InvalidState(_))
        ));
        assert!(matches!(
            conn.set_credentials(Some(Credentials::new("u", "p"))),
            Err(SqlBridgeError::InvalidState(_))
        ));
        assert_eq!(conn.connection_string(), "mock://other");
    }

    #[test]
    fn open_with_passes_credentials() {
        let (driver, conn) = direct();
        conn.open_with(&Credentials::new("sa", "secret")).unwrap();
        assert_eq!(driver.last_user().as_deref(), Some("sa"));
        assert!(conn.credentials().is_none());
    }

    #[test]
    fn connect_failure_leaves_connection_closed() {
        let (driver, conn) = direct();
        driver.fail_next_connect("refused");
        assert!(matches!(conn.open(), Err(SqlBridgeError::Connection(_))));
        assert!(!conn.is_open());
    }

    #[test]
    fn transaction_commit_and_drop_rollback() {
        let (driver, conn) = direct();
        assert!(matches!(
            conn.begin_transaction(),
            Err(SqlBridgeError::InvalidState(_))
        ));
        conn.open().unwrap();

        let tx = conn.begin_transaction_with(IsolationLevel::Unspecified).unwrap();
        assert_eq!(tx.isolation_level(), IsolationLevel::ReadCommitted);
        assert!(matches!(
            conn.begin_transaction(),
            Err(SqlBridgeError::InvalidState(_))
        ));
        tx.commit().unwrap();
        assert_eq!(driver.stats().commits, 1);
        assert_eq!(driver.last_isolation(), Some(2));

        {
            let _tx = conn
                .begin_transaction_with(IsolationLevel::Serializable)
                .unwrap();
        }
        assert_eq!(driver.stats().rollbacks, 1);
        assert_eq!(driver.last_isolation(), Some(8));
        assert!(!conn.in_transaction());
    }

    #[test]
    fn close_rolls_back_active_transaction() {
        let (driver, conn) = direct();
        conn.open().unwrap();
        let tx = conn.begin_transaction().unwrap();
        conn.close().unwrap();
        assert_eq!(driver.stats().rollbacks, 1);
        assert!(matches!(tx.commit(), Err(SqlBridgeError::InvalidState(_))));
        assert_eq!(driver.stats().commits, 0);
    }

    #[test]
    fn pooled_connection_returns_to_pool() {
        let driver = MockDriver::new();
        let pool = ConnectionPool::new(
            Arc::new(driver.clone()),
            "mock://pool",
            crate::pool::PoolOptions::default(),
        );
        let conn = Connection::pooled(&pool);
        conn.open().unwrap();
        assert_eq!(pool.status().in_use, 1);
        assert!(conn.set_connection_string("mock://x").is_err());
        drop(conn);
        assert_eq!(pool.status().idle, 1);
        assert_eq!(driver.stats().closes, 0);
    }
}
