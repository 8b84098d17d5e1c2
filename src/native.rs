//! Interface consumed from the underlying statement-oriented driver.
//!
//! Nothing here talks to a database by itself; a backend implements these
//! traits (see the `sqlite` module) and the rest of the crate only ever sees
//! the trait objects.

use std::fmt;
use std::sync::Arc;

use crate::error::NativeError;
use crate::types::{NativeTypeCode, NativeValue};

/// User name and password presented when opening a physical connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

// Keep passwords out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Factory for physical connections.
pub trait Driver: Send + Sync {
    /// Open a physical connection.
    ///
    /// # Errors
    /// Returns the driver diagnostic when the connection cannot be established.
    fn connect(
        &self,
        connection_string: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn NativeConnection>, NativeError>;
}

/// A physical connection owned by the driver.
pub trait NativeConnection: Send {
    /// Compile `sql` into a statement that can be bound and executed repeatedly.
    ///
    /// # Errors
    /// Returns the driver diagnostic when the SQL is rejected.
    fn prepare_statement(&mut self, sql: &str) -> Result<Box<dyn NativeStatement>, NativeError>;

    /// Clear per-session warnings before the connection is reused.
    ///
    /// # Errors
    /// Returns the driver diagnostic if the session cannot be reset.
    fn clear_session_state(&mut self) -> Result<(), NativeError>;

    /// # Errors
    /// Returns the driver diagnostic if the level is rejected.
    fn set_transaction_isolation(&mut self, level: i32) -> Result<(), NativeError>;

    /// # Errors
    /// Returns the driver diagnostic if the mode cannot be changed.
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), NativeError>;

    /// # Errors
    /// Returns the driver diagnostic if the commit fails.
    fn commit(&mut self) -> Result<(), NativeError>;

    /// # Errors
    /// Returns the driver diagnostic if the rollback fails.
    fn rollback(&mut self) -> Result<(), NativeError>;

    /// # Errors
    /// Returns the driver diagnostic if closing fails; the connection is unusable afterwards either way.
    fn close(&mut self) -> Result<(), NativeError>;
}

/// A prepared statement owned by the driver.
pub trait NativeStatement: Send {
    /// Bind `value` at the 1-based `ordinal`, typed when `type_code` is given.
    ///
    /// # Errors
    /// Returns the driver diagnostic if the ordinal or value is rejected.
    fn bind(
        &mut self,
        ordinal: usize,
        value: NativeValue,
        type_code: Option<NativeTypeCode>,
    ) -> Result<(), NativeError>;

    /// # Errors
    /// Returns the driver diagnostic if bindings cannot be cleared.
    fn clear_parameters(&mut self) -> Result<(), NativeError>;

    /// # Errors
    /// Returns the driver diagnostic if the timeout is rejected.
    fn set_query_timeout(&mut self, seconds: u32) -> Result<(), NativeError>;

    /// # Errors
    /// Returns the driver diagnostic when execution fails.
    fn execute_query(&mut self) -> Result<Box<dyn RowCursor>, NativeError>;

    /// # Errors
    /// Returns the driver diagnostic when execution fails.
    fn execute_update(&mut self) -> Result<u64, NativeError>;

    /// Handle that can abort an in-flight execution from another thread.
    fn canceller(&self) -> Arc<dyn StatementCanceller>;

    /// # Errors
    /// Returns the driver diagnostic if releasing the statement fails.
    fn close(&mut self) -> Result<(), NativeError>;
}

/// Best-effort cancellation of a running statement.
pub trait StatementCanceller: Send + Sync {
    /// # Errors
    /// Returns the driver diagnostic, including "already finished" conditions.
    fn cancel(&self) -> Result<(), NativeError>;
}

/// Forward-only cursor over the rows of a query.
pub trait RowCursor: Send {
    /// Advance to the next row; `false` once the rows are exhausted.
    ///
    /// # Errors
    /// Returns the driver diagnostic if fetching fails.
    fn next(&mut self) -> Result<bool, NativeError>;

    fn column_count(&self) -> usize;

    fn column_name(&self, index: usize) -> Option<&str>;

    /// Native type code of a column, from result metadata.
    fn column_type(&self, index: usize) -> Option<NativeTypeCode>;

    /// Value of a 0-based column in the current row.
    ///
    /// # Errors
    /// Returns the driver diagnostic if there is no current row or the index is out of range.
    fn value(&self, index: usize) -> Result<NativeValue, NativeError>;

    /// # Errors
    /// Returns the driver diagnostic if releasing the cursor fails.
    fn close(&mut self) -> Result<(), NativeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials::new("sa", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("sa"));
        assert!(!rendered.contains("hunter2"));
    }
}
