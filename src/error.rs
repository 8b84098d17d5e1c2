use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Diagnostic reported by the underlying driver.
///
/// Native failures never leave the crate as foreign error types; they are
/// captured here and wrapped in a [`SqlBridgeError`] variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    /// Vendor error code, when the driver exposes one.
    pub code: Option<i32>,
    /// Five-character SQLSTATE, when the driver exposes one.
    pub sql_state: Option<String>,
    /// Human readable message from the driver.
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            sql_state: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    #[must_use]
    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        match (&self.sql_state, self.code) {
            (Some(state), Some(code)) => write!(f, " [SQLSTATE {state}, code {code}]"),
            (Some(state), None) => write!(f, " [SQLSTATE {state}]"),
            (None, Some(code)) => write!(f, " [code {code}]"),
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for NativeError {}

#[derive(Debug, Error)]
pub enum SqlBridgeError {
    #[error("Connection error: {0}")]
    Connection(#[source] NativeError),

    #[error("Connection pool has been disposed")]
    PoolDisposed,

    #[error("Timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(Duration),

    #[error("Statement compile error: {0}")]
    Compile(#[source] NativeError),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("SQL execution error: {0}")]
    Execution(#[source] NativeError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SqlBridgeError {
    /// The driver diagnostic carried by this error, if any.
    #[must_use]
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Self::Connection(err) | Self::Compile(err) | Self::Execution(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SqlBridgeError {
    fn from(err: serde_json::Error) -> Self {
        SqlBridgeError::Config(format!("invalid JSON configuration: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_error_display_includes_diagnostics() {
        let err = NativeError::new("syntax error near FROM")
            .with_code(42)
            .with_sql_state("42000");
        assert_eq!(
            err.to_string(),
            "syntax error near FROM [SQLSTATE 42000, code 42]"
        );
        assert_eq!(NativeError::new("boom").to_string(), "boom");
    }

    #[test]
    fn wrapped_errors_expose_native_diagnostic() {
        let err = SqlBridgeError::Compile(NativeError::new("no such table: t").with_code(1));
        assert_eq!(err.native().and_then(|n| n.code), Some(1));
        assert!(err.to_string().contains("no such table"));
        assert!(SqlBridgeError::PoolDisposed.native().is_none());
    }
}
