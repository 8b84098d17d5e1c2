//! Connection/command/parameter/reader layer over statement-oriented SQL drivers.
//!
//! The crate sits on top of a [`native::Driver`] and provides:
//! - a bounded [`ConnectionPool`] with blocking acquire and decaying idle eviction;
//! - [`Command`]s that rewrite `@name` placeholders to positional `?` once per
//!   distinct SQL text, cache the rewrite process-wide, and reuse the native
//!   prepared statement across executions;
//! - a [`TypeBridge`] between portable [`DbType`]s and native type codes.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sql_bridge::prelude::*;
//!
//! # fn main() -> Result<(), SqlBridgeError> {
//! let pool = ConnectionPool::new(Arc::new(SqliteDriver::new()), "app.db", PoolOptions::default());
//! let conn = pool.create_connection();
//! conn.open()?;
//!
//! let mut cmd = conn.create_command("SELECT name FROM users WHERE id = @id");
//! cmd.parameters_mut().add_with_value("id", 7i64);
//! let name = cmd.execute_scalar()?;
//! # let _ = name;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod command;
pub mod connection;
pub mod error;
pub mod native;
pub mod parameter;
pub mod pool;
pub mod prelude;
pub mod reader;
pub mod template;
pub mod template_cache;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use bridge::TypeBridge;
pub use command::{CancelHandle, Command};
pub use connection::{Connection, ConnectionState, Transaction};
pub use error::{NativeError, SqlBridgeError};
pub use parameter::{Parameter, ParameterCollection};
pub use pool::{ConnectionPool, PoolOptions, PoolOptionsBuilder, PoolStatus, PooledNative};
pub use reader::DataReader;
pub use template::StatementTemplate;
pub use template_cache::{CacheStats, TemplateCache, TemplateCacheOptions};
pub use types::{DbType, IsolationLevel, NativeTypeCode, NativeValue, Value};
