//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::command::{CancelHandle, Command};
pub use crate::connection::{Connection, ConnectionState, Transaction};
pub use crate::error::{NativeError, SqlBridgeError};
pub use crate::native::{Credentials, Driver};
pub use crate::parameter::{Parameter, ParameterCollection};
pub use crate::pool::{ConnectionPool, PoolOptions, PoolStatus};
pub use crate::reader::DataReader;
pub use crate::template_cache::{TemplateCache, TemplateCacheOptions};
pub use crate::types::{DbType, IsolationLevel, Value};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteDriver;
