//! Embedded SQLite backend built on `rusqlite`.
//!
//! The connection string is the database path; `:memory:` (or an empty
//! string) opens a private in-memory database. Credentials are ignored.
//! Statements share the connection through a mutex and are re-fetched from
//! rusqlite's statement cache on each execution, so a prepared statement
//! never borrows the connection.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::Value as SqliteValue;
use rusqlite::{InterruptHandle, params_from_iter};
use tracing::{debug, trace};

use crate::error::NativeError;
use crate::native::{
    Credentials, Driver, NativeConnection, NativeStatement, RowCursor, StatementCanceller,
};
use crate::types::{NativeTypeCode, NativeValue};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

type Shared = Arc<Mutex<rusqlite::Connection>>;

fn native_error(err: rusqlite::Error) -> NativeError {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let text = message.unwrap_or_else(|| failure.to_string());
            NativeError::new(text).with_code(failure.extended_code)
        }
        // Prepare-time syntax errors; `bundled` enables the variant.
        rusqlite::Error::SqlInputError { error, msg, .. } => {
            NativeError::new(msg).with_code(error.extended_code)
        }
        other => NativeError::new(other.to_string()),
    }
}

fn closed() -> NativeError {
    NativeError::new("sqlite connection is closed")
}

fn lock(conn: &Shared) -> MutexGuard<'_, rusqlite::Connection> {
    match conn.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// [`Driver`] for SQLite database files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Driver for SqliteDriver {
    fn connect(
        &self,
        connection_string: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn NativeConnection>, NativeError> {
        if credentials.is_some() {
            trace!("sqlite ignores credentials");
        }
        let conn = if connection_string.is_empty() || connection_string == ":memory:" {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(connection_string)
        }
        .map_err(native_error)?;
        debug!(path = connection_string, "opened sqlite connection");

        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Box::new(SqliteConnection {
            conn: Some(Arc::new(Mutex::new(conn))),
            interrupt,
            auto_commit: true,
        }))
    }
}

struct SqliteConnection {
    conn: Option<Shared>,
    interrupt: Arc<InterruptHandle>,
    auto_commit: bool,
}

impl SqliteConnection {
    fn shared(&self) -> Result<&Shared, NativeError> {
        self.conn.as_ref().ok_or_else(closed)
    }

    fn batch(&self, sql: &str) -> Result<(), NativeError> {
        lock(self.shared()?).execute_batch(sql).map_err(native_error)
    }

    fn in_transaction(&self) -> Result<bool, NativeError> {
        Ok(!lock(self.shared()?).is_autocommit())
    }

    /// End the current transaction and, in manual-commit mode, open the next one.
    fn finish(&mut self, verb: &str) -> Result<(), NativeError> {
        if self.in_transaction()? {
            self.batch(verb)?;
        }
        if !self.auto_commit {
            self.batch("BEGIN")?;
        }
        Ok(())
    }
}

impl NativeConnection for SqliteConnection {
    fn prepare_statement(&mut self, sql: &str) -> Result<Box<dyn NativeStatement>, NativeError> {
        let shared = self.shared()?;
        {
            let conn = lock(shared);
            // Compile once now so syntax errors surface at prepare time.
            conn.prepare_cached(sql).map_err(native_error)?;
        }
        Ok(Box::new(SqliteStatement {
            conn: Arc::clone(shared),
            sql: sql.to_string(),
            params: Vec::new(),
            canceller: Arc::new(SqliteCanceller {
                interrupt: Arc::clone(&self.interrupt),
            }),
        }))
    }

    fn clear_session_state(&mut self) -> Result<(), NativeError> {
        self.shared().map(|_| ())
    }

    fn set_transaction_isolation(&mut self, level: i32) -> Result<(), NativeError> {
        let read_uncommitted = i32::from(level == 1);
        self.batch(&format!("PRAGMA read_uncommitted = {read_uncommitted}"))
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), NativeError> {
        if self.auto_commit == auto_commit {
            return Ok(());
        }
        self.auto_commit = auto_commit;
        match (auto_commit, self.in_transaction()?) {
            (false, false) => self.batch("BEGIN"),
            (true, true) => self.batch("COMMIT"),
            _ => Ok(()),
        }
    }

    fn commit(&mut self) -> Result<(), NativeError> {
        self.finish("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), NativeError> {
        self.finish("ROLLBACK")
    }

    fn close(&mut self) -> Result<(), NativeError> {
        let Some(shared) = self.conn.take() else {
            return Ok(());
        };
        match Arc::try_unwrap(shared) {
            Ok(mutex) => {
                let conn = match mutex.into_inner() {
                    Ok(conn) => conn,
                    Err(poisoned) => poisoned.into_inner(),
                };
                conn.close().map_err(|(_, err)| native_error(err))
            }
            // Statements still hold it; it closes when the last one is dropped.
            Err(_) => Ok(()),
        }
    }
}

struct SqliteCanceller {
    interrupt: Arc<InterruptHandle>,
}

impl StatementCanceller for SqliteCanceller {
    fn cancel(&self) -> Result<(), NativeError> {
        self.interrupt.interrupt();
        Ok(())
    }
}

struct SqliteStatement {
    conn: Shared,
    sql: String,
    params: Vec<SqliteValue>,
    canceller: Arc<SqliteCanceller>,
}

impl NativeStatement for SqliteStatement {
    fn bind(
        &mut self,
        ordinal: usize,
        value: NativeValue,
        _type_code: Option<NativeTypeCode>,
    ) -> Result<(), NativeError> {
        if ordinal == 0 {
            return Err(NativeError::new("parameter ordinals start at 1"));
        }
        if self.params.len() < ordinal {
            self.params.resize(ordinal, SqliteValue::Null);
        }
        self.params[ordinal - 1] = to_sqlite(value);
        Ok(())
    }

    fn clear_parameters(&mut self) -> Result<(), NativeError> {
        self.params.clear();
        Ok(())
    }

    fn set_query_timeout(&mut self, seconds: u32) -> Result<(), NativeError> {
        trace!(seconds, "sqlite has no per-statement timeout; use cancel instead");
        Ok(())
    }

    fn execute_query(&mut self) -> Result<Box<dyn RowCursor>, NativeError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare_cached(&self.sql).map_err(native_error)?;
        let columns: Vec<(String, Option<String>)> = stmt
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().map(str::to_string)))
            .collect();

        let mut rows = stmt
            .query(params_from_iter(self.params.iter()))
            .map_err(native_error)?;
        let mut data = Vec::new();
        while let Some(row) = rows.next().map_err(native_error)? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let value: SqliteValue = row.get(i).map_err(native_error)?;
                values.push(value);
            }
            data.push(values);
        }

        let types = columns
            .iter()
            .enumerate()
            .map(|(i, (_, decl))| column_code(decl.as_deref(), &data, i))
            .collect();
        let names = columns.into_iter().map(|(name, _)| name).collect();
        Ok(Box::new(SqliteCursor::new(names, types, data)))
    }

    fn execute_update(&mut self) -> Result<u64, NativeError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare_cached(&self.sql).map_err(native_error)?;
        let changed = stmt
            .execute(params_from_iter(self.params.iter()))
            .map_err(native_error)?;
        Ok(changed as u64)
    }

    fn canceller(&self) -> Arc<dyn StatementCanceller> {
        self.canceller.clone()
    }

    fn close(&mut self) -> Result<(), NativeError> {
        self.params.clear();
        Ok(())
    }
}

fn to_sqlite(value: NativeValue) -> SqliteValue {
    match value {
        NativeValue::Null => SqliteValue::Null,
        NativeValue::Boolean(v) => SqliteValue::Integer(i64::from(v)),
        NativeValue::TinyInt(v) => SqliteValue::Integer(i64::from(v)),
        NativeValue::SmallInt(v) => SqliteValue::Integer(i64::from(v)),
        NativeValue::Integer(v) => SqliteValue::Integer(i64::from(v)),
        NativeValue::BigInt(v) => SqliteValue::Integer(v),
        NativeValue::Real(v) => SqliteValue::Real(f64::from(v)),
        NativeValue::Double(v) => SqliteValue::Real(v),
        NativeValue::Decimal(v) => SqliteValue::Text(v.to_string()),
        NativeValue::Text(v) => SqliteValue::Text(v),
        NativeValue::Bytes(v) => SqliteValue::Blob(v),
        NativeValue::Date(v) => SqliteValue::Text(v.format(DATE_FORMAT).to_string()),
        NativeValue::Time(v) => SqliteValue::Text(v.format(TIME_FORMAT).to_string()),
        NativeValue::Timestamp(v) => SqliteValue::Text(v.format(TIMESTAMP_FORMAT).to_string()),
    }
}

/// Native type of a column from its declared type, falling back to the
/// storage class of the first non-null value.
fn column_code(decl: Option<&str>, rows: &[Vec<SqliteValue>], index: usize) -> NativeTypeCode {
    if let Some(decl) = decl {
        let decl = decl.to_ascii_uppercase();
        let code = if decl.contains("BOOL") {
            NativeTypeCode::BOOLEAN
        } else if decl.contains("INT") {
            NativeTypeCode::BIGINT
        } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
            NativeTypeCode::VARCHAR
        } else if decl.contains("BLOB") {
            NativeTypeCode::BINARY
        } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") {
            NativeTypeCode::DOUBLE
        } else if decl.contains("DEC") || decl.contains("NUMERIC") {
            NativeTypeCode::DECIMAL
        } else if decl.contains("TIMESTAMP") || decl.contains("DATETIME") {
            NativeTypeCode::TIMESTAMP
        } else if decl.contains("DATE") {
            NativeTypeCode::DATE
        } else if decl.contains("TIME") {
            NativeTypeCode::TIME
        } else {
            NativeTypeCode::JAVA_OBJECT
        };
        return code;
    }

    rows.iter()
        .map(|row| &row[index])
        .find(|v| !matches!(v, SqliteValue::Null))
        .map_or(NativeTypeCode::JAVA_OBJECT, |v| match v {
            SqliteValue::Integer(_) => NativeTypeCode::BIGINT,
            SqliteValue::Real(_) => NativeTypeCode::DOUBLE,
            SqliteValue::Text(_) => NativeTypeCode::VARCHAR,
            SqliteValue::Blob(_) => NativeTypeCode::BINARY,
            SqliteValue::Null => NativeTypeCode::JAVA_OBJECT,
        })
}

/// Rows materialised at execute time.
struct SqliteCursor {
    names: Vec<String>,
    types: Vec<NativeTypeCode>,
    rows: std::vec::IntoIter<Vec<SqliteValue>>,
    current: Option<Vec<SqliteValue>>,
}

impl SqliteCursor {
    fn new(names: Vec<String>, types: Vec<NativeTypeCode>, rows: Vec<Vec<SqliteValue>>) -> Self {
        Self {
            names,
            types,
            rows: rows.into_iter(),
            current: None,
        }
    }
}

impl RowCursor for SqliteCursor {
    fn next(&mut self) -> Result<bool, NativeError> {
        self.current = self.rows.next();
        Ok(self.current.is_some())
    }

    fn column_count(&self) -> usize {
        self.names.len()
    }

    fn column_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    fn column_type(&self, index: usize) -> Option<NativeTypeCode> {
        self.types.get(index).copied()
    }

    fn value(&self, index: usize) -> Result<NativeValue, NativeError> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| NativeError::new("no current row"))?;
        let value = row
            .get(index)
            .ok_or_else(|| NativeError::new(format!("column index {index} out of range")))?;
        let code = self.types.get(index).copied().unwrap_or(NativeTypeCode::JAVA_OBJECT);
        from_sqlite(value, code)
    }

    fn close(&mut self) -> Result<(), NativeError> {
        self.current = None;
        self.rows = Vec::new().into_iter();
        Ok(())
    }
}

/// Shape a stored value to the native type its column reports.
fn from_sqlite(value: &SqliteValue, code: NativeTypeCode) -> Result<NativeValue, NativeError> {
    let mismatch = || NativeError::new(format!("cannot read {value:?} as native type {code}"));
    Ok(match (value, code) {
        (SqliteValue::Null, _) => NativeValue::Null,
        (SqliteValue::Integer(v), NativeTypeCode::BOOLEAN) => NativeValue::Boolean(*v != 0),
        (SqliteValue::Integer(v), NativeTypeCode::DOUBLE) => NativeValue::Double(*v as f64),
        (SqliteValue::Integer(v), NativeTypeCode::DECIMAL) => {
            NativeValue::Decimal(rust_decimal::Decimal::from(*v))
        }
        (SqliteValue::Integer(v), NativeTypeCode::VARCHAR) => NativeValue::Text(v.to_string()),
        (SqliteValue::Integer(v), _) => NativeValue::BigInt(*v),
        (SqliteValue::Real(v), NativeTypeCode::DECIMAL) => {
            NativeValue::Decimal(rust_decimal::Decimal::try_from(*v).map_err(|_| mismatch())?)
        }
        (SqliteValue::Real(v), NativeTypeCode::VARCHAR) => NativeValue::Text(v.to_string()),
        (SqliteValue::Real(v), _) => NativeValue::Double(*v),
        (SqliteValue::Text(s), NativeTypeCode::DATE) => {
            NativeValue::Date(NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| mismatch())?)
        }
        (SqliteValue::Text(s), NativeTypeCode::TIME) => {
            NativeValue::Time(NaiveTime::parse_from_str(s, TIME_FORMAT).map_err(|_| mismatch())?)
        }
        (SqliteValue::Text(s), NativeTypeCode::TIMESTAMP) => NativeValue::Timestamp(
            NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).map_err(|_| mismatch())?,
        ),
        (SqliteValue::Text(s), NativeTypeCode::DECIMAL) => {
            NativeValue::Decimal(s.parse().map_err(|_| mismatch())?)
        }
        (SqliteValue::Text(s), _) => NativeValue::Text(s.clone()),
        (SqliteValue::Blob(b), _) => NativeValue::Bytes(b.clone()),
    })
}
