use std::fmt;

use tracing::warn;

use crate::bridge::TypeBridge;
use crate::error::SqlBridgeError;
use crate::native::RowCursor;
use crate::types::{DbType, Value};

/// Forward-only reader over the rows of one query.
///
/// Values are converted to portable [`Value`]s through the [`TypeBridge`]
/// using the column type reported by the driver.
pub struct DataReader {
    cursor: Box<dyn RowCursor>,
    on_row: bool,
    closed: bool,
}

impl fmt::Debug for DataReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataReader")
            .field("field_count", &self.cursor.column_count())
            .field("on_row", &self.on_row)
            .field("closed", &self.closed)
            .finish()
    }
}

impl DataReader {
    pub(crate) fn new(cursor: Box<dyn RowCursor>) -> Self {
        Self {
            cursor,
            on_row: false,
            closed: false,
        }
    }

    /// Advance to the next row. Returns `false` once rows are exhausted.
    ///
    /// # Errors
    /// `InvalidState` after [`DataReader::close`]; `Execution` if fetching fails.
    pub fn read(&mut self) -> Result<bool, SqlBridgeError> {
        self.ensure_open()?;
        self.on_row = self.cursor.next().map_err(SqlBridgeError::Execution)?;
        Ok(self.on_row)
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.cursor.column_count()
    }

    #[must_use]
    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.cursor.column_name(index)
    }

    /// Index of the column called `name`, compared case-insensitively.
    #[must_use]
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        (0..self.field_count()).find(|&i| {
            self.cursor
                .column_name(i)
                .is_some_and(|column| column.eq_ignore_ascii_case(name))
        })
    }

    /// Portable type of a column.
    ///
    /// # Errors
    /// `InvalidState` for an unknown column; `UnsupportedType` if the native
    /// type has no portable mapping.
    pub fn column_type(&self, index: usize) -> Result<DbType, SqlBridgeError> {
        let code = self
            .cursor
            .column_type(index)
            .ok_or_else(|| no_column(index))?;
        TypeBridge::global().to_portable(code)
    }

    /// Value of column `index` in the current row.
    ///
    /// # Errors
    /// `InvalidState` without a current row; `Execution` if the driver cannot
    /// read the value; `UnsupportedType` if it cannot be converted.
    pub fn get(&self, index: usize) -> Result<Value, SqlBridgeError> {
        self.ensure_on_row()?;
        if index >= self.field_count() {
            return Err(no_column(index));
        }
        let native = self.cursor.value(index).map_err(SqlBridgeError::Execution)?;
        let code = self
            .cursor
            .column_type(index)
            .unwrap_or_else(|| native.type_code());
        TypeBridge::global().value_to_portable(code, native)
    }

    /// # Errors
    /// `InvalidState` if no column is called `name`; otherwise as [`DataReader::get`].
    pub fn get_by_name(&self, name: &str) -> Result<Value, SqlBridgeError> {
        let index = self
            .ordinal(name)
            .ok_or_else(|| SqlBridgeError::InvalidState(format!("no column named {name}")))?;
        self.get(index)
    }

    /// # Errors
    /// As [`DataReader::get`].
    pub fn is_null(&self, index: usize) -> Result<bool, SqlBridgeError> {
        self.ensure_on_row()?;
        let native = self.cursor.value(index).map_err(SqlBridgeError::Execution)?;
        Ok(native.is_null())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the cursor. Closing twice is a no-op.
    ///
    /// # Errors
    /// `Execution` if the driver fails to release the cursor.
    pub fn close(&mut self) -> Result<(), SqlBridgeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.on_row = false;
        self.cursor.close().map_err(SqlBridgeError::Execution)
    }

    fn ensure_open(&self) -> Result<(), SqlBridgeError> {
        if self.closed {
            Err(SqlBridgeError::InvalidState("reader is closed".into()))
        } else {
            Ok(())
        }
    }

    fn ensure_on_row(&self) -> Result<(), SqlBridgeError> {
        self.ensure_open()?;
        if self.on_row {
            Ok(())
        } else {
            Err(SqlBridgeError::InvalidState("reader is not positioned on a row".into()))
        }
    }
}

fn no_column(index: usize) -> SqlBridgeError {
    SqlBridgeError::InvalidState(format!("column index {index} is out of range"))
}

impl Drop for DataReader {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close data reader");
        }
    }
}
