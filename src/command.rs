//! Parameterised SQL command over a [`Connection`].
//!
//! A command keeps at most one native prepared statement. Executing the same
//! text again only clears and rebinds parameters; changing the text or the
//! connection drops the statement and the next execute prepares afresh.

use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::bridge::TypeBridge;
use crate::connection::Connection;
use crate::error::SqlBridgeError;
use crate::native::{NativeStatement, RowCursor, StatementCanceller};
use crate::parameter::ParameterCollection;
use crate::reader::DataReader;
use crate::template::{PlaceholderMode, StatementTemplate, is_update_statement};
use crate::template_cache::TemplateCache;
use crate::types::Value;

/// Timeout reported while none has been set explicitly.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u32 = 30;

enum PreparedState {
    Unprepared,
    Prepared {
        template: Arc<StatementTemplate>,
        names: Vec<Option<String>>,
        statement: Box<dyn NativeStatement>,
        generation: u64,
    },
}

/// Cancels the statement of a command from another thread.
#[derive(Clone)]
pub struct CancelHandle {
    canceller: Arc<dyn StatementCanceller>,
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}

impl CancelHandle {
    /// Ask the driver to abort the running execution. Best effort.
    ///
    /// # Errors
    /// `Execution` with whatever the driver reports, including "already finished".
    pub fn cancel(&self) -> Result<(), SqlBridgeError> {
        self.canceller.cancel().map_err(SqlBridgeError::Execution)
    }
}

pub struct Command<'c> {
    connection: Option<&'c Connection>,
    sql: String,
    parameters: ParameterCollection,
    timeout: Option<u32>,
    timeout_pending: bool,
    disable_named_parameters: bool,
    cache: Arc<TemplateCache>,
    state: PreparedState,
}

impl fmt::Debug for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("sql", &self.sql)
            .field("parameters", &self.parameters)
            .field("timeout", &self.timeout())
            .field("disable_named_parameters", &self.disable_named_parameters)
            .field("prepared", &self.is_prepared())
            .finish()
    }
}

impl Default for Command<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'c> Command<'c> {
    /// Detached command with no text and no connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connection: None,
            sql: String::new(),
            parameters: ParameterCollection::new(),
            timeout: None,
            timeout_pending: false,
            disable_named_parameters: false,
            cache: TemplateCache::global(),
            state: PreparedState::Unprepared,
        }
    }

    pub fn with_connection(connection: &'c Connection, sql: impl Into<String>) -> Self {
        let mut command = Self::new();
        command.connection = Some(connection);
        command.sql = sql.into();
        command
    }

    /// Resolve templates through `cache` instead of the process-wide one.
    #[must_use]
    pub fn with_template_cache(mut self, cache: Arc<TemplateCache>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Replace the command text; a different text drops the prepared statement.
    pub fn set_sql(&mut self, sql: impl Into<String>) {
        let sql = sql.into();
        if let PreparedState::Prepared { template, .. } = &self.state
            && template.source_sql() != sql
        {
            self.unprepare();
        }
        self.sql = sql;
    }

    #[must_use]
    pub fn connection(&self) -> Option<&'c Connection> {
        self.connection
    }

    pub fn set_connection(&mut self, connection: Option<&'c Connection>) {
        let same = match (self.connection, connection) {
            (Some(a), Some(b)) => std::ptr::eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !same {
            self.unprepare();
            self.connection = connection;
        }
    }

    #[must_use]
    pub fn parameters(&self) -> &ParameterCollection {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterCollection {
        &mut self.parameters
    }

    /// Query timeout in seconds.
    #[must_use]
    pub fn timeout(&self) -> u32 {
        self.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS)
    }

    /// Set the query timeout. Applied to the native statement on the next prepare.
    pub fn set_timeout(&mut self, seconds: u32) {
        self.timeout = Some(seconds);
        self.timeout_pending = true;
    }

    #[must_use]
    pub fn disable_named_parameters(&self) -> bool {
        self.disable_named_parameters
    }

    /// Treat `@` as literal text and bind `?` placeholders by position only.
    pub fn set_disable_named_parameters(&mut self, disable: bool) {
        if self.disable_named_parameters != disable {
            self.disable_named_parameters = disable;
            self.unprepare();
        }
    }

    #[must_use]
    pub fn is_prepared(&self) -> bool {
        match &self.state {
            PreparedState::Prepared { generation, .. } => {
                self.current_generation() == Some(*generation)
            }
            PreparedState::Unprepared => false,
        }
    }

    /// The template behind the prepared statement, if any.
    #[must_use]
    pub fn template(&self) -> Option<&Arc<StatementTemplate>> {
        match &self.state {
            PreparedState::Prepared { template, .. } => Some(template),
            PreparedState::Unprepared => None,
        }
    }

    /// Make the native statement ready and bind the current parameter values.
    ///
    /// # Errors
    /// - `InvalidState` without an open connection or command text
    /// - `MissingParameter` if a placeholder has no parameter (before any native call)
    /// - `Compile` if the driver rejects the SQL
    /// - `UnsupportedType` / `Execution` if a parameter cannot be bound
    pub fn prepare(&mut self) -> Result<(), SqlBridgeError> {
        let connection = self.check_connection()?;
        if self.sql.is_empty() {
            return Err(SqlBridgeError::InvalidState("command text must be set".into()));
        }
        let generation = connection.open_generation().ok_or_else(not_open)?;
        self.forget_stale_statement(generation);

        let reusable = match &self.state {
            PreparedState::Prepared { template, names, .. } => {
                template.source_sql() == self.sql
                    && (template.mode() == PlaceholderMode::Positional
                        || *names == self.parameters.names())
            }
            PreparedState::Unprepared => false,
        };

        if !reusable {
            self.unprepare();
            let template = self.cache.resolve(
                &self.sql,
                !self.disable_named_parameters,
                &self.parameters,
            )?;
            self.check_slots(&template)?;

            let prepared = connection.with_native(|native| {
                native
                    .prepare_statement(template.rewritten_sql())
                    .map_err(SqlBridgeError::Compile)
            });
            let mut statement = match prepared {
                Ok(statement) => statement,
                Err(err) => {
                    if matches!(err, SqlBridgeError::Compile(_)) {
                        self.cache.invalidate(
                            &self.sql,
                            !self.disable_named_parameters,
                            &self.parameters,
                        );
                    }
                    return Err(err);
                }
            };
            if let Some(seconds) = self.timeout {
                if let Err(err) = statement.set_query_timeout(seconds) {
                    close_statement(statement.as_mut());
                    return Err(SqlBridgeError::Execution(err));
                }
            }
            self.timeout_pending = false;
            self.state = PreparedState::Prepared {
                template,
                names: self.parameters.names(),
                statement,
                generation,
            };
        }

        let PreparedState::Prepared {
            template,
            statement,
            ..
        } = &mut self.state
        else {
            return Err(SqlBridgeError::InvalidState("command is not prepared".into()));
        };

        if reusable {
            trace!(sql = template.source_sql(), "reusing prepared statement");
            statement
                .clear_parameters()
                .map_err(SqlBridgeError::Execution)?;
            if self.timeout_pending {
                if let Some(seconds) = self.timeout {
                    statement
                        .set_query_timeout(seconds)
                        .map_err(SqlBridgeError::Execution)?;
                }
                self.timeout_pending = false;
            }
        }

        for (slot, &index) in template.slot_to_param_index().iter().enumerate() {
            let param = self
                .parameters
                .get_mut(index)
                .ok_or_else(|| missing_slot(index))?;
            param.bind_to(slot + 1, statement.as_mut())?;
        }
        Ok(())
    }

    /// Execute and return a reader, or `None` when the text looks like a
    /// single `INSERT`/`UPDATE`, which is executed as an update instead.
    ///
    /// The classification is a prefix heuristic: `UPDATE ... RETURNING` and
    /// multi-statement batches are not recognised.
    ///
    /// # Errors
    /// As [`Command::prepare`], plus `Execution` if the driver fails.
    pub fn execute_reader(&mut self) -> Result<Option<DataReader>, SqlBridgeError> {
        self.prepare()?;
        let update = is_update_statement(&self.sql);
        let statement = self.statement_mut()?;
        if update {
            statement
                .execute_update()
                .map_err(SqlBridgeError::Execution)?;
            return Ok(None);
        }
        let cursor = statement
            .execute_query()
            .map_err(SqlBridgeError::Execution)?;
        Ok(Some(DataReader::new(cursor)))
    }

    /// Execute as an update and return the affected row count.
    ///
    /// # Errors
    /// As [`Command::prepare`], plus `Execution` if the driver fails.
    pub fn execute_non_query(&mut self) -> Result<u64, SqlBridgeError> {
        self.prepare()?;
        self.statement_mut()?
            .execute_update()
            .map_err(SqlBridgeError::Execution)
    }

    /// First column of the first row, or [`Value::Null`] when the value is
    /// NULL or there is no row.
    ///
    /// # Errors
    /// As [`Command::prepare`], plus `Execution` if the driver fails and
    /// `UnsupportedType` if the value has no portable form.
    pub fn execute_scalar(&mut self) -> Result<Value, SqlBridgeError> {
        self.prepare()?;
        let mut cursor = self
            .statement_mut()?
            .execute_query()
            .map_err(SqlBridgeError::Execution)?;

        let result = first_value(cursor.as_mut());
        let closed = cursor.close().map_err(SqlBridgeError::Execution);
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Ask the driver to abort the running statement. Does nothing if the
    /// command was never prepared.
    ///
    /// # Errors
    /// `InvalidState` without an open connection; `Execution` with whatever
    /// the driver reports.
    pub fn cancel(&self) -> Result<(), SqlBridgeError> {
        self.check_connection()?;
        match self.cancel_handle() {
            Some(handle) => handle.cancel(),
            None => Ok(()),
        }
    }

    /// Handle for cancelling the prepared statement from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        let current = self.current_generation();
        match &self.state {
            PreparedState::Prepared {
                statement,
                generation,
                ..
            } if current == Some(*generation) => Some(CancelHandle {
                canceller: statement.canceller(),
            }),
            _ => None,
        }
    }

    /// Release the native statement. The command can be prepared again.
    pub fn unprepare(&mut self) {
        let current = self.current_generation();
        if let PreparedState::Prepared {
            mut statement,
            generation,
            ..
        } = std::mem::replace(&mut self.state, PreparedState::Unprepared)
            && current == Some(generation)
        {
            close_statement(statement.as_mut());
        }
    }

    fn current_generation(&self) -> Option<u64> {
        self.connection.and_then(Connection::open_generation)
    }

    /// Drop a statement prepared before the connection was last reopened
    /// without calling into it: its physical connection is closed or now
    /// serves another logical connection.
    fn forget_stale_statement(&mut self, generation: u64) {
        if let PreparedState::Prepared {
            generation: prepared,
            ..
        } = &self.state
            && *prepared != generation
        {
            trace!(sql = %self.sql, "discarding statement from an earlier open");
            self.state = PreparedState::Unprepared;
        }
    }

    fn check_connection(&self) -> Result<&'c Connection, SqlBridgeError> {
        let connection = self
            .connection
            .ok_or_else(|| SqlBridgeError::InvalidState("connection must be set".into()))?;
        if !connection.is_open() {
            return Err(not_open());
        }
        Ok(connection)
    }

    fn check_slots(&self, template: &StatementTemplate) -> Result<(), SqlBridgeError> {
        match template
            .slot_to_param_index()
            .iter()
            .find(|&&index| index >= self.parameters.len())
        {
            Some(&index) => Err(missing_slot(index)),
            None => Ok(()),
        }
    }

    fn statement_mut(&mut self) -> Result<&mut dyn NativeStatement, SqlBridgeError> {
        match &mut self.state {
            PreparedState::Prepared { statement, .. } => Ok(statement.as_mut()),
            PreparedState::Unprepared => {
                Err(SqlBridgeError::InvalidState("command is not prepared".into()))
            }
        }
    }
}

impl Drop for Command<'_> {
    fn drop(&mut self) {
        self.unprepare();
    }
}

fn first_value(cursor: &mut dyn RowCursor) -> Result<Value, SqlBridgeError> {
    if !cursor.next().map_err(SqlBridgeError::Execution)? {
        return Ok(Value::Null);
    }
    let native = cursor.value(0).map_err(SqlBridgeError::Execution)?;
    if native.is_null() {
        return Ok(Value::Null);
    }
    let code = cursor.column_type(0).unwrap_or_else(|| native.type_code());
    TypeBridge::global().value_to_portable(code, native)
}

fn not_open() -> SqlBridgeError {
    SqlBridgeError::InvalidState("connection must be opened first".into())
}

fn missing_slot(index: usize) -> SqlBridgeError {
    SqlBridgeError::MissingParameter(format!("no parameter at position {}", index + 1))
}

fn close_statement(statement: &mut dyn NativeStatement) {
    if let Err(err) = statement.close() {
        warn!(error = %err, "failed to close prepared statement");
    }
}
