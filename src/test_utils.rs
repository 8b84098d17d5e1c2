//! Scripted in-process driver for exercising pools and commands without a database.
//!
//! Every [`MockDriver`] clone shares one state, so a test keeps a clone to
//! script results and read call counters after handing the driver to a pool
//! or connection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::NativeError;
use crate::native::{
    Credentials, Driver, NativeConnection, NativeStatement, RowCursor, StatementCanceller,
};
use crate::types::{NativeTypeCode, NativeValue};

/// Call counters recorded by a [`MockDriver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub connects: usize,
    /// `clear_session_state` calls.
    pub clears: usize,
    /// Physical connection closes.
    pub closes: usize,
    pub prepares: usize,
    pub binds: usize,
    /// `clear_parameters` calls.
    pub param_clears: usize,
    pub statement_closes: usize,
    pub queries: usize,
    pub updates: usize,
    pub cancels: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

type Columns = Vec<(String, NativeTypeCode)>;
type Bound = (usize, NativeValue, Option<NativeTypeCode>);

#[derive(Default)]
struct MockState {
    stats: MockStats,
    fail_connect: Option<String>,
    fail_prepare: Option<String>,
    fail_clear: Option<String>,
    fail_execute: Option<String>,
    results: VecDeque<(Columns, Vec<Vec<NativeValue>>)>,
    update_counts: VecDeque<u64>,
    binds: Vec<Bound>,
    last_prepared_sql: Option<String>,
    last_user: Option<String>,
    last_isolation: Option<i32>,
    last_timeout: Option<u32>,
    executions: Vec<usize>,
}

type SharedState = Arc<Mutex<MockState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Clone, Default)]
pub struct MockDriver {
    state: SharedState,
}

impl std::fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDriver")
            .field("stats", &self.stats())
            .finish()
    }
}

impl MockDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stats(&self) -> MockStats {
        lock(&self.state).stats
    }

    pub fn fail_next_connect(&self, message: &str) {
        lock(&self.state).fail_connect = Some(message.to_string());
    }

    pub fn fail_next_prepare(&self, message: &str) {
        lock(&self.state).fail_prepare = Some(message.to_string());
    }

    pub fn fail_next_clear(&self, message: &str) {
        lock(&self.state).fail_clear = Some(message.to_string());
    }

    pub fn fail_next_execute(&self, message: &str) {
        lock(&self.state).fail_execute = Some(message.to_string());
    }

    /// Queue the result of the next `execute_query`. Unscripted queries return no rows.
    pub fn push_rows(&self, columns: Columns, rows: Vec<Vec<NativeValue>>) {
        lock(&self.state).results.push_back((columns, rows));
    }

    /// Queue the affected count of the next `execute_update`. Defaults to 1.
    pub fn push_update_count(&self, count: u64) {
        lock(&self.state).update_counts.push_back(count);
    }

    /// Every bind so far, in call order.
    #[must_use]
    pub fn bound_values(&self) -> Vec<Bound> {
        lock(&self.state).binds.clone()
    }

    #[must_use]
    pub fn last_prepared_sql(&self) -> Option<String> {
        lock(&self.state).last_prepared_sql.clone()
    }

    #[must_use]
    pub fn last_user(&self) -> Option<String> {
        lock(&self.state).last_user.clone()
    }

    #[must_use]
    pub fn last_isolation(&self) -> Option<i32> {
        lock(&self.state).last_isolation
    }

    #[must_use]
    pub fn last_timeout(&self) -> Option<u32> {
        lock(&self.state).last_timeout
    }

    /// Physical connection (numbered from 1 in connect order) behind each
    /// statement execution, in call order.
    #[must_use]
    pub fn executions(&self) -> Vec<usize> {
        lock(&self.state).executions.clone()
    }
}

impl Driver for MockDriver {
    fn connect(
        &self,
        _connection_string: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn NativeConnection>, NativeError> {
        let mut state = lock(&self.state);
        if let Some(message) = state.fail_connect.take() {
            return Err(NativeError::new(message).with_code(-1));
        }
        state.stats.connects += 1;
        state.last_user = credentials.map(|c| c.user.clone());
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            id: state.stats.connects,
        }))
    }
}

struct MockConnection {
    state: SharedState,
    id: usize,
}

impl NativeConnection for MockConnection {
    fn prepare_statement(&mut self, sql: &str) -> Result<Box<dyn NativeStatement>, NativeError> {
        let mut state = lock(&self.state);
        if let Some(message) = state.fail_prepare.take() {
            return Err(NativeError::new(message).with_sql_state("42000"));
        }
        state.stats.prepares += 1;
        state.last_prepared_sql = Some(sql.to_string());
        Ok(Box::new(MockStatement {
            state: Arc::clone(&self.state),
            connection: self.id,
        }))
    }

    fn clear_session_state(&mut self) -> Result<(), NativeError> {
        let mut state = lock(&self.state);
        state.stats.clears += 1;
        match state.fail_clear.take() {
            Some(message) => Err(NativeError::new(message)),
            None => Ok(()),
        }
    }

    fn set_transaction_isolation(&mut self, level: i32) -> Result<(), NativeError> {
        lock(&self.state).last_isolation = Some(level);
        Ok(())
    }

    fn set_auto_commit(&mut self, _auto_commit: bool) -> Result<(), NativeError> {
        Ok(())
    }

    fn commit(&mut self) -> Result<(), NativeError> {
        lock(&self.state).stats.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), NativeError> {
        lock(&self.state).stats.rollbacks += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), NativeError> {
        lock(&self.state).stats.closes += 1;
        Ok(())
    }
}

struct MockStatement {
    state: SharedState,
    connection: usize,
}

impl MockStatement {
    fn check_execute(&self, state: &mut MockState) -> Result<(), NativeError> {
        if let Some(message) = state.fail_execute.take() {
            return Err(NativeError::new(message));
        }
        state.executions.push(self.connection);
        Ok(())
    }
}

impl NativeStatement for MockStatement {
    fn bind(
        &mut self,
        ordinal: usize,
        value: NativeValue,
        type_code: Option<NativeTypeCode>,
    ) -> Result<(), NativeError> {
        let mut state = lock(&self.state);
        state.stats.binds += 1;
        state.binds.push((ordinal, value, type_code));
        Ok(())
    }

    fn clear_parameters(&mut self) -> Result<(), NativeError> {
        lock(&self.state).stats.param_clears += 1;
        Ok(())
    }

    fn set_query_timeout(&mut self, seconds: u32) -> Result<(), NativeError> {
        lock(&self.state).last_timeout = Some(seconds);
        Ok(())
    }

    fn execute_query(&mut self) -> Result<Box<dyn RowCursor>, NativeError> {
        let mut state = lock(&self.state);
        self.check_execute(&mut state)?;
        state.stats.queries += 1;
        let (columns, rows) = state.results.pop_front().unwrap_or_default();
        Ok(Box::new(MockCursor::new(columns, rows)))
    }

    fn execute_update(&mut self) -> Result<u64, NativeError> {
        let mut state = lock(&self.state);
        self.check_execute(&mut state)?;
        state.stats.updates += 1;
        Ok(state.update_counts.pop_front().unwrap_or(1))
    }

    fn canceller(&self) -> Arc<dyn StatementCanceller> {
        Arc::new(MockCanceller {
            state: Arc::clone(&self.state),
        })
    }

    fn close(&mut self) -> Result<(), NativeError> {
        lock(&self.state).stats.statement_closes += 1;
        Ok(())
    }
}

struct MockCanceller {
    state: SharedState,
}

impl StatementCanceller for MockCanceller {
    fn cancel(&self) -> Result<(), NativeError> {
        lock(&self.state).stats.cancels += 1;
        Ok(())
    }
}

/// In-memory [`RowCursor`] over fixed rows.
#[derive(Debug, Clone)]
pub struct MockCursor {
    columns: Columns,
    rows: VecDeque<Vec<NativeValue>>,
    current: Option<Vec<NativeValue>>,
}

impl MockCursor {
    #[must_use]
    pub fn new(columns: Columns, rows: Vec<Vec<NativeValue>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
            current: None,
        }
    }
}

impl RowCursor for MockCursor {
    fn next(&mut self) -> Result<bool, NativeError> {
        self.current = self.rows.pop_front();
        Ok(self.current.is_some())
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|(name, _)| name.as_str())
    }

    fn column_type(&self, index: usize) -> Option<NativeTypeCode> {
        self.columns.get(index).map(|(_, code)| *code)
    }

    fn value(&self, index: usize) -> Result<NativeValue, NativeError> {
        self.current
            .as_ref()
            .and_then(|row| row.get(index))
            .cloned()
            .ok_or_else(|| NativeError::new(format!("no value at column {index}")))
    }

    fn close(&mut self) -> Result<(), NativeError> {
        self.rows.clear();
        self.current = None;
        Ok(())
    }
}
