//! Testing utilities
//!
//! An in-memory [`MockDatabase`] that hands out [`Connection`]s through a
//! [`MockConnectionFactory`], records every call, keeps committed statements
//! apart from rolled-back ones, and injects failures on demand.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_insert::testing::{Fault, MockDatabase};
//!
//! let db = MockDatabase::new().with_columns(["id", "name"]);
//! db.fail_next_executes(1, Fault::ConnectionLost);
//!
//! let engine = Engine::configure(EngineConfig::new("app", "users"), db.factory()).await?;
//! engine.process_batch(vec![Record::new().with("id", 1_i64)]).await?;
//!
//! assert_eq!(db.connect_count(), 2);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Injected failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Session dies; the connection stays dead afterwards
    ConnectionLost,
    /// Statement fails, session survives
    Execution,
    /// Unique/foreign-key violation, session survives
    Constraint,
}

impl Fault {
    fn to_error(self) -> Error {
        match self {
            Self::ConnectionLost => Error::connection_lost("mock: connection reset by peer"),
            Self::Execution => Error::execution("mock: statement failed"),
            Self::Constraint => Error::Constraint {
                constraint_name: "mock_pkey".into(),
                message: "duplicate key value violates unique constraint".into(),
            },
        }
    }
}

/// A call observed by the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// Factory connect (successful or not)
    Connect,
    /// Row query
    Query {
        /// Statement text
        sql: String,
    },
    /// Statement execution
    Execute {
        /// Statement text
        sql: String,
        /// Bound parameters
        params: Vec<Value>,
    },
    /// BEGIN
    Begin,
    /// COMMIT
    Commit,
    /// ROLLBACK
    Rollback,
    /// Connection close
    Close,
}

/// An executed INSERT
#[derive(Debug, Clone, PartialEq)]
pub struct MockStatement {
    /// Statement text
    pub sql: String,
    /// Bound parameters
    pub params: Vec<Value>,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    columns: Vec<String>,
    committed: Vec<MockStatement>,
    execute_calls: usize,
    failing_connects: usize,
    next_execute_faults: VecDeque<Fault>,
    execute_faults_at: HashMap<usize, Fault>,
    always_execute_fault: Option<Fault>,
    next_commit_faults: VecDeque<Fault>,
    query_fault: Option<Fault>,
    sessions: Vec<Arc<AtomicBool>>,
}

impl MockState {
    fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn execute_fault(&mut self) -> Option<Fault> {
        let index = self.execute_calls;
        self.execute_calls += 1;
        if let Some(fault) = self.execute_faults_at.remove(&index) {
            return Some(fault);
        }
        if let Some(fault) = self.next_execute_faults.pop_front() {
            return Some(fault);
        }
        self.always_execute_fault
    }
}

/// Shared in-memory database state
#[derive(Debug, Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<MockState>>,
}

impl MockDatabase {
    /// Create an empty database without a column set
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns reported for the target table by introspection
    pub fn with_columns<S: Into<String>>(self, columns: impl IntoIterator<Item = S>) -> Self {
        self.state.lock().columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Connection factory backed by this database
    pub fn factory(&self) -> Arc<MockConnectionFactory> {
        Arc::new(MockConnectionFactory { db: self.clone() })
    }

    /// Fail the next `n` connect attempts with a lost connection
    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().failing_connects = n;
    }

    /// Fail the next `n` executions
    pub fn fail_next_executes(&self, n: usize, fault: Fault) {
        let mut state = self.state.lock();
        state.next_execute_faults.extend(std::iter::repeat(fault).take(n));
    }

    /// Fail the execution with 0-based position `call` (counted across all connections)
    pub fn fail_execute_at(&self, call: usize, fault: Fault) {
        self.state.lock().execute_faults_at.insert(call, fault);
    }

    /// Fail every execution
    pub fn fail_all_executes(&self, fault: Fault) {
        self.state.lock().always_execute_fault = Some(fault);
    }

    /// Fail the next `n` commits
    pub fn fail_next_commits(&self, n: usize, fault: Fault) {
        let mut state = self.state.lock();
        state.next_commit_faults.extend(std::iter::repeat(fault).take(n));
    }

    /// Fail every row query
    pub fn fail_queries(&self, fault: Fault) {
        self.state.lock().query_fault = Some(fault);
    }

    /// Kill every open session as if the server had terminated it
    pub fn drop_sessions(&self) {
        for alive in &self.state.lock().sessions {
            alive.store(false, Ordering::SeqCst);
        }
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Factory connect calls (successful or not)
    pub fn connect_count(&self) -> usize {
        self.state.lock().count(|c| matches!(c, MockCall::Connect))
    }

    /// Execute calls
    pub fn execute_count(&self) -> usize {
        self.state.lock().count(|c| matches!(c, MockCall::Execute { .. }))
    }

    /// BEGIN calls
    pub fn begin_count(&self) -> usize {
        self.state.lock().count(|c| matches!(c, MockCall::Begin))
    }

    /// COMMIT calls (successful or not)
    pub fn commit_count(&self) -> usize {
        self.state.lock().count(|c| matches!(c, MockCall::Commit))
    }

    /// ROLLBACK calls
    pub fn rollback_count(&self) -> usize {
        self.state.lock().count(|c| matches!(c, MockCall::Rollback))
    }

    /// Close calls
    pub fn close_count(&self) -> usize {
        self.state.lock().count(|c| matches!(c, MockCall::Close))
    }

    /// SQL text of every executed statement
    pub fn executed_sql(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Execute { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Statements that were committed
    pub fn committed(&self) -> Vec<MockStatement> {
        self.state.lock().committed.clone()
    }

    fn record(&self, call: MockCall) {
        self.state.lock().calls.push(call);
    }
}

/// Connection factory over a [`MockDatabase`]
#[derive(Debug, Clone)]
pub struct MockConnectionFactory {
    db: MockDatabase,
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut state = self.db.state.lock();
        state.calls.push(MockCall::Connect);
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(Error::connection_lost("mock: connection refused"));
        }
        let alive = Arc::new(AtomicBool::new(true));
        state.sessions.push(Arc::clone(&alive));
        drop(state);

        Ok(Box::new(MockConnection {
            db: self.db.clone(),
            alive,
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}

/// One mock session
#[derive(Debug)]
pub struct MockConnection {
    db: MockDatabase,
    alive: Arc<AtomicBool>,
}

fn check_alive(alive: &AtomicBool) -> Result<()> {
    if alive.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(Error::connection_lost("mock: connection is closed"))
    }
}

fn fail(alive: &AtomicBool, fault: Fault) -> Error {
    if fault == Fault::ConnectionLost {
        alive.store(false, Ordering::SeqCst);
    }
    fault.to_error()
}

fn run_execute(db: &MockDatabase, alive: &AtomicBool, sql: &str, params: &[Value]) -> Result<u64> {
    check_alive(alive)?;
    let mut state = db.state.lock();
    state.calls.push(MockCall::Execute {
        sql: sql.to_string(),
        params: params.to_vec(),
    });
    match state.execute_fault() {
        Some(fault) => Err(fail(alive, fault)),
        None => Ok(1),
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        check_alive(&self.alive)?;
        let (fault, columns) = {
            let mut state = self.db.state.lock();
            state.calls.push(MockCall::Query {
                sql: sql.to_string(),
            });
            (state.query_fault, state.columns.clone())
        };
        if let Some(fault) = fault {
            return Err(fail(&self.alive, fault));
        }

        Ok(columns
            .into_iter()
            .map(|c| Row::new(vec!["column_name".into()], vec![Value::String(c)]))
            .collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let affected = run_execute(&self.db, &self.alive, sql, params)?;
        self.db.state.lock().committed.push(MockStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(affected)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        check_alive(&self.alive)?;
        self.db.record(MockCall::Begin);
        Ok(Box::new(MockTransaction {
            db: self.db.clone(),
            alive: Arc::clone(&self.alive),
            pending: Mutex::new(Vec::new()),
        }))
    }

    async fn is_valid(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.db.record(MockCall::Close);
        Ok(())
    }
}

/// Transaction on a [`MockConnection`]; statements become visible on commit
#[derive(Debug)]
pub struct MockTransaction {
    db: MockDatabase,
    alive: Arc<AtomicBool>,
    pending: Mutex<Vec<MockStatement>>,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let affected = run_execute(&self.db, &self.alive, sql, params)?;
        self.pending.lock().push(MockStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(affected)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        check_alive(&self.alive)?;
        let mut state = self.db.state.lock();
        state.calls.push(MockCall::Commit);
        if let Some(fault) = state.next_commit_faults.pop_front() {
            return Err(fail(&self.alive, fault));
        }
        let pending = std::mem::take(&mut *self.pending.lock());
        state.committed.extend(pending);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        check_alive(&self.alive)?;
        self.db.record(MockCall::Rollback);
        self.pending.lock().clear();
        Ok(())
    }
}
