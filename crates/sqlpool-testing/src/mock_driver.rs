//! In-memory mock driver.
//!
//! [`MockDriver`] hands out [`MockConnection`]s that never touch the
//! network. Every driver call is recorded as a [`MockEvent`], and faults
//! can be injected at any point: failed connects, connections that stop
//! answering pings, statements the "server" rejects, failing rollbacks,
//! slow connects and slow closes.
//!
//! Clones of a driver share state, so a test can keep one clone for
//! assertions while the pool owns another.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool::Pool;
//! use sqlpool_testing::MockDriver;
//!
//! let driver = MockDriver::new();
//! let pool = Pool::builder(driver.clone()).min_cached(1).build().await?;
//!
//! let conn = pool.get().await?;
//! driver.kill(conn.id());
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlpool::{
    ConnectOptions, Connection, Connector, Driver, DriverError, ExecuteResult, Row, Session, Value,
};

/// Error code reported for rejected statements.
pub const MOCK_STATEMENT_ERROR: u32 = 1064;

/// A driver call recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// A connection was opened.
    Connect {
        /// Connection id.
        id: u64,
    },
    /// A connection was pinged.
    Ping {
        /// Connection id.
        id: u64,
        /// Whether the ping succeeded.
        ok: bool,
    },
    /// A single statement ran.
    Execute {
        /// Connection id.
        id: u64,
        /// Statement text.
        sql: String,
    },
    /// A statement ran once per parameter row.
    ExecuteMany {
        /// Connection id.
        id: u64,
        /// Statement text.
        sql: String,
        /// Number of parameter rows.
        rows: usize,
    },
    /// A query ran.
    Query {
        /// Connection id.
        id: u64,
        /// Query text.
        sql: String,
    },
    /// A transaction was committed.
    Commit {
        /// Connection id.
        id: u64,
    },
    /// A transaction was rolled back.
    Rollback {
        /// Connection id.
        id: u64,
    },
    /// A connection was closed explicitly.
    Close {
        /// Connection id.
        id: u64,
    },
}

impl MockEvent {
    /// Id of the connection the event happened on.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        match self {
            Self::Connect { id }
            | Self::Ping { id, .. }
            | Self::Execute { id, .. }
            | Self::ExecuteMany { id, .. }
            | Self::Query { id, .. }
            | Self::Commit { id }
            | Self::Rollback { id }
            | Self::Close { id } => *id,
        }
    }
}

#[derive(Clone)]
struct MockResultSet {
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    next_insert_id: u64,
    open: HashSet<u64>,
    dead: HashSet<u64>,
    connect_failures: u32,
    refuse_connections: bool,
    connect_delay: Option<Duration>,
    close_delay: Option<Duration>,
    failing_statements: Vec<String>,
    fail_commits: bool,
    fail_rollbacks: bool,
    results: HashMap<String, MockResultSet>,
    events: Vec<MockEvent>,
    last_options: Option<ConnectOptions>,
}

impl MockState {
    fn record(&mut self, event: MockEvent) {
        self.events.push(event);
    }

    fn rejects(&self, sql: &str) -> bool {
        self.failing_statements.iter().any(|p| sql.contains(p.as_str()))
    }
}

/// A scriptable in-memory driver.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// Create a driver whose connections all succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    /// Refuse (or accept again) every connection attempt.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// Delay every connection attempt.
    pub fn connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    /// Delay every explicit close.
    pub fn close_delay(&self, delay: Duration) {
        self.state.lock().close_delay = Some(delay);
    }

    /// Make connection `id` stop answering: pings and statements fail.
    pub fn kill(&self, id: u64) {
        self.state.lock().dead.insert(id);
    }

    /// Kill every currently open connection.
    pub fn kill_all(&self) {
        let mut state = self.state.lock();
        let open: Vec<u64> = state.open.iter().copied().collect();
        state.dead.extend(open);
    }

    /// Reject every statement whose text contains `pattern`.
    pub fn fail_statements_containing(&self, pattern: impl Into<String>) {
        self.state.lock().failing_statements.push(pattern.into());
    }

    /// Make commits fail.
    pub fn fail_commits(&self, fail: bool) {
        self.state.lock().fail_commits = fail;
    }

    /// Make rollbacks fail.
    pub fn fail_rollbacks(&self, fail: bool) {
        self.state.lock().fail_rollbacks = fail;
    }

    /// Answer the query `sql` with the given rows.
    pub fn with_rows(&self, sql: impl Into<String>, columns: &[&str], rows: Vec<Vec<Value>>) {
        let columns: Arc<[String]> = columns.iter().map(|c| (*c).to_owned()).collect();
        self.state
            .lock()
            .results
            .insert(sql.into(), MockResultSet { columns, rows });
    }

    /// Number of connections opened so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Connect { .. }))
    }

    /// Number of explicit closes so far.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Close { .. }))
    }

    /// Number of connections not yet closed or dropped.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Check if connection `id` is still open.
    #[must_use]
    pub fn is_open(&self, id: u64) -> bool {
        self.state.lock().open.contains(&id)
    }

    /// Every recorded event, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().events.clone()
    }

    /// Events recorded on connection `id`.
    #[must_use]
    pub fn events_for(&self, id: u64) -> Vec<MockEvent> {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| e.connection_id() == id)
            .cloned()
            .collect()
    }

    /// Options passed to the most recent [`Driver::connect`].
    #[must_use]
    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.state.lock().last_options.clone()
    }

    fn count(&self, pred: impl Fn(&MockEvent) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| pred(e)).count()
    }

    async fn open(&self, options: Option<&ConnectOptions>) -> Result<MockConnection, DriverError> {
        let delay = self.state.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(options) = options {
            state.last_options = Some(options.clone());
        }
        if state.refuse_connections {
            return Err(DriverError::Connect("connection refused".into()));
        }
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(DriverError::Connect("connection refused".into()));
        }

        state.next_id += 1;
        let id = state.next_id;
        state.open.insert(id);
        state.record(MockEvent::Connect { id });
        tracing::trace!(connection_id = id, "mock connection opened");

        Ok(MockConnection {
            id,
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}

impl fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockDriver")
            .field("open", &state.open.len())
            .field("dead", &state.dead.len())
            .field("events", &state.events.len())
            .finish()
    }
}

#[async_trait]
impl Connector for MockDriver {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, DriverError> {
        self.open(None).await
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Connection = MockConnection;

    async fn connect(&self, options: &ConnectOptions) -> Result<MockConnection, DriverError> {
        self.open(Some(options)).await
    }
}

/// A connection handed out by [`MockDriver`].
pub struct MockConnection {
    id: u64,
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockConnection {
    /// Driver-assigned connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Fail if the connection is closed or has been killed.
    fn check(&self, state: &MockState) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::ConnectionClosed);
        }
        if state.dead.contains(&self.id) {
            return Err(DriverError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "server has gone away",
            )));
        }
        Ok(())
    }

    fn run(&self, sql: &str, rows: usize, event: MockEvent) -> Result<ExecuteResult, DriverError> {
        let mut state = self.state.lock();
        self.check(&state)?;
        state.record(event);

        if state.rejects(sql) {
            return Err(DriverError::Server {
                code: MOCK_STATEMENT_ERROR,
                message: format!("statement rejected: {sql}"),
            });
        }

        let mut result = ExecuteResult::affected(rows as u64);
        if sql.trim_start().to_ascii_uppercase().starts_with("INSERT") && rows > 0 {
            state.next_insert_id += rows as u64;
            result = result.with_insert_id(state.next_insert_id);
        }
        Ok(result)
    }
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait]
impl Session for MockConnection {
    async fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<ExecuteResult, DriverError> {
        let event = MockEvent::Execute {
            id: self.id,
            sql: sql.to_owned(),
        };
        self.run(sql, 1, event)
    }

    async fn execute_many(
        &mut self,
        sql: &str,
        rows: &[Vec<Value>],
    ) -> Result<ExecuteResult, DriverError> {
        let event = MockEvent::ExecuteMany {
            id: self.id,
            sql: sql.to_owned(),
            rows: rows.len(),
        };
        self.run(sql, rows.len(), event)
    }

    async fn query(&mut self, sql: &str, _params: &[Value]) -> Result<Vec<Row>, DriverError> {
        let mut state = self.state.lock();
        self.check(&state)?;
        state.record(MockEvent::Query {
            id: self.id,
            sql: sql.to_owned(),
        });

        if state.rejects(sql) {
            return Err(DriverError::Server {
                code: MOCK_STATEMENT_ERROR,
                message: format!("statement rejected: {sql}"),
            });
        }

        Ok(state
            .results
            .get(sql)
            .map(|set| {
                set.rows
                    .iter()
                    .map(|values| Row::new(Arc::clone(&set.columns), values.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        self.check(&state)?;
        if state.fail_commits {
            return Err(DriverError::Server {
                code: 1180,
                message: "commit failed".into(),
            });
        }
        state.record(MockEvent::Commit { id: self.id });
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        self.check(&state)?;
        if state.fail_rollbacks {
            return Err(DriverError::Server {
                code: 1181,
                message: "rollback failed".into(),
            });
        }
        state.record(MockEvent::Rollback { id: self.id });
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn ping(&mut self, _reconnect: bool) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        let result = self.check(&state);
        state.record(MockEvent::Ping {
            id: self.id,
            ok: result.is_ok(),
        });
        result
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        let delay = self.state.lock().close_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.closed = true;

        let mut state = self.state.lock();
        state.open.remove(&self.id);
        state.record(MockEvent::Close { id: self.id });
        if state.dead.contains(&self.id) {
            return Err(DriverError::ConnectionClosed);
        }
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.lock().open.remove(&self.id);
    }
}
