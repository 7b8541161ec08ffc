//! Driver-facing traits and connection lifecycle metadata.
//!
//! The pool never speaks a wire protocol itself. A driver supplies
//! already-connected sessions through [`Connector`], and the pool manages
//! them through the [`Connection`] trait: a liveness probe, a close, and
//! the [`Session`] surface that consumers use while they hold a
//! connection.

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::error::DriverError;
use crate::value::{Row, Value};

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteResult {
    /// Number of rows the statement affected.
    pub rows_affected: u64,
    /// Identifier generated by the last insert, if the store reports one.
    pub last_insert_id: Option<u64>,
}

impl ExecuteResult {
    /// Create a result with no generated identifier.
    #[must_use]
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            last_insert_id: None,
        }
    }

    /// Attach the identifier generated by an insert.
    #[must_use]
    pub fn with_insert_id(mut self, id: u64) -> Self {
        self.last_insert_id = Some(id);
        self
    }
}

/// Operations a consumer performs on a connection it holds.
///
/// Implemented by raw driver connections and, by forwarding, by
/// [`PooledConnection`](crate::PooledConnection).
#[async_trait]
pub trait Session: Send {
    /// Execute a single statement.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DriverError>;

    /// Execute one statement once per parameter row.
    async fn execute_many(
        &mut self,
        sql: &str,
        rows: &[Vec<Value>],
    ) -> Result<ExecuteResult, DriverError>;

    /// Run a query and collect its full result set.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<(), DriverError>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<(), DriverError>;

    /// Open a cursor that remembers the outcome of its last statement.
    fn cursor(&mut self) -> Cursor<'_, Self>
    where
        Self: Sized,
    {
        Cursor::new(self)
    }
}

/// A raw, live connection to the backing store.
#[async_trait]
pub trait Connection: Session + 'static {
    /// Check the connection is alive.
    ///
    /// With `reconnect` set, drivers that support it may transparently
    /// re-establish a dropped session before answering.
    async fn ping(&mut self, reconnect: bool) -> Result<(), DriverError>;

    /// Close the connection. Further use is an error.
    async fn close(&mut self) -> Result<(), DriverError>;
}

/// Creates raw connections for a pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Connection: Connection;

    /// Open a new connection to the backing store.
    async fn connect(&self) -> Result<Self::Connection, DriverError>;
}

/// A driver that opens connections from [`ConnectOptions`].
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Connection type produced by this driver.
    type Connection: Connection;

    /// Open a connection using the given options.
    async fn connect(&self, options: &ConnectOptions) -> Result<Self::Connection, DriverError>;
}

/// Default character set requested on connect.
pub const DEFAULT_CHARSET: &str = "utf8mb4";

/// Coordinates and credentials of a backing store.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database (schema) to select.
    pub database: String,
    /// Character set for the session.
    pub charset: String,
}

impl ConnectOptions {
    /// Create options for `host:port` with empty credentials.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            charset: DEFAULT_CHARSET.to_owned(),
        }
    }

    /// Set the user name and password.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the database to select.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the session character set.
    #[must_use]
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("charset", &self.charset)
            .finish()
    }
}

/// Binds a [`Driver`] to fixed options so it can feed a pool.
#[derive(Debug, Clone)]
pub struct DriverConnector<D> {
    driver: D,
    options: ConnectOptions,
}

impl<D: Driver> DriverConnector<D> {
    /// Create a connector that opens connections with `options`.
    pub fn new(driver: D, options: ConnectOptions) -> Self {
        Self { driver, options }
    }

    /// Options used for every new connection.
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// The wrapped driver.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }
}

#[async_trait]
impl<D: Driver> Connector for DriverConnector<D> {
    type Connection = D::Connection;

    async fn connect(&self) -> Result<Self::Connection, DriverError> {
        self.driver.connect(&self.options).await
    }
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-unique identifier for this connection.
    pub id: u64,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last checked out or returned.
    pub last_used_at: Instant,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
}

impl ConnectionMetadata {
    /// Create metadata for a new connection.
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
        }
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
    }

    /// Mark the connection as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
    }
}
