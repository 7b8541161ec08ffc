//! Connection manager.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use sqlpool::{
    ConnectOptions, Connector, Driver, DriverConnector, DriverError, Pool, PoolStatus,
    PooledConnection, Row, Session, Value,
};
use tokio::time::Instant;

use crate::config::StoreConfig;
use crate::error::{ManagerError, Operation};

/// Connection handed out by a [`ConnectionManager`].
pub type ManagedConnection<D> = PooledConnection<DriverConnector<D>>;

/// Owns the pool for one backing store and runs statements against it.
///
/// Build one manager per store at startup and share it (it is `Send` and
/// `Sync`; wrap it in an `Arc`). Every helper borrows a connection for the
/// duration of the call and returns it on every exit path.
///
/// Besides the pool's per-checkout ping, the manager enforces a coarse
/// lifetime: if more than `connection_lifetime` has passed since the last
/// acquisition, the next borrowed connection is closed and replaced
/// before use.
pub struct ConnectionManager<D: Driver> {
    pool: Pool<DriverConnector<D>>,
    connection_lifetime: Duration,
    last_acquired: Mutex<Option<Instant>>,
}

impl<D: Driver> ConnectionManager<D> {
    /// Validate `config`, build the pool and open its initial connections.
    pub async fn connect(driver: D, config: &StoreConfig) -> Result<Self, ManagerError> {
        config.validate()?;

        let options = config.connect_options();
        tracing::info!(
            host = %options.host,
            port = options.port,
            database = %options.database,
            "connecting to backing store"
        );

        let pool = Pool::new(DriverConnector::new(driver, options), config.pool_config()).await?;
        Ok(Self::from_pool(pool, config.connection_lifetime()))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool<DriverConnector<D>>, connection_lifetime: Duration) -> Self {
        Self {
            pool,
            connection_lifetime,
            last_acquired: Mutex::new(None),
        }
    }

    /// Borrow a connection, refreshing it if the lifetime has elapsed.
    ///
    /// Use this for multi-statement work; call
    /// [`close`](PooledConnection::close) when done.
    pub async fn get(&self) -> Result<ManagedConnection<D>, ManagerError> {
        let mut conn = self.pool.get().await?;

        if self.mark_acquired() {
            tracing::debug!(
                connection_id = conn.id(),
                lifetime = ?self.connection_lifetime,
                "connection lifetime elapsed, refreshing"
            );
            conn.discard().await;
            conn = self.pool.get().await?;
        }

        Ok(conn)
    }

    /// Record an acquisition, reporting whether the previous one is older
    /// than the connection lifetime.
    fn mark_acquired(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last_acquired.lock();
        let stale = last.is_some_and(|at| now.duration_since(at) > self.connection_lifetime);
        *last = Some(now);
        stale
    }

    /// Run a single write statement and commit it.
    ///
    /// Returns the identifier generated by the insert, if any.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<Option<u64>, ManagerError> {
        let mut conn = self.get().await?;
        let result = {
            let mut cursor = conn.cursor();
            cursor.execute(sql, params).await.map(|_| cursor.last_insert_id())
        };
        finish(conn, Operation::Execute, sql, result).await
    }

    /// Run one write statement for every parameter row and commit.
    ///
    /// Returns the identifier generated by the last insert, if any.
    pub async fn execute_many(
        &self,
        sql: &str,
        rows: &[Vec<Value>],
    ) -> Result<Option<u64>, ManagerError> {
        let mut conn = self.get().await?;
        let result = {
            let mut cursor = conn.cursor();
            cursor.execute_many(sql, rows).await.map(|_| cursor.last_insert_id())
        };
        finish(conn, Operation::ExecuteMany, sql, result).await
    }

    /// Run a query and return its full result set.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ManagerError> {
        let mut conn = self.get().await?;
        let result = conn.cursor().fetch_all(sql, params).await;
        finish(conn, Operation::Query, sql, result).await
    }

    /// Options used to open connections.
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        self.pool.connector().options()
    }

    /// Store host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.options().host
    }

    /// Store port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.options().port
    }

    /// User name connections authenticate as.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.options().user
    }

    /// Selected database.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.options().database
    }

    /// Lifetime after which a borrowed connection is refreshed.
    #[must_use]
    pub fn connection_lifetime(&self) -> Duration {
        self.connection_lifetime
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<DriverConnector<D>> {
        &self.pool
    }

    /// Current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl<D: Driver> fmt::Debug for ConnectionManager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("options", self.options())
            .field("connection_lifetime", &self.connection_lifetime)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Commit or roll back, then hand the connection back.
async fn finish<M: Connector, T>(
    mut conn: PooledConnection<M>,
    operation: Operation,
    sql: &str,
    result: Result<T, DriverError>,
) -> Result<T, ManagerError> {
    let result = match result {
        Ok(value) => conn.commit().await.map(|()| value),
        Err(e) => Err(e),
    };

    let outcome = match result {
        Ok(value) => Ok(value),
        Err(source) => {
            if let Err(error) = conn.rollback().await {
                tracing::warn!(%operation, error = %error, "rollback failed");
            }
            tracing::warn!(%operation, error = %source, "statement failed");
            Err(ManagerError::Statement {
                operation,
                sql: sql.to_owned(),
                source,
            })
        }
    };

    conn.close().await;
    outcome
}
