//! Connection pool implementation.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::PoolConfig;
use crate::error::{DriverError, PoolError};
use crate::lifecycle::{Connection, ConnectionMetadata, Connector, ExecuteResult, Session};
use crate::value::{Row, Value};

/// A bounded pool of connections to one backing store.
///
/// The pool keeps up to `max_cached` idle connections and never allocates
/// more than `max_connections` at once. Connections are validated lazily:
/// on checkout when `test_on_checkout` is set, and on
/// [`PooledConnection::close`].
///
/// `Pool` is a cheap handle; clones share the same connections.
pub struct Pool<M: Connector> {
    inner: Arc<PoolInner<M>>,
}

impl<M: Connector> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct IdleConnection<C> {
    conn: C,
    meta: ConnectionMetadata,
}

struct PoolInner<M: Connector> {
    connector: M,
    config: PoolConfig,
    // FIFO of connections nobody holds.
    idle: Mutex<VecDeque<IdleConnection<M::Connection>>>,
    // Allocated connections, idle and in use. Never held across an await.
    count: Mutex<u32>,
    // Signalled when a connection is cached or a slot frees up.
    available: Notify,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl<M: Connector> Pool<M> {
    /// Create a pool and open `min_cached` connections up front.
    pub async fn new(connector: M, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            connector,
            config,
            idle: Mutex::new(VecDeque::new()),
            count: Mutex::new(0),
            available: Notify::new(),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });

        for _ in 0..inner.config.prewarm_count() {
            match inner.try_create().await {
                Ok(Some(idle)) => inner.idle.lock().push_back(idle),
                Ok(None) => break,
                Err(e) => {
                    inner.closed.store(true, Ordering::SeqCst);
                    inner.close_idle().await;
                    return Err(e);
                }
            }
        }

        tracing::info!(
            max_connections = inner.config.max_connections,
            min_cached = inner.config.min_cached,
            max_cached = inner.config.max_cached,
            blocking = inner.config.blocking,
            "connection pool ready"
        );

        Ok(Self { inner })
    }

    /// Start building a pool around `connector`.
    pub fn builder(connector: M) -> PoolBuilder<M> {
        PoolBuilder {
            connector,
            config: PoolConfig::default(),
        }
    }

    /// Get a connection from the pool.
    ///
    /// This returns an idle connection if one is cached, otherwise opens a
    /// new one if the pool is below `max_connections`. When the pool is
    /// exhausted a blocking pool waits for a connection to come back (up to
    /// `connection_timeout`); a non-blocking pool fails with
    /// [`PoolError::Exhausted`].
    ///
    /// With `test_on_checkout`, a connection that fails its ping is closed
    /// and replaced once; the caller never receives the dead connection.
    pub async fn get(&self) -> Result<PooledConnection<M>, PoolError> {
        match self.inner.config.connection_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.acquire())
                .await
                .map_err(|_| {
                    tracing::warn!(?timeout, "timed out waiting for a connection");
                    PoolError::AcquisitionTimeout(timeout)
                })?,
            None => self.acquire().await,
        }
    }

    async fn acquire(&self) -> Result<PooledConnection<M>, PoolError> {
        tracing::trace!("acquiring connection from pool");

        let mut conn = self.checkout(true).await?;

        if self.inner.config.test_on_checkout {
            if let Err(error) = conn.probe().await {
                tracing::warn!(
                    connection_id = conn.id(),
                    error = %error,
                    "connection failed validation on checkout, replacing"
                );
                conn.discard().await;
                // The replacement skips the idle cache unless it has to wait.
                conn = self.checkout(false).await?;
            }
        }

        conn.meta.mark_checkout();
        tracing::trace!(connection_id = conn.id(), "connection checked out");
        Ok(conn)
    }

    async fn checkout(&self, mut use_idle: bool) -> Result<PooledConnection<M>, PoolError> {
        let inner = &self.inner;
        loop {
            // Register interest before looking, so a release racing with
            // this pass still wakes us.
            let notified = inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if inner.is_closed() {
                return Err(PoolError::PoolClosed);
            }

            if use_idle {
                if let Some(idle) = inner.pop_idle() {
                    return Ok(PooledConnection::new(idle, Arc::clone(inner)));
                }
            }

            if let Some(idle) = inner.try_create().await? {
                return Ok(PooledConnection::new(idle, Arc::clone(inner)));
            }

            if !inner.config.blocking {
                return Err(PoolError::Exhausted {
                    max: inner.config.max_connections,
                });
            }

            tracing::trace!(
                max_connections = inner.config.max_connections,
                "pool exhausted, waiting for a connection"
            );
            notified.await;
            use_idle = true;
        }
    }

    /// Return a connection without probing it.
    ///
    /// The connection is cached if there is room and closed otherwise. The
    /// connection goes back to the pool it came from.
    pub async fn release(&self, mut conn: PooledConnection<M>) {
        conn.give_back(false).await;
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        // Connections only enter or leave the cache under the idle lock, so
        // holding it keeps `available <= total` while the counter is read.
        let idle = self.inner.idle.lock();
        let total = *self.inner.count.lock();
        let available = u32::try_from(idle.len()).unwrap_or(u32::MAX);
        drop(idle);

        PoolStatus {
            available,
            in_use: total.saturating_sub(available),
            total,
            max: self.inner.config.max_connections,
        }
    }

    /// Close the pool.
    ///
    /// Idle connections are closed now; connections still in use are closed
    /// when they come back. Waiting and future acquisitions fail with
    /// [`PoolError::PoolClosed`].
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.close_idle().await;
        self.inner.available.notify_waiters();
        tracing::info!("connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the connector used to open new connections.
    #[must_use]
    pub fn connector(&self) -> &M {
        &self.inner.connector
    }
}

impl<M: Connector> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<M: Connector> PoolInner<M> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pop_idle(&self) -> Option<IdleConnection<M::Connection>> {
        self.idle.lock().pop_front()
    }

    /// Open a connection if the pool is below `max_connections`.
    async fn try_create(&self) -> Result<Option<IdleConnection<M::Connection>>, PoolError> {
        let Some(slot) = SlotGuard::reserve(self) else {
            return Ok(None);
        };

        let mut conn = self.connector.connect().await.map_err(|error| {
            tracing::warn!(error = %error, "failed to open connection");
            PoolError::ConnectionCreation(error)
        })?;

        if let Err(error) = self.setup_session(&mut conn).await {
            tracing::warn!(error = %error, "session setup failed, closing connection");
            if let Err(error) = conn.close().await {
                tracing::debug!(error = %error, "error closing connection");
            }
            return Err(PoolError::ConnectionCreation(error));
        }
        slot.keep();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id = id, "opened new connection");
        Ok(Some(IdleConnection {
            conn,
            meta: ConnectionMetadata::new(id),
        }))
    }

    async fn setup_session(&self, conn: &mut M::Connection) -> Result<(), DriverError> {
        for statement in &self.config.setsession {
            conn.execute(statement, &[]).await?;
        }
        Ok(())
    }

    /// Cache a returned connection, handing it back if the cache is full or
    /// the pool is closed.
    fn recycle(
        &self,
        conn: M::Connection,
        meta: ConnectionMetadata,
    ) -> Result<(), M::Connection> {
        let mut idle = self.idle.lock();
        if self.is_closed() || idle.len() >= self.config.max_cached as usize {
            return Err(conn);
        }
        idle.push_back(IdleConnection { conn, meta });
        drop(idle);

        self.available.notify_one();
        Ok(())
    }

    /// Give up a connection's slot, then close it.
    async fn discard(&self, conn: M::Connection, id: u64) {
        self.release_slot();
        close_connection(conn, id).await;
    }

    /// Discard from a synchronous context.
    ///
    /// The slot is released before returning. The close runs on the
    /// current runtime if there is one; the connection is dropped in place
    /// otherwise.
    fn discard_detached(&self, conn: M::Connection, id: u64) {
        self.release_slot();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_connection(conn, id));
            }
            Err(_) => {
                drop(conn);
                tracing::debug!(connection_id = id, "no runtime, dropped connection without closing");
            }
        }
    }

    async fn close_idle(&self) {
        let drained: Vec<_> = self.idle.lock().drain(..).collect();
        for idle in drained {
            self.discard(idle.conn, idle.meta.id).await;
        }
    }

    fn release_slot(&self) {
        {
            let mut count = self.count.lock();
            *count = count.saturating_sub(1);
        }
        self.available.notify_one();
    }
}

async fn close_connection<C: Connection>(mut conn: C, id: u64) {
    if let Err(error) = conn.close().await {
        tracing::debug!(connection_id = id, error = %error, "error closing connection");
    }
    tracing::debug!(connection_id = id, "connection closed");
}

/// One unit of `max_connections` capacity.
///
/// Releases the slot on drop unless [`SlotGuard::keep`] hands it to a live
/// connection.
struct SlotGuard<'a, M: Connector> {
    pool: &'a PoolInner<M>,
    armed: bool,
}

impl<'a, M: Connector> SlotGuard<'a, M> {
    fn reserve(pool: &'a PoolInner<M>) -> Option<Self> {
        let mut count = pool.count.lock();
        if *count >= pool.config.max_connections {
            return None;
        }
        *count += 1;
        Some(Self { pool, armed: true })
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl<M: Connector> Drop for SlotGuard<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot();
        }
    }
}

/// Builder for [`Pool`].
pub struct PoolBuilder<M> {
    connector: M,
    config: PoolConfig,
}

impl<M: Connector> PoolBuilder<M> {
    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the number of connections opened up front.
    #[must_use]
    pub fn min_cached(mut self, count: u32) -> Self {
        self.config.min_cached = count;
        self
    }

    /// Set the idle cache capacity.
    #[must_use]
    pub fn max_cached(mut self, count: u32) -> Self {
        self.config.max_cached = count;
        self
    }

    /// Choose between waiting and failing when the pool is exhausted.
    #[must_use]
    pub fn blocking(mut self, enabled: bool) -> Self {
        self.config.blocking = enabled;
        self
    }

    /// Enable or disable pinging connections on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.config.test_on_checkout = enabled;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = Some(timeout);
        self
    }

    /// Set the session setup statements run on every new connection.
    #[must_use]
    pub fn setsession<I, S>(mut self, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config = self.config.setsession(statements);
        self
    }

    /// Build the pool.
    pub async fn build(self) -> Result<Pool<M>, PoolError> {
        Pool::new(self.connector, self.config).await
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Total number of allocated connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

/// A connection retrieved from the pool.
///
/// Forwards the [`Session`] operations to the raw connection. Call
/// [`close`](Self::close) to hand it back; dropping an unreturned handle
/// returns it without a liveness probe.
pub struct PooledConnection<M: Connector> {
    conn: Option<M::Connection>,
    meta: ConnectionMetadata,
    pool: Arc<PoolInner<M>>,
}

impl<M: Connector> PooledConnection<M> {
    fn new(idle: IdleConnection<M::Connection>, pool: Arc<PoolInner<M>>) -> Self {
        Self {
            conn: Some(idle.conn),
            meta: idle.meta,
            pool,
        }
    }

    /// Pool-unique identifier of the underlying connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// Lifecycle metadata of the underlying connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.meta
    }

    /// Check if the connection has already been handed back.
    #[must_use]
    pub fn is_returned(&self) -> bool {
        self.conn.is_none()
    }

    /// Ping the connection without returning it.
    pub async fn ping(&mut self) -> Result<(), PoolError> {
        self.probe().await.map_err(PoolError::ValidationFailed)
    }

    async fn probe(&mut self) -> Result<(), DriverError> {
        self.raw_mut()?.ping(true).await
    }

    /// Return the connection to the pool.
    ///
    /// The connection is pinged first. A connection that fails the ping is
    /// closed and never re-enters the idle cache. Calling `close` again is
    /// a no-op.
    pub async fn close(&mut self) {
        self.give_back(true).await;
    }

    /// Close the connection instead of returning it.
    pub async fn discard(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn, self.meta.id).await;
        }
    }

    /// Take the raw connection out of the pool's accounting.
    ///
    /// The pool frees the slot immediately; closing the connection is now
    /// the caller's job. Returns `None` if the handle was already returned.
    pub fn detach(mut self) -> Option<M::Connection> {
        let conn = self.conn.take()?;
        self.pool.release_slot();
        tracing::debug!(connection_id = self.meta.id, "connection detached from pool");
        Some(conn)
    }

    async fn give_back(&mut self, probe: bool) {
        let id = self.meta.id;

        if probe {
            let Some(conn) = self.conn.as_mut() else {
                return;
            };
            if let Err(error) = conn.ping(true).await {
                tracing::warn!(
                    connection_id = id,
                    error = %error,
                    "connection failed validation on return, closing"
                );
                self.discard().await;
                return;
            }
        }

        let Some(conn) = self.conn.take() else {
            return;
        };
        self.meta.mark_checkin();

        match self.pool.recycle(conn, self.meta.clone()) {
            Ok(()) => tracing::trace!(connection_id = id, "connection returned to pool"),
            Err(conn) => {
                tracing::debug!(connection_id = id, "idle cache full, closing returned connection");
                self.pool.discard(conn, id).await;
            }
        }
    }

    fn raw_mut(&mut self) -> Result<&mut M::Connection, DriverError> {
        self.conn.as_mut().ok_or(DriverError::ConnectionClosed)
    }
}

#[async_trait]
impl<M: Connector> Session for PooledConnection<M> {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DriverError> {
        self.raw_mut()?.execute(sql, params).await
    }

    async fn execute_many(
        &mut self,
        sql: &str,
        rows: &[Vec<Value>],
    ) -> Result<ExecuteResult, DriverError> {
        self.raw_mut()?.execute_many(sql, rows).await
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.raw_mut()?.query(sql, params).await
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.raw_mut()?.commit().await
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.raw_mut()?.rollback().await
    }
}

impl<M: Connector> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("meta", &self.meta)
            .field("returned", &self.is_returned())
            .finish()
    }
}

impl<M: Connector> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let id = self.meta.id;
        self.meta.mark_checkin();
        tracing::trace!(connection_id = id, "returning dropped connection to pool");

        if let Err(conn) = self.pool.recycle(conn, self.meta.clone()) {
            self.pool.discard_detached(conn, id);
        }
    }
}
