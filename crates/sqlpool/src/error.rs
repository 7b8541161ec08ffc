//! Pool and driver error types.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by a backing-store driver.
///
/// Drivers map their native failures onto these variants so the pool can
/// tell a dead connection apart from a rejected statement.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// Connecting to the backing store failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Authentication was rejected at connect time.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The connection is closed or was already returned to its pool.
    #[error("connection closed")]
    ConnectionClosed,

    /// The backing store rejected a statement.
    #[error("server error {code}: {message}")]
    Server {
        /// Store-specific error code.
        code: u32,
        /// Error message reported by the store.
        message: String,
    },

    /// IO error on the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::ConnectionClosed | Self::Io(_))
    }

    /// Check if this is a server error with a specific code.
    #[must_use]
    pub fn is_server_error(&self, code: u32) -> bool {
        matches!(self, Self::Server { code: c, .. } if *c == code)
    }
}

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Failed to acquire a connection within the timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Connection creation failed.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(#[source] DriverError),

    /// Every connection is in use and the pool does not block.
    #[error("pool exhausted: all {max} connections are in use")]
    Exhausted {
        /// Maximum allowed connections.
        max: u32,
    },

    /// Connection validation failed.
    #[error("connection validation failed: {0}")]
    ValidationFailed(#[source] DriverError),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if the caller may reasonably retry after backing off.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Exhausted { .. } | Self::AcquisitionTimeout(_) => true,
            Self::ConnectionCreation(e) => e.is_transient(),
            _ => false,
        }
    }
}
