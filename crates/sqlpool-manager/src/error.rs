//! Manager error types.

use std::fmt;
use std::path::PathBuf;

use sqlpool::{DriverError, PoolError};
use thiserror::Error;

/// Statement helper that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Single-statement write.
    Execute,
    /// One statement over many parameter rows.
    ExecuteMany,
    /// Read query.
    Query,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Execute => "execute",
            Self::ExecuteMany => "batch execute",
            Self::Query => "query",
        })
    }
}

/// Errors loading store configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for a store.
    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors returned by [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManagerError {
    /// No usable connection could be obtained.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A statement failed. The transaction was rolled back where possible.
    #[error("{operation} failed: {source}")]
    Statement {
        /// Helper that ran the statement.
        operation: Operation,
        /// Statement text.
        sql: String,
        /// Driver error.
        #[source]
        source: DriverError,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ManagerError {
    /// Check if retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Pool(e) => e.is_retryable(),
            Self::Statement { source, .. } => source.is_transient(),
            Self::Config(_) => false,
        }
    }

    /// Statement text, if a statement failed.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Statement { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_error_display() {
        let err = ManagerError::Statement {
            operation: Operation::ExecuteMany,
            sql: "INSERT INTO answers VALUES (?)".into(),
            source: DriverError::Server {
                code: 1062,
                message: "Duplicate entry".into(),
            },
        };

        assert_eq!(
            err.to_string(),
            "batch execute failed: server error 1062: Duplicate entry"
        );
        assert_eq!(err.sql(), Some("INSERT INTO answers VALUES (?)"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_pool_error_is_transparent() {
        let err = ManagerError::from(PoolError::Exhausted { max: 2 });
        assert_eq!(err.to_string(), "pool exhausted: all 2 connections are in use");
        assert!(err.is_retryable());
        assert!(err.sql().is_none());
    }
}
