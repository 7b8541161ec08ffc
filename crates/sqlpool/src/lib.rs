//! # sqlpool
//!
//! A bounded, thread-safe pool of database connections.
//!
//! The pool does not speak any wire protocol. A driver hands it
//! already-connected sessions through the [`Connector`] trait, and the pool
//! takes care of reuse, admission control and lazy health validation.
//!
//! ## Features
//!
//! - Hard cap on allocated connections (`max_connections`)
//! - Pre-warmed idle connections (`min_cached`) and a bounded idle cache
//!   (`max_cached`)
//! - Blocking or fail-fast acquisition when the pool is exhausted, with an
//!   optional acquisition timeout
//! - Ping on checkout, with a single transparent replacement of dead
//!   connections
//! - Ping on return: dead connections never re-enter the idle cache
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool::{Pool, Session};
//!
//! let pool = Pool::builder(connector)
//!     .max_connections(15)
//!     .min_cached(2)
//!     .max_cached(5)
//!     .build()
//!     .await?;
//!
//! let mut conn = pool.get().await?;
//! conn.execute("UPDATE lessons SET seen = 1 WHERE id = ?", &[7.into()]).await?;
//! conn.commit().await?;
//! conn.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod cursor;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod value;

pub use config::PoolConfig;
pub use cursor::Cursor;
pub use error::{DriverError, PoolError};
pub use lifecycle::{
    ConnectOptions, Connection, ConnectionMetadata, Connector, Driver, DriverConnector,
    ExecuteResult, Session,
};
pub use pool::{Pool, PoolBuilder, PoolStatus, PooledConnection};
pub use value::{Row, Value};
