//! # sqlpool-manager
//!
//! A configured connection manager for one backing store.
//!
//! [`ConnectionManager`] reads a [`StoreConfig`] once, owns the
//! [`sqlpool::Pool`] for that store, and runs statements through short-lived
//! borrowed connections: every helper commits on success, rolls back on
//! failure, and returns the connection to the pool before it returns.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sqlpool_manager::{ConnectionManager, StoreConfig};
//!
//! let config = StoreConfig::for_profile("/etc/tutor")?;
//! let manager = Arc::new(ConnectionManager::connect(driver, &config).await?);
//!
//! let id = manager
//!     .execute("INSERT INTO hints (question_id, text) VALUES (?, ?)", &[7.into(), "Try halves".into()])
//!     .await?;
//! let rows = manager.query("SELECT text FROM hints WHERE question_id = ?", &[7.into()]).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod manager;

pub use config::{HOST_OVERRIDE_ENV, PoolSection, StoreConfig, StoreSection};
pub use error::{ConfigError, ManagerError, Operation};
pub use manager::{ConnectionManager, ManagedConnection};
