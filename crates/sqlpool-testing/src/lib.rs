//! # sqlpool-testing
//!
//! Test infrastructure for the sqlpool crates.
//!
//! This crate provides an in-memory driver that implements both
//! [`sqlpool::Connector`] and [`sqlpool::Driver`], so pools and managers can
//! be exercised without a database server.
//!
//! ## Features
//!
//! - Event log of every connect, ping, statement, commit, rollback and close
//! - Fault injection: refused connects, dead connections, rejected
//!   statements, failing commits and rollbacks
//! - Scripted result sets for queries
//! - Optional connect and close latency for timeout and wake-up tests

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_driver;

pub use mock_driver::{MOCK_STATEMENT_ERROR, MockConnection, MockDriver, MockEvent};
