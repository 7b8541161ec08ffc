//! Statement cursor.

use crate::error::DriverError;
use crate::lifecycle::{ExecuteResult, Session};
use crate::value::{Row, Value};

/// Runs statements on a borrowed session and remembers the outcome of
/// the last one.
///
/// The cursor holds the session mutably, so drop it before committing.
pub struct Cursor<'a, S: ?Sized> {
    session: &'a mut S,
    last: ExecuteResult,
}

impl<'a, S: Session + ?Sized> Cursor<'a, S> {
    pub(crate) fn new(session: &'a mut S) -> Self {
        Self {
            session,
            last: ExecuteResult::default(),
        }
    }

    /// Execute a single statement, returning the number of affected rows.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        self.last = self.session.execute(sql, params).await?;
        Ok(self.last.rows_affected)
    }

    /// Execute one statement for each parameter row.
    pub async fn execute_many(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<u64, DriverError> {
        self.last = self.session.execute_many(sql, rows).await?;
        Ok(self.last.rows_affected)
    }

    /// Run a query and fetch every row.
    pub async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        let rows = self.session.query(sql, params).await?;
        self.last = ExecuteResult::affected(rows.len() as u64);
        Ok(rows)
    }

    /// Identifier generated by the last insert run through this cursor.
    #[must_use]
    pub fn last_insert_id(&self) -> Option<u64> {
        self.last.last_insert_id
    }

    /// Rows affected (or fetched) by the last statement.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.last.rows_affected
    }
}
