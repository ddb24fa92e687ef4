//! Backing store abstraction.
//!
//! The identity map never talks to a database driver directly. Everything it
//! needs from the SQL engine goes through [`BackingStore`]: statements use
//! positional `?` placeholders and [`Value`] parameters.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// Outcome of a data-modifying statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecuteResult {
    /// Rows changed by the statement
    pub rows_affected: u64,
    /// Row id assigned by the last INSERT on this connection
    pub last_insert_id: i64,
}

/// Synchronous access to the storage engine.
pub trait BackingStore {
    /// Run a statement that returns rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement that modifies data.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult>;

    /// Run the same statement once per parameter set.
    fn execute_many(&self, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64> {
        let mut total = 0;
        for params in param_sets {
            total += self.execute(sql, params)?.rows_affected;
        }
        Ok(total)
    }

    /// Make previous statements durable.
    ///
    /// Stores running in autocommit mode may treat this as a no-op.
    fn commit(&self) -> Result<()>;

    /// Discard statements since the last commit.
    fn rollback(&self) -> Result<()>;

    /// Column names of `table`, or `None` if the table does not exist.
    fn table_columns(&self, table: &str) -> Result<Option<Vec<String>>>;
}

impl<S: BackingStore + ?Sized> BackingStore for &S {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        (**self).execute(sql, params)
    }

    fn execute_many(&self, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64> {
        (**self).execute_many(sql, param_sets)
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<()> {
        (**self).rollback()
    }

    fn table_columns(&self, table: &str) -> Result<Option<Vec<String>>> {
        (**self).table_columns(table)
    }
}
