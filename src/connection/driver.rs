//! Connector seam

use crate::config::PoolConfig;
use crate::Result;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

/// One result row, column name to value, in column order
pub type Row = serde_json::Map<String, Value>;

/// Rows returned by a statement
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Returned rows
    pub rows: Vec<Row>,
    /// Rows returned or affected
    pub row_count: u64,
}

impl QueryResult {
    /// Result from rows alone; `row_count` is the number of rows
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let row_count = rows.len() as u64;
        Self { rows, row_count }
    }

    /// First row, if any
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

/// A live connection owned by the pool
pub trait DriverConnection: Send {
    /// Execute `sql` with positional `params` (`$1`, `$2`, ...)
    fn query<'a>(&'a mut self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<QueryResult>>;

    /// Whether the underlying session has gone away
    fn is_closed(&self) -> bool;

    /// Whether the session is TLS-encrypted
    fn is_tls(&self) -> bool;
}

/// Opens connections for a pool.
///
/// Implementations report certificate-chain failures as
/// [`crate::Error::TlsTrust`] so the trust state machine can react.
pub trait Connector: Send + Sync {
    /// Establish one connection described by `config`
    fn connect<'a>(&'a self, config: &'a PoolConfig) -> BoxFuture<'a, Result<Box<dyn DriverConnection>>>;
}
