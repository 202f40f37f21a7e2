//! Transactional resource SPI
//!
//! The executors never talk to a database directly. A [`Transaction`] owns
//! the connection-like resource and hands out [`PreparedStatement`] handles;
//! implementations wrap whatever driver the application uses.

use crate::statement::StatementKind;
use query_core::{BoundParameter, Result, Row, Value};
use std::time::Duration;

/// A database connection scoped to one unit of work.
pub trait Transaction: Send {
    /// Prepare `sql` for execution with the given query timeout.
    fn prepare(
        &mut self,
        sql: &str,
        kind: StatementKind,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn PreparedStatement>>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Remaining time of the surrounding transaction, if it has a limit.
    fn timeout(&self) -> Option<Duration>;
}

/// A prepared statement handle. Parameters are bound positionally in the
/// order of the statement's parameter mappings.
pub trait PreparedStatement: Send {
    fn bind(&mut self, parameters: &[BoundParameter]) -> Result<()>;

    fn execute_query(&mut self) -> Result<Vec<Row>>;

    /// Returns the affected row count.
    fn execute_update(&mut self) -> Result<i64>;

    /// Queue the currently bound parameters as one batch element.
    fn add_batch(&mut self) -> Result<()>;

    /// Execute every queued element; one update count per element.
    fn execute_batch(&mut self) -> Result<Vec<i64>>;

    /// Keys generated by the last execution, one row per affected element.
    fn generated_keys(&mut self) -> Result<Vec<Row>>;

    /// Value of the output parameter bound at `index`.
    fn output_parameter(&mut self, index: usize) -> Result<Value>;

    fn close(&mut self) -> Result<()>;
}

/// Query timeout for a statement: its own timeout, else the configured
/// default, unless the transaction has less time left.
pub fn effective_timeout(
    statement_timeout: Option<Duration>,
    default_timeout: Option<Duration>,
    transaction_timeout: Option<Duration>,
) -> Option<Duration> {
    let query_timeout = statement_timeout
        .or(default_timeout)
        .filter(|t| !t.is_zero());
    match (query_timeout, transaction_timeout) {
        (_, None) => query_timeout,
        (None, Some(tx)) => Some(tx),
        (Some(query), Some(tx)) => Some(query.min(tx)),
    }
}
