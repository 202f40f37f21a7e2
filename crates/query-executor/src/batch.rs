//! Batched updates
//!
//! Consecutive updates with the same SQL text and statement id share one
//! prepared statement; each call adds one batch element. Nothing reaches the
//! database until the batch is flushed, either explicitly, by a commit, or
//! by a query issued through the same executor.

use crate::base::{BaseExecutor, StatementStrategy};
use crate::execution::{assign_generated_keys, close_statement, parameterize, StatementContext};
use crate::simple::run_query;
use crate::statement::{KeyGenerator, MappedStatement};
use crate::transaction::PreparedStatement;
use query_core::{
    BatchFailure, BatchResult, BoundSql, ParameterObject, QueryError, Result, Row,
};
use tracing::debug;

/// Returned by `update` on a batch executor in place of a row count.
pub const BATCH_UPDATE_RETURN_VALUE: i64 = i32::MIN as i64 + 1002;

/// Executor that queues updates into batches until flushed.
pub type BatchExecutor = BaseExecutor<BatchStrategy>;

struct PendingBatch {
    statement: Box<dyn PreparedStatement>,
    result: BatchResult,
    key_generator: KeyGenerator,
}

impl PendingBatch {
    fn execute(&mut self) -> Result<()> {
        let counts = self.statement.execute_batch()?;
        self.result.set_update_counts(counts);
        if let KeyGenerator::Generated { key_properties } = &self.key_generator {
            let rows = self.statement.generated_keys()?;
            assign_generated_keys(key_properties, rows, self.result.parameters())?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct BatchStrategy {
    batches: Vec<PendingBatch>,
    /// SQL text and statement id of the batch accepting new elements.
    current: Option<(String, String)>,
}

impl BatchStrategy {
    /// Create a batch strategy with no pending batches
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of prepared statements waiting to be flushed.
    pub fn pending_batches(&self) -> usize {
        self.batches.len()
    }

    fn continues_current_batch(&self, ms: &MappedStatement, sql: &str) -> bool {
        matches!(&self.current, Some((current_sql, current_id)) if current_sql == sql && current_id == ms.id())
    }
}

fn batch_failure(index: usize, failed: BatchResult, successful: Vec<BatchResult>, cause: QueryError) -> QueryError {
    let mut message = format!("{} (batch index #{}) failed.", failed.statement_id(), index + 1);
    if index > 0 {
        message.push_str(&format!(
            " {} prior sub executor(s) completed successfully, but will be rolled back.",
            index
        ));
    }
    QueryError::BatchFailure(Box::new(BatchFailure {
        message,
        statement_id: failed.statement_id().to_string(),
        batch_index: index + 1,
        successful,
        failed,
        cause: Box::new(cause),
    }))
}

impl StatementStrategy for BatchStrategy {
    fn do_update(
        &mut self,
        ctx: &mut StatementContext<'_>,
        ms: &MappedStatement,
        parameter: &ParameterObject,
    ) -> Result<i64> {
        let bound_sql = ms.bound_sql(parameter)?;
        let sql = bound_sql.sql();

        if self.continues_current_batch(ms, sql) {
            if let Some(batch) = self.batches.last_mut() {
                batch.result.add_parameter(parameter.clone());
            }
        } else {
            let statement = ctx.prepare(ms, sql)?;
            debug!("Starting batch {} for {}", self.batches.len() + 1, ms.id());
            self.current = Some((sql.to_string(), ms.id().to_string()));
            self.batches.push(PendingBatch {
                statement,
                result: BatchResult::new(ms.id(), sql, parameter.clone()),
                key_generator: ms.key_generator().clone(),
            });
        }

        let batch = self
            .batches
            .last_mut()
            .ok_or_else(|| QueryError::ExecutionError("No batch statement to add to".to_string()))?;
        parameterize(batch.statement.as_mut(), ms, &bound_sql, parameter)?;
        batch.statement.add_batch()?;
        Ok(BATCH_UPDATE_RETURN_VALUE)
    }

    /// Queued updates are flushed first so the query sees them.
    fn do_query(
        &mut self,
        ctx: &mut StatementContext<'_>,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        bound_sql: &BoundSql,
    ) -> Result<Vec<Row>> {
        self.do_flush_statements(ctx, false)?;
        let mut statement = ctx.prepare(ms, bound_sql.sql())?;
        let result = run_query(statement.as_mut(), ms, bound_sql, parameter);
        close_statement(statement);
        result
    }

    fn do_flush_statements(
        &mut self,
        _ctx: &mut StatementContext<'_>,
        is_rollback: bool,
    ) -> Result<Vec<BatchResult>> {
        let mut batches = std::mem::take(&mut self.batches);
        self.current = None;

        let mut results = Vec::with_capacity(batches.len());
        let mut outcome = Ok(());
        if !is_rollback {
            for (index, batch) in batches.iter_mut().enumerate() {
                match batch.execute() {
                    Ok(()) => results.push(batch.result.clone()),
                    Err(cause) => {
                        outcome = Err(batch_failure(
                            index,
                            batch.result.clone(),
                            std::mem::take(&mut results),
                            cause,
                        ));
                        break;
                    }
                }
            }
        }

        for batch in batches {
            close_statement(batch.statement);
        }
        outcome.map(|()| results)
    }
}
