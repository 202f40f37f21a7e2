//! One prepared statement per call

use crate::base::{BaseExecutor, StatementStrategy};
use crate::execution::{
    assign_generated_keys, close_statement, handle_output_parameters, parameterize,
    StatementContext,
};
use crate::statement::{KeyGenerator, MappedStatement};
use crate::transaction::PreparedStatement;
use query_core::{BatchResult, BoundSql, ParameterObject, Result, Row};

/// Executor that runs every statement immediately.
pub type SimpleExecutor = BaseExecutor<SimpleStrategy>;

/// Prepares, binds, executes and closes a statement on every call. Keeps no
/// state between calls, so flushing is a no-op.
#[derive(Debug, Default)]
pub struct SimpleStrategy;

impl SimpleStrategy {
    /// Create a new simple strategy
    pub fn new() -> Self {
        Self
    }
}

fn run_update(
    statement: &mut dyn PreparedStatement,
    ms: &MappedStatement,
    bound_sql: &BoundSql,
    parameter: &ParameterObject,
) -> Result<i64> {
    parameterize(statement, ms, bound_sql, parameter)?;
    let count = statement.execute_update()?;
    handle_output_parameters(statement, ms, bound_sql, parameter)?;
    if let KeyGenerator::Generated { key_properties } = ms.key_generator() {
        let rows = statement.generated_keys()?;
        assign_generated_keys(key_properties, rows, std::slice::from_ref(parameter))?;
    }
    Ok(count)
}

pub(crate) fn run_query(
    statement: &mut dyn PreparedStatement,
    ms: &MappedStatement,
    bound_sql: &BoundSql,
    parameter: &ParameterObject,
) -> Result<Vec<Row>> {
    parameterize(statement, ms, bound_sql, parameter)?;
    let rows = statement.execute_query()?;
    handle_output_parameters(statement, ms, bound_sql, parameter)?;
    Ok(rows)
}

impl StatementStrategy for SimpleStrategy {
    fn do_update(
        &mut self,
        ctx: &mut StatementContext<'_>,
        ms: &MappedStatement,
        parameter: &ParameterObject,
    ) -> Result<i64> {
        let bound_sql = ms.bound_sql(parameter)?;
        let mut statement = ctx.prepare(ms, bound_sql.sql())?;
        let result = run_update(statement.as_mut(), ms, &bound_sql, parameter);
        close_statement(statement);
        result
    }

    fn do_query(
        &mut self,
        ctx: &mut StatementContext<'_>,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        bound_sql: &BoundSql,
    ) -> Result<Vec<Row>> {
        let mut statement = ctx.prepare(ms, bound_sql.sql())?;
        let result = run_query(statement.as_mut(), ms, bound_sql, parameter);
        close_statement(statement);
        result
    }

    fn do_flush_statements(
        &mut self,
        _ctx: &mut StatementContext<'_>,
        _is_rollback: bool,
    ) -> Result<Vec<BatchResult>> {
        Ok(Vec::new())
    }
}
