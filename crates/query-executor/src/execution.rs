//! Statement-level helpers shared by the execution strategies

use crate::config::Configuration;
use crate::statement::{MappedStatement, StatementKind};
use crate::transaction::{effective_timeout, PreparedStatement, Transaction};
use query_core::{BoundSql, ParameterMode, ParameterObject, QueryError, Result, Row};
use tracing::{debug, warn};

/// What a strategy may touch while running a statement.
pub struct StatementContext<'a> {
    transaction: &'a mut dyn Transaction,
    configuration: &'a Configuration,
}

impl<'a> StatementContext<'a> {
    /// Create a context over `transaction`
    pub fn new(transaction: &'a mut dyn Transaction, configuration: &'a Configuration) -> Self {
        Self {
            transaction,
            configuration,
        }
    }

    /// Prepare `sql` with the effective timeout for `ms`
    pub fn prepare(&mut self, ms: &MappedStatement, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let timeout = effective_timeout(
            ms.timeout(),
            self.configuration.settings().default_statement_timeout(),
            self.transaction.timeout(),
        );
        debug!("Preparing {:?} {}: {}", ms.command_type(), ms.id(), sql);
        self.transaction.prepare(sql, ms.kind(), timeout)
    }
}

/// Bind the parameter. Plain statements take no parameters; callable
/// statements also bind their OUT slots (as null).
pub fn parameterize(
    statement: &mut dyn PreparedStatement,
    ms: &MappedStatement,
    bound_sql: &BoundSql,
    parameter: &ParameterObject,
) -> Result<()> {
    match ms.kind() {
        StatementKind::Statement => Ok(()),
        StatementKind::Prepared => {
            let inputs: Vec<_> = bound_sql
                .bind(parameter)
                .into_iter()
                .filter(|p| p.mode != ParameterMode::Out)
                .collect();
            statement.bind(&inputs)
        }
        StatementKind::Callable => statement.bind(&bound_sql.bind(parameter)),
    }
}

/// Copy OUT/INOUT values of a callable statement into the parameter.
pub fn handle_output_parameters(
    statement: &mut dyn PreparedStatement,
    ms: &MappedStatement,
    bound_sql: &BoundSql,
    parameter: &ParameterObject,
) -> Result<()> {
    if !ms.is_callable() {
        return Ok(());
    }
    for (index, mapping) in bound_sql.parameter_mappings().iter().enumerate() {
        if mapping.mode != ParameterMode::In {
            let value = statement.output_parameter(index)?;
            parameter.set(&mapping.property, value)?;
        }
    }
    Ok(())
}

/// Assign generated key column `i` of row `n` to `key_properties[i]` of
/// parameter `n`. Extra rows or parameters are left alone.
pub fn assign_generated_keys(
    key_properties: &[String],
    rows: Vec<Row>,
    parameters: &[ParameterObject],
) -> Result<()> {
    for (parameter, row) in parameters.iter().zip(rows) {
        let values: Vec<_> = row.columns().map(|(_, v)| v.clone()).collect();
        if values.len() < key_properties.len() {
            return Err(QueryError::ExecutionError(format!(
                "Generated key row has {} columns but {} key properties are configured",
                values.len(),
                key_properties.len()
            )));
        }
        for (property, value) in key_properties.iter().zip(values) {
            parameter.set(property, value)?;
        }
    }
    Ok(())
}

/// Close `statement`, logging rather than returning a failure.
pub fn close_statement(mut statement: Box<dyn PreparedStatement>) {
    if let Err(e) = statement.close() {
        warn!("Failed to close statement: {}", e);
    }
}
