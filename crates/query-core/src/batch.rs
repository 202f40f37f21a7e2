//! Results of flushed batch statements

use crate::object::ParameterObject;

/// Outcome of one accumulated batch: every invocation that shared the same
/// statement and SQL text, with the backend's per-invocation update counts.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    statement_id: String,
    sql: String,
    parameters: Vec<ParameterObject>,
    update_counts: Vec<i64>,
}

impl BatchResult {
    /// Start a batch with its first parameter
    pub fn new(
        statement_id: impl Into<String>,
        sql: impl Into<String>,
        parameter: ParameterObject,
    ) -> Self {
        Self {
            statement_id: statement_id.into(),
            sql: sql.into(),
            parameters: vec![parameter],
            update_counts: Vec::new(),
        }
    }

    /// Get the statement id
    pub fn statement_id(&self) -> &str {
        &self.statement_id
    }

    /// Get the SQL
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter objects in call order.
    pub fn parameters(&self) -> &[ParameterObject] {
        &self.parameters
    }

    /// Queue another parameter
    pub fn add_parameter(&mut self, parameter: ParameterObject) {
        self.parameters.push(parameter);
    }

    /// Update counts reported when the batch ran
    pub fn update_counts(&self) -> &[i64] {
        &self.update_counts
    }

    /// Store the update counts
    pub fn set_update_counts(&mut self, update_counts: Vec<i64>) {
        self.update_counts = update_counts;
    }
}
