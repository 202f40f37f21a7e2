//! Row to result-object mapping
//!
//! A [`ResultMapper`] turns the raw rows of one statement execution into
//! result objects. It receives the executor that ran the statement so nested
//! selects can be resolved through the same first-level cache.

use crate::config::Configuration;
use crate::deferred::Cardinality;
use crate::executor::Executor;
use query_core::{ParameterObject, Result, ResultObject, Row, RowBounds};
use std::fmt::Debug;

/// Per-row state handed to a [`ResultHandler`].
#[derive(Debug, Default)]
pub struct ResultContext {
    object: Option<ResultObject>,
    count: usize,
    stopped: bool,
}

impl ResultContext {
    /// Create a context with no current object
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self, object: ResultObject) {
        self.object = Some(object);
        self.count += 1;
    }

    /// The object most recently handed to the handler
    pub fn result_object(&self) -> Option<&ResultObject> {
        self.object.as_ref()
    }

    /// Number of objects handed out so far, including the current one.
    pub fn result_count(&self) -> usize {
        self.count
    }

    /// Stop delivering rows after the current one.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Whether the handler asked to stop
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

/// Receives mapped objects one at a time instead of a collected list.
pub trait ResultHandler {
    fn handle_result(&mut self, context: &mut ResultContext);
}

impl<F> ResultHandler for F
where
    F: FnMut(&mut ResultContext),
{
    fn handle_result(&mut self, context: &mut ResultContext) {
        self(context)
    }
}

/// Turns result rows into result objects.
pub trait ResultMapper: Debug + Send + Sync {
    /// Map `rows`. With a handler, objects go to the handler and the
    /// returned list is empty.
    fn map_rows(
        &self,
        executor: &mut dyn Executor,
        configuration: &Configuration,
        rows: Vec<Row>,
        handler: Option<&mut dyn ResultHandler>,
    ) -> Result<Vec<ResultObject>>;
}

/// A property filled by running another mapped statement with the value of
/// one column as its parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedSelect {
    pub property: String,
    pub statement_id: String,
    pub column: String,
    pub cardinality: Cardinality,
}

impl NestedSelect {
    /// Nested select that fills `property` with a single object
    pub fn one(
        property: impl Into<String>,
        statement_id: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            property: property.into(),
            statement_id: statement_id.into(),
            column: column.into(),
            cardinality: Cardinality::One,
        }
    }

    /// Nested select that fills `property` with a list
    pub fn many(
        property: impl Into<String>,
        statement_id: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::Many,
            ..Self::one(property, statement_id, column)
        }
    }
}

/// Maps every column to a value property, then resolves nested selects.
#[derive(Debug, Clone, Default)]
pub struct RowMapper {
    nested_selects: Vec<NestedSelect>,
}

impl RowMapper {
    /// Create a mapper with no nested selects
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a nested select
    pub fn with_nested_select(mut self, nested: NestedSelect) -> Self {
        self.nested_selects.push(nested);
        self
    }

    /// Get the nested selects
    pub fn nested_selects(&self) -> &[NestedSelect] {
        &self.nested_selects
    }

    /// A nested key already in the first-level cache (even one still being
    /// computed further up the stack) is deferred; anything else is queried
    /// right away.
    fn apply_nested_select(
        &self,
        executor: &mut dyn Executor,
        configuration: &Configuration,
        nested: &NestedSelect,
        row: &Row,
        object: &ResultObject,
    ) -> Result<()> {
        let value = row.get(&nested.column).cloned().unwrap_or_default();
        if value.is_null() {
            return Ok(());
        }

        let nested_ms = configuration.mapped_statement(&nested.statement_id)?;
        let parameter = ParameterObject::scalar(value);
        let bound_sql = nested_ms.bound_sql(&parameter)?;
        let key = executor.create_cache_key(&nested_ms, &parameter, RowBounds::default(), &bound_sql)?;

        if executor.is_cached(&nested_ms, &key) {
            executor.defer_load(&nested_ms, object, &nested.property, key, nested.cardinality)
        } else {
            let list = executor.query_with_key(
                &nested_ms,
                &parameter,
                RowBounds::default(),
                None,
                key,
                &bound_sql,
            )?;
            nested
                .cardinality
                .assign(nested_ms.id(), object, &nested.property, list)
        }
    }
}

impl ResultMapper for RowMapper {
    fn map_rows(
        &self,
        executor: &mut dyn Executor,
        configuration: &Configuration,
        rows: Vec<Row>,
        mut handler: Option<&mut dyn ResultHandler>,
    ) -> Result<Vec<ResultObject>> {
        let mut results = Vec::new();
        let mut context = ResultContext::new();

        for row in rows {
            let object = ResultObject::from_row(&row);
            for nested in &self.nested_selects {
                self.apply_nested_select(executor, configuration, nested, &row, &object)?;
            }

            match handler.as_mut() {
                Some(handler) => {
                    context.next(object);
                    handler.handle_result(&mut context);
                    if context.is_stopped() {
                        break;
                    }
                }
                None => results.push(object),
            }
        }

        Ok(results)
    }
}
