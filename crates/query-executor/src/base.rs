//! First-level caching, deferred loads and lifecycle shared by every strategy

use crate::config::{Configuration, LocalCacheScope};
use crate::caching::SecondLevelView;
use crate::cursor::Cursor;
use crate::deferred::{Cardinality, DeferredLoad};
use crate::execution::StatementContext;
use crate::executor::Executor;
use crate::mapping::ResultHandler;
use crate::statement::MappedStatement;
use crate::transaction::Transaction;
use query_cache::{Cache, CacheKey, CacheValue, PerpetualCache, TransactionalCacheManager};
use query_core::{
    BatchResult, BoundSql, ParameterMode, ParameterObject, QueryError, Result, ResultObject, Row,
    RowBounds,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// The database-facing half of an executor.
pub trait StatementStrategy: Send + 'static {
    fn do_update(
        &mut self,
        ctx: &mut StatementContext<'_>,
        ms: &MappedStatement,
        parameter: &ParameterObject,
    ) -> Result<i64>;

    /// Raw rows of a query. Output parameters of callable statements are
    /// written into `parameter` before returning.
    fn do_query(
        &mut self,
        ctx: &mut StatementContext<'_>,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        bound_sql: &BoundSql,
    ) -> Result<Vec<Row>>;

    fn do_query_cursor(
        &mut self,
        ctx: &mut StatementContext<'_>,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        bound_sql: &BoundSql,
    ) -> Result<Vec<Row>> {
        self.do_query(ctx, ms, parameter, bound_sql)
    }

    /// Execute queued statements, or drop them when rolling back.
    fn do_flush_statements(
        &mut self,
        ctx: &mut StatementContext<'_>,
        is_rollback: bool,
    ) -> Result<Vec<BatchResult>>;
}

/// Executor over a [`StatementStrategy`].
///
/// Owns the session's first-level cache. Query results are stored under
/// their [`CacheKey`] and reused until a write, a commit, a rollback or (with
/// [`LocalCacheScope::Statement`]) the end of the top-level query.
pub struct BaseExecutor<S: StatementStrategy> {
    configuration: Arc<Configuration>,
    transaction: Box<dyn Transaction>,
    strategy: S,
    local_cache: PerpetualCache,
    local_output_parameter_cache: PerpetualCache,
    deferred_loads: VecDeque<DeferredLoad>,
    /// Depth of nested queries currently running.
    query_stack: usize,
    closed: bool,
}

impl<S: StatementStrategy> BaseExecutor<S> {
    /// Create an executor over `transaction` that runs statements with `strategy`.
    pub fn new(configuration: Arc<Configuration>, transaction: Box<dyn Transaction>, strategy: S) -> Self {
        Self {
            configuration,
            transaction,
            strategy,
            local_cache: PerpetualCache::new("LocalCache"),
            local_output_parameter_cache: PerpetualCache::new("LocalOutputParameterCache"),
            deferred_loads: VecDeque::new(),
            query_stack: 0,
            closed: false,
        }
    }

    /// Get the configuration
    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    /// Get the execution strategy
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Number of entries in the local cache, placeholders included
    pub fn local_cache_size(&self) -> usize {
        self.local_cache.size()
    }

    /// Nested loads waiting for their key to finish
    pub fn pending_deferred_loads(&self) -> usize {
        self.deferred_loads.len()
    }

    fn ensure_open(&self, activity: &str) -> Result<()> {
        if self.closed {
            Err(QueryError::closed(activity))
        } else {
            Ok(())
        }
    }

    fn flush(&mut self, is_rollback: bool) -> Result<Vec<BatchResult>> {
        self.ensure_open("flushing statements")?;
        let mut ctx = StatementContext::new(&mut *self.transaction, &self.configuration);
        self.strategy.do_flush_statements(&mut ctx, is_rollback)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_query(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
        key: CacheKey,
        bound_sql: &BoundSql,
        second_level: Option<&mut TransactionalCacheManager>,
    ) -> Result<Vec<ResultObject>> {
        self.ensure_open("executing a query")?;
        if self.query_stack == 0 && ms.flush_cache_required() {
            self.clear_local_cache();
        }

        self.query_stack += 1;
        let result = self.query_local_or_database(
            ms,
            parameter,
            row_bounds,
            handler,
            &key,
            bound_sql,
            second_level,
        );
        self.query_stack -= 1;
        self.complete_top_level(result)
    }

    /// Runs once the outermost query has unwound. Pending deferred loads
    /// are resolved in enqueue order, or dropped when the query failed.
    fn complete_top_level(
        &mut self,
        result: Result<Vec<ResultObject>>,
    ) -> Result<Vec<ResultObject>> {
        if self.query_stack > 0 {
            return result;
        }
        let list = match result {
            Ok(list) => list,
            Err(e) => {
                self.deferred_loads.clear();
                return Err(e);
            }
        };
        self.resolve_deferred_loads()?;
        if self.configuration.settings().local_cache_scope == LocalCacheScope::Statement {
            self.clear_local_cache();
        }
        Ok(list)
    }

    #[allow(clippy::too_many_arguments)]
    fn query_local_or_database(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
        key: &CacheKey,
        bound_sql: &BoundSql,
        second_level: Option<&mut TransactionalCacheManager>,
    ) -> Result<Vec<ResultObject>> {
        let cached = if handler.is_none() {
            self.local_cache.get(key)
        } else {
            None
        };
        match cached {
            Some(CacheValue::List(list)) => {
                debug!("First-level cache hit for {}", ms.id());
                self.handle_locally_cached_output_parameters(ms, key, parameter, bound_sql)?;
                Ok(list)
            }
            Some(CacheValue::Placeholder) => Err(QueryError::ReentrantQuery(key.to_string())),
            _ => self.query_from_database(
                ms,
                parameter,
                row_bounds,
                handler,
                key,
                bound_sql,
                second_level,
            ),
        }
    }

    /// The key holds a placeholder while the query runs, so a nested select
    /// for the same key sees it as cached and defers instead of recursing.
    #[allow(clippy::too_many_arguments)]
    fn query_from_database(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
        key: &CacheKey,
        bound_sql: &BoundSql,
        second_level: Option<&mut TransactionalCacheManager>,
    ) -> Result<Vec<ResultObject>> {
        self.local_cache.put(key.clone(), CacheValue::Placeholder);
        let streamed = handler.is_some();
        let result = self
            .fetch_rows(ms, parameter, bound_sql, false)
            .map(|rows| row_bounds.apply(rows))
            .and_then(|rows| self.map_rows(ms, rows, handler, second_level));
        self.local_cache.remove(key);
        let list = result?;

        // Streamed results were never collected, so there is nothing to reuse.
        if !streamed {
            self.local_cache
                .put(key.clone(), CacheValue::List(list.clone()));
            if ms.is_callable() {
                self.local_output_parameter_cache
                    .put(key.clone(), CacheValue::Parameters(parameter.snapshot()));
            }
        }
        Ok(list)
    }

    fn fetch_rows(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        bound_sql: &BoundSql,
        cursor: bool,
    ) -> Result<Vec<Row>> {
        let mut ctx = StatementContext::new(&mut *self.transaction, &self.configuration);
        if cursor {
            self.strategy
                .do_query_cursor(&mut ctx, ms, parameter, bound_sql)
        } else {
            self.strategy.do_query(&mut ctx, ms, parameter, bound_sql)
        }
    }

    /// Map through the statement's result mapper. With a second-level cache
    /// the mapper sees this executor through it, so nested selects use both
    /// cache tiers.
    fn map_rows(
        &mut self,
        ms: &MappedStatement,
        rows: Vec<Row>,
        handler: Option<&mut dyn ResultHandler>,
        second_level: Option<&mut TransactionalCacheManager>,
    ) -> Result<Vec<ResultObject>> {
        let mapper = ms.result_mapper();
        let configuration = Arc::clone(&self.configuration);
        match second_level {
            Some(tcm) => {
                let mut view = SecondLevelView::new(self, tcm);
                mapper.map_rows(&mut view, &configuration, rows, handler)
            }
            None => mapper.map_rows(self, &configuration, rows, handler),
        }
    }

    fn open_cursor(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        second_level: Option<&mut TransactionalCacheManager>,
    ) -> Result<Cursor> {
        self.ensure_open("executing a cursor query")?;
        let bound_sql = ms.bound_sql(parameter)?;
        let rows = row_bounds.apply(self.fetch_rows(ms, parameter, &bound_sql, true)?);

        self.query_stack += 1;
        let mapped = self.map_rows(ms, rows, None, second_level);
        self.query_stack -= 1;
        Ok(Cursor::new(self.complete_top_level(mapped)?))
    }

    fn handle_locally_cached_output_parameters(
        &mut self,
        ms: &MappedStatement,
        key: &CacheKey,
        parameter: &ParameterObject,
        bound_sql: &BoundSql,
    ) -> Result<()> {
        if !ms.is_callable() || parameter.is_null() {
            return Ok(());
        }
        if let Some(CacheValue::Parameters(cached)) = self.local_output_parameter_cache.get(key) {
            for mapping in bound_sql.parameter_mappings() {
                if mapping.mode != ParameterMode::In {
                    parameter.set(&mapping.property, cached.get(&mapping.property))?;
                }
            }
        }
        Ok(())
    }

    /// Runs once the outermost query has finished, in enqueue order.
    fn resolve_deferred_loads(&mut self) -> Result<()> {
        let loads = std::mem::take(&mut self.deferred_loads);
        for load in loads {
            load.load(&self.local_cache)?;
        }
        Ok(())
    }
}

impl<S: StatementStrategy> Executor for BaseExecutor<S> {
    fn query(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
    ) -> Result<Vec<ResultObject>> {
        let bound_sql = ms.bound_sql(parameter)?;
        let key = self.create_cache_key(ms, parameter, row_bounds, &bound_sql)?;
        self.query_with_key(ms, parameter, row_bounds, handler, key, &bound_sql)
    }

    fn query_with_key(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
        key: CacheKey,
        bound_sql: &BoundSql,
    ) -> Result<Vec<ResultObject>> {
        self.run_query(ms, parameter, row_bounds, handler, key, bound_sql, None)
    }

    fn query_with_second_level(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
        key: CacheKey,
        bound_sql: &BoundSql,
        second_level: &mut TransactionalCacheManager,
    ) -> Result<Vec<ResultObject>> {
        self.run_query(
            ms,
            parameter,
            row_bounds,
            handler,
            key,
            bound_sql,
            Some(second_level),
        )
    }

    fn query_cursor(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
    ) -> Result<Cursor> {
        self.open_cursor(ms, parameter, row_bounds, None)
    }

    fn query_cursor_with_second_level(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        second_level: &mut TransactionalCacheManager,
    ) -> Result<Cursor> {
        self.open_cursor(ms, parameter, row_bounds, Some(second_level))
    }

    fn update(&mut self, ms: &MappedStatement, parameter: &ParameterObject) -> Result<i64> {
        self.ensure_open("executing an update")?;
        self.clear_local_cache();
        let mut ctx = StatementContext::new(&mut *self.transaction, &self.configuration);
        self.strategy.do_update(&mut ctx, ms, parameter)
    }

    fn flush_statements(&mut self) -> Result<Vec<BatchResult>> {
        self.flush(false)
    }

    fn commit(&mut self, required: bool) -> Result<()> {
        self.ensure_open("Cannot commit, transaction is already closed")?;
        self.clear_local_cache();
        self.flush_statements()?;
        if required {
            self.transaction.commit()?;
        }
        Ok(())
    }

    /// The transaction is rolled back even when discarding queued
    /// statements fails; the first error is returned.
    fn rollback(&mut self, required: bool) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.clear_local_cache();
        let flushed = self.flush(true);
        let rolled_back = if required {
            self.transaction.rollback()
        } else {
            Ok(())
        };
        flushed?;
        rolled_back
    }

    fn close(&mut self, force_rollback: bool) {
        if self.closed {
            return;
        }
        if let Err(e) = self.rollback(force_rollback) {
            warn!("Unexpected exception on rolling back while closing. Cause: {}", e);
        }
        if let Err(e) = self.transaction.close() {
            warn!("Unexpected exception on closing transaction. Cause: {}", e);
        }
        self.deferred_loads.clear();
        self.local_cache.clear();
        self.local_output_parameter_cache.clear();
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    /// Statement id, row bounds, SQL text, every non-OUT parameter value in
    /// declaration order, then the environment id when one is configured.
    fn create_cache_key(
        &self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        bound_sql: &BoundSql,
    ) -> Result<CacheKey> {
        self.ensure_open("creating a cache key")?;
        let mut key = CacheKey::new();
        key.update(ms.id());
        key.update(row_bounds.offset);
        key.update(row_bounds.limit);
        key.update(bound_sql.sql());
        key.update_all(bound_sql.input_values(parameter));
        if let Some(environment_id) = &self.configuration.settings().environment_id {
            key.update(environment_id.as_str());
        }
        Ok(key)
    }

    fn is_cached(&self, _ms: &MappedStatement, key: &CacheKey) -> bool {
        !self.closed && self.local_cache.peek(key).is_some()
    }

    fn defer_load(
        &mut self,
        ms: &MappedStatement,
        result_object: &ResultObject,
        property: &str,
        key: CacheKey,
        cardinality: Cardinality,
    ) -> Result<()> {
        self.ensure_open("deferring a load")?;
        let load = DeferredLoad::new(ms.id(), result_object.clone(), property, key, cardinality);
        if load.can_load(&self.local_cache) {
            load.load(&self.local_cache)
        } else {
            self.deferred_loads.push_back(load);
            Ok(())
        }
    }

    fn clear_local_cache(&mut self) {
        if !self.closed {
            self.local_cache.clear();
            self.local_output_parameter_cache.clear();
        }
    }
}
