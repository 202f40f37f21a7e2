//! The executor contract shared by every execution strategy and decorator

use crate::cursor::Cursor;
use crate::deferred::Cardinality;
use crate::mapping::ResultHandler;
use crate::statement::MappedStatement;
use query_cache::{CacheKey, TransactionalCacheManager};
use query_core::{BatchResult, BoundSql, ParameterObject, Result, ResultObject, RowBounds};

/// Runs mapped statements for one session.
///
/// An executor is owned by exactly one session and is never shared across
/// threads, so every operation takes `&mut self`. Once [`close`] has been
/// called, every other operation fails with `ExecutorClosed`.
///
/// [`close`]: Executor::close
pub trait Executor: Send {
    fn query(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
    ) -> Result<Vec<ResultObject>>;

    /// Query with a key and bound SQL the caller has already built.
    fn query_with_key(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
        key: CacheKey,
        bound_sql: &BoundSql,
    ) -> Result<Vec<ResultObject>>;

    /// [`Executor::query_with_key`] with nested selects issued while
    /// mapping routed through `second_level`. Executors that map nothing
    /// themselves ignore it.
    #[allow(clippy::too_many_arguments)]
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
        let _ = second_level;
        self.query_with_key(ms, parameter, row_bounds, handler, key, bound_sql)
    }

    /// Uncached query returning results as a cursor.
    fn query_cursor(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
    ) -> Result<Cursor>;

    /// [`Executor::query_cursor`] with nested selects routed through
    /// `second_level`.
    fn query_cursor_with_second_level(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        second_level: &mut TransactionalCacheManager,
    ) -> Result<Cursor> {
        let _ = second_level;
        self.query_cursor(ms, parameter, row_bounds)
    }

    /// Insert, update or delete. Returns the affected row count, or
    /// [`crate::BATCH_UPDATE_RETURN_VALUE`] when the update was only queued.
    fn update(&mut self, ms: &MappedStatement, parameter: &ParameterObject) -> Result<i64>;

    fn flush_statements(&mut self) -> Result<Vec<BatchResult>>;

    /// `required` decides whether the underlying transaction is committed;
    /// caches and queued statements are handled either way.
    fn commit(&mut self, required: bool) -> Result<()>;

    fn rollback(&mut self, required: bool) -> Result<()>;

    /// Rolls back when `force_rollback` is set and releases the transaction.
    /// Never fails; problems are logged.
    fn close(&mut self, force_rollback: bool);

    fn is_closed(&self) -> bool;

    fn create_cache_key(
        &self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        bound_sql: &BoundSql,
    ) -> Result<CacheKey>;

    /// True when the first-level cache holds the key, including a query
    /// still in progress.
    fn is_cached(&self, ms: &MappedStatement, key: &CacheKey) -> bool;

    /// Assign the result of a nested query to `property` of `result_object`
    /// once it is available in the first-level cache.
    fn defer_load(
        &mut self,
        ms: &MappedStatement,
        result_object: &ResultObject,
        property: &str,
        key: CacheKey,
        cardinality: Cardinality,
    ) -> Result<()>;

    fn clear_local_cache(&mut self);
}
