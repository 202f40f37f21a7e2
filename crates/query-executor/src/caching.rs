//! Second-level cache decorator
//!
//! Wraps any executor with the shared, per-namespace cache of each mapped
//! statement. Reads and writes go through a [`TransactionalCacheManager`],
//! so results of this session become visible to other sessions only when
//! the session commits.

use crate::cursor::Cursor;
use crate::deferred::Cardinality;
use crate::executor::Executor;
use crate::mapping::ResultHandler;
use crate::statement::MappedStatement;
use query_cache::{CacheKey, CacheValue, TransactionalCacheManager};
use query_core::{
    BatchResult, BoundSql, ParameterMode, ParameterObject, QueryError, Result, ResultObject,
    RowBounds,
};
use tracing::{debug, warn};

/// Owns the delegate and the session's transactional caches. Every call is
/// served by a [`SecondLevelView`] over the two.
pub struct CachingExecutor {
    delegate: Box<dyn Executor>,
    tcm: TransactionalCacheManager,
}

impl CachingExecutor {
    /// Wrap `delegate` with an empty transactional cache manager.
    pub fn new(delegate: Box<dyn Executor>) -> Self {
        Self {
            delegate,
            tcm: TransactionalCacheManager::new(),
        }
    }

    /// Buffered second-level state of this session.
    pub fn transactional_cache_manager(&self) -> &TransactionalCacheManager {
        &self.tcm
    }

    fn view(&mut self) -> SecondLevelView<'_> {
        SecondLevelView::new(self.delegate.as_mut(), &mut self.tcm)
    }
}

/// An executor seen through a session's second-level cache.
///
/// [`CachingExecutor`] serves every call through one of these. A base
/// executor builds one over itself while mapping rows, so nested selects
/// read and fill the second-level cache like top-level queries do.
pub struct SecondLevelView<'a> {
    delegate: &'a mut dyn Executor,
    tcm: &'a mut TransactionalCacheManager,
}

impl<'a> SecondLevelView<'a> {
    /// Borrow a delegate and the cache manager that buffers its second-level writes.
    pub fn new(delegate: &'a mut dyn Executor, tcm: &'a mut TransactionalCacheManager) -> Self {
        Self { delegate, tcm }
    }

    fn flush_cache_if_required(&mut self, ms: &MappedStatement) {
        if let Some(cache) = ms.cache() {
            if ms.flush_cache_required() {
                self.tcm.clear(cache);
            }
        }
    }

    /// Callable statements with OUT parameters cannot be cached: their
    /// output values would not be restored on a hit.
    fn ensure_no_out_params(ms: &MappedStatement, bound_sql: &BoundSql) -> Result<()> {
        if ms.is_callable()
            && bound_sql
                .parameter_mappings()
                .iter()
                .any(|m| m.mode != ParameterMode::In)
        {
            return Err(QueryError::CachingUnsupported(ms.id().to_string()));
        }
        Ok(())
    }
}

impl Executor for SecondLevelView<'_> {
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
        let cache = match ms.cache() {
            Some(cache) => cache,
            None => {
                return self.delegate.query_with_second_level(
                    ms,
                    parameter,
                    row_bounds,
                    handler,
                    key,
                    bound_sql,
                    &mut *self.tcm,
                )
            }
        };

        self.flush_cache_if_required(ms);
        // Streamed results are never collected, so they cannot be cached.
        if !ms.use_cache() || handler.is_some() {
            return self.delegate.query_with_second_level(
                ms,
                parameter,
                row_bounds,
                handler,
                key,
                bound_sql,
                &mut *self.tcm,
            );
        }

        Self::ensure_no_out_params(ms, bound_sql)?;
        if let Some(CacheValue::List(list)) = self.tcm.get(cache, &key)? {
            debug!("Second-level cache hit for {} in {}", ms.id(), cache.id());
            return Ok(list);
        }

        let list = self.delegate.query_with_second_level(
            ms,
            parameter,
            row_bounds,
            None,
            key.clone(),
            bound_sql,
            &mut *self.tcm,
        )?;
        self.tcm.put(cache, key, CacheValue::List(list.clone()));
        Ok(list)
    }

    fn query_cursor(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
    ) -> Result<Cursor> {
        self.flush_cache_if_required(ms);
        self.delegate
            .query_cursor_with_second_level(ms, parameter, row_bounds, &mut *self.tcm)
    }

    fn update(&mut self, ms: &MappedStatement, parameter: &ParameterObject) -> Result<i64> {
        self.flush_cache_if_required(ms);
        self.delegate.update(ms, parameter)
    }

    fn flush_statements(&mut self) -> Result<Vec<BatchResult>> {
        self.delegate.flush_statements()
    }

    fn commit(&mut self, required: bool) -> Result<()> {
        self.delegate.commit(required)?;
        self.tcm.commit()
    }

    /// The delegate always rolls back first; the buffered cache writes are
    /// discarded (and blocking locks released) when `required` is set, even
    /// if the delegate failed.
    fn rollback(&mut self, required: bool) -> Result<()> {
        let result = self.delegate.rollback(required);
        if required {
            self.tcm.rollback();
        }
        result
    }

    fn close(&mut self, force_rollback: bool) {
        if force_rollback {
            self.tcm.rollback();
        } else if let Err(e) = self.tcm.commit() {
            warn!("Unexpected exception committing caches while closing. Cause: {}", e);
        }
        self.delegate.close(force_rollback);
    }

    fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }

    fn create_cache_key(
        &self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        bound_sql: &BoundSql,
    ) -> Result<CacheKey> {
        self.delegate
            .create_cache_key(ms, parameter, row_bounds, bound_sql)
    }

    fn is_cached(&self, ms: &MappedStatement, key: &CacheKey) -> bool {
        self.delegate.is_cached(ms, key)
    }

    fn defer_load(
        &mut self,
        ms: &MappedStatement,
        result_object: &ResultObject,
        property: &str,
        key: CacheKey,
        cardinality: Cardinality,
    ) -> Result<()> {
        self.delegate
            .defer_load(ms, result_object, property, key, cardinality)
    }

    fn clear_local_cache(&mut self) {
        self.delegate.clear_local_cache();
    }
}

impl Executor for CachingExecutor {
    fn query(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
    ) -> Result<Vec<ResultObject>> {
        self.view().query(ms, parameter, row_bounds, handler)
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
        self.view()
            .query_with_key(ms, parameter, row_bounds, handler, key, bound_sql)
    }

    fn query_cursor(
        &mut self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
    ) -> Result<Cursor> {
        self.view().query_cursor(ms, parameter, row_bounds)
    }

    fn update(&mut self, ms: &MappedStatement, parameter: &ParameterObject) -> Result<i64> {
        self.view().update(ms, parameter)
    }

    fn flush_statements(&mut self) -> Result<Vec<BatchResult>> {
        self.delegate.flush_statements()
    }

    fn commit(&mut self, required: bool) -> Result<()> {
        self.view().commit(required)
    }

    fn rollback(&mut self, required: bool) -> Result<()> {
        self.view().rollback(required)
    }

    fn close(&mut self, force_rollback: bool) {
        self.view().close(force_rollback)
    }

    fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }

    fn create_cache_key(
        &self,
        ms: &MappedStatement,
        parameter: &ParameterObject,
        row_bounds: RowBounds,
        bound_sql: &BoundSql,
    ) -> Result<CacheKey> {
        self.delegate
            .create_cache_key(ms, parameter, row_bounds, bound_sql)
    }

    fn is_cached(&self, ms: &MappedStatement, key: &CacheKey) -> bool {
        self.delegate.is_cached(ms, key)
    }

    fn defer_load(
        &mut self,
        ms: &MappedStatement,
        result_object: &ResultObject,
        property: &str,
        key: CacheKey,
        cardinality: Cardinality,
    ) -> Result<()> {
        self.delegate
            .defer_load(ms, result_object, property, key, cardinality)
    }

    fn clear_local_cache(&mut self) {
        self.delegate.clear_local_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::BaseExecutor;
    use crate::config::{Configuration, Settings};
    use crate::mapping::{NestedSelect, RowMapper};
    use crate::simple::SimpleStrategy;
    use crate::statement::{SqlCommandType, StatementKind};
    use crate::test_support::{Backend, Call};
    use query_cache::{CacheBuilder, CacheConfig, SharedCache};
    use query_core::{Row, StaticSqlSource, Value};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const SELECT_USER: &str = "select * from users where id = ?";

    struct Fixture {
        backend: Backend,
        configuration: Arc<Configuration>,
        cache: Arc<dyn SharedCache>,
        select: Arc<MappedStatement>,
        update: Arc<MappedStatement>,
    }

    impl Fixture {
        fn new(cache_config: CacheConfig) -> Self {
            let backend = Backend::new();
            backend.on_query(SELECT_USER, |params| {
                vec![Row::new().with("id", params[0].clone()).with("name", "ada")]
            });

            let mut configuration = Configuration::new(Settings::default());
            let cache = configuration
                .build_cache("users", cache_config)
                .unwrap()
                .unwrap();
            let select = configuration
                .add_mapped_statement(
                    MappedStatement::builder(
                        "users.selectById",
                        SqlCommandType::Select,
                        Arc::new(StaticSqlSource::parse("select * from users where id = #{id}").unwrap()),
                    )
                    .cache(Arc::clone(&cache))
                    .build(),
                )
                .unwrap();
            let update = configuration
                .add_mapped_statement(
                    MappedStatement::builder(
                        "users.rename",
                        SqlCommandType::Update,
                        Arc::new(
                            StaticSqlSource::parse("update users set name = #{name} where id = #{id}")
                                .unwrap(),
                        ),
                    )
                    .cache(Arc::clone(&cache))
                    .build(),
                )
                .unwrap();

            Self {
                backend,
                configuration: Arc::new(configuration),
                cache,
                select,
                update,
            }
        }

        fn session(&self) -> CachingExecutor {
            CachingExecutor::new(Box::new(BaseExecutor::new(
                Arc::clone(&self.configuration),
                Box::new(self.backend.transaction()),
                SimpleStrategy::new(),
            )))
        }
    }

    fn by_id(id: i64) -> ParameterObject {
        ParameterObject::scalar(id)
    }

    #[test]
    fn test_results_shared_only_after_commit() {
        let fx = Fixture::new(CacheConfig::default());
        let mut first = fx.session();
        let mut second = fx.session();

        first.query(&fx.select, &by_id(1), RowBounds::default(), None).unwrap();
        assert_eq!(fx.cache.size(), 0);

        second.query(&fx.select, &by_id(1), RowBounds::default(), None).unwrap();
        assert_eq!(fx.backend.count(Call::is_query), 2);

        first.commit(true).unwrap();
        assert_eq!(fx.cache.size(), 1);

        let mut third = fx.session();
        let list = third.query(&fx.select, &by_id(1), RowBounds::default(), None).unwrap();
        assert_eq!(list[0].value("name"), Value::from("ada"));
        assert_eq!(fx.backend.count(Call::is_query), 2);
    }

    #[test]
    fn test_rollback_discards_buffered_results() {
        let fx = Fixture::new(CacheConfig::default());
        let mut session = fx.session();

        session.query(&fx.select, &by_id(1), RowBounds::default(), None).unwrap();
        session.rollback(true).unwrap();
        assert_eq!(fx.cache.size(), 0);

        session.commit(true).unwrap();
        assert_eq!(fx.cache.size(), 0);
    }

    #[test]
    fn test_update_clears_namespace_on_commit() {
        let fx = Fixture::new(CacheConfig::default());
        let mut session = fx.session();
        session.query(&fx.select, &by_id(1), RowBounds::default(), None).unwrap();
        session.commit(true).unwrap();
        assert_eq!(fx.cache.size(), 1);

        session
            .update(&fx.update, &ParameterObject::record().with("id", 1).with("name", "bob"))
            .unwrap();
        // deferred until commit
        assert_eq!(fx.cache.size(), 1);
        session.query(&fx.select, &by_id(1), RowBounds::default(), None).unwrap();
        assert_eq!(fx.backend.count(Call::is_query), 2);

        session.commit(true).unwrap();
        assert_eq!(fx.cache.size(), 1);
        assert_eq!(fx.backend.count(|c| matches!(c, Call::Commit)), 2);
    }

    #[test]
    fn test_statement_without_cache_goes_straight_through() {
        let fx = Fixture::new(CacheConfig::default());
        let uncached = MappedStatement::builder(
            "users.selectAll",
            SqlCommandType::Select,
            Arc::new(StaticSqlSource::parse("select * from users where id = #{id}").unwrap()),
        )
        .build();
        let mut session = fx.session();
        session.query(&uncached, &by_id(1), RowBounds::default(), None).unwrap();
        session.commit(true).unwrap();

        assert_eq!(fx.cache.size(), 0);
        assert!(session.transactional_cache_manager().is_empty());
    }

    #[test]
    fn test_use_cache_false_skips_second_level() {
        let fx = Fixture::new(CacheConfig::default());
        let ms = MappedStatement::builder(
            "users.selectNoCache",
            SqlCommandType::Select,
            Arc::new(StaticSqlSource::parse("select * from users where id = #{id}").unwrap()),
        )
        .cache(Arc::clone(&fx.cache))
        .use_cache(false)
        .build();
        let mut session = fx.session();
        session.query(&ms, &by_id(1), RowBounds::default(), None).unwrap();
        session.commit(true).unwrap();
        assert_eq!(fx.cache.size(), 0);
    }

    #[test]
    fn test_out_params_cannot_be_cached() {
        let fx = Fixture::new(CacheConfig::default());
        let ms = MappedStatement::builder(
            "ids.next",
            SqlCommandType::Select,
            Arc::new(StaticSqlSource::parse("{call next_id(#{seq}, #{id, mode=OUT})}").unwrap()),
        )
        .kind(StatementKind::Callable)
        .cache(Arc::clone(&fx.cache))
        .build();
        let mut session = fx.session();

        let err = session
            .query(&ms, &ParameterObject::record().with("seq", "users"), RowBounds::default(), None)
            .unwrap_err();
        assert!(matches!(err, QueryError::CachingUnsupported(id) if id == "ids.next"));
        assert_eq!(fx.backend.count(Call::is_query), 0);
    }

    #[test]
    fn test_close_commits_or_rolls_back_caches() {
        let fx = Fixture::new(CacheConfig::default());

        let mut session = fx.session();
        session.query(&fx.select, &by_id(1), RowBounds::default(), None).unwrap();
        session.close(true);
        assert_eq!(fx.cache.size(), 0);
        assert!(session.is_closed());

        let mut session = fx.session();
        session.query(&fx.select, &by_id(2), RowBounds::default(), None).unwrap();
        session.close(false);
        assert_eq!(fx.cache.size(), 1);
    }

    #[test]
    fn test_nested_select_reads_and_fills_second_level() {
        let backend = Backend::new();
        backend.on_query("select * from authors where id = ?", |params| {
            vec![Row::new().with("id", params[0].clone())]
        });
        backend.on_query("select * from posts where author_id = ?", |params| {
            vec![Row::new().with("id", 100).with("author_id", params[0].clone())]
        });

        let mut configuration = Configuration::new(Settings::default());
        let posts_cache = configuration
            .build_cache("posts", CacheConfig::default())
            .unwrap()
            .unwrap();
        let authors = configuration
            .add_mapped_statement(
                MappedStatement::builder(
                    "authors.selectById",
                    SqlCommandType::Select,
                    Arc::new(StaticSqlSource::parse("select * from authors where id = #{id}").unwrap()),
                )
                .result_mapper(Arc::new(RowMapper::new().with_nested_select(
                    NestedSelect::many("posts", "posts.byAuthor", "id"),
                )))
                .build(),
            )
            .unwrap();
        let posts = configuration
            .add_mapped_statement(
                MappedStatement::builder(
                    "posts.byAuthor",
                    SqlCommandType::Select,
                    Arc::new(
                        StaticSqlSource::parse("select * from posts where author_id = #{id}").unwrap(),
                    ),
                )
                .cache(Arc::clone(&posts_cache))
                .build(),
            )
            .unwrap();
        let configuration = Arc::new(configuration);
        let session = || {
            CachingExecutor::new(Box::new(BaseExecutor::new(
                Arc::clone(&configuration),
                Box::new(backend.transaction()),
                SimpleStrategy::new(),
            )))
        };

        let mut first = session();
        let list = first.query(&authors, &by_id(1), RowBounds::default(), None).unwrap();
        assert_eq!(list[0].list("posts").unwrap().len(), 1);
        first.commit(true).unwrap();
        assert_eq!(posts_cache.size(), 1);

        let mut second = session();
        let listed = second.query(&posts, &by_id(1), RowBounds::default(), None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(backend.count(Call::is_query), 2);

        // nested selects of a fresh session are served from the shared cache
        let mut third = session();
        let again = third.query(&authors, &by_id(1), RowBounds::default(), None).unwrap();
        assert_eq!(again[0].list("posts").unwrap().len(), 1);
        assert_eq!(backend.count(Call::is_query), 3);

        let cursor: Vec<_> = third
            .query_cursor(&authors, &by_id(1), RowBounds::default())
            .unwrap()
            .collect();
        assert_eq!(cursor[0].list("posts").unwrap().len(), 1);
        assert_eq!(backend.count(Call::is_query), 4);
    }

    #[test]
    fn test_blocking_cache_serializes_sessions() {
        let fx = Fixture::new(CacheConfig::default().with_blocking(true));
        let fx = Arc::new(fx);

        let mut first = fx.session();
        first.query(&fx.select, &by_id(1), RowBounds::default(), None).unwrap();

        // The second session blocks on the key until the first commits.
        let waiter = {
            let fx = Arc::clone(&fx);
            thread::spawn(move || {
                let mut second = fx.session();
                let list = second
                    .query(&fx.select, &by_id(1), RowBounds::default(), None)
                    .unwrap();
                second.commit(true).unwrap();
                list.len()
            })
        };
        thread::sleep(Duration::from_millis(50));
        first.commit(true).unwrap();

        assert_eq!(waiter.join().unwrap(), 1);
        assert_eq!(fx.backend.count(Call::is_query), 1);
    }

    #[test]
    fn test_blocking_timeout_surfaces_to_caller() {
        let fx = Arc::new(Fixture::new(
            CacheConfig::default().with_blocking_timeout(Duration::from_millis(50)),
        ));
        let mut first = fx.session();
        first.query(&fx.select, &by_id(1), RowBounds::default(), None).unwrap();

        let result = {
            let fx = Arc::clone(&fx);
            thread::spawn(move || {
                let mut second = fx.session();
                second
                    .query(&fx.select, &by_id(1), RowBounds::default(), None)
                    .map(|l| l.len())
            })
            .join()
            .unwrap()
        };
        assert!(matches!(result, Err(QueryError::CacheTimeout { .. })));
        first.rollback(true).unwrap();
    }

    #[test]
    fn test_builder_cache_registered_under_namespace() {
        let cache = CacheBuilder::new("orders").build();
        let mut configuration = Configuration::new(Settings::default());
        configuration.add_cache(Arc::clone(&cache)).unwrap();
        assert!(configuration.cache("orders").is_some());
    }
}
