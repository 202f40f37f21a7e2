//! Statement executors with first-level and second-level caching
//!
//! A session owns one [`Executor`]. The executor runs mapped statements
//! against a [`Transaction`], keeps a per-session first-level cache of query
//! results, and optionally sits behind a [`CachingExecutor`] that consults
//! the shared second-level cache of each statement's namespace.
//!
//! # Example
//!
//! ```ignore
//! use query_executor::{Configuration, Settings};
//!
//! let configuration = Arc::new(configuration);
//! let mut executor = configuration.new_executor(Box::new(transaction), None);
//! let users = executor.query(&select_by_id, &ParameterObject::scalar(1), RowBounds::default(), None)?;
//! executor.commit(true)?;
//! executor.close(false);
//! ```

pub mod base;
pub mod batch;
pub mod caching;
pub mod config;
pub mod cursor;
pub mod deferred;
pub mod execution;
pub mod executor;
pub mod mapping;
pub mod simple;
pub mod statement;
pub mod transaction;

#[cfg(test)]
mod test_support;

pub use base::{BaseExecutor, StatementStrategy};
pub use batch::{BatchExecutor, BatchStrategy, BATCH_UPDATE_RETURN_VALUE};
pub use caching::{CachingExecutor, SecondLevelView};
pub use config::{Configuration, ExecutorType, LocalCacheScope, Settings};
pub use cursor::Cursor;
pub use deferred::{Cardinality, DeferredLoad};
pub use execution::StatementContext;
pub use executor::Executor;
pub use mapping::{NestedSelect, ResultContext, ResultHandler, ResultMapper, RowMapper};
pub use simple::{SimpleExecutor, SimpleStrategy};
pub use statement::{
    KeyGenerator, MappedStatement, MappedStatementBuilder, SqlCommandType, StatementKind,
};
pub use transaction::{effective_timeout, PreparedStatement, Transaction};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Backend, Call};
    use query_cache::CacheConfig;
    use query_core::{ParameterObject, Row, RowBounds, StaticSqlSource};
    use std::sync::Arc;

    fn configuration(settings: Settings, backend: &Backend) -> Arc<Configuration> {
        let mut configuration = Configuration::new(settings);
        let cache = configuration
            .build_cache("users", CacheConfig::default())
            .unwrap();
        let mut select = MappedStatement::builder(
            "users.selectById",
            SqlCommandType::Select,
            Arc::new(StaticSqlSource::parse("select * from users where id = #{id}").unwrap()),
        );
        if let Some(cache) = cache {
            select = select.cache(cache);
        }
        configuration.add_mapped_statement(select.build()).unwrap();
        configuration
            .add_mapped_statement(
                MappedStatement::builder(
                    "users.insert",
                    SqlCommandType::Insert,
                    Arc::new(StaticSqlSource::parse("insert into users (name) values (#{name})").unwrap()),
                )
                .build(),
            )
            .unwrap();
        backend.on_query("select * from users where id = ?", |_| {
            vec![Row::new().with("id", 1)]
        });
        Arc::new(configuration)
    }

    #[test]
    fn test_new_executor_uses_default_type() {
        let backend = Backend::new();
        let configuration = configuration(
            Settings {
                default_executor_type: ExecutorType::Batch,
                ..Default::default()
            },
            &backend,
        );
        let insert = configuration.mapped_statement("users.insert").unwrap();

        let mut executor = configuration.new_executor(Box::new(backend.transaction()), None);
        let count = executor
            .update(&insert, &ParameterObject::record().with("name", "a"))
            .unwrap();
        assert_eq!(count, BATCH_UPDATE_RETURN_VALUE);
        assert_eq!(executor.flush_statements().unwrap().len(), 1);

        let mut simple = configuration
            .new_executor(Box::new(backend.transaction()), Some(ExecutorType::Simple));
        let count = simple
            .update(&insert, &ParameterObject::record().with("name", "b"))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_cache_enabled_wraps_with_second_level() {
        let backend = Backend::new();
        let configuration = configuration(Settings::default(), &backend);
        let select = configuration.mapped_statement("users.selectById").unwrap();

        let mut first = configuration.new_executor(Box::new(backend.transaction()), None);
        first
            .query(&select, &ParameterObject::scalar(1), RowBounds::default(), None)
            .unwrap();
        first.close(false);

        let mut second = configuration.new_executor(Box::new(backend.transaction()), None);
        second
            .query(&select, &ParameterObject::scalar(1), RowBounds::default(), None)
            .unwrap();
        assert_eq!(backend.count(Call::is_query), 1);
    }

    #[test]
    fn test_cache_disabled_skips_second_level() {
        let backend = Backend::new();
        let configuration = configuration(
            Settings {
                cache_enabled: false,
                ..Default::default()
            },
            &backend,
        );
        let select = configuration.mapped_statement("users.selectById").unwrap();

        for _ in 0..2 {
            let mut executor = configuration.new_executor(Box::new(backend.transaction()), None);
            executor
                .query(&select, &ParameterObject::scalar(1), RowBounds::default(), None)
                .unwrap();
            executor.close(false);
        }
        assert_eq!(backend.count(Call::is_query), 2);
    }

    #[test]
    fn test_cursor_bypasses_both_caches() {
        let backend = Backend::new();
        let configuration = configuration(Settings::default(), &backend);
        let select = configuration.mapped_statement("users.selectById").unwrap();

        let mut executor = configuration.new_executor(Box::new(backend.transaction()), None);
        let cursor = executor
            .query_cursor(&select, &ParameterObject::scalar(1), RowBounds::default())
            .unwrap();
        assert_eq!(cursor.count(), 1);

        // cursors bypass both cache tiers
        executor
            .query_cursor(&select, &ParameterObject::scalar(1), RowBounds::default())
            .unwrap();
        assert_eq!(backend.count(Call::is_query), 2);
    }
}
