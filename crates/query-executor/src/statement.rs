//! Mapped statement descriptors

use crate::mapping::{ResultMapper, RowMapper};
use query_cache::SharedCache;
use query_core::{BoundSql, ParameterObject, Result, SqlSource};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What a statement does to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlCommandType {
    Select,
    Insert,
    Update,
    Delete,
}

/// How a statement is handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatementKind {
    /// Literal SQL with no bound parameters.
    Statement,
    #[default]
    Prepared,
    /// Stored procedure call; may have OUT/INOUT parameters.
    Callable,
}

/// Post-update handling of database-generated keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyGenerator {
    #[default]
    None,
    /// Assign generated key column `i` to `key_properties[i]` of each
    /// parameter object, one generated row per parameter in call order.
    Generated { key_properties: Vec<String> },
}

impl KeyGenerator {
    /// Key generator that assigns generated columns to `key_properties`
    pub fn generated<I, S>(key_properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyGenerator::Generated {
            key_properties: key_properties.into_iter().map(Into::into).collect(),
        }
    }
}

/// Everything the executors need to know about one registered statement.
pub struct MappedStatement {
    id: String,
    command_type: SqlCommandType,
    kind: StatementKind,
    sql_source: Arc<dyn SqlSource>,
    flush_cache_required: bool,
    use_cache: bool,
    timeout: Option<Duration>,
    key_generator: KeyGenerator,
    cache: Option<Arc<dyn SharedCache>>,
    result_mapper: Arc<dyn ResultMapper>,
}

impl MappedStatement {
    /// Start building a statement. Cache flags default from `command_type`.
    pub fn builder(
        id: impl Into<String>,
        command_type: SqlCommandType,
        sql_source: Arc<dyn SqlSource>,
    ) -> MappedStatementBuilder {
        MappedStatementBuilder::new(id, command_type, sql_source)
    }

    /// Fully qualified id, `namespace.name`
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the command type
    pub fn command_type(&self) -> SqlCommandType {
        self.command_type
    }

    /// Get the statement kind
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Whether this is a stored procedure call
    pub fn is_callable(&self) -> bool {
        self.kind == StatementKind::Callable
    }

    /// Whether running this statement clears the local and second-level caches
    pub fn flush_cache_required(&self) -> bool {
        self.flush_cache_required
    }

    /// Whether results may be served from the second-level cache
    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    /// Statement-specific query timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Get the key generator
    pub fn key_generator(&self) -> &KeyGenerator {
        &self.key_generator
    }

    /// Second-level cache for the statement's namespace, if one is configured
    pub fn cache(&self) -> Option<&Arc<dyn SharedCache>> {
        self.cache.as_ref()
    }

    /// Mapper used to turn rows into result objects
    pub fn result_mapper(&self) -> Arc<dyn ResultMapper> {
        Arc::clone(&self.result_mapper)
    }

    /// Render the SQL for `parameter`
    pub fn bound_sql(&self, parameter: &ParameterObject) -> Result<BoundSql> {
        self.sql_source.bound_sql(parameter)
    }
}

impl fmt::Debug for MappedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedStatement")
            .field("id", &self.id)
            .field("command_type", &self.command_type)
            .field("kind", &self.kind)
            .field("flush_cache_required", &self.flush_cache_required)
            .field("use_cache", &self.use_cache)
            .field("cache", &self.cache.as_ref().map(|c| c.id().to_string()))
            .finish()
    }
}

/// Builder for [`MappedStatement`].
pub struct MappedStatementBuilder {
    id: String,
    command_type: SqlCommandType,
    kind: StatementKind,
    sql_source: Arc<dyn SqlSource>,
    flush_cache_required: Option<bool>,
    use_cache: Option<bool>,
    timeout: Option<Duration>,
    key_generator: KeyGenerator,
    cache: Option<Arc<dyn SharedCache>>,
    result_mapper: Option<Arc<dyn ResultMapper>>,
}

impl MappedStatementBuilder {
    fn new(id: impl Into<String>, command_type: SqlCommandType, sql_source: Arc<dyn SqlSource>) -> Self {
        Self {
            id: id.into(),
            command_type,
            kind: StatementKind::default(),
            sql_source,
            flush_cache_required: None,
            use_cache: None,
            timeout: None,
            key_generator: KeyGenerator::None,
            cache: None,
            result_mapper: None,
        }
    }

    /// Set the statement kind
    pub fn kind(mut self, kind: StatementKind) -> Self {
        self.kind = kind;
        self
    }

    /// Defaults to `true` for writes and `false` for selects.
    pub fn flush_cache_required(mut self, flush: bool) -> Self {
        self.flush_cache_required = Some(flush);
        self
    }

    /// Defaults to `true` for selects and `false` for writes.
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = Some(use_cache);
        self
    }

    /// Set the query timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the key generator
    pub fn key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    /// Attach a second-level cache
    pub fn cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the result mapper. Defaults to [`RowMapper`].
    pub fn result_mapper(mut self, mapper: Arc<dyn ResultMapper>) -> Self {
        self.result_mapper = Some(mapper);
        self
    }

    /// Build the statement
    pub fn build(self) -> MappedStatement {
        let is_select = self.command_type == SqlCommandType::Select;
        MappedStatement {
            id: self.id,
            command_type: self.command_type,
            kind: self.kind,
            sql_source: self.sql_source,
            flush_cache_required: self.flush_cache_required.unwrap_or(!is_select),
            use_cache: self.use_cache.unwrap_or(is_select),
            timeout: self.timeout,
            key_generator: self.key_generator,
            cache: self.cache,
            result_mapper: self
                .result_mapper
                .unwrap_or_else(|| Arc::new(RowMapper::new())),
        }
    }
}
