//! Engine settings and the statement/cache registries

use crate::base::BaseExecutor;
use crate::batch::BatchStrategy;
use crate::caching::CachingExecutor;
use crate::executor::Executor;
use crate::simple::SimpleStrategy;
use crate::statement::MappedStatement;
use crate::transaction::Transaction;
use query_cache::{CacheBuilder, CacheConfig, SharedCache};
use query_core::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Lifetime of first-level cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalCacheScope {
    /// Entries live until a write, commit, rollback or close.
    #[default]
    Session,
    /// Entries are dropped when each top-level query completes.
    Statement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorType {
    #[default]
    Simple,
    Batch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Wrap new executors with the second-level cache.
    pub cache_enabled: bool,
    pub local_cache_scope: LocalCacheScope,
    pub default_executor_type: ExecutorType,
    /// Appended to every cache key when set.
    pub environment_id: Option<String>,
    pub default_statement_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            local_cache_scope: LocalCacheScope::Session,
            default_executor_type: ExecutorType::Simple,
            environment_id: None,
            default_statement_timeout_secs: None,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    /// Save settings to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Default statement timeout, if set
    pub fn default_statement_timeout(&self) -> Option<Duration> {
        self.default_statement_timeout_secs.map(Duration::from_secs)
    }
}

/// Settings plus every registered statement and shared cache.
///
/// Built once at startup and shared by all sessions behind an `Arc`.
#[derive(Default)]
pub struct Configuration {
    settings: Settings,
    mapped_statements: HashMap<String, Arc<MappedStatement>>,
    caches: HashMap<String, Arc<dyn SharedCache>>,
}

impl Configuration {
    /// Create a configuration with no statements or caches
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            mapped_statements: HashMap::new(),
            caches: HashMap::new(),
        }
    }

    /// Get the settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Register a statement. Ids must be unique.
    pub fn add_mapped_statement(&mut self, ms: MappedStatement) -> Result<Arc<MappedStatement>> {
        if self.mapped_statements.contains_key(ms.id()) {
            return Err(QueryError::ConfigError(format!(
                "Mapped statement {} is already registered",
                ms.id()
            )));
        }
        let ms = Arc::new(ms);
        self.mapped_statements
            .insert(ms.id().to_string(), Arc::clone(&ms));
        Ok(ms)
    }

    /// Look up a statement by id
    pub fn mapped_statement(&self, id: &str) -> Result<Arc<MappedStatement>> {
        self.mapped_statements
            .get(id)
            .cloned()
            .ok_or_else(|| QueryError::StatementNotFound(id.to_string()))
    }

    /// Register a second-level cache under its id.
    ///
    /// Fails when a cache with the same id is already registered.
    pub fn add_cache(&mut self, cache: Arc<dyn SharedCache>) -> Result<()> {
        let id = cache.id().to_string();
        if self.caches.contains_key(&id) {
            return Err(QueryError::ConfigError(format!(
                "Cache {} is already registered",
                id
            )));
        }
        self.caches.insert(id, cache);
        Ok(())
    }

    /// Build and register the standard cache chain for `namespace`.
    /// A disabled config registers nothing and returns `None`.
    pub fn build_cache(
        &mut self,
        namespace: &str,
        config: CacheConfig,
    ) -> Result<Option<Arc<dyn SharedCache>>> {
        if !config.enabled {
            debug!("Second-level cache disabled for namespace {}", namespace);
            return Ok(None);
        }
        let cache = CacheBuilder::new(namespace).config(config).build();
        self.add_cache(Arc::clone(&cache))?;
        Ok(Some(cache))
    }

    /// Second-level cache registered for `namespace`
    pub fn cache(&self, namespace: &str) -> Option<Arc<dyn SharedCache>> {
        self.caches.get(namespace).cloned()
    }

    /// Create an executor for one session. `None` picks the configured
    /// default type; the result is wrapped with the second-level cache when
    /// caching is enabled.
    pub fn new_executor(
        self: &Arc<Self>,
        transaction: Box<dyn Transaction>,
        executor_type: Option<ExecutorType>,
    ) -> Box<dyn Executor> {
        let executor_type = executor_type.unwrap_or(self.settings.default_executor_type);
        let executor: Box<dyn Executor> = match executor_type {
            ExecutorType::Simple => Box::new(BaseExecutor::new(
                Arc::clone(self),
                transaction,
                SimpleStrategy::new(),
            )),
            ExecutorType::Batch => Box::new(BaseExecutor::new(
                Arc::clone(self),
                transaction,
                BatchStrategy::new(),
            )),
        };
        if self.settings.cache_enabled {
            Box::new(CachingExecutor::new(executor))
        } else {
            executor
        }
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut statements: Vec<&String> = self.mapped_statements.keys().collect();
        statements.sort();
        let mut caches: Vec<&String> = self.caches.keys().collect();
        caches.sort();
        f.debug_struct("Configuration")
            .field("settings", &self.settings)
            .field("mapped_statements", &statements)
            .field("caches", &caches)
            .finish()
    }
}
