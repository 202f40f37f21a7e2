//! Nested query results assigned after the outer query completes

use query_cache::{CacheKey, CacheValue, PerpetualCache};
use query_core::{Property, QueryError, Result, ResultObject};
use tracing::debug;

/// How many results a nested query contributes to its property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    /// At most one row; more is an error.
    #[default]
    One,
    Many,
}

impl Cardinality {
    /// Assign `list` to `property` of `target`. An empty result leaves a
    /// `One` property unset.
    pub fn assign(
        self,
        statement_id: &str,
        target: &ResultObject,
        property: &str,
        list: Vec<ResultObject>,
    ) -> Result<()> {
        match self {
            Cardinality::Many => target.set(property, Property::List(list)),
            Cardinality::One => match list.len() {
                0 => {}
                1 => {
                    if let Some(first) = list.into_iter().next() {
                        target.set(property, Property::Object(first));
                    }
                }
                found => {
                    return Err(QueryError::TooManyResults {
                        statement: statement_id.to_string(),
                        found,
                    })
                }
            },
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DeferredLoad {
    statement_id: String,
    result_object: ResultObject,
    property: String,
    key: CacheKey,
    cardinality: Cardinality,
}

impl DeferredLoad {
    /// Record that `property` of `result_object` waits on `key`
    pub fn new(
        statement_id: impl Into<String>,
        result_object: ResultObject,
        property: impl Into<String>,
        key: CacheKey,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            statement_id: statement_id.into(),
            result_object,
            property: property.into(),
            key,
            cardinality,
        }
    }

    /// The local cache holds a finished result for the key.
    pub fn can_load(&self, local_cache: &PerpetualCache) -> bool {
        matches!(local_cache.peek(&self.key), Some(v) if !v.is_placeholder())
    }

    /// Assign the cached result for the key to the waiting property.
    pub fn load(&self, local_cache: &PerpetualCache) -> Result<()> {
        match local_cache.peek(&self.key) {
            Some(CacheValue::List(list)) => self.cardinality.assign(
                &self.statement_id,
                &self.result_object,
                &self.property,
                list.clone(),
            ),
            _ => {
                debug!(
                    "No cached result for deferred property {} of {}",
                    self.property, self.statement_id
                );
                Ok(())
            }
        }
    }
}
