pub mod batch;
pub mod error;
pub mod object;
pub mod sql;
pub mod types;

pub use batch::BatchResult;
pub use error::{BatchFailure, QueryError, Result};
pub use object::{ParameterObject, Property, ResultObject, WeakResultObject};
pub use sql::{
    BoundParameter, BoundSql, ParameterMapping, ParameterMode, RowBounds, SqlSource,
    StaticSqlSource,
};
pub use types::{Row, Value};
