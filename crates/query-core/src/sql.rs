//! Rendered SQL and parameter bindings
//!
//! A [`SqlSource`] turns a parameter object into a [`BoundSql`]: the final SQL
//! text plus the ordered parameter mappings that the executor binds. The
//! static source understands `#{property}` placeholders; dynamic templates
//! are left to other implementations of the trait.

use crate::error::{QueryError, Result};
use crate::object::ParameterObject;
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;

/// Direction of a statement parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ParameterMode {
    #[default]
    In,
    Out,
    InOut,
}

impl ParameterMode {
    fn parse(text: &str) -> Result<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(ParameterMode::In),
            "OUT" => Ok(ParameterMode::Out),
            "INOUT" => Ok(ParameterMode::InOut),
            other => Err(QueryError::ParseError(format!(
                "Unknown parameter mode '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterMapping {
    pub property: String,
    pub mode: ParameterMode,
}

impl ParameterMapping {
    /// Create a mapping for `property`
    pub fn new(property: impl Into<String>, mode: ParameterMode) -> Self {
        Self {
            property: property.into(),
            mode,
        }
    }

    /// IN mapping for `property`
    pub fn input(property: impl Into<String>) -> Self {
        Self::new(property, ParameterMode::In)
    }
}

/// Pagination bounds applied to a query's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBounds {
    pub offset: usize,
    pub limit: usize,
}

impl RowBounds {
    pub const NO_ROW_OFFSET: usize = 0;
    pub const NO_ROW_LIMIT: usize = i32::MAX as usize;

    /// Skip `offset` rows and keep at most `limit`
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// Whether these bounds keep every row
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the bounds to already fetched rows
    pub fn apply<T>(&self, rows: Vec<T>) -> Vec<T> {
        if self.is_default() {
            return rows;
        }
        rows.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

impl Default for RowBounds {
    fn default() -> Self {
        Self {
            offset: Self::NO_ROW_OFFSET,
            limit: Self::NO_ROW_LIMIT,
        }
    }
}

/// A parameter resolved against a parameter object, ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub property: String,
    pub mode: ParameterMode,
    /// `Value::Null` for pure output parameters.
    pub value: Value,
}

/// SQL text plus ordered parameter mappings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSql {
    sql: String,
    parameter_mappings: Vec<ParameterMapping>,
    additional_parameters: HashMap<String, Value>,
}

impl BoundSql {
    /// Create bound SQL
    pub fn new(sql: impl Into<String>, parameter_mappings: Vec<ParameterMapping>) -> Self {
        Self {
            sql: sql.into(),
            parameter_mappings,
            additional_parameters: HashMap::new(),
        }
    }

    /// Get the SQL
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Get the parameter mappings
    pub fn parameter_mappings(&self) -> &[ParameterMapping] {
        &self.parameter_mappings
    }

    /// Set a parameter generated while rendering
    pub fn set_additional_parameter(&mut self, name: impl Into<String>, value: Value) {
        self.additional_parameters.insert(name.into(), value);
    }

    /// Get an additional parameter
    pub fn additional_parameter(&self, name: &str) -> Option<&Value> {
        self.additional_parameters.get(name)
    }

    /// Value bound for one mapping: additional parameters win over the
    /// parameter object.
    pub fn resolve(&self, mapping: &ParameterMapping, parameter: &ParameterObject) -> Value {
        match self.additional_parameters.get(&mapping.property) {
            Some(value) => value.clone(),
            None => parameter.get(&mapping.property),
        }
    }

    /// Values of every non-OUT mapping, in declaration order.
    pub fn input_values(&self, parameter: &ParameterObject) -> Vec<Value> {
        self.parameter_mappings
            .iter()
            .filter(|m| m.mode != ParameterMode::Out)
            .map(|m| self.resolve(m, parameter))
            .collect()
    }

    /// Every mapping with its value; OUT parameters are bound as null.
    pub fn bind(&self, parameter: &ParameterObject) -> Vec<BoundParameter> {
        self.parameter_mappings
            .iter()
            .map(|m| BoundParameter {
                property: m.property.clone(),
                mode: m.mode,
                value: if m.mode == ParameterMode::Out {
                    Value::Null
                } else {
                    self.resolve(m, parameter)
                },
            })
            .collect()
    }

    /// Whether any mapping is OUT or INOUT
    pub fn has_output_parameters(&self) -> bool {
        self.parameter_mappings
            .iter()
            .any(|m| m.mode != ParameterMode::In)
    }
}

/// Produces the bound SQL of a statement for a given parameter.
pub trait SqlSource: Debug + Send + Sync {
    fn bound_sql(&self, parameter: &ParameterObject) -> Result<BoundSql>;
}

/// SQL whose text does not depend on the parameter.
#[derive(Debug, Clone)]
pub struct StaticSqlSource {
    sql: String,
    parameter_mappings: Vec<ParameterMapping>,
}

impl StaticSqlSource {
    /// Create a source from already parsed SQL
    pub fn new(sql: impl Into<String>, parameter_mappings: Vec<ParameterMapping>) -> Self {
        Self {
            sql: sql.into(),
            parameter_mappings,
        }
    }

    /// Parse `#{property}` / `#{property, mode=OUT}` placeholders into `?`
    /// markers. A backslash before `#{` keeps the token literally.
    pub fn parse(text: &str) -> Result<Self> {
        let mut mappings = Vec::new();
        let sql = parse_placeholders(text, |content| {
            mappings.push(parse_mapping(content)?);
            Ok("?".to_string())
        })?;
        Ok(Self::new(sql, mappings))
    }
}

impl SqlSource for StaticSqlSource {
    fn bound_sql(&self, _parameter: &ParameterObject) -> Result<BoundSql> {
        Ok(BoundSql::new(
            self.sql.clone(),
            self.parameter_mappings.clone(),
        ))
    }
}

const OPEN_TOKEN: &str = "#{";
const CLOSE_TOKEN: char = '}';

fn parse_placeholders<F>(text: &str, mut handler: F) -> Result<String>
where
    F: FnMut(&str) -> Result<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(OPEN_TOKEN) {
        if start > 0 && rest[..start].ends_with('\\') {
            out.push_str(&rest[..start - 1]);
            out.push_str(OPEN_TOKEN);
            rest = &rest[start + OPEN_TOKEN.len()..];
            continue;
        }

        out.push_str(&rest[..start]);
        let body = &rest[start + OPEN_TOKEN.len()..];
        let end = body.find(CLOSE_TOKEN).ok_or_else(|| {
            QueryError::ParseError(format!("Unterminated placeholder in: {}", text))
        })?;
        out.push_str(&handler(&body[..end])?);
        rest = &body[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn parse_mapping(content: &str) -> Result<ParameterMapping> {
    let mut parts = content.split(',');
    let property = parts.next().unwrap_or_default().trim();
    if property.is_empty() {
        return Err(QueryError::ParseError(
            "Empty parameter placeholder".to_string(),
        ));
    }

    let mut mode = ParameterMode::In;
    for attribute in parts {
        let (name, value) = attribute.split_once('=').ok_or_else(|| {
            QueryError::ParseError(format!(
                "Malformed placeholder attribute '{}' for '{}'",
                attribute.trim(),
                property
            ))
        })?;
        // Other attributes (jdbcType, typeHandler, ...) are the type layer's concern.
        if name.trim() == "mode" {
            mode = ParameterMode::parse(value)?;
        }
    }

    Ok(ParameterMapping::new(property, mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_placeholders() {
        let source =
            StaticSqlSource::parse("select * from users where id = #{id} and name = #{name}")
                .unwrap();
        let bound = source.bound_sql(&ParameterObject::null()).unwrap();
        assert_eq!(bound.sql(), "select * from users where id = ? and name = ?");
        assert_eq!(
            bound.parameter_mappings(),
            &[ParameterMapping::input("id"), ParameterMapping::input("name")]
        );
    }

    #[test]
    fn test_parse_mode_attribute() {
        let source = StaticSqlSource::parse("{call next_id(#{seq}, #{id, mode=OUT})}").unwrap();
        let bound = source.bound_sql(&ParameterObject::null()).unwrap();
        assert_eq!(bound.sql(), "{call next_id(?, ?)}");
        assert_eq!(bound.parameter_mappings()[1].mode, ParameterMode::Out);
        assert!(bound.has_output_parameters());
    }

    #[test]
    fn test_escaped_placeholder_kept() {
        let source = StaticSqlSource::parse("select '\\#{literal}' from t where a = #{a}").unwrap();
        let bound = source.bound_sql(&ParameterObject::null()).unwrap();
        assert_eq!(bound.sql(), "select '#{literal}' from t where a = ?");
        assert_eq!(bound.parameter_mappings().len(), 1);
    }

    #[test]
    fn test_unterminated_placeholder_fails() {
        assert!(StaticSqlSource::parse("select #{id from t").is_err());
        assert!(StaticSqlSource::parse("select #{ } from t").is_err());
        assert!(StaticSqlSource::parse("select #{id, mode=SIDEWAYS} from t").is_err());
    }

    #[test]
    fn test_input_values_skip_out_and_prefer_additional() {
        let mut bound = BoundSql::new(
            "x",
            vec![
                ParameterMapping::input("a"),
                ParameterMapping::new("b", ParameterMode::Out),
                ParameterMapping::new("c", ParameterMode::InOut),
            ],
        );
        bound.set_additional_parameter("c", Value::Int64(30));
        let param = ParameterObject::record().with("a", 1).with("c", 3);

        assert_eq!(
            bound.input_values(&param),
            vec![Value::Int64(1), Value::Int64(30)]
        );
        let bound_params = bound.bind(&param);
        assert_eq!(bound_params.len(), 3);
        assert_eq!(bound_params[1].value, Value::Null);
    }

    #[test]
    fn test_row_bounds_apply() {
        let rows: Vec<i32> = (0..10).collect();
        assert_eq!(RowBounds::default().apply(rows.clone()).len(), 10);
        assert_eq!(RowBounds::new(2, 3).apply(rows), vec![2, 3, 4]);
    }
}
