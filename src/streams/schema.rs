//! Column metadata and value typing for tabular sources.
//!
//! Delimited text carries no types, so a CSV source infers one
//! [`ColumnType`] per column from the first data row and converts every
//! later cell with it. JSON sources take the type of each field in the first
//! record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::error::{PipelineError, Result};

/// Column name to position
pub type ColumnIndex = HashMap<String, usize>;

/// Column name to semantic type
pub type ColumnTypes = HashMap<String, ColumnType>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int64,
    Float64,
    Bool,
    String,
    /// Nested or null JSON values, passed through untouched
    Json,
}

impl ColumnType {
    /// Infer a type from one raw text cell.
    pub fn infer(raw: &str) -> Self {
        if is_unsigned_integer(raw) {
            Self::Int64
        } else if is_decimal(raw) {
            Self::Float64
        } else if raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("false") {
            Self::Bool
        } else {
            Self::String
        }
    }

    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Int64,
            Value::Number(_) => Self::Float64,
            Value::Bool(_) => Self::Bool,
            Value::String(_) => Self::String,
            Value::Null | Value::Array(_) | Value::Object(_) => Self::Json,
        }
    }

    pub fn default_value(&self) -> Value {
        match self {
            Self::Int64 => Value::from(0),
            Self::Float64 => Value::from(0.0),
            Self::Bool => Value::Bool(false),
            Self::String => Value::String(String::new()),
            Self::Json => Value::Null,
        }
    }

    /// Convert a raw cell. Empty cells become the type's default value.
    pub fn parse(&self, column: &str, raw: &str) -> Result<Value> {
        if raw.is_empty() {
            return Ok(self.default_value());
        }

        let invalid = || {
            PipelineError::Source(format!(
                "column `{column}`: cannot read {raw:?} as {self}"
            ))
        };

        match self {
            Self::Int64 => raw.trim().parse::<i64>().map(Value::from).map_err(|_| invalid()),
            Self::Float64 => {
                let parsed = raw.trim().parse::<f64>().map_err(|_| invalid())?;
                Ok(serde_json::Number::from_f64(parsed)
                    .map(Value::Number)
                    .unwrap_or(Value::Null))
            }
            Self::Bool => Ok(Value::Bool(
                raw.eq_ignore_ascii_case("true") || raw == "1",
            )),
            Self::String => Ok(Value::String(raw.to_string())),
            Self::Json => serde_json::from_str(raw).map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64 => write!(f, "int64"),
            Self::Float64 => write!(f, "float64"),
            Self::Bool => write!(f, "bool"),
            Self::String => write!(f, "string"),
            Self::Json => write!(f, "json"),
        }
    }
}

pub fn index_columns<I, S>(names: I) -> ColumnIndex
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names
        .into_iter()
        .enumerate()
        .map(|(position, name)| (name.into(), position))
        .collect()
}

/// Column names ordered by position
pub fn ordered_columns(index: &ColumnIndex) -> Vec<String> {
    let mut columns: Vec<(&String, &usize)> = index.iter().collect();
    columns.sort_by_key(|(_, position)| **position);
    columns.into_iter().map(|(name, _)| name.clone()).collect()
}

pub fn types_of_record(record: &serde_json::Map<String, Value>) -> ColumnTypes {
    record
        .iter()
        .map(|(name, value)| (name.clone(), ColumnType::of_value(value)))
        .collect()
}

fn is_unsigned_integer(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())
}

// [+-]? followed by digits with an optional fraction, or a bare fraction
fn is_decimal(raw: &str) -> bool {
    let unsigned = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

    match fraction {
        None => !whole.is_empty() && digits(whole),
        Some(fraction) if whole.is_empty() => !fraction.is_empty() && digits(fraction),
        Some(fraction) => digits(whole) && digits(fraction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inference_order() {
        assert_eq!(ColumnType::infer("42"), ColumnType::Int64);
        assert_eq!(ColumnType::infer("-42"), ColumnType::Float64);
        assert_eq!(ColumnType::infer("3.14"), ColumnType::Float64);
        assert_eq!(ColumnType::infer(".5"), ColumnType::Float64);
        assert_eq!(ColumnType::infer("7."), ColumnType::Float64);
        assert_eq!(ColumnType::infer("TRUE"), ColumnType::Bool);
        assert_eq!(ColumnType::infer("false"), ColumnType::Bool);
        assert_eq!(ColumnType::infer("1.2.3"), ColumnType::String);
        assert_eq!(ColumnType::infer(""), ColumnType::String);
        assert_eq!(ColumnType::infer("abc"), ColumnType::String);
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(ColumnType::Int64.parse("n", "12").unwrap(), json!(12));
        assert_eq!(ColumnType::Float64.parse("n", "-2.5").unwrap(), json!(-2.5));
        assert_eq!(ColumnType::Bool.parse("n", "True").unwrap(), json!(true));
        assert_eq!(ColumnType::Bool.parse("n", "no").unwrap(), json!(false));
        assert_eq!(ColumnType::String.parse("n", "x").unwrap(), json!("x"));
    }

    #[test]
    fn test_empty_cells_take_defaults() {
        assert_eq!(ColumnType::Int64.parse("n", "").unwrap(), json!(0));
        assert_eq!(ColumnType::Float64.parse("n", "").unwrap(), json!(0.0));
        assert_eq!(ColumnType::Bool.parse("n", "").unwrap(), json!(false));
        assert_eq!(ColumnType::String.parse("n", "").unwrap(), json!(""));
    }

    #[test]
    fn test_unparseable_cell_names_the_column() {
        let err = ColumnType::Int64.parse("age", "old").unwrap_err();
        assert!(err.to_string().contains("age"));
    }

    #[test]
    fn test_json_value_types() {
        assert_eq!(ColumnType::of_value(&json!(1)), ColumnType::Int64);
        assert_eq!(ColumnType::of_value(&json!(1.5)), ColumnType::Float64);
        assert_eq!(ColumnType::of_value(&json!(null)), ColumnType::Json);
        assert_eq!(ColumnType::of_value(&json!([1])), ColumnType::Json);
    }

    #[test]
    fn test_ordered_columns() {
        let index = index_columns(["b", "a", "c"]);
        assert_eq!(index["a"], 1);
        assert_eq!(ordered_columns(&index), vec!["b", "a", "c"]);
    }
}
