//! Row representation returned by the backing store.

use crate::error::{Error, Result, TypeError};
use crate::value::Value;
use std::collections::BTreeMap;

/// A single row of named column values.
///
/// Rows do not carry the store-assigned key or the concurrency token; those
/// travel beside the row (see `SelectedRow`) so entities cannot forge them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    /// Create an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from column/value pairs.
    #[must_use]
    pub fn from_pairs(pairs: &[(&'static str, Value)]) -> Self {
        let mut row = Self::new();
        for (col, value) in pairs {
            row.set(col, value.clone());
        }
        row
    }

    /// Set a column value, replacing any previous value.
    pub fn set(&mut self, column: &str, value: Value) {
        self.values.insert(column.to_string(), value);
    }

    /// Get a column value.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Get a required text column.
    pub fn try_text(&self, column: &str) -> Result<String> {
        match self.get(column) {
            Some(Value::Text(s)) => Ok(s.clone()),
            Some(other) => Err(Error::Type(TypeError {
                column: column.to_string(),
                expected: "TEXT",
                actual: other.type_name(),
            })),
            None => Err(Error::Type(TypeError {
                column: column.to_string(),
                expected: "TEXT",
                actual: "missing",
            })),
        }
    }

    /// Get a required i32 column.
    pub fn try_i32(&self, column: &str) -> Result<i32> {
        let value = self.get(column).ok_or_else(|| {
            Error::Type(TypeError {
                column: column.to_string(),
                expected: "INTEGER",
                actual: "missing",
            })
        })?;
        value.as_i32().ok_or_else(|| {
            Error::Type(TypeError {
                column: column.to_string(),
                expected: "INTEGER",
                actual: value.type_name(),
            })
        })
    }

    /// Get a required i64 column.
    pub fn try_i64(&self, column: &str) -> Result<i64> {
        let value = self.get(column).ok_or_else(|| {
            Error::Type(TypeError {
                column: column.to_string(),
                expected: "BIGINT",
                actual: "missing",
            })
        })?;
        value.as_i64().ok_or_else(|| {
            Error::Type(TypeError {
                column: column.to_string(),
                expected: "BIGINT",
                actual: value.type_name(),
            })
        })
    }

    /// Iterate over (column, value) pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut row = Row::new();
        row.set("name", Value::Text("Ana".into()));
        row.set("age", Value::Int(30));

        assert_eq!(row.try_text("name").unwrap(), "Ana");
        assert_eq!(row.try_i32("age").unwrap(), 30);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn missing_column_is_type_error() {
        let row = Row::new();
        assert!(row.try_text("name").is_err());
        assert!(row.try_i64("id").is_err());
    }

    #[test]
    fn wrong_type_is_type_error() {
        let mut row = Row::new();
        row.set("age", Value::Text("thirty".into()));
        assert!(row.try_i32("age").is_err());
    }

    #[test]
    fn from_pairs_preserves_values() {
        let row = Row::from_pairs(&[("a", Value::Int(1)), ("b", Value::Null)]);
        assert_eq!(row.get("a"), Some(&Value::Int(1)));
        assert!(row.get("b").unwrap().is_null());
    }
}
