//! Dynamically-typed scalar values and generic result rows.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// One row to insert: column name to raw text value.
///
/// Values are always written as quoted text; the backend coerces them to the column
/// type (actual tables) or stores them as-is (staging tables).
pub type RowValues = BTreeMap<String, String>;

/// A dynamically-typed scalar as produced by query execution or supplied as a filter value.
///
/// Serializes untagged, so JSON `null`, booleans, integers, floats and strings map
/// directly onto the variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(b) => write!(f, "{b}"),
            SqlValue::Int(i) => write!(f, "{i}"),
            SqlValue::Float(x) => write!(f, "{x}"),
            SqlValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// One result row: column names mapped to values, in projection order.
///
/// Serializes as a JSON object whose keys follow the projection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericRow {
    fields: Vec<(String, SqlValue)>,
}

impl GenericRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column; a repeated name replaces the earlier value in place.
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(SqlValue::as_str)
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(SqlValue::as_bool)
    }

    /// The first column's value, used for single-value probes.
    pub fn first(&self) -> Option<&SqlValue> {
        self.fields.first().map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for GenericRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_keeps_projection_order() {
        let row = GenericRow::new()
            .with("dept", "sales")
            .with("n", 3i64)
            .with("avg_salary", 1250.5);

        let columns: Vec<&str> = row.columns().collect();
        assert_eq!(columns, vec!["dept", "n", "avg_salary"]);
        assert_eq!(row.first(), Some(&SqlValue::Text("sales".into())));
        assert_eq!(row.get("n").and_then(SqlValue::as_i64), Some(3));
    }

    #[test]
    fn test_push_replaces_duplicate_column() {
        let mut row = GenericRow::new();
        row.push("exists", false);
        row.push("exists", true);
        assert_eq!(row.len(), 1);
        assert_eq!(row.get_bool("exists"), Some(true));
    }

    #[test]
    fn test_row_serializes_as_ordered_object() {
        let row = GenericRow::new()
            .with("b", SqlValue::Null)
            .with("a", 1i64)
            .with("c", "x");
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"b":null,"a":1,"c":"x"}"#);
    }

    #[test]
    fn test_value_deserializes_untagged() {
        let values: Vec<SqlValue> = serde_json::from_str(r#"[null, true, 42, 1.5, "it's"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                SqlValue::Null,
                SqlValue::Bool(true),
                SqlValue::Int(42),
                SqlValue::Float(1.5),
                SqlValue::Text("it's".into()),
            ]
        );
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".into()));
    }
}
