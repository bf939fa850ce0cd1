//! Row and field value types.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::timestamp::Timestamp;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int64(i64),
    Double(f64),
    VarChar(String),
    Json(JsonValue),
    FloatVector(Vec<f32>),
}

impl FieldValue {
    /// Approximate in-memory footprint, used for segment byte-size thresholds.
    #[must_use]
    pub fn approx_size_bytes(&self) -> usize {
        match self {
            Self::Null => 1,
            Self::Bool(_) => 1,
            Self::Int64(_) | Self::Double(_) => 8,
            Self::VarChar(s) => s.len(),
            Self::Json(v) => v.to_string().len(),
            Self::FloatVector(v) => v.len() * std::mem::size_of::<f32>(),
        }
    }

    /// Returns the vector payload if this is a vector value.
    #[must_use]
    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Self::FloatVector(v) => Some(v),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int64(_) => "int64",
            Self::Double(_) => "double",
            Self::VarChar(_) => "varchar",
            Self::Json(_) => "json",
            Self::FloatVector(_) => "float_vector",
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::VarChar(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::VarChar(value.to_string())
    }
}

impl From<Vec<f32>> for FieldValue {
    fn from(value: Vec<f32>) -> Self {
        Self::FloatVector(value)
    }
}

impl From<JsonValue> for FieldValue {
    fn from(value: JsonValue) -> Self {
        Self::Json(value)
    }
}

/// Primary key value. Ordering is used to break score ties in search results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Int64(i64),
    VarChar(String),
}

impl PrimaryKey {
    /// Extracts a primary key from a field value.
    #[must_use]
    pub fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Int64(v) => Some(Self::Int64(*v)),
            FieldValue::VarChar(v) => Some(Self::VarChar(v.clone())),
            _ => None,
        }
    }

    /// Converts the key back into a field value.
    #[must_use]
    pub fn to_value(&self) -> FieldValue {
        match self {
            Self::Int64(v) => FieldValue::Int64(*v),
            Self::VarChar(v) => FieldValue::VarChar(v.clone()),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::VarChar(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        Self::VarChar(value.to_string())
    }
}

/// Caller-supplied row: field name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub fields: BTreeMap<String, FieldValue>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field value (builder pattern).
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Returns a field value by name.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

/// A row as stored in a segment: primary key, write timestamp, and field values.
///
/// Immutable once its segment is sealed; deletes are recorded as tombstones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRecord {
    pub pk: PrimaryKey,
    pub timestamp: Timestamp,
    pub fields: BTreeMap<String, FieldValue>,
}

impl RowRecord {
    /// Returns a field value by name.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Approximate in-memory footprint.
    #[must_use]
    pub fn approx_size_bytes(&self) -> usize {
        self.fields
            .iter()
            .map(|(name, value)| name.len() + value.approx_size_bytes())
            .sum::<usize>()
            + std::mem::size_of::<Timestamp>()
    }

    /// Orders records so the newest version of a key comes first.
    #[must_use]
    pub fn newer_first(a: &Self, b: &Self) -> Ordering {
        b.timestamp.cmp(&a.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_builder() {
        let row = Row::new()
            .with("id", 7i64)
            .with("title", "hello")
            .with("vec", vec![1.0f32, 2.0]);
        assert_eq!(row.get("id"), Some(&FieldValue::Int64(7)));
        assert_eq!(row.get("vec").and_then(FieldValue::as_vector), Some(&[1.0f32, 2.0][..]));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_primary_key_ordering_breaks_ties() {
        let mut keys = vec![PrimaryKey::from(9), PrimaryKey::from(-3), PrimaryKey::from(4)];
        keys.sort();
        assert_eq!(keys, vec![PrimaryKey::from(-3), PrimaryKey::from(4), PrimaryKey::from(9)]);
    }

    #[test]
    fn test_size_accounts_for_vectors() {
        let value = FieldValue::FloatVector(vec![0.0; 128]);
        assert_eq!(value.approx_size_bytes(), 512);
    }
}
