use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consistency::ConsistencyLevel;
use crate::error::{CoreError, CoreResult};
use crate::ids::CollectionId;
use crate::row::{FieldValue, Row};
use crate::timestamp::Timestamp;

/// Distance metric for vector similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Cosine similarity (higher is more similar)
    Cosine,
    /// Inner product (higher is more similar)
    Dot,
    /// Euclidean (L2) distance (lower is more similar)
    L2,
}

impl DistanceMetric {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
            Self::L2 => "l2",
        }
    }

    /// True when larger scores mean closer matches.
    #[must_use]
    pub const fn higher_is_better(&self) -> bool {
        matches!(self, Self::Cosine | Self::Dot)
    }
}

impl Default for DistanceMetric {
    fn default() -> Self {
        Self::L2
    }
}

impl FromStr for DistanceMetric {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" | "ip" => Ok(Self::Dot),
            "l2" => Ok(Self::L2),
            other => Err(CoreError::schema_violation(
                "metric_type",
                format!("unknown metric `{other}`"),
            )),
        }
    }
}

/// Field data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int64,
    Double,
    VarChar { max_length: u32 },
    Json,
    FloatVector { dim: u32 },
}

impl DataType {
    /// Largest supported vector dimension.
    pub const MAX_DIMENSION: u32 = 32_768;

    /// True for vector types.
    #[must_use]
    pub const fn is_vector(&self) -> bool {
        matches!(self, Self::FloatVector { .. })
    }

    /// Returns the vector dimension, if this is a vector type.
    #[must_use]
    pub const fn dimension(&self) -> Option<u32> {
        match self {
            Self::FloatVector { dim } => Some(*dim),
            _ => None,
        }
    }

    /// Checks whether `value` is a valid instance of this type.
    ///
    /// Returns a description of the mismatch on failure.
    pub fn check(&self, value: &FieldValue) -> Result<(), String> {
        match (self, value) {
            (Self::Bool, FieldValue::Bool(_))
            | (Self::Int64, FieldValue::Int64(_))
            | (Self::Json, FieldValue::Json(_)) => Ok(()),
            (Self::Double, FieldValue::Double(v)) if v.is_finite() => Ok(()),
            (Self::Double, FieldValue::Double(_)) => Err("value is not finite".to_string()),
            (Self::VarChar { max_length }, FieldValue::VarChar(s)) => {
                if s.len() > *max_length as usize {
                    Err(format!(
                        "length {} exceeds max_length {}",
                        s.len(),
                        max_length
                    ))
                } else {
                    Ok(())
                }
            }
            (Self::FloatVector { dim }, FieldValue::FloatVector(v)) => {
                if v.len() != *dim as usize {
                    Err(format!("expected dimension {}, got {}", dim, v.len()))
                } else if v.iter().any(|x| !x.is_finite()) {
                    Err("vector contains NaN or infinite values".to_string())
                } else {
                    Ok(())
                }
            }
            (expected, actual) => Err(format!(
                "expected {:?}, got {}",
                expected,
                actual.type_name()
            )),
        }
    }
}

/// Schema of a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub is_primary_key: bool,
    /// Primary keys are assigned by the collection rather than the caller.
    #[serde(default)]
    pub auto_id: bool,
    #[serde(default)]
    pub nullable: bool,
}

impl FieldSchema {
    /// A non-key scalar or vector field.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_primary_key: false,
            auto_id: false,
            nullable: false,
        }
    }

    /// An `Int64` primary key field.
    #[must_use]
    pub fn int64_primary_key(name: impl Into<String>, auto_id: bool) -> Self {
        Self {
            is_primary_key: true,
            auto_id,
            ..Self::new(name, DataType::Int64)
        }
    }

    /// A `VarChar` primary key field.
    #[must_use]
    pub fn varchar_primary_key(name: impl Into<String>, max_length: u32) -> Self {
        Self {
            is_primary_key: true,
            ..Self::new(name, DataType::VarChar { max_length })
        }
    }

    /// A float vector field.
    #[must_use]
    pub fn float_vector(name: impl Into<String>, dim: u32) -> Self {
        Self::new(name, DataType::FloatVector { dim })
    }

    /// Marks the field nullable (builder pattern).
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Immutable collection schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub description: String,
}

impl CollectionSchema {
    /// Creates a schema from its fields.
    #[must_use]
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self {
            fields,
            description: String::new(),
        }
    }

    /// Validates structural rules: unique names, one primary key, at least one vector field.
    pub fn validate(&self) -> CoreResult<()> {
        if self.fields.is_empty() {
            return Err(CoreError::schema_violation(
                "<schema>",
                "schema must declare at least one field",
            ));
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            validate_name(&field.name).map_err(|m| CoreError::schema_violation(&field.name, m))?;
            if !names.insert(field.name.as_str()) {
                return Err(CoreError::schema_violation(
                    &field.name,
                    "duplicate field name",
                ));
            }
            if let Some(dim) = field.data_type.dimension() {
                if dim == 0 || dim > DataType::MAX_DIMENSION {
                    return Err(CoreError::schema_violation(
                        &field.name,
                        format!(
                            "dimension {} is outside valid range [1, {}]",
                            dim,
                            DataType::MAX_DIMENSION
                        ),
                    ));
                }
            }
            if field.auto_id && !field.is_primary_key {
                return Err(CoreError::schema_violation(
                    &field.name,
                    "auto_id is only allowed on the primary key",
                ));
            }
        }

        let primary_keys: Vec<_> = self.fields.iter().filter(|f| f.is_primary_key).collect();
        let pk = match primary_keys.as_slice() {
            [pk] => *pk,
            [] => {
                return Err(CoreError::schema_violation(
                    "<schema>",
                    "schema must declare exactly one primary key, found none",
                ))
            }
            _ => {
                return Err(CoreError::schema_violation(
                    "<schema>",
                    format!(
                        "schema must declare exactly one primary key, found {}",
                        primary_keys.len()
                    ),
                ))
            }
        };

        match pk.data_type {
            DataType::Int64 => {}
            DataType::VarChar { .. } if !pk.auto_id => {}
            DataType::VarChar { .. } => {
                return Err(CoreError::schema_violation(
                    &pk.name,
                    "auto_id requires an int64 primary key",
                ))
            }
            _ => {
                return Err(CoreError::schema_violation(
                    &pk.name,
                    "primary key must be int64 or varchar",
                ))
            }
        }
        if pk.nullable {
            return Err(CoreError::schema_violation(
                &pk.name,
                "primary key cannot be nullable",
            ));
        }

        if !self.fields.iter().any(|f| f.data_type.is_vector()) {
            return Err(CoreError::schema_violation(
                "<schema>",
                "schema must declare at least one vector field",
            ));
        }

        Ok(())
    }

    /// Returns the primary key field. Call only on validated schemas.
    #[must_use]
    pub fn primary_key(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_primary_key)
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Checks one caller-supplied row. `row_index` is reported in errors.
    pub fn check_row(&self, row: &Row, row_index: usize) -> CoreResult<()> {
        for name in row.fields.keys() {
            if self.field(name).is_none() {
                return Err(CoreError::schema_violation(
                    name,
                    format!("row {row_index}: field is not declared in the schema"),
                ));
            }
        }

        for field in &self.fields {
            match row.get(&field.name) {
                None if field.is_primary_key && field.auto_id => {}
                None if field.nullable => {}
                None => {
                    return Err(CoreError::schema_violation(
                        &field.name,
                        format!("row {row_index}: required field is missing"),
                    ))
                }
                Some(_) if field.is_primary_key && field.auto_id => {
                    return Err(CoreError::schema_violation(
                        &field.name,
                        format!("row {row_index}: primary key is auto-assigned and must not be supplied"),
                    ))
                }
                Some(FieldValue::Null) if field.nullable => {}
                Some(value) => field.data_type.check(value).map_err(|m| {
                    CoreError::schema_violation(&field.name, format!("row {row_index}: {m}"))
                })?,
            }
        }

        Ok(())
    }
}

/// Collection-level options fixed at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Number of shards; each shard owns one growing segment at a time.
    pub shards_num: u32,
    /// Consistency level used when a request does not specify one.
    pub consistency_level: ConsistencyLevel,
    /// When true, search fails instead of falling back to a brute-force scan.
    pub index_required: bool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            shards_num: 1,
            consistency_level: ConsistencyLevel::default(),
            index_required: false,
        }
    }
}

/// Metadata describing a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    /// Stable collection identifier.
    pub collection_id: CollectionId,
    /// Database namespace the name is unique within.
    pub database: String,
    /// Human-readable name for the collection.
    pub name: String,
    pub schema: CollectionSchema,
    pub options: CollectionOptions,
    /// Timestamp allocated when the collection was created.
    pub created_ts: Timestamp,
    /// Creation time in UTC.
    pub created_at: DateTime<Utc>,
}

impl CollectionDescriptor {
    /// Name of the default database namespace.
    pub const DEFAULT_DATABASE: &'static str = "default";

    /// Maximum number of shards per collection.
    pub const MAX_SHARDS: u32 = 64;

    /// Creates a descriptor after validating name, schema and options.
    pub fn new(
        database: impl Into<String>,
        name: impl Into<String>,
        schema: CollectionSchema,
        options: CollectionOptions,
        created_ts: Timestamp,
    ) -> CoreResult<Self> {
        let name = name.into();
        validate_name(&name).map_err(|m| CoreError::schema_violation("collection_name", m))?;
        schema.validate()?;
        if options.shards_num == 0 || options.shards_num > Self::MAX_SHARDS {
            return Err(CoreError::schema_violation(
                "shards_num",
                format!(
                    "shards_num must be between 1 and {}, got {}",
                    Self::MAX_SHARDS,
                    options.shards_num
                ),
            ));
        }

        Ok(Self {
            collection_id: CollectionId::new(),
            database: database.into(),
            name,
            schema,
            options,
            created_ts,
            created_at: Utc::now(),
        })
    }

    /// Qualified `database.name` form used in logs.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }
}

/// Load state of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
}

impl Default for LoadState {
    fn default() -> Self {
        Self::NotLoaded
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    const MAX_NAME_LEN: usize = 255;

    if name.is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!(
            "name must be <= {} characters (got {})",
            MAX_NAME_LEN,
            name.len()
        ));
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c == '_' || c.is_ascii_alphabetic())
        .unwrap_or(false);
    if !first_ok || !name.chars().all(|c| c == '_' || c.is_ascii_alphanumeric()) {
        return Err(format!(
            "name `{name}` must start with a letter or underscore and contain only letters, digits and underscores"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> CollectionSchema {
        CollectionSchema::new(vec![
            FieldSchema::int64_primary_key("id", false),
            FieldSchema::new("title", DataType::VarChar { max_length: 8 }).nullable(),
            FieldSchema::float_vector("vec", 3),
        ])
    }

    #[test]
    fn test_valid_schema() {
        assert!(schema().validate().is_ok());
        assert_eq!(schema().primary_key().unwrap().name, "id");
    }

    #[test]
    fn test_schema_requires_single_primary_key() {
        let mut s = schema();
        s.fields.push(FieldSchema::int64_primary_key("id2", false));
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("exactly one primary key"));
    }

    #[test]
    fn test_schema_requires_vector_field() {
        let s = CollectionSchema::new(vec![FieldSchema::int64_primary_key("id", true)]);
        assert!(matches!(
            s.validate(),
            Err(CoreError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_check_row_reports_offending_field() {
        let s = schema();
        let ok = Row::new().with("id", 1i64).with("vec", vec![0.0f32, 1.0, 2.0]);
        assert!(s.check_row(&ok, 0).is_ok());

        let bad_dim = Row::new().with("id", 1i64).with("vec", vec![0.0f32, 1.0]);
        match s.check_row(&bad_dim, 4) {
            Err(CoreError::SchemaViolation { field, message }) => {
                assert_eq!(field, "vec");
                assert!(message.contains("row 4"));
                assert!(message.contains("expected dimension 3"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let unknown = ok.clone().with("extra", 1i64);
        assert!(s.check_row(&unknown, 0).is_err());

        let too_long = ok.with("title", "far too long");
        assert!(s.check_row(&too_long, 0).is_err());
    }

    #[test]
    fn test_auto_id_rejects_supplied_key() {
        let s = CollectionSchema::new(vec![
            FieldSchema::int64_primary_key("id", true),
            FieldSchema::float_vector("vec", 2),
        ]);
        let row = Row::new().with("id", 5i64).with("vec", vec![0.0f32, 1.0]);
        assert!(s.check_row(&row, 0).is_err());
        let row = Row::new().with("vec", vec![0.0f32, 1.0]);
        assert!(s.check_row(&row, 0).is_ok());
    }

    #[test]
    fn test_descriptor_validates_name_and_shards() {
        let bad = CollectionDescriptor::new(
            "default",
            "bad/name",
            schema(),
            CollectionOptions::default(),
            Timestamp::ZERO,
        );
        assert!(bad.is_err());

        let options = CollectionOptions {
            shards_num: 0,
            ..CollectionOptions::default()
        };
        assert!(CollectionDescriptor::new("default", "ok", schema(), options, Timestamp::ZERO)
            .is_err());
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("IP".parse::<DistanceMetric>().unwrap(), DistanceMetric::Dot);
        assert_eq!("l2".parse::<DistanceMetric>().unwrap(), DistanceMetric::L2);
        assert!("hamming".parse::<DistanceMetric>().is_err());
    }
}
