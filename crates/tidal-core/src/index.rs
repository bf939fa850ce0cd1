//! Index descriptors and build progress.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::collection::{DistanceMetric, FieldSchema};
use crate::error::{CoreError, CoreResult};
use crate::ids::{BuildId, SegmentId};
use crate::timestamp::Timestamp;

/// Index algorithm families. Their internals live outside this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexType {
    Flat,
    IvfFlat,
    Hnsw,
    AutoIndex,
    /// Scalar inverted index.
    Inverted,
}

impl IndexType {
    /// True for index types built over vector fields.
    #[must_use]
    pub const fn is_vector_index(&self) -> bool {
        !matches!(self, Self::Inverted)
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "FLAT",
            Self::IvfFlat => "IVF_FLAT",
            Self::Hnsw => "HNSW",
            Self::AutoIndex => "AUTOINDEX",
            Self::Inverted => "INVERTED",
        }
    }
}

impl FromStr for IndexType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FLAT" => Ok(Self::Flat),
            "IVF_FLAT" => Ok(Self::IvfFlat),
            "HNSW" => Ok(Self::Hnsw),
            "AUTOINDEX" => Ok(Self::AutoIndex),
            "INVERTED" => Ok(Self::Inverted),
            other => Err(CoreError::schema_violation(
                "index_type",
                format!("unknown index type `{other}`"),
            )),
        }
    }
}

/// Named index configuration for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub field_name: String,
    pub index_name: String,
    pub index_type: IndexType,
    pub metric: Option<DistanceMetric>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl IndexDescriptor {
    /// Default index name used when the caller does not pick one.
    pub const DEFAULT_NAME: &'static str = "_default";

    /// Creates a descriptor with no metric and no parameters.
    #[must_use]
    pub fn new(
        field_name: impl Into<String>,
        index_name: impl Into<String>,
        index_type: IndexType,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            index_name: index_name.into(),
            index_type,
            metric: None,
            params: BTreeMap::new(),
        }
    }

    /// Sets the metric (builder pattern).
    #[must_use]
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Adds a build parameter (builder pattern).
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Checks the descriptor against the field it targets.
    pub fn validate_for(&self, field: &FieldSchema) -> CoreResult<()> {
        if self.index_name.is_empty() {
            return Err(CoreError::schema_violation(
                "index_name",
                "index name cannot be empty",
            ));
        }
        if self.field_name != field.name {
            return Err(CoreError::schema_violation(
                &self.field_name,
                format!("descriptor targets `{}` but field is `{}`", self.field_name, field.name),
            ));
        }
        match (field.data_type.is_vector(), self.index_type.is_vector_index()) {
            (true, true) => {
                if self.metric.is_none() {
                    return Err(CoreError::schema_violation(
                        &field.name,
                        format!("{} requires a metric type", self.index_type.as_str()),
                    ));
                }
            }
            (false, false) => {
                if self.metric.is_some() {
                    return Err(CoreError::schema_violation(
                        &field.name,
                        "scalar indexes do not take a metric type",
                    ));
                }
            }
            (true, false) => {
                return Err(CoreError::schema_violation(
                    &field.name,
                    format!("{} cannot index a vector field", self.index_type.as_str()),
                ))
            }
            (false, true) => {
                return Err(CoreError::schema_violation(
                    &field.name,
                    format!("{} requires a vector field", self.index_type.as_str()),
                ))
            }
        }
        Ok(())
    }
}

/// Index descriptor as persisted in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub descriptor: IndexDescriptor,
    pub build_id: BuildId,
    pub created_ts: Timestamp,
}

/// Build progress reported by `describe_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexProgress {
    pub record: IndexRecord,
    pub total_rows: u64,
    pub indexed_rows: u64,
    pub pending_segments: Vec<SegmentId>,
    pub failed_segments: Vec<(SegmentId, String)>,
    /// True when every flushed segment has a finished build.
    pub complete: bool,
}
