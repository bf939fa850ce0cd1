//! Distance functions and search hits.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::collection::DistanceMetric;
use crate::ids::SegmentId;
use crate::row::{FieldValue, PrimaryKey};

/// One candidate returned by a segment search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Primary key of the matching row
    pub pk: PrimaryKey,

    /// Distance/similarity score (metric-dependent)
    pub score: f32,

    /// Segment the row was found in
    pub segment_id: SegmentId,

    /// Requested output fields
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl SearchHit {
    /// Creates a hit without output fields.
    #[must_use]
    pub fn new(pk: PrimaryKey, score: f32, segment_id: SegmentId) -> Self {
        Self {
            pk,
            score,
            segment_id,
            fields: BTreeMap::new(),
        }
    }

    /// Sets the output fields (builder pattern).
    #[must_use]
    pub fn with_fields(mut self, fields: BTreeMap<String, FieldValue>) -> Self {
        self.fields = fields;
        self
    }
}

/// Computes the cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 means identical direction.
/// Higher is more similar.
///
/// # Panics
///
/// Panics if the vectors have different dimensions.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let dot = dot_product(a, b);
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Computes the Euclidean distance between two vectors. Lower is more similar.
///
/// # Panics
///
/// Panics if the vectors have different dimensions.
#[must_use]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Computes the dot product between two vectors.
///
/// # Panics
///
/// Panics if the vectors have different dimensions.
#[must_use]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

impl DistanceMetric {
    /// Computes the distance/similarity score between two vectors.
    ///
    /// # Panics
    ///
    /// Panics if the vectors have different dimensions.
    #[must_use]
    pub fn compute(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_similarity(a, b),
            Self::L2 => euclidean_distance(a, b),
            Self::Dot => dot_product(a, b),
        }
    }

    /// Orders two scores so the better match sorts first.
    #[must_use]
    pub fn rank(&self, a: f32, b: f32) -> Ordering {
        if self.higher_is_better() {
            b.total_cmp(&a)
        } else {
            a.total_cmp(&b)
        }
    }

    /// Orders two hits best first, breaking score ties by lowest primary key.
    #[must_use]
    pub fn rank_hits(&self, a: &SearchHit, b: &SearchHit) -> Ordering {
        self.rank(a.score, b.score).then_with(|| a.pk.cmp(&b.pk))
    }
}
