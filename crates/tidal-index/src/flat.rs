//! Exact (flat) vector index over one segment.
//!
//! Exhaustively compares the query against every allowed row. It is the
//! index produced for every vector index type, and the correctness reference
//! the brute-force fallback is checked against.

use roaring::RoaringBitmap;

use tidal_core::{
    CoreError, CoreResult, DistanceMetric, FieldValue, IndexDescriptor, PrimaryKey, SegmentData,
    SegmentId,
};

use crate::types::{ScoredOffset, SegmentIndex};

/// Flat index: vectors laid out contiguously by row offset.
///
/// Time complexity: O(n·d) per search where n = allowed rows, d = dimension
pub struct FlatIndex {
    segment_id: SegmentId,
    descriptor: IndexDescriptor,
    metric: DistanceMetric,
    dim: usize,
    pks: Vec<PrimaryKey>,
    vectors: Vec<f32>,
    /// Offsets holding a non-null vector.
    present: RoaringBitmap,
}

impl FlatIndex {
    /// Builds the index from the rows of a sealed segment.
    pub fn build(segment: &SegmentData, descriptor: &IndexDescriptor) -> CoreResult<Self> {
        let metric = descriptor.metric.ok_or_else(|| {
            CoreError::schema_violation(&descriptor.field_name, "vector index requires a metric")
        })?;

        let mut dim = None;
        let mut pks = Vec::with_capacity(segment.len());
        let mut vectors = Vec::new();
        let mut present = RoaringBitmap::new();
        let mut pending_nulls = 0usize;
        for (offset, row) in segment.rows.iter().enumerate() {
            pks.push(row.pk.clone());
            let vector = match row.get(&descriptor.field_name) {
                None | Some(FieldValue::Null) => {
                    match dim {
                        Some(d) => vectors.extend(std::iter::repeat(0.0).take(d)),
                        None => pending_nulls += 1,
                    }
                    continue;
                }
                Some(value) => value.as_vector().ok_or_else(|| {
                    CoreError::invalid_state(format!(
                        "segment {} row {offset}: field `{}` is not a vector",
                        segment.segment_id, descriptor.field_name
                    ))
                })?,
            };
            match dim {
                None => {
                    dim = Some(vector.len());
                    // Backfill placeholders for leading null rows
                    vectors.extend(std::iter::repeat(0.0).take(pending_nulls * vector.len()));
                }
                Some(d) if d != vector.len() => {
                    return Err(CoreError::invalid_state(format!(
                        "segment {} row {offset}: dimension mismatch: expected {d}, got {}",
                        segment.segment_id,
                        vector.len()
                    )))
                }
                Some(_) => {}
            }
            vectors.extend_from_slice(vector);
            present.insert(offset as u32);
        }

        Ok(Self {
            segment_id: segment.segment_id,
            descriptor: descriptor.clone(),
            metric,
            dim: dim.unwrap_or(0),
            pks,
            vectors,
            present,
        })
    }

    /// Returns the vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dim
    }

    fn vector(&self, offset: usize) -> &[f32] {
        &self.vectors[offset * self.dim..(offset + 1) * self.dim]
    }
}

impl SegmentIndex for FlatIndex {
    fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    fn len(&self) -> usize {
        self.pks.len()
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        allowed: &RoaringBitmap,
    ) -> CoreResult<Vec<ScoredOffset>> {
        if self.pks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(CoreError::schema_violation(
                &self.descriptor.field_name,
                format!(
                    "query dimension mismatch: expected {}, got {}",
                    self.dim,
                    query.len()
                ),
            ));
        }

        let mut results: Vec<ScoredOffset> = (allowed & &self.present)
            .iter()
            .map(|offset| ScoredOffset {
                offset,
                score: self.metric.compute(query, self.vector(offset as usize)),
            })
            .collect();

        results.sort_by(|a, b| {
            self.metric.rank(a.score, b.score).then_with(|| {
                self.pks[a.offset as usize].cmp(&self.pks[b.offset as usize])
            })
        });
        results.truncate(k);
        Ok(results)
    }
}
