//! Scalar inverted index: field value to row-offset bitmap.

use std::collections::HashMap;

use roaring::RoaringBitmap;

use tidal_core::{CoreError, CoreResult, FieldValue, IndexDescriptor, SegmentData, SegmentId};

use crate::types::{ScoredOffset, SegmentIndex};

/// Term key; doubles are keyed by bit pattern so `-0.0` and `0.0` differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Term {
    Bool(bool),
    Int64(i64),
    Double(u64),
    VarChar(String),
}

impl Term {
    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bool(v) => Some(Self::Bool(*v)),
            FieldValue::Int64(v) => Some(Self::Int64(*v)),
            FieldValue::Double(v) => Some(Self::Double(v.to_bits())),
            FieldValue::VarChar(v) => Some(Self::VarChar(v.clone())),
            _ => None,
        }
    }
}

pub struct InvertedIndex {
    segment_id: SegmentId,
    descriptor: IndexDescriptor,
    rows: usize,
    postings: HashMap<Term, RoaringBitmap>,
}

impl InvertedIndex {
    pub fn build(segment: &SegmentData, descriptor: &IndexDescriptor) -> CoreResult<Self> {
        let mut postings: HashMap<Term, RoaringBitmap> = HashMap::new();
        for (offset, row) in segment.rows.iter().enumerate() {
            let Some(value) = row.get(&descriptor.field_name) else {
                continue;
            };
            if matches!(value, FieldValue::Null) {
                continue;
            }
            let term = Term::from_value(value).ok_or_else(|| {
                CoreError::invalid_state(format!(
                    "segment {} row {offset}: {} values cannot be indexed by INVERTED",
                    segment.segment_id,
                    value.type_name()
                ))
            })?;
            let offset = u32::try_from(offset)
                .map_err(|_| CoreError::internal("segment row offset exceeds u32"))?;
            postings.entry(term).or_default().insert(offset);
        }

        Ok(Self {
            segment_id: segment.segment_id,
            descriptor: descriptor.clone(),
            rows: segment.len(),
            postings,
        })
    }

    /// Offsets of rows whose field equals `value`.
    #[must_use]
    pub fn lookup(&self, value: &FieldValue) -> RoaringBitmap {
        Term::from_value(value)
            .and_then(|term| self.postings.get(&term).cloned())
            .unwrap_or_default()
    }
}

impl SegmentIndex for InvertedIndex {
    fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    fn len(&self) -> usize {
        self.rows
    }

    fn search(
        &self,
        _query: &[f32],
        _k: usize,
        _allowed: &RoaringBitmap,
    ) -> CoreResult<Vec<ScoredOffset>> {
        Err(CoreError::invalid_state(format!(
            "index `{}` on `{}` is a scalar index and cannot serve vector search",
            self.descriptor.index_name, self.descriptor.field_name
        )))
    }
}
