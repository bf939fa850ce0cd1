use std::sync::Arc;

use async_trait::async_trait;
use roaring::RoaringBitmap;

use tidal_core::{CoreResult, IndexDescriptor, IndexType, SegmentData, SegmentId};

/// A candidate row inside one segment, addressed by its row offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredOffset {
    pub offset: u32,
    pub score: f32,
}

/// An index built over one field of one sealed segment.
///
/// Offsets are positions in [`SegmentData::rows`]; callers pass the set of
/// offsets visible to the current read so deleted or future rows never
/// occupy a top-k slot.
pub trait SegmentIndex: Send + Sync {
    fn segment_id(&self) -> SegmentId;

    fn descriptor(&self) -> &IndexDescriptor;

    /// Number of rows covered by the index.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the best `k` rows among `allowed`, best first.
    ///
    /// Score ties are broken by lowest primary key.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        allowed: &RoaringBitmap,
    ) -> CoreResult<Vec<ScoredOffset>>;
}

/// Builds a [`SegmentIndex`] from a sealed segment's rows.
///
/// Index internals live behind this trait; the lifecycle engine only decides
/// when a build runs and which segments it covers.
#[async_trait]
pub trait IndexBuilder: Send + Sync {
    /// Index types this builder can produce.
    fn supports(&self, index_type: IndexType) -> bool;

    async fn build(
        &self,
        segment: &SegmentData,
        descriptor: &IndexDescriptor,
    ) -> CoreResult<Arc<dyn SegmentIndex>>;
}
