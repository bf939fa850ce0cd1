use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use tidal_core::{CoreError, CoreResult, IndexDescriptor, IndexType, SegmentData, SegmentId};

use crate::flat::FlatIndex;
use crate::inverted::InvertedIndex;
use crate::types::{IndexBuilder, SegmentIndex};

/// Builds exact flat indexes for every vector index type and inverted
/// indexes for scalar fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultIndexBuilder;

#[async_trait]
impl IndexBuilder for DefaultIndexBuilder {
    fn supports(&self, _index_type: IndexType) -> bool {
        true
    }

    async fn build(
        &self,
        segment: &SegmentData,
        descriptor: &IndexDescriptor,
    ) -> CoreResult<Arc<dyn SegmentIndex>> {
        if descriptor.index_type.is_vector_index() {
            Ok(Arc::new(FlatIndex::build(segment, descriptor)?))
        } else {
            Ok(Arc::new(InvertedIndex::build(segment, descriptor)?))
        }
    }
}

/// Injected outcome for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildFailure {
    /// Retry-able error, surfaced as `CoreError::Unavailable`.
    Transient(&'static str),

    /// Non-retry-able error, surfaced as `CoreError::Failed`.
    Permanent(&'static str),

    Ok,
}

/// Wraps another builder and injects failures, per segment or in a global
/// queue consumed one build at a time.
pub struct FlakyIndexBuilder<B> {
    inner: B,
    failure_queue: RwLock<VecDeque<BuildFailure>>,
    segment_failures: RwLock<HashMap<SegmentId, VecDeque<BuildFailure>>>,
    latency: Duration,
    builds: AtomicUsize,
}

impl<B: IndexBuilder> FlakyIndexBuilder<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            failure_queue: RwLock::new(VecDeque::new()),
            segment_failures: RwLock::new(HashMap::new()),
            latency: Duration::ZERO,
            builds: AtomicUsize::new(0),
        }
    }

    /// Simulated build time.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queues outcomes for the next builds, in order.
    pub fn push_failures(&self, pattern: impl IntoIterator<Item = BuildFailure>) {
        self.failure_queue.write().extend(pattern);
    }

    /// Fails the next `times` builds of one segment.
    pub fn fail_segment(&self, segment_id: SegmentId, times: usize, failure: BuildFailure) {
        self.segment_failures
            .write()
            .entry(segment_id)
            .or_default()
            .extend(std::iter::repeat(failure).take(times));
    }

    /// Number of build attempts so far, failed ones included.
    pub fn build_attempts(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    fn next_failure(&self, segment_id: SegmentId) -> Option<CoreError> {
        let failure = self
            .segment_failures
            .write()
            .get_mut(&segment_id)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.failure_queue.write().pop_front())?;
        match failure {
            BuildFailure::Transient(msg) => Some(CoreError::unavailable(
                "index builder",
                format!("segment {segment_id}: {msg}"),
            )),
            BuildFailure::Permanent(msg) => Some(CoreError::failed(
                "build_index",
                format!("segment {segment_id}: {msg}"),
            )),
            BuildFailure::Ok => None,
        }
    }
}

#[async_trait]
impl<B: IndexBuilder> IndexBuilder for FlakyIndexBuilder<B> {
    fn supports(&self, index_type: IndexType) -> bool {
        self.inner.supports(index_type)
    }

    async fn build(
        &self,
        segment: &SegmentData,
        descriptor: &IndexDescriptor,
    ) -> CoreResult<Arc<dyn SegmentIndex>> {
        self.builds.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(err) = self.next_failure(segment.segment_id) {
            return Err(err);
        }
        self.inner.build(segment, descriptor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_core::{CollectionId, DistanceMetric};

    fn empty_segment(id: u64) -> SegmentData {
        SegmentData {
            segment_id: SegmentId::new(id),
            collection_id: CollectionId::new(),
            shard: 0,
            rows: Vec::new(),
        }
    }

    fn vector_descriptor() -> IndexDescriptor {
        IndexDescriptor::new("vec", "_default", IndexType::IvfFlat).with_metric(DistanceMetric::L2)
    }

    #[tokio::test]
    async fn test_default_builder_picks_index_kind() {
        let builder = DefaultIndexBuilder;
        let index = builder
            .build(&empty_segment(1), &vector_descriptor())
            .await
            .unwrap();
        assert!(index.is_empty());
        assert_eq!(index.descriptor().index_type, IndexType::IvfFlat);

        let scalar = IndexDescriptor::new("tag", "tag_idx", IndexType::Inverted);
        let index = builder.build(&empty_segment(1), &scalar).await.unwrap();
        assert_eq!(index.segment_id(), SegmentId::new(1));
    }

    #[tokio::test]
    async fn test_flaky_builder_injects_failures() {
        let builder = FlakyIndexBuilder::new(DefaultIndexBuilder);
        builder.fail_segment(SegmentId::new(2), 1, BuildFailure::Transient("oom"));
        builder.push_failures([BuildFailure::Permanent("corrupt")]);

        let err = builder
            .build(&empty_segment(2), &vector_descriptor())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::Unavailable { .. }));

        let err = builder
            .build(&empty_segment(3), &vector_descriptor())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::Failed { .. }));

        assert!(builder
            .build(&empty_segment(2), &vector_descriptor())
            .await
            .is_ok());
        assert_eq!(builder.build_attempts(), 3);
    }
}
