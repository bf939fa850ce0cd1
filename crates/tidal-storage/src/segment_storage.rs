//! In-memory durable segment storage with failure injection.
//!
//! Stands in for the object store behind flush. Failures can be injected
//! globally (a queue consumed one segment write at a time), per segment, or
//! permanently, so tests can drive the per-segment retry path.
//!
//! ```rust
//! use tidal_storage::{MemorySegmentStorage, StorageFailure};
//!
//! let storage = MemorySegmentStorage::new_with_failures(vec![
//!     StorageFailure::Transient("503 Service Unavailable"),
//!     StorageFailure::Ok,
//! ]);
//! assert_eq!(storage.persisted_count(), 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use tidal_core::{CoreError, CoreResult, SegmentData, SegmentId, SegmentStorage};

/// Injected outcome for one segment write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageFailure {
    /// Retry-able error, surfaced as `CoreError::Unavailable`.
    Transient(&'static str),

    /// Non-retry-able error, surfaced as `CoreError::Failed`.
    Permanent(&'static str),

    /// Success (no error).
    Ok,
}

impl StorageFailure {
    fn to_error(&self, segment_id: SegmentId) -> Option<CoreError> {
        match self {
            Self::Transient(msg) => Some(CoreError::unavailable(
                "segment storage",
                format!("segment {segment_id}: {msg}"),
            )),
            Self::Permanent(msg) => Some(CoreError::failed(
                "persist_segment",
                format!("segment {segment_id}: {msg}"),
            )),
            Self::Ok => None,
        }
    }
}

/// Storage call history entry.
#[derive(Debug, Clone)]
pub struct StorageCall {
    /// `"persist"`, `"read"` or `"remove"`.
    pub operation: &'static str,
    pub segment_id: SegmentId,
    pub success: bool,
    pub timestamp: Instant,
}

/// In-memory [`SegmentStorage`] implementation.
#[derive(Clone, Default)]
pub struct MemorySegmentStorage {
    segments: Arc<RwLock<HashMap<SegmentId, SegmentData>>>,
    failure_queue: Arc<RwLock<VecDeque<StorageFailure>>>,
    segment_failures: Arc<RwLock<HashMap<SegmentId, VecDeque<StorageFailure>>>>,
    always_fail: Arc<RwLock<Option<StorageFailure>>>,
    latency: Duration,
    history: Arc<RwLock<Vec<StorageCall>>>,
}

impl MemorySegmentStorage {
    /// Create storage with no failures and no latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage with a deterministic failure pattern.
    ///
    /// Outcomes are consumed in order, one per segment write. Once the queue
    /// is empty, writes succeed.
    pub fn new_with_failures(pattern: Vec<StorageFailure>) -> Self {
        let storage = Self::new();
        *storage.failure_queue.write() = pattern.into();
        storage
    }

    /// Simulated latency per batch.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fails the next `times` writes of one segment.
    pub fn fail_segment(&self, segment_id: SegmentId, times: usize, failure: StorageFailure) {
        self.segment_failures
            .write()
            .entry(segment_id)
            .or_default()
            .extend(std::iter::repeat(failure).take(times));
    }

    /// Fails every write until cleared with `None`.
    pub fn set_always_fail(&self, failure: Option<StorageFailure>) {
        *self.always_fail.write() = failure;
    }

    /// Number of durably stored segments.
    pub fn persisted_count(&self) -> usize {
        self.segments.read().len()
    }

    /// True if the segment is durably stored.
    pub fn contains(&self, segment_id: SegmentId) -> bool {
        self.segments.read().contains_key(&segment_id)
    }

    /// Number of persist attempts recorded for a segment.
    pub fn persist_attempts(&self, segment_id: SegmentId) -> usize {
        self.history
            .read()
            .iter()
            .filter(|call| call.operation == "persist" && call.segment_id == segment_id)
            .count()
    }

    /// Full call history.
    pub fn call_history(&self) -> Vec<StorageCall> {
        self.history.read().clone()
    }

    fn next_failure(&self, segment_id: SegmentId) -> Option<CoreError> {
        if let Some(failure) = self.always_fail.read().as_ref() {
            return failure.to_error(segment_id);
        }
        if let Some(failure) = self
            .segment_failures
            .write()
            .get_mut(&segment_id)
            .and_then(VecDeque::pop_front)
        {
            return failure.to_error(segment_id);
        }
        self.failure_queue
            .write()
            .pop_front()
            .and_then(|failure| failure.to_error(segment_id))
    }

    fn record(&self, operation: &'static str, segment_id: SegmentId, success: bool) {
        self.history.write().push(StorageCall {
            operation,
            segment_id,
            success,
            timestamp: Instant::now(),
        });
    }
}

#[async_trait]
impl SegmentStorage for MemorySegmentStorage {
    async fn persist_batch(&self, segments: &[SegmentData]) -> Vec<(SegmentId, CoreResult<()>)> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        segments
            .iter()
            .map(|segment| {
                let segment_id = segment.segment_id;
                let result = match self.next_failure(segment_id) {
                    Some(err) => Err(err),
                    None => {
                        self.segments.write().insert(segment_id, segment.clone());
                        Ok(())
                    }
                };
                self.record("persist", segment_id, result.is_ok());
                debug!(segment_id = %segment_id, ok = result.is_ok(), rows = segment.len(), "persist segment");
                (segment_id, result)
            })
            .collect()
    }

    async fn read_segment(&self, segment_id: SegmentId) -> CoreResult<SegmentData> {
        let found = self.segments.read().get(&segment_id).cloned();
        self.record("read", segment_id, found.is_some());
        found.ok_or_else(|| CoreError::not_found("persisted segment", segment_id.to_string()))
    }

    async fn remove_segments(&self, segment_ids: &[SegmentId]) -> CoreResult<()> {
        let mut segments = self.segments.write();
        for segment_id in segment_ids {
            segments.remove(segment_id);
        }
        drop(segments);
        for segment_id in segment_ids {
            self.record("remove", *segment_id, true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_core::CollectionId;

    fn data(id: u64) -> SegmentData {
        SegmentData {
            segment_id: SegmentId::new(id),
            collection_id: CollectionId::new(),
            shard: 0,
            rows: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_failure_queue_is_consumed_per_segment() {
        let storage = MemorySegmentStorage::new_with_failures(vec![
            StorageFailure::Ok,
            StorageFailure::Transient("503 Service Unavailable"),
        ]);
        let results = storage.persist_batch(&[data(1), data(2), data(3)]).await;

        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(CoreError::Unavailable { .. })));
        assert!(results[2].1.is_ok());
        assert_eq!(storage.persisted_count(), 2);
        assert!(!storage.contains(SegmentId::new(2)));
    }

    #[tokio::test]
    async fn test_segment_failures_and_always_fail() {
        let storage = MemorySegmentStorage::new();
        storage.fail_segment(SegmentId::new(7), 2, StorageFailure::Permanent("403 Forbidden"));

        for _ in 0..2 {
            let results = storage.persist_batch(&[data(7)]).await;
            assert!(matches!(results[0].1, Err(CoreError::Failed { .. })));
        }
        assert!(storage.persist_batch(&[data(7)]).await[0].1.is_ok());
        assert_eq!(storage.persist_attempts(SegmentId::new(7)), 3);

        storage.set_always_fail(Some(StorageFailure::Transient("down")));
        assert!(storage.persist_batch(&[data(8)]).await[0].1.is_err());
        storage.set_always_fail(None);
        assert!(storage.persist_batch(&[data(8)]).await[0].1.is_ok());
    }

    #[tokio::test]
    async fn test_read_and_remove() {
        let storage = MemorySegmentStorage::new();
        storage.persist_batch(&[data(1)]).await;
        assert!(storage.read_segment(SegmentId::new(1)).await.is_ok());
        storage.remove_segments(&[SegmentId::new(1)]).await.unwrap();
        assert!(matches!(
            storage.read_segment(SegmentId::new(1)).await,
            Err(CoreError::NotFound { .. })
        ));
    }
}
