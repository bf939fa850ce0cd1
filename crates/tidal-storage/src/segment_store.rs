//! Versioned segment state store.
//!
//! Every segment record carries a version that is bumped on each write.
//! Ingestion, flush, index build and load coordinate only through this store:
//! writers state the lifecycle state (or version) they observed, and a stale
//! observation fails with `CoreError::Conflict` so the caller can re-read and
//! retry. Each successful write wakes the reconciler through a shared
//! [`Notify`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::debug;

use tidal_core::{CollectionId, CoreError, CoreResult, SegmentId, SegmentInfo, SegmentState};

/// A segment record together with its store version.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedSegment {
    pub info: SegmentInfo,
    pub version: u64,
}

#[derive(Default)]
struct StoreInner {
    segments: HashMap<SegmentId, VersionedSegment>,
    by_collection: HashMap<CollectionId, BTreeSet<SegmentId>>,
}

/// In-memory segment state store with compare-and-transition semantics.
pub struct SegmentStateStore {
    inner: RwLock<StoreInner>,
    next_segment_id: AtomicU64,
    changed: Arc<Notify>,
}

impl SegmentStateStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            next_segment_id: AtomicU64::new(1),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Handle notified after every successful write.
    pub fn change_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.changed)
    }

    /// Allocates a fresh, never reused segment identifier.
    pub fn allocate_segment_id(&self) -> SegmentId {
        SegmentId::new(self.next_segment_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a new segment record at version 1.
    pub fn insert(&self, info: SegmentInfo) -> CoreResult<VersionedSegment> {
        let segment_id = info.segment_id;
        let record = {
            let mut inner = self.inner.write();
            if inner.segments.contains_key(&segment_id) {
                return Err(CoreError::already_exists("segment", segment_id.to_string()));
            }
            inner
                .by_collection
                .entry(info.collection_id)
                .or_default()
                .insert(segment_id);
            let record = VersionedSegment { info, version: 1 };
            inner.segments.insert(segment_id, record.clone());
            record
        };
        debug!(segment_id = %segment_id, state = %record.info.state, "segment registered");
        self.changed.notify_one();
        Ok(record)
    }

    /// Reads one segment record.
    pub fn get(&self, segment_id: SegmentId) -> Option<VersionedSegment> {
        self.inner.read().segments.get(&segment_id).cloned()
    }

    /// Reads one segment record, failing with `NotFound` when absent.
    pub fn require(&self, segment_id: SegmentId) -> CoreResult<VersionedSegment> {
        self.get(segment_id)
            .ok_or_else(|| CoreError::not_found("segment", segment_id.to_string()))
    }

    /// Lists every segment of a collection, ordered by segment id.
    pub fn list(&self, collection_id: CollectionId) -> Vec<SegmentInfo> {
        let inner = self.inner.read();
        inner
            .by_collection
            .get(&collection_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.segments.get(id))
                    .map(|record| record.info.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Lists segments of a collection whose state is one of `states`.
    pub fn list_in_states(
        &self,
        collection_id: CollectionId,
        states: &[SegmentState],
    ) -> Vec<SegmentInfo> {
        self.list(collection_id)
            .into_iter()
            .filter(|info| states.contains(&info.state))
            .collect()
    }

    /// Collections that currently have at least one segment.
    pub fn collections(&self) -> Vec<CollectionId> {
        self.inner.read().by_collection.keys().copied().collect()
    }

    /// Atomically moves a segment from `expected` to `next`, applying `mutate`
    /// to the record in the same write.
    ///
    /// Fails with `Conflict` when the stored state is not `expected`, and with
    /// `InvalidState` when `expected → next` is not a legal transition.
    pub fn compare_and_transition<F>(
        &self,
        segment_id: SegmentId,
        expected: SegmentState,
        next: SegmentState,
        mutate: F,
    ) -> CoreResult<VersionedSegment>
    where
        F: FnOnce(&mut SegmentInfo),
    {
        if !expected.can_transition_to(next) {
            return Err(CoreError::invalid_state(format!(
                "segment {segment_id}: illegal transition {expected} -> {next}"
            )));
        }

        let record = {
            let mut inner = self.inner.write();
            let record = inner
                .segments
                .get_mut(&segment_id)
                .ok_or_else(|| CoreError::not_found("segment", segment_id.to_string()))?;
            if record.info.state != expected {
                return Err(CoreError::conflict(
                    "segment",
                    segment_id,
                    expected,
                    record.info.state,
                ));
            }
            mutate(&mut record.info);
            record.info.state = next;
            record.version += 1;
            record.clone()
        };

        debug!(
            segment_id = %segment_id,
            from = %expected,
            to = %next,
            version = record.version,
            "segment transitioned"
        );
        self.changed.notify_one();
        Ok(record)
    }

    /// Applies `mutate` if the stored version still equals `expected_version`.
    ///
    /// `mutate` may not change the lifecycle state; use
    /// [`compare_and_transition`](Self::compare_and_transition) for that.
    pub fn compare_and_update<F>(
        &self,
        segment_id: SegmentId,
        expected_version: u64,
        mutate: F,
    ) -> CoreResult<VersionedSegment>
    where
        F: FnOnce(&mut SegmentInfo),
    {
        let record = {
            let mut inner = self.inner.write();
            let record = inner
                .segments
                .get_mut(&segment_id)
                .ok_or_else(|| CoreError::not_found("segment", segment_id.to_string()))?;
            if record.version != expected_version {
                return Err(CoreError::conflict(
                    "segment",
                    segment_id,
                    format!("v{expected_version}"),
                    format!("v{}", record.version),
                ));
            }
            let state = record.info.state;
            let mut updated = record.info.clone();
            mutate(&mut updated);
            if updated.state != state {
                return Err(CoreError::internal(format!(
                    "segment {segment_id}: state changed outside compare_and_transition"
                )));
            }
            record.info = updated;
            record.version += 1;
            record.clone()
        };
        self.changed.notify_one();
        Ok(record)
    }

    /// Read-modify-write that re-reads on version conflict.
    ///
    /// `mutate` sees the latest record each time and returns `Ok(false)` to
    /// skip the write.
    pub fn update<F>(&self, segment_id: SegmentId, mut mutate: F) -> CoreResult<Option<VersionedSegment>>
    where
        F: FnMut(&mut SegmentInfo) -> CoreResult<bool>,
    {
        loop {
            let current = self.require(segment_id)?;
            let mut candidate = current.info.clone();
            if !mutate(&mut candidate)? {
                return Ok(None);
            }
            match self.compare_and_update(segment_id, current.version, |info| *info = candidate) {
                Ok(record) => return Ok(Some(record)),
                Err(CoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Moves every live segment of a collection to `Dropped`.
    ///
    /// Returns the ids of the segments that were dropped by this call.
    pub fn drop_collection(&self, collection_id: CollectionId) -> Vec<SegmentId> {
        let dropped: Vec<SegmentId> = {
            let mut inner = self.inner.write();
            let ids: Vec<SegmentId> = inner
                .by_collection
                .get(&collection_id)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            ids.into_iter()
                .filter(|id| match inner.segments.get_mut(id) {
                    Some(record) if record.info.state.can_transition_to(SegmentState::Dropped) => {
                        record.info.state = SegmentState::Dropped;
                        record.version += 1;
                        true
                    }
                    _ => false,
                })
                .collect()
        };
        if !dropped.is_empty() {
            debug!(collection_id = %collection_id, count = dropped.len(), "segments dropped");
            self.changed.notify_one();
        }
        dropped
    }

    /// Removes every record of a collection. Returns the number removed.
    pub fn purge_collection(&self, collection_id: CollectionId) -> usize {
        let mut inner = self.inner.write();
        let ids = inner.by_collection.remove(&collection_id).unwrap_or_default();
        for id in &ids {
            inner.segments.remove(id);
        }
        ids.len()
    }

    /// Segment counts per state for a collection.
    pub fn state_counts(&self, collection_id: CollectionId) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for info in self.list(collection_id) {
            *counts.entry(info.state.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for SegmentStateStore {
    fn default() -> Self {
        Self::new()
    }
}
