//! Flush coordination: sealing on demand and durable persistence.
//!
//! `flush` is synchronous for the returned segment set (every growing segment
//! is sealed before it returns) and asynchronous for persistence, which runs
//! in a spawned task per call. Segments sealed automatically by the
//! ingestion buffer are picked up by the reconciler.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use tidal_core::{
    CollectionDescriptor, CollectionId, CoreError, CoreResult, FlushConfig, FlushRecord,
    MetadataStore, RetryConfig, SegmentData, SegmentId, SegmentState, SegmentStorage,
};
use tidal_storage::SegmentStateStore;

use crate::ingest::IngestBuffer;
use crate::metrics::{FLUSHES_TOTAL, SEGMENT_PERSIST_DURATION_SECONDS, SEGMENT_PERSIST_TOTAL};
use crate::types::{FlushResult, FlushState};

pub struct FlushCoordinator {
    retry: RetryConfig,
    poll_interval: Duration,
    ingest: Arc<IngestBuffer>,
    segments: Arc<SegmentStateStore>,
    storage: Arc<dyn SegmentStorage>,
    metadata: Arc<dyn MetadataStore>,
    /// Segments owned by a running persistence task.
    in_flight: Mutex<HashSet<SegmentId>>,
}

impl FlushCoordinator {
    pub fn new(
        config: &FlushConfig,
        poll_interval: Duration,
        ingest: Arc<IngestBuffer>,
        segments: Arc<SegmentStateStore>,
        storage: Arc<dyn SegmentStorage>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            retry: config.retry.clone(),
            poll_interval,
            ingest,
            segments,
            storage,
            metadata,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Seals every growing segment and starts persisting all unflushed
    /// sealed segments of the collection.
    ///
    /// The returned set covers every segment holding data written before
    /// `flush_ts`, including ones sealed earlier by size. An empty set is a
    /// valid result.
    pub async fn flush(self: &Arc<Self>, collection: &CollectionDescriptor) -> CoreResult<FlushResult> {
        let collection_id = collection.collection_id;
        let (flush_ts, newly_sealed) = self.ingest.seal_all(collection_id).await?;

        let mut segment_ids: Vec<SegmentId> = self
            .segments
            .list_in_states(collection_id, &[SegmentState::Sealed, SegmentState::Flushing])
            .into_iter()
            .map(|info| info.segment_id)
            .collect();
        segment_ids.extend(newly_sealed.iter().copied());
        segment_ids.sort_unstable();
        segment_ids.dedup();

        self.metadata
            .put_flush_record(&FlushRecord {
                collection_id,
                flush_ts,
                segment_ids: segment_ids.clone(),
            })
            .await?;
        FLUSHES_TOTAL
            .with_label_values(&[collection.name.as_str()])
            .inc();
        info!(
            collection = %collection.name,
            flush_ts = %flush_ts,
            sealed = newly_sealed.len(),
            segments = segment_ids.len(),
            "flush requested"
        );

        self.start_persist(collection_id, true)?;
        Ok(FlushResult {
            flush_ts,
            segment_ids,
        })
    }

    /// Claims every sealed segment of the collection and persists the claimed
    /// set in the background.
    ///
    /// With `retrigger_failed`, segments whose earlier persistence exhausted
    /// its retries are claimed again.
    pub fn start_persist(self: &Arc<Self>, collection_id: CollectionId, retrigger_failed: bool) -> CoreResult<usize> {
        let mut claimed = Vec::new();

        for info in self.segments.list_in_states(collection_id, &[SegmentState::Sealed]) {
            match self.segments.compare_and_transition(
                info.segment_id,
                SegmentState::Sealed,
                SegmentState::Flushing,
                |seg| seg.persist_error = None,
            ) {
                Ok(_) => {
                    self.in_flight.lock().insert(info.segment_id);
                    claimed.push(info.segment_id);
                }
                // Claimed by a concurrent caller
                Err(CoreError::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if retrigger_failed {
            for info in self.segments.list_in_states(collection_id, &[SegmentState::Flushing]) {
                if info.persist_error.is_none() || !self.in_flight.lock().insert(info.segment_id) {
                    continue;
                }
                self.segments.update(info.segment_id, |seg| {
                    if seg.state != SegmentState::Flushing {
                        return Ok(false);
                    }
                    seg.persist_error = None;
                    Ok(true)
                })?;
                debug!(segment_id = %info.segment_id, "re-triggering failed persistence");
                claimed.push(info.segment_id);
            }
        }

        let count = claimed.len();
        if !claimed.is_empty() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.persist_segments(collection_id, claimed).await;
            });
        }
        Ok(count)
    }

    async fn persist_segments(self: Arc<Self>, collection_id: CollectionId, segment_ids: Vec<SegmentId>) {
        let started = Instant::now();
        let max_attempts = self.retry.max_attempts.max(1);

        let mut pending: Vec<SegmentData> = Vec::with_capacity(segment_ids.len());
        for segment_id in segment_ids {
            match self.ingest.sealed_data(collection_id, segment_id) {
                Some(data) => pending.push(data.as_ref().clone()),
                None => {
                    // Dropped while sealed; nothing left to persist
                    debug!(segment_id = %segment_id, "sealed data gone, skipping persistence");
                    self.in_flight.lock().remove(&segment_id);
                }
            }
        }

        let mut attempt = 0u32;
        while !pending.is_empty() {
            attempt += 1;
            let results = self.storage.persist_batch(&pending).await;

            let mut failed = Vec::new();
            for (data, (segment_id, result)) in pending.into_iter().zip(results) {
                match result {
                    Ok(()) => self.mark_flushed(collection_id, segment_id, attempt, started).await,
                    Err(err) if err.is_retryable() && attempt < max_attempts => {
                        SEGMENT_PERSIST_TOTAL.with_label_values(&["retry"]).inc();
                        warn!(
                            segment_id = %segment_id,
                            attempt,
                            max_attempts,
                            error = %err,
                            "segment persistence failed, retrying"
                        );
                        failed.push(data);
                    }
                    Err(err) => self.mark_failed(segment_id, attempt, &err),
                }
            }

            pending = failed;
            if !pending.is_empty() {
                tokio::time::sleep(self.retry.backoff_for_attempt(attempt - 1)).await;
            }
        }
    }

    async fn mark_flushed(
        &self,
        collection_id: CollectionId,
        segment_id: SegmentId,
        attempt: u32,
        started: Instant,
    ) {
        let result = self.segments.compare_and_transition(
            segment_id,
            SegmentState::Flushing,
            SegmentState::Flushed,
            |seg| {
                seg.flush_ts = seg.seal_ts;
                seg.persist_attempts += attempt;
                seg.persist_error = None;
            },
        );
        self.in_flight.lock().remove(&segment_id);
        match result {
            Ok(record) => {
                self.ingest.release_sealed(collection_id, segment_id);
                SEGMENT_PERSIST_TOTAL.with_label_values(&["success"]).inc();
                if let Some(collection) = self.ingest.collection_name(collection_id) {
                    SEGMENT_PERSIST_DURATION_SECONDS
                        .with_label_values(&[collection.as_str()])
                        .observe(started.elapsed().as_secs_f64());
                }
                info!(
                    segment_id = %segment_id,
                    rows = record.info.row_count,
                    attempts = attempt,
                    "segment flushed"
                );
            }
            Err(CoreError::Conflict { .. }) | Err(CoreError::NotFound { .. }) => {
                debug!(segment_id = %segment_id, "segment left Flushing before persistence finished");
                let dropped = self
                    .segments
                    .require(segment_id)
                    .map_or(true, |current| current.info.state == SegmentState::Dropped);
                // The write landed after the drop removed the collection's storage
                if !dropped {
                    return;
                }
                if let Err(e) = self.storage.remove_segments(&[segment_id]).await {
                    warn!(segment_id = %segment_id, error = %e, "failed to remove orphaned segment");
                }
            }
            Err(e) => error!(segment_id = %segment_id, error = %e, "failed to record flushed segment"),
        }
    }

    fn mark_failed(&self, segment_id: SegmentId, attempt: u32, err: &CoreError) {
        SEGMENT_PERSIST_TOTAL.with_label_values(&["failed"]).inc();
        error!(
            segment_id = %segment_id,
            attempts = attempt,
            error = %err,
            "segment persistence failed permanently"
        );
        let reason = err.to_string();
        let recorded = self.segments.update(segment_id, |seg| {
            if seg.state != SegmentState::Flushing {
                return Ok(false);
            }
            seg.persist_attempts += attempt;
            seg.persist_error = Some(reason.clone());
            Ok(true)
        });
        if let Err(e) = recorded {
            debug!(segment_id = %segment_id, error = %e, "persistence failure not recorded");
        }
        self.in_flight.lock().remove(&segment_id);
    }

    /// Classifies `segment_ids` as flushed, pending or failed.
    ///
    /// Unknown ids fail with `NotFound`; dropped segments count as failed.
    pub fn flush_state(&self, segment_ids: &[SegmentId]) -> CoreResult<FlushState> {
        let mut state = FlushState::default();
        for &segment_id in segment_ids {
            let info = self.segments.require(segment_id)?.info;
            match info.state {
                SegmentState::Flushed => state.flushed.push(segment_id),
                SegmentState::Dropped => state.failed.push((segment_id, "segment dropped".to_string())),
                SegmentState::Flushing if info.persist_error.is_some() => {
                    let reason = info.persist_error.unwrap_or_default();
                    state.failed.push((segment_id, reason));
                }
                SegmentState::Growing | SegmentState::Sealed | SegmentState::Flushing => {
                    state.pending.push(segment_id)
                }
            }
        }
        Ok(state)
    }

    pub fn is_flush_complete(&self, segment_ids: &[SegmentId]) -> CoreResult<bool> {
        Ok(self.flush_state(segment_ids)?.is_complete())
    }

    /// Polls until every segment is flushed or the deadline passes.
    ///
    /// A permanently failed segment keeps the wait going; it only ends early
    /// if the caller re-flushes.
    pub async fn wait_for_flush(&self, segment_ids: &[SegmentId], timeout: Duration) -> CoreResult<()> {
        let started = Instant::now();
        loop {
            if self.is_flush_complete(segment_ids)? {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(CoreError::timeout(
                    format!("flush of {} segments", segment_ids.len()),
                    elapsed,
                ));
            }
            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }

    pub async fn last_flush(&self, collection_id: CollectionId) -> CoreResult<Option<FlushRecord>> {
        self.metadata.flush_record(collection_id).await
    }
}
