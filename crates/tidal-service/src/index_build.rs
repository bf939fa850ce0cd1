//! Index build coordination.
//!
//! An index request records one [`IndexRecord`] per field; each flushed
//! segment then tracks its own build of that record in
//! `SegmentInfo::indexes`. Builds run in the background, bounded by
//! `index.max_parallel_builds`, and segments flushed later are picked up by
//! the reconciler's incremental pass.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use tidal_core::{
    BuildId, CollectionDescriptor, CollectionId, CoreError, CoreResult, IndexBuildState,
    IndexConfig, IndexDescriptor, IndexProgress, IndexRecord, MetadataStore, RetryConfig,
    SegmentId, SegmentIndexState, SegmentInfo, SegmentState, SegmentStorage, TimestampOracle,
};
use tidal_index::{IndexBuilder, SegmentIndex};
use tidal_storage::{retry_with_backoff, SegmentStateStore};

use crate::metrics::INDEX_BUILDS_TOTAL;

/// Built per-segment index artifacts, keyed by segment and build.
#[derive(Default)]
pub struct IndexArtifacts {
    inner: RwLock<HashMap<(SegmentId, BuildId), Arc<dyn SegmentIndex>>>,
}

impl IndexArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, segment_id: SegmentId, build_id: BuildId, index: Arc<dyn SegmentIndex>) {
        self.inner.write().insert((segment_id, build_id), index);
    }

    pub fn get(&self, segment_id: SegmentId, build_id: BuildId) -> Option<Arc<dyn SegmentIndex>> {
        self.inner.read().get(&(segment_id, build_id)).cloned()
    }

    pub fn remove(&self, segment_id: SegmentId, build_id: BuildId) {
        self.inner.write().remove(&(segment_id, build_id));
    }

    /// Removes every artifact of a build.
    pub fn remove_build(&self, build_id: BuildId) {
        self.inner.write().retain(|(_, b), _| *b != build_id);
    }

    pub fn remove_segments(&self, segment_ids: &[SegmentId]) {
        self.inner
            .write()
            .retain(|(segment_id, _), _| !segment_ids.contains(segment_id));
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// True if `info` holds a finished build of `record`.
pub(crate) fn has_current_build(info: &SegmentInfo, record: &IndexRecord) -> bool {
    info.indexes
        .get(&record.descriptor.field_name)
        .map_or(false, |s| {
            s.build_id == record.build_id && s.state == IndexBuildState::Finished
        })
}

/// Marks `record`'s build of a flushed segment as started.
///
/// Fails (returns false) when the segment left `Flushed` or its build state
/// for the field is no longer `observed`, so a decision taken on a stale
/// listing never overwrites a newer state.
fn claim_build(
    seg: &mut SegmentInfo,
    observed: Option<&SegmentIndexState>,
    record: &IndexRecord,
) -> bool {
    let field = &record.descriptor.field_name;
    if seg.state != SegmentState::Flushed || seg.indexes.get(field) != observed {
        return false;
    }
    seg.indexes.insert(
        field.clone(),
        SegmentIndexState {
            index_name: record.descriptor.index_name.clone(),
            build_id: record.build_id,
            state: IndexBuildState::InProgress { attempts: 0 },
        },
    );
    true
}

pub struct IndexCoordinator {
    retry: RetryConfig,
    poll_interval: Duration,
    segments: Arc<SegmentStateStore>,
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn SegmentStorage>,
    oracle: Arc<dyn TimestampOracle>,
    builder: Arc<dyn IndexBuilder>,
    artifacts: Arc<IndexArtifacts>,
    permits: Arc<Semaphore>,
    in_flight: Mutex<HashSet<(SegmentId, BuildId)>>,
}

impl IndexCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &IndexConfig,
        poll_interval: Duration,
        segments: Arc<SegmentStateStore>,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn SegmentStorage>,
        oracle: Arc<dyn TimestampOracle>,
        builder: Arc<dyn IndexBuilder>,
        artifacts: Arc<IndexArtifacts>,
    ) -> Self {
        Self {
            retry: config.retry.clone(),
            poll_interval,
            segments,
            metadata,
            storage,
            oracle,
            builder,
            artifacts,
            permits: Arc::new(Semaphore::new(config.max_parallel_builds.max(1))),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Requests an index on one field.
    ///
    /// The identical descriptor returns the existing build id and re-queues
    /// segments whose build failed; a different descriptor supersedes the
    /// field's previous index.
    pub async fn build_index(
        self: &Arc<Self>,
        collection: &CollectionDescriptor,
        index: IndexDescriptor,
    ) -> CoreResult<BuildId> {
        let collection_id = collection.collection_id;
        let field = collection.schema.field(&index.field_name).ok_or_else(|| {
            CoreError::schema_violation(&index.field_name, "field is not declared in the schema")
        })?;
        index.validate_for(field)?;
        if !self.builder.supports(index.index_type) {
            return Err(CoreError::schema_violation(
                &index.field_name,
                format!("index type {} is not supported", index.index_type.as_str()),
            ));
        }

        if let Some(existing) = self.metadata.get_index(collection_id, &index.field_name).await? {
            if existing.descriptor == index {
                let requeued = self.requeue_failed(collection_id, &existing)?;
                if requeued > 0 {
                    info!(collection = %collection.name, field = %index.field_name, requeued, "failed segment builds re-queued");
                }
                self.run_pass(collection_id).await?;
                return Ok(existing.build_id);
            }
            info!(
                collection = %collection.name,
                field = %index.field_name,
                old_index = %existing.descriptor.index_name,
                new_index = %index.index_name,
                "index superseded"
            );
            self.artifacts.remove_build(existing.build_id);
        }

        let record = IndexRecord {
            descriptor: index,
            build_id: BuildId::new(),
            created_ts: self.oracle.allocate().await?,
        };
        self.metadata.put_index(collection_id, &record).await?;
        info!(
            collection = %collection.name,
            field = %record.descriptor.field_name,
            index = %record.descriptor.index_name,
            index_type = record.descriptor.index_type.as_str(),
            build_id = %record.build_id,
            "index build requested"
        );
        self.run_pass(collection_id).await?;
        Ok(record.build_id)
    }

    /// Starts builds for every flushed segment lacking the current build of
    /// each of the collection's indexes.
    pub async fn run_pass(self: &Arc<Self>, collection_id: CollectionId) -> CoreResult<()> {
        let records = self.metadata.list_indexes(collection_id).await?;
        if records.is_empty() {
            return Ok(());
        }

        for info in self
            .segments
            .list_in_states(collection_id, &[SegmentState::Flushed])
        {
            for record in &records {
                let field = record.descriptor.field_name.as_str();
                let needs_build = match info.indexes.get(field) {
                    Some(state) if state.build_id == record.build_id => {
                        matches!(state.state, IndexBuildState::InProgress { .. })
                            && !self.in_flight.lock().contains(&(info.segment_id, record.build_id))
                    }
                    _ => true,
                };
                if !needs_build || !self.in_flight.lock().insert((info.segment_id, record.build_id)) {
                    continue;
                }

                let observed = info.indexes.get(field);
                let marked = self
                    .segments
                    .update(info.segment_id, |seg| Ok(claim_build(seg, observed, record)));
                match marked {
                    Ok(Some(_)) => {
                        let this = Arc::clone(self);
                        let record = record.clone();
                        let segment_id = info.segment_id;
                        tokio::spawn(async move {
                            this.build_segment(segment_id, record).await;
                        });
                    }
                    Ok(None) => {
                        self.in_flight.lock().remove(&(info.segment_id, record.build_id));
                    }
                    Err(e) => {
                        self.in_flight.lock().remove(&(info.segment_id, record.build_id));
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn build_segment(self: Arc<Self>, segment_id: SegmentId, record: IndexRecord) {
        let key = (segment_id, record.build_id);
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            self.in_flight.lock().remove(&key);
            return;
        };

        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let result = {
            let this: &Self = &self;
            let record = &record;
            let attempts = &attempts;
            retry_with_backoff(&self.retry, "build_index", move || {
                attempts.fetch_add(1, Ordering::Relaxed);
                async move {
                    let data = this.storage.read_segment(segment_id).await?;
                    this.builder.build(&data, &record.descriptor).await
                }
            })
            .await
        };
        let attempts = attempts.load(Ordering::Relaxed);
        let index_type = record.descriptor.index_type.as_str();
        let field = record.descriptor.field_name.clone();

        let outcome = match result {
            Ok(index) => {
                self.artifacts.put(segment_id, record.build_id, index);
                INDEX_BUILDS_TOTAL
                    .with_label_values(&[index_type, "finished"])
                    .inc();
                debug!(
                    segment_id = %segment_id,
                    field = %field,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "segment index built"
                );
                IndexBuildState::Finished
            }
            Err(err) => {
                INDEX_BUILDS_TOTAL
                    .with_label_values(&[index_type, "failed"])
                    .inc();
                error!(
                    segment_id = %segment_id,
                    field = %field,
                    attempts,
                    error = %err,
                    "segment index build failed"
                );
                IndexBuildState::Failed {
                    attempts,
                    reason: err.to_string(),
                }
            }
        };

        let updated = self.segments.update(segment_id, |seg| {
            if seg.state != SegmentState::Flushed {
                return Ok(false);
            }
            match seg.indexes.get_mut(&field) {
                Some(state) if state.build_id == record.build_id => {
                    state.state = outcome.clone();
                    Ok(true)
                }
                _ => Ok(false),
            }
        });
        let recorded = match updated {
            Ok(record) => record.is_some(),
            Err(e) => {
                debug!(segment_id = %segment_id, error = %e, "build result not recorded");
                false
            }
        };
        // Superseded or dropped while building
        if !recorded {
            self.artifacts.remove(segment_id, record.build_id);
        }
        self.in_flight.lock().remove(&key);
    }

    /// Clears failed segment builds of `record` so the next pass retries them.
    fn requeue_failed(&self, collection_id: CollectionId, record: &IndexRecord) -> CoreResult<usize> {
        let field = &record.descriptor.field_name;
        let mut requeued = 0;
        for info in self.segments.list(collection_id) {
            let failed = info.indexes.get(field).map_or(false, |s| {
                s.build_id == record.build_id && matches!(s.state, IndexBuildState::Failed { .. })
            });
            if failed {
                self.segments.update(info.segment_id, |seg| {
                    Ok(seg.indexes.remove(field).is_some())
                })?;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn require_record(&self, collection: &CollectionDescriptor, field: &str) -> CoreResult<IndexRecord> {
        self.metadata
            .get_index(collection.collection_id, field)
            .await?
            .ok_or_else(|| CoreError::index_not_found(&collection.name, field, "<none>"))
    }

    /// True when every currently flushed segment holds a finished build of
    /// the field's index.
    pub async fn is_build_complete(&self, collection: &CollectionDescriptor, field: &str) -> CoreResult<bool> {
        let record = self.require_record(collection, field).await?;
        Ok(self
            .segments
            .list_in_states(collection.collection_id, &[SegmentState::Flushed])
            .iter()
            .all(|info| has_current_build(info, &record)))
    }

    pub async fn describe_index(&self, collection: &CollectionDescriptor, field: &str) -> CoreResult<IndexProgress> {
        let record = self.require_record(collection, field).await?;
        let mut progress = IndexProgress {
            record: record.clone(),
            total_rows: 0,
            indexed_rows: 0,
            pending_segments: Vec::new(),
            failed_segments: Vec::new(),
            complete: true,
        };
        for info in self
            .segments
            .list_in_states(collection.collection_id, &[SegmentState::Flushed])
        {
            progress.total_rows += info.row_count;
            match info.indexes.get(field) {
                Some(state) if state.build_id == record.build_id => match &state.state {
                    IndexBuildState::Finished => progress.indexed_rows += info.row_count,
                    IndexBuildState::Failed { reason, .. } => {
                        progress.failed_segments.push((info.segment_id, reason.clone()))
                    }
                    IndexBuildState::InProgress { .. } => progress.pending_segments.push(info.segment_id),
                },
                _ => progress.pending_segments.push(info.segment_id),
            }
        }
        progress.complete = progress.pending_segments.is_empty() && progress.failed_segments.is_empty();
        Ok(progress)
    }

    /// Removes the field's index. The caller checks the collection is released.
    pub async fn drop_index(&self, collection: &CollectionDescriptor, field: &str) -> CoreResult<()> {
        let record = self.require_record(collection, field).await?;
        self.metadata
            .delete_index(collection.collection_id, field)
            .await?;
        for info in self.segments.list(collection.collection_id) {
            if info.indexes.contains_key(field) {
                self.segments
                    .update(info.segment_id, |seg| Ok(seg.indexes.remove(field).is_some()))?;
            }
        }
        self.artifacts.remove_build(record.build_id);
        info!(collection = %collection.name, field, index = %record.descriptor.index_name, "index dropped");
        Ok(())
    }

    /// Polls [`is_build_complete`](Self::is_build_complete) until true or the
    /// deadline passes.
    pub async fn wait_for_index(
        &self,
        collection: &CollectionDescriptor,
        field: &str,
        timeout: Duration,
    ) -> CoreResult<()> {
        let started = Instant::now();
        loop {
            if self.is_build_complete(collection, field).await? {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(CoreError::timeout(
                    format!("index build on `{}.{field}`", collection.name),
                    elapsed,
                ));
            }
            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }
}
