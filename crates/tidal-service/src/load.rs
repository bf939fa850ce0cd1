//! Query replicas: loading, releasing and incremental incorporation of
//! flushed segments.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use tidal_core::{
    BuildId, CollectionDescriptor, CollectionId, CoreError, CoreResult, IndexRecord, LoadState,
    MetadataStore, ReplicaId, RetryConfig, SegmentData, SegmentId, SegmentInfo, SegmentState,
    SegmentStorage, Timestamp, TimestampOracle,
};
use tidal_index::SegmentIndex;
use tidal_storage::{retry_with_backoff, SegmentStateStore};

use crate::index_build::{has_current_build, IndexArtifacts};
use crate::metrics::LOADED_SEGMENTS;
use crate::types::LoadHandle;

/// A finished index build attached to a resident segment.
#[derive(Clone)]
pub struct AttachedIndex {
    pub build_id: BuildId,
    pub index_name: String,
    pub index: Arc<dyn SegmentIndex>,
}

/// A flushed segment resident in a replica.
pub struct LoadedSegment {
    pub info: SegmentInfo,
    pub data: Arc<SegmentData>,
    /// Attached indexes by field name.
    pub indexes: BTreeMap<String, AttachedIndex>,
}

impl LoadedSegment {
    pub fn segment_id(&self) -> SegmentId {
        self.info.segment_id
    }

    /// The attached index of `field` if it belongs to `build_id`.
    pub fn index_for(&self, field: &str, build_id: BuildId) -> Option<&AttachedIndex> {
        self.indexes
            .get(field)
            .filter(|attached| attached.build_id == build_id)
    }
}

/// In-memory query replica of one collection.
pub struct Replica {
    pub replica_id: ReplicaId,
    pub collection_id: CollectionId,
    pub loaded_at_ts: Timestamp,
    segments: RwLock<BTreeMap<SegmentId, Arc<LoadedSegment>>>,
}

impl Replica {
    /// Snapshot of the resident segments ordered by id.
    pub fn segments(&self) -> Vec<Arc<LoadedSegment>> {
        self.segments.read().values().cloned().collect()
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.read().keys().copied().collect()
    }

    pub fn contains(&self, segment_id: SegmentId) -> bool {
        self.segments.read().contains_key(&segment_id)
    }

    pub fn get(&self, segment_id: SegmentId) -> Option<Arc<LoadedSegment>> {
        self.segments.read().get(&segment_id).cloned()
    }
}

pub struct LoadCoordinator {
    retry: RetryConfig,
    poll_interval: Duration,
    segments: Arc<SegmentStateStore>,
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn SegmentStorage>,
    oracle: Arc<dyn TimestampOracle>,
    artifacts: Arc<IndexArtifacts>,
    replicas: RwLock<HashMap<CollectionId, Arc<Replica>>>,
    /// Serializes load, release and incorporation.
    load_lock: Mutex<()>,
}

impl LoadCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        retry: RetryConfig,
        poll_interval: Duration,
        segments: Arc<SegmentStateStore>,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn SegmentStorage>,
        oracle: Arc<dyn TimestampOracle>,
        artifacts: Arc<IndexArtifacts>,
    ) -> Self {
        Self {
            retry,
            poll_interval,
            segments,
            metadata,
            storage,
            oracle,
            artifacts,
            replicas: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
        }
    }

    /// Materializes every flushed segment of the collection.
    ///
    /// Loading a loaded collection returns the existing replica's handle.
    pub async fn load(&self, collection: &CollectionDescriptor) -> CoreResult<LoadHandle> {
        let collection_id = collection.collection_id;
        let _guard = self.load_lock.lock().await;

        if let Some(replica) = self.replica(collection_id) {
            debug!(collection = %collection.name, "collection already loaded");
            return Ok(handle(collection, &replica));
        }

        self.metadata
            .set_load_state(collection_id, LoadState::Loading)
            .await?;
        match self.materialize(collection).await {
            Ok(replica) => {
                self.metadata
                    .set_load_state(collection_id, LoadState::Loaded)
                    .await?;
                let handle = handle(collection, &replica);
                LOADED_SEGMENTS
                    .with_label_values(&[collection.name.as_str()])
                    .set(handle.segment_ids.len() as f64);
                self.replicas.write().insert(collection_id, replica);
                info!(
                    collection = %collection.name,
                    replica_id = %handle.replica_id,
                    segments = handle.segment_ids.len(),
                    loaded_at_ts = %handle.loaded_at_ts,
                    "collection loaded"
                );
                Ok(handle)
            }
            Err(err) => {
                self.metadata
                    .set_load_state(collection_id, LoadState::NotLoaded)
                    .await?;
                Err(err)
            }
        }
    }

    async fn materialize(&self, collection: &CollectionDescriptor) -> CoreResult<Arc<Replica>> {
        let collection_id = collection.collection_id;
        let flushed = self
            .segments
            .list_in_states(collection_id, &[SegmentState::Flushed]);
        let records = self.metadata.list_indexes(collection_id).await?;

        let loaded = futures::future::try_join_all(
            flushed
                .into_iter()
                .map(|info| self.read_segment(info, &records)),
        )
        .await?;

        let loaded_at_ts = self.oracle.allocate().await?;
        Ok(Arc::new(Replica {
            replica_id: ReplicaId::new(),
            collection_id,
            loaded_at_ts,
            segments: RwLock::new(
                loaded
                    .into_iter()
                    .map(|segment| (segment.segment_id(), Arc::new(segment)))
                    .collect(),
            ),
        }))
    }

    async fn read_segment(
        &self,
        info: SegmentInfo,
        records: &[IndexRecord],
    ) -> CoreResult<LoadedSegment> {
        let segment_id = info.segment_id;
        let data = retry_with_backoff(&self.retry, "read_segment", || {
            self.storage.read_segment(segment_id)
        })
        .await?;
        let indexes = self.attachable_indexes(&info, records);
        Ok(LoadedSegment {
            info,
            data: Arc::new(data),
            indexes,
        })
    }

    /// Finished builds of the current index records available for `info`.
    fn attachable_indexes(
        &self,
        info: &SegmentInfo,
        records: &[IndexRecord],
    ) -> BTreeMap<String, AttachedIndex> {
        records
            .iter()
            .filter(|record| has_current_build(info, record))
            .filter_map(|record| {
                let index = self.artifacts.get(info.segment_id, record.build_id)?;
                Some((
                    record.descriptor.field_name.clone(),
                    AttachedIndex {
                        build_id: record.build_id,
                        index_name: record.descriptor.index_name.clone(),
                        index,
                    },
                ))
            })
            .collect()
    }

    /// Blocks loads and fails with `CollectionInUse` unless the collection is
    /// fully released. Loads stay blocked while the returned guard is held.
    pub(crate) async fn lock_released(
        &self,
        collection: &CollectionDescriptor,
    ) -> CoreResult<MutexGuard<'_, ()>> {
        let guard = self.load_lock.lock().await;
        let state = self.metadata.load_state(collection.collection_id).await?;
        if self.is_loaded(collection.collection_id) || state != LoadState::NotLoaded {
            return Err(CoreError::in_use(
                &collection.name,
                format!("collection is {state:?}; release it first"),
            ));
        }
        Ok(guard)
    }

    /// Drops the replica. Releasing an unloaded collection is a no-op.
    pub async fn release(&self, collection: &CollectionDescriptor) -> CoreResult<()> {
        let _guard = self.load_lock.lock().await;
        let removed = self.replicas.write().remove(&collection.collection_id);
        self.metadata
            .set_load_state(collection.collection_id, LoadState::NotLoaded)
            .await?;
        if let Some(replica) = removed {
            let _ = LOADED_SEGMENTS.remove_label_values(&[collection.name.as_str()]);
            info!(
                collection = %collection.name,
                replica_id = %replica.replica_id,
                "collection released"
            );
        }
        Ok(())
    }

    /// Brings a loaded replica in line with the segment store: newly flushed
    /// segments are read in, indexes built since load are attached, and
    /// segments no longer flushed are evicted.
    pub async fn incorporate(&self, collection_id: CollectionId) -> CoreResult<()> {
        let Some(replica) = self.replica(collection_id) else {
            return Ok(());
        };
        let _guard = self.load_lock.lock().await;
        // Released while waiting for the lock
        if !self
            .replica(collection_id)
            .map_or(false, |current| Arc::ptr_eq(&current, &replica))
        {
            return Ok(());
        }

        let records = self.metadata.list_indexes(collection_id).await?;
        let flushed = self
            .segments
            .list_in_states(collection_id, &[SegmentState::Flushed]);

        let mut added = 0usize;
        let mut refreshed = 0usize;
        for info in &flushed {
            match replica.get(info.segment_id) {
                None => {
                    let loaded = self.read_segment(info.clone(), &records).await?;
                    replica
                        .segments
                        .write()
                        .insert(info.segment_id, Arc::new(loaded));
                    added += 1;
                }
                Some(resident) => {
                    let indexes = self.attachable_indexes(info, &records);
                    if !same_indexes(&resident.indexes, &indexes) {
                        let updated = LoadedSegment {
                            info: info.clone(),
                            data: Arc::clone(&resident.data),
                            indexes,
                        };
                        replica
                            .segments
                            .write()
                            .insert(info.segment_id, Arc::new(updated));
                        refreshed += 1;
                    }
                }
            }
        }

        let evicted = {
            let mut resident = replica.segments.write();
            let before = resident.len();
            resident.retain(|id, _| flushed.iter().any(|info| info.segment_id == *id));
            before - resident.len()
        };

        if added + refreshed + evicted > 0 {
            let total = replica.segments.read().len();
            if let Some(name) = self.collection_name(collection_id).await {
                LOADED_SEGMENTS
                    .with_label_values(&[name.as_str()])
                    .set(total as f64);
            }
            debug!(
                collection_id = %collection_id,
                added,
                refreshed,
                evicted,
                resident = total,
                "replica incorporated segment changes"
            );
        }
        Ok(())
    }

    async fn collection_name(&self, collection_id: CollectionId) -> Option<String> {
        self.metadata
            .get_collection(collection_id)
            .await
            .ok()
            .flatten()
            .map(|descriptor| descriptor.name)
    }

    pub fn replica(&self, collection_id: CollectionId) -> Option<Arc<Replica>> {
        self.replicas.read().get(&collection_id).cloned()
    }

    pub fn is_loaded(&self, collection_id: CollectionId) -> bool {
        self.replicas.read().contains_key(&collection_id)
    }

    pub fn loaded_segments(&self, collection: &CollectionDescriptor) -> CoreResult<Vec<SegmentId>> {
        self.replica(collection.collection_id)
            .map(|replica| replica.segment_ids())
            .ok_or_else(|| CoreError::not_loaded(&collection.name))
    }

    /// Polls until `segment_ids` are all resident or the deadline passes.
    pub async fn wait_for_load(
        &self,
        collection: &CollectionDescriptor,
        segment_ids: &[SegmentId],
        timeout: Duration,
    ) -> CoreResult<()> {
        let started = Instant::now();
        loop {
            let replica = self
                .replica(collection.collection_id)
                .ok_or_else(|| CoreError::not_loaded(&collection.name))?;
            if segment_ids.iter().all(|id| replica.contains(*id)) {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(CoreError::timeout(
                    format!("load of {} segments into `{}`", segment_ids.len(), collection.name),
                    elapsed,
                ));
            }
            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }
}

fn handle(collection: &CollectionDescriptor, replica: &Replica) -> LoadHandle {
    LoadHandle {
        collection: collection.name.clone(),
        replica_id: replica.replica_id,
        segment_ids: replica.segment_ids(),
        loaded_at_ts: replica.loaded_at_ts,
    }
}

fn same_indexes(a: &BTreeMap<String, AttachedIndex>, b: &BTreeMap<String, AttachedIndex>) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|((fa, ia), (fb, ib))| fa == fb && ia.build_id == ib.build_id)
}
