//! `LifecycleService`: the caller-facing facade over ingestion, flush, index
//! build, load and the query router.
//!
//! Collections are addressed by name within the default database.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, instrument};

use tidal_core::{
    BuildId, CollectionDescriptor, CollectionOptions, CollectionSchema, ConsistencyLevel,
    CoreError, CoreResult, FlushRecord, HybridTimestampOracle, IndexDescriptor, IndexProgress,
    MetadataStore, Row, SegmentId, SegmentInfo, SegmentStorage, TidalConfig, TimestampOracle,
};
use tidal_index::{DefaultIndexBuilder, IndexBuilder};
use tidal_query::FilterParser;
use tidal_storage::{MemoryMetadataStore, MemorySegmentStorage, SegmentStateStore};

use crate::flush::FlushCoordinator;
use crate::index_build::{IndexArtifacts, IndexCoordinator};
use crate::ingest::IngestBuffer;
use crate::load::LoadCoordinator;
use crate::reconciler::{ReconcileTargets, Reconciler};
use crate::router::QueryRouter;
use crate::types::{
    DeleteResult, FlushResult, FlushState, InsertResult, LoadHandle, QueryRequest, QueryResponse,
    SearchRequest, SearchResponse,
};

/// External collaborators of the lifecycle engine.
#[derive(Clone)]
pub struct Collaborators {
    pub oracle: Arc<dyn TimestampOracle>,
    pub metadata: Arc<dyn MetadataStore>,
    pub storage: Arc<dyn SegmentStorage>,
    pub builder: Arc<dyn IndexBuilder>,
}

impl Collaborators {
    /// Local oracle, in-memory stores and the default index builder.
    pub fn in_memory() -> Self {
        Self {
            oracle: Arc::new(HybridTimestampOracle::new()),
            metadata: Arc::new(MemoryMetadataStore::new()),
            storage: Arc::new(MemorySegmentStorage::new()),
            builder: Arc::new(DefaultIndexBuilder),
        }
    }
}

pub struct LifecycleService {
    config: TidalConfig,
    oracle: Arc<dyn TimestampOracle>,
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn SegmentStorage>,
    segments: Arc<SegmentStateStore>,
    artifacts: Arc<IndexArtifacts>,
    ingest: Arc<IngestBuffer>,
    flush: Arc<FlushCoordinator>,
    index: Arc<IndexCoordinator>,
    load: Arc<LoadCoordinator>,
    router: QueryRouter,
    reconciler: Reconciler,
    /// Serializes collection create and drop.
    ddl_lock: Mutex<()>,
}

impl LifecycleService {
    /// Creates a service with in-memory collaborators.
    ///
    /// Must be called within a tokio runtime: the reconciler is spawned here.
    pub fn new(config: TidalConfig) -> Self {
        Self::with_collaborators(config, Collaborators::in_memory())
    }

    /// Creates a service over the given collaborators.
    ///
    /// Must be called within a tokio runtime: the reconciler is spawned here.
    pub fn with_collaborators(config: TidalConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            oracle,
            metadata,
            storage,
            builder,
        } = collaborators;
        let poll_interval = config.query.wait_poll_interval();

        let segments = Arc::new(SegmentStateStore::new());
        let artifacts = Arc::new(IndexArtifacts::new());
        let ingest = Arc::new(IngestBuffer::new(
            config.segment.clone(),
            Arc::clone(&oracle),
            Arc::clone(&segments),
            Arc::clone(&storage),
        ));
        let flush = Arc::new(FlushCoordinator::new(
            &config.flush,
            poll_interval,
            Arc::clone(&ingest),
            Arc::clone(&segments),
            Arc::clone(&storage),
            Arc::clone(&metadata),
        ));
        let index = Arc::new(IndexCoordinator::new(
            &config.index,
            poll_interval,
            Arc::clone(&segments),
            Arc::clone(&metadata),
            Arc::clone(&storage),
            Arc::clone(&oracle),
            builder,
            Arc::clone(&artifacts),
        ));
        let load = Arc::new(LoadCoordinator::new(
            config.flush.retry.clone(),
            poll_interval,
            Arc::clone(&segments),
            Arc::clone(&metadata),
            Arc::clone(&storage),
            Arc::clone(&oracle),
            Arc::clone(&artifacts),
        ));
        let router = QueryRouter::new(
            config.query.clone(),
            Arc::clone(&oracle),
            Arc::clone(&segments),
            Arc::clone(&metadata),
            Arc::clone(&ingest),
            Arc::clone(&load),
        );
        let reconciler = Reconciler::start(
            ReconcileTargets {
                segments: Arc::clone(&segments),
                flush: Arc::clone(&flush),
                index: Arc::clone(&index),
                load: Arc::clone(&load),
            },
            config.reconcile.tick_interval(),
        );

        Self {
            config,
            oracle,
            metadata,
            storage,
            segments,
            artifacts,
            ingest,
            flush,
            index,
            load,
            router,
            reconciler,
            ddl_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &TidalConfig {
        &self.config
    }

    /// Stops the background reconciler. In-flight persistence and build
    /// tasks run to completion on the runtime.
    pub async fn shutdown(&self) {
        self.reconciler.shutdown().await;
    }

    async fn resolve(&self, name: &str) -> CoreResult<CollectionDescriptor> {
        let descriptor = self
            .metadata
            .find_collection(CollectionDescriptor::DEFAULT_DATABASE, name)
            .await?
            .ok_or_else(|| CoreError::not_found("collection", name))?;
        Ok(descriptor)
    }

    // ========== Collections ==========

    /// Creates a collection with default options and the configured shard
    /// count.
    pub async fn create_collection(
        &self,
        name: &str,
        schema: CollectionSchema,
    ) -> CoreResult<CollectionDescriptor> {
        let options = CollectionOptions {
            shards_num: self.config.segment.default_shards,
            ..CollectionOptions::default()
        };
        self.create_collection_with_options(name, schema, options)
            .await
    }

    #[instrument(skip(self, schema, options))]
    pub async fn create_collection_with_options(
        &self,
        name: &str,
        schema: CollectionSchema,
        options: CollectionOptions,
    ) -> CoreResult<CollectionDescriptor> {
        let _guard = self.ddl_lock.lock().await;
        let created_ts = self.oracle.allocate().await?;
        let descriptor = CollectionDescriptor::new(
            CollectionDescriptor::DEFAULT_DATABASE,
            name,
            schema,
            options,
            created_ts,
        )?;
        self.metadata.create_collection(&descriptor).await?;
        self.ingest.register(&descriptor);
        info!(
            collection = %descriptor.qualified_name(),
            collection_id = %descriptor.collection_id,
            shards = descriptor.options.shards_num,
            "collection created"
        );
        Ok(descriptor)
    }

    pub async fn describe_collection(&self, name: &str) -> CoreResult<CollectionDescriptor> {
        self.resolve(name).await
    }

    pub async fn list_collections(&self) -> CoreResult<Vec<CollectionDescriptor>> {
        self.metadata
            .list_collections(CollectionDescriptor::DEFAULT_DATABASE)
            .await
    }

    /// Segment records of a collection ordered by segment id.
    pub async fn show_segments(&self, name: &str) -> CoreResult<Vec<SegmentInfo>> {
        let descriptor = self.resolve(name).await?;
        Ok(self.segments.list(descriptor.collection_id))
    }

    /// Drops a released collection with all of its segments and indexes.
    ///
    /// Loads are blocked for the duration, and writes racing the drop fail
    /// with `NotFound` once the ingestion buffer is closed.
    #[instrument(skip(self))]
    pub async fn drop_collection(&self, name: &str) -> CoreResult<()> {
        let _guard = self.ddl_lock.lock().await;
        let descriptor = self.resolve(name).await?;
        let collection_id = descriptor.collection_id;
        let _load_guard = self.load.lock_released(&descriptor).await?;

        self.metadata.delete_collection(collection_id).await?;
        self.ingest.remove(collection_id).await;
        let segment_ids: Vec<SegmentId> = self
            .segments
            .list(collection_id)
            .into_iter()
            .map(|info| info.segment_id)
            .collect();
        self.segments.drop_collection(collection_id);
        self.storage.remove_segments(&segment_ids).await?;
        self.artifacts.remove_segments(&segment_ids);
        self.segments.purge_collection(collection_id);

        info!(collection = %name, segments = segment_ids.len(), "collection dropped");
        Ok(())
    }

    // ========== Writes ==========

    pub async fn insert(&self, name: &str, rows: Vec<Row>) -> CoreResult<InsertResult> {
        let descriptor = self.resolve(name).await?;
        self.ingest.insert(descriptor.collection_id, rows).await
    }

    pub async fn upsert(&self, name: &str, rows: Vec<Row>) -> CoreResult<InsertResult> {
        let descriptor = self.resolve(name).await?;
        self.ingest.upsert(descriptor.collection_id, rows).await
    }

    /// Tombstones every row matching `filter` written before the delete.
    pub async fn delete(&self, name: &str, filter: &str) -> CoreResult<DeleteResult> {
        let descriptor = self.resolve(name).await?;
        let predicate = FilterParser::new(self.config.query.max_filter_depth).parse(filter)?;
        self.ingest
            .delete(descriptor.collection_id, &predicate)
            .await
    }

    // ========== Flush ==========

    pub async fn flush(&self, name: &str) -> CoreResult<FlushResult> {
        let descriptor = self.resolve(name).await?;
        self.flush.flush(&descriptor).await
    }

    pub fn flush_state(&self, segment_ids: &[SegmentId]) -> CoreResult<FlushState> {
        self.flush.flush_state(segment_ids)
    }

    pub fn is_flush_complete(&self, segment_ids: &[SegmentId]) -> CoreResult<bool> {
        self.flush.is_flush_complete(segment_ids)
    }

    pub async fn wait_for_flush(&self, segment_ids: &[SegmentId], timeout: Duration) -> CoreResult<()> {
        self.flush.wait_for_flush(segment_ids, timeout).await
    }

    pub async fn last_flush(&self, name: &str) -> CoreResult<Option<FlushRecord>> {
        let descriptor = self.resolve(name).await?;
        self.flush.last_flush(descriptor.collection_id).await
    }

    // ========== Indexes ==========

    pub async fn build_index(&self, name: &str, index: IndexDescriptor) -> CoreResult<BuildId> {
        let descriptor = self.resolve(name).await?;
        self.index.build_index(&descriptor, index).await
    }

    pub async fn is_build_complete(&self, name: &str, field: &str) -> CoreResult<bool> {
        let descriptor = self.resolve(name).await?;
        self.index.is_build_complete(&descriptor, field).await
    }

    pub async fn describe_index(&self, name: &str, field: &str) -> CoreResult<IndexProgress> {
        let descriptor = self.resolve(name).await?;
        self.index.describe_index(&descriptor, field).await
    }

    pub async fn drop_index(&self, name: &str, field: &str) -> CoreResult<()> {
        let descriptor = self.resolve(name).await?;
        if self.load.is_loaded(descriptor.collection_id) {
            return Err(CoreError::in_use(
                name,
                "collection is loaded; release it before dropping an index",
            ));
        }
        self.index.drop_index(&descriptor, field).await
    }

    pub async fn wait_for_index(&self, name: &str, field: &str, timeout: Duration) -> CoreResult<()> {
        let descriptor = self.resolve(name).await?;
        self.index.wait_for_index(&descriptor, field, timeout).await
    }

    // ========== Load ==========

    pub async fn load(&self, name: &str) -> CoreResult<LoadHandle> {
        let descriptor = self.resolve(name).await?;
        self.load.load(&descriptor).await
    }

    pub async fn release(&self, name: &str) -> CoreResult<()> {
        let descriptor = self.resolve(name).await?;
        self.load.release(&descriptor).await
    }

    pub async fn is_loaded(&self, name: &str) -> CoreResult<bool> {
        let descriptor = self.resolve(name).await?;
        Ok(self.load.is_loaded(descriptor.collection_id))
    }

    pub async fn loaded_segments(&self, name: &str) -> CoreResult<Vec<SegmentId>> {
        let descriptor = self.resolve(name).await?;
        self.load.loaded_segments(&descriptor)
    }

    pub async fn wait_for_load(
        &self,
        name: &str,
        segment_ids: &[SegmentId],
        timeout: Duration,
    ) -> CoreResult<()> {
        let descriptor = self.resolve(name).await?;
        self.load
            .wait_for_load(&descriptor, segment_ids, timeout)
            .await
    }

    // ========== Reads ==========

    pub async fn search(&self, request: &SearchRequest) -> CoreResult<SearchResponse> {
        let descriptor = self.resolve(&request.collection).await?;
        self.router.search(&descriptor, request).await
    }

    pub async fn query(&self, request: &QueryRequest) -> CoreResult<QueryResponse> {
        let descriptor = self.resolve(&request.collection).await?;
        self.router.query(&descriptor, request).await
    }

    /// `count(*)` over rows matching `filter`.
    pub async fn count(
        &self,
        name: &str,
        filter: &str,
        consistency: Option<ConsistencyLevel>,
    ) -> CoreResult<u64> {
        let descriptor = self.resolve(name).await?;
        self.router.count(&descriptor, filter, consistency).await
    }
}
