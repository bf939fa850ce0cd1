use async_trait::async_trait;

use crate::collection::{CollectionDescriptor, LoadState};
use crate::error::CoreResult;
use crate::ids::{CollectionId, SegmentId};
use crate::index::IndexRecord;
use crate::segment::{FlushRecord, SegmentData};

/// Durable storage collaborator for sealed segments.
///
/// Storage encoding is opaque to the core; a successful `persist_batch` entry
/// is the durability boundary for that segment.
#[async_trait]
pub trait SegmentStorage: Send + Sync {
    /// Persists a batch of sealed segments.
    ///
    /// Returns one result per input segment, in input order, so callers can
    /// retry only the segments that failed.
    async fn persist_batch(&self, segments: &[SegmentData]) -> Vec<(SegmentId, CoreResult<()>)>;

    /// Reads a persisted segment back.
    async fn read_segment(&self, segment_id: SegmentId) -> CoreResult<SegmentData>;

    /// Removes persisted segments. Missing segments are ignored.
    async fn remove_segments(&self, segment_ids: &[SegmentId]) -> CoreResult<()>;
}

/// Repository interface for collection-level metadata held by the
/// coordination service.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Creates a new collection entry. Fails with `AlreadyExists` when the
    /// `(database, name)` pair is taken.
    async fn create_collection(&self, collection: &CollectionDescriptor) -> CoreResult<()>;

    /// Retrieves a collection by its identifier.
    async fn get_collection(
        &self,
        collection_id: CollectionId,
    ) -> CoreResult<Option<CollectionDescriptor>>;

    /// Retrieves a collection by database and name.
    async fn find_collection(
        &self,
        database: &str,
        name: &str,
    ) -> CoreResult<Option<CollectionDescriptor>>;

    /// Lists all collections of a database ordered by creation time.
    async fn list_collections(&self, database: &str) -> CoreResult<Vec<CollectionDescriptor>>;

    /// Deletes a collection descriptor together with its index records,
    /// load state and flush record.
    async fn delete_collection(&self, collection_id: CollectionId) -> CoreResult<()>;

    /// Stores the index record for a field, replacing any previous one.
    async fn put_index(&self, collection_id: CollectionId, record: &IndexRecord) -> CoreResult<()>;

    /// Fetches the index record for a field.
    async fn get_index(
        &self,
        collection_id: CollectionId,
        field: &str,
    ) -> CoreResult<Option<IndexRecord>>;

    /// Lists index records of a collection.
    async fn list_indexes(&self, collection_id: CollectionId) -> CoreResult<Vec<IndexRecord>>;

    /// Removes the index record for a field. Returns false if there was none.
    async fn delete_index(&self, collection_id: CollectionId, field: &str) -> CoreResult<bool>;

    /// Records the load state of a collection.
    async fn set_load_state(&self, collection_id: CollectionId, state: LoadState)
        -> CoreResult<()>;

    /// Returns the load state of a collection (`NotLoaded` when never set).
    async fn load_state(&self, collection_id: CollectionId) -> CoreResult<LoadState>;

    /// Stores the latest flush record of a collection.
    async fn put_flush_record(&self, record: &FlushRecord) -> CoreResult<()>;

    /// Returns the latest flush record of a collection.
    async fn flush_record(&self, collection_id: CollectionId) -> CoreResult<Option<FlushRecord>>;
}
