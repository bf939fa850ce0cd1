//! Storage layer: the versioned segment state store, in-memory metadata and
//! durable segment storage, and retry helpers.

pub mod metadata_store;
pub mod retry;
pub mod segment_storage;
pub mod segment_store;

pub use metadata_store::MemoryMetadataStore;
pub use retry::retry_with_backoff;
pub use segment_storage::{MemorySegmentStorage, StorageCall, StorageFailure};
pub use segment_store::{SegmentStateStore, VersionedSegment};
