//! Core domain types and traits for the Tidal data-lifecycle engine.

pub mod collection;
pub mod config;
pub mod consistency;
pub mod error;
pub mod ids;
pub mod index;
pub mod row;
pub mod segment;
pub mod timestamp;
pub mod traits;
pub mod vector;

pub use collection::{
    CollectionDescriptor, CollectionOptions, CollectionSchema, DataType, DistanceMetric,
    FieldSchema, LoadState,
};
pub use config::{
    FlushConfig, IndexConfig, LoggingConfig, QueryConfig, ReconcileConfig, RetryConfig,
    SegmentConfig, TidalConfig,
};
pub use consistency::{ConsistencyLevel, ReadView};
pub use error::{CoreError, CoreResult};
pub use ids::{BuildId, CollectionId, ReplicaId, SegmentId};
pub use index::{IndexDescriptor, IndexProgress, IndexRecord, IndexType};
pub use row::{FieldValue, PrimaryKey, Row, RowRecord};
pub use segment::{
    FlushRecord, IndexBuildState, SegmentData, SegmentIndexState, SegmentInfo, SegmentState,
    Tombstone,
};
pub use timestamp::{HybridTimestampOracle, Timestamp, TimestampOracle};
pub use traits::{MetadataStore, SegmentStorage};
pub use vector::SearchHit;
