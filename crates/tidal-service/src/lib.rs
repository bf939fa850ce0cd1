//! Service layer for Tidal: the lifecycle coordinators, the background
//! reconciler and the `LifecycleService` facade callers use.
//!
//! ```no_run
//! use tidal_core::{CollectionSchema, ConsistencyLevel, FieldSchema, Row, TidalConfig};
//! use tidal_service::LifecycleService;
//!
//! # async fn example() -> tidal_core::CoreResult<()> {
//! let service = LifecycleService::new(TidalConfig::default());
//! let schema = CollectionSchema::new(vec![
//!     FieldSchema::int64_primary_key("id", false),
//!     FieldSchema::float_vector("vec", 4),
//! ]);
//! service.create_collection("books", schema).await?;
//! service
//!     .insert("books", vec![Row::new().with("id", 1i64).with("vec", vec![0.1f32; 4])])
//!     .await?;
//! let flush = service.flush("books").await?;
//! service
//!     .wait_for_flush(&flush.segment_ids, std::time::Duration::from_secs(5))
//!     .await?;
//! service.load("books").await?;
//! let count = service
//!     .count("books", "", Some(ConsistencyLevel::Strong))
//!     .await?;
//! assert_eq!(count, 1);
//! # Ok(())
//! # }
//! ```

mod flush;
mod index_build;
mod ingest;
mod load;
pub mod metrics;
mod reconciler;
mod router;
mod service;
pub mod telemetry;
mod types;

pub use flush::FlushCoordinator;
pub use index_build::{IndexArtifacts, IndexCoordinator};
pub use ingest::IngestBuffer;
pub use load::{AttachedIndex, LoadCoordinator, LoadedSegment, Replica};
pub use reconciler::{ReconcileTargets, Reconciler};
pub use router::QueryRouter;
pub use service::{Collaborators, LifecycleService};
pub use types::{
    DeleteResult, FlushResult, FlushState, InsertResult, LoadHandle, QueryOutput, QueryRequest,
    QueryResponse, ScoreRange, SearchRequest, SearchResponse, SessionContext, COUNT_STAR,
};
