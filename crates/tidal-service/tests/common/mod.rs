//! Shared helpers for the service integration tests.

#![allow(dead_code)]

use std::time::Duration;

use tidal_core::{
    CollectionSchema, DataType, FieldSchema, IndexDescriptor, IndexType, RetryConfig, Row,
    TidalConfig, DistanceMetric,
};
use tidal_service::{FlushResult, LifecycleService};

pub const DIM: u32 = 8;
pub const WAIT: Duration = Duration::from_secs(20);

/// Configuration with millisecond backoffs and a fast reconciler.
pub fn fast_config() -> TidalConfig {
    let retry = |max_attempts| RetryConfig {
        max_attempts,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        backoff_multiplier: 2.0,
    };
    let mut config = TidalConfig::default();
    config.flush.retry = retry(4);
    config.index.retry = retry(3);
    config.query.wait_poll_interval_ms = 5;
    config.query.default_timeout_ms = 20_000;
    config.reconcile.tick_interval_ms = 20;
    config
}

/// `id` (int64 pk), `vec` (float vector) and `category` (int64).
pub fn schema() -> CollectionSchema {
    CollectionSchema::new(vec![
        FieldSchema::int64_primary_key("id", false),
        FieldSchema::float_vector("vec", DIM),
        FieldSchema::new("category", DataType::Int64),
    ])
}

pub fn vector(seed: i64) -> Vec<f32> {
    (0..DIM as i64)
        .map(|d| ((seed * 31 + d * 7) % 97) as f32 / 97.0)
        .collect()
}

pub fn row(id: i64) -> Row {
    Row::new()
        .with("id", id)
        .with("vec", vector(id))
        .with("category", id % 10)
}

pub fn rows(ids: impl IntoIterator<Item = i64>) -> Vec<Row> {
    ids.into_iter().map(row).collect()
}

pub fn flat_index() -> IndexDescriptor {
    IndexDescriptor::new("vec", "vec_flat", IndexType::Flat).with_metric(DistanceMetric::L2)
}

pub async fn create(service: &LifecycleService, name: &str) {
    service.create_collection(name, schema()).await.unwrap();
}

/// Flushes and waits until every returned segment is durable.
pub async fn flush_and_wait(service: &LifecycleService, name: &str) -> FlushResult {
    let flush = service.flush(name).await.unwrap();
    service.wait_for_flush(&flush.segment_ids, WAIT).await.unwrap();
    flush
}
