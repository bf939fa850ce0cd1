//! Prometheus metrics for the Tidal lifecycle engine.
//!
//! Metrics are registered in the default registry on first use and rendered
//! with [`export_prometheus`].

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    // ========== Ingestion ==========

    /// Rows appended to growing segments, by collection
    pub static ref ROWS_INSERTED_TOTAL: CounterVec = register_counter_vec!(
        "tidal_rows_inserted_total",
        "Rows appended to growing segments",
        &["collection"]
    )
    .unwrap();

    /// Primary keys tombstoned by delete or upsert, by collection
    pub static ref KEYS_DELETED_TOTAL: CounterVec = register_counter_vec!(
        "tidal_keys_deleted_total",
        "Primary keys tombstoned by delete or upsert",
        &["collection"]
    )
    .unwrap();

    /// Segments sealed, by trigger (threshold/flush)
    pub static ref SEGMENTS_SEALED_TOTAL: CounterVec = register_counter_vec!(
        "tidal_segments_sealed_total",
        "Segments sealed",
        &["trigger"]
    )
    .unwrap();

    // ========== Flush ==========

    /// Flush calls by collection
    pub static ref FLUSHES_TOTAL: CounterVec = register_counter_vec!(
        "tidal_flushes_total",
        "Flush calls",
        &["collection"]
    )
    .unwrap();

    /// Segment persistence outcomes (success/retry/failed)
    pub static ref SEGMENT_PERSIST_TOTAL: CounterVec = register_counter_vec!(
        "tidal_segment_persist_total",
        "Segment persistence attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Wall time from entering Flushing to Flushed (seconds)
    pub static ref SEGMENT_PERSIST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "tidal_segment_persist_duration_seconds",
        "Segment persistence latency in seconds",
        &["collection"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    )
    .unwrap();

    // ========== Index build ==========

    /// Per-segment index builds by outcome (finished/retry/failed)
    pub static ref INDEX_BUILDS_TOTAL: CounterVec = register_counter_vec!(
        "tidal_index_builds_total",
        "Per-segment index builds by outcome",
        &["index_type", "outcome"]
    )
    .unwrap();

    // ========== Load / query ==========

    /// Segments resident in query replicas, by collection
    pub static ref LOADED_SEGMENTS: GaugeVec = register_gauge_vec!(
        "tidal_loaded_segments",
        "Segments resident in query replicas",
        &["collection"]
    )
    .unwrap();

    /// Search latency by consistency level (seconds)
    pub static ref SEARCH_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "tidal_search_duration_seconds",
        "Search latency in seconds, waits included",
        &["consistency"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
    )
    .unwrap();

    /// Query/count latency by consistency level (seconds)
    pub static ref QUERY_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "tidal_query_duration_seconds",
        "Scalar query latency in seconds, waits included",
        &["consistency"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
    )
    .unwrap();

    /// Segments searched, by access path (index/brute_force)
    pub static ref SEARCH_SEGMENTS_TOTAL: CounterVec = register_counter_vec!(
        "tidal_search_segments_total",
        "Segments searched by access path",
        &["path"]
    )
    .unwrap();

    /// Reads that gave up waiting for their guarantee timestamp
    pub static ref READ_TIMEOUTS_TOTAL: CounterVec = register_counter_vec!(
        "tidal_read_timeouts_total",
        "Reads that timed out waiting for flushed and loaded data",
        &["operation"]
    )
    .unwrap();

    // ========== Background ==========

    /// Reconciler passes by status
    pub static ref RECONCILE_RUNS_TOTAL: CounterVec = register_counter_vec!(
        "tidal_reconcile_runs_total",
        "Reconciler passes",
        &["status"]
    )
    .unwrap();
}

/// Exports all metrics in Prometheus text format
///
/// ```rust
/// use tidal_service::metrics;
///
/// let metrics_text = metrics::export_prometheus();
/// println!("{}", metrics_text);
/// ```
pub fn export_prometheus() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .unwrap_or_else(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
        });

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to UTF-8: {}", e);
        String::from("# Error encoding metrics\n")
    })
}
