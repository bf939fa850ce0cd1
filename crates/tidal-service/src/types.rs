//! Request and response types of the lifecycle service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tidal_core::{
    ConsistencyLevel, CoreError, CoreResult, DistanceMetric, PrimaryKey, ReadView, ReplicaId,
    RowRecord, SearchHit, SegmentId, Timestamp,
};

/// Output field requesting a row count instead of rows.
pub const COUNT_STAR: &str = "count(*)";

/// Result of `insert` and `upsert`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertResult {
    /// Timestamp shared by every row of the batch.
    pub timestamp: Timestamp,
    pub insert_count: usize,
    /// Primary keys in input order, including auto-assigned ones.
    pub primary_keys: Vec<PrimaryKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    pub timestamp: Timestamp,
    /// Number of primary keys tombstoned.
    pub delete_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlushResult {
    pub flush_ts: Timestamp,
    /// Every segment that must reach `Flushed` for the flush to be complete.
    pub segment_ids: Vec<SegmentId>,
}

/// Persistence status of a set of segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushState {
    pub flushed: Vec<SegmentId>,
    pub pending: Vec<SegmentId>,
    /// Segments whose persistence exhausted its retries, with the last error.
    pub failed: Vec<(SegmentId, String)>,
}

impl FlushState {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.failed.is_empty()
    }
}

/// A loaded collection's query replica.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadHandle {
    pub collection: String,
    pub replica_id: ReplicaId,
    pub segment_ids: Vec<SegmentId>,
    pub loaded_at_ts: Timestamp,
}

/// Score window of a range search.
///
/// A hit must score strictly better than `radius` and, when `range_filter`
/// is set, no better than it. "Better" follows the metric: lower for L2,
/// higher for dot and cosine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub radius: f32,
    pub range_filter: Option<f32>,
}

impl ScoreRange {
    #[must_use]
    pub fn contains(&self, metric: DistanceMetric, score: f32) -> bool {
        if metric.higher_is_better() {
            score > self.radius && self.range_filter.map_or(true, |inner| score <= inner)
        } else {
            score < self.radius && self.range_filter.map_or(true, |inner| score >= inner)
        }
    }

    /// Rejects windows that can hold no score.
    pub fn validate(&self, metric: DistanceMetric) -> CoreResult<()> {
        if !self.radius.is_finite() || self.range_filter.map_or(false, |f| !f.is_finite()) {
            return Err(CoreError::schema_violation("radius", "range bounds must be finite"));
        }
        let Some(inner) = self.range_filter else {
            return Ok(());
        };
        let ordered = if metric.higher_is_better() {
            inner > self.radius
        } else {
            inner < self.radius
        };
        if ordered {
            Ok(())
        } else {
            Err(CoreError::schema_violation(
                "range_filter",
                format!(
                    "range_filter {inner} must be a better {} score than radius {}",
                    metric.as_str(),
                    self.radius
                ),
            ))
        }
    }
}

/// Vector similarity search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub collection: String,
    pub anns_field: String,
    pub vectors: Vec<Vec<f32>>,
    pub top_k: usize,
    /// Scalar filter; empty matches every row.
    pub filter: String,
    pub output_fields: Vec<String>,
    /// Defaults to the index metric, else L2.
    pub metric: Option<DistanceMetric>,
    /// When set, the field's index must carry this name.
    pub index_name: Option<String>,
    /// Defaults to the collection's consistency level.
    pub consistency: Option<ConsistencyLevel>,
    /// Defaults to `query.default_timeout_ms`.
    pub timeout: Option<Duration>,
    /// Restricts hits to a score window; `top_k` still caps the result.
    pub range: Option<ScoreRange>,
}

impl SearchRequest {
    pub fn new(
        collection: impl Into<String>,
        anns_field: impl Into<String>,
        vectors: Vec<Vec<f32>>,
        top_k: usize,
    ) -> Self {
        Self {
            collection: collection.into(),
            anns_field: anns_field.into(),
            vectors,
            top_k,
            filter: String::new(),
            output_fields: Vec::new(),
            metric: None,
            index_name: None,
            consistency: None,
            timeout: None,
            range: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    #[must_use]
    pub fn with_output_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = Some(metric);
        self
    }

    #[must_use]
    pub fn with_index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.consistency = Some(level);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_range(mut self, radius: f32, range_filter: Option<f32>) -> Self {
        self.range = Some(ScoreRange {
            radius,
            range_filter,
        });
        self
    }
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// One hit list per query vector, best first.
    pub results: Vec<Vec<SearchHit>>,
    pub read_view: ReadView,
    /// Segments answered from a built index.
    pub indexed_segments: Vec<SegmentId>,
    /// Segments answered by brute-force scan.
    pub brute_force_segments: Vec<SegmentId>,
}

/// Scalar query (and `count(*)`).
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub collection: String,
    pub filter: String,
    /// `["count(*)"]` for a count; empty for every field.
    pub output_fields: Vec<String>,
    pub limit: Option<usize>,
    pub consistency: Option<ConsistencyLevel>,
    pub timeout: Option<Duration>,
}

impl QueryRequest {
    pub fn new(collection: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filter: filter.into(),
            output_fields: Vec::new(),
            limit: None,
            consistency: None,
            timeout: None,
        }
    }

    /// A `count(*)` query.
    pub fn count(collection: impl Into<String>, filter: impl Into<String>) -> Self {
        Self::new(collection, filter).with_output_fields([COUNT_STAR])
    }

    #[must_use]
    pub fn with_output_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.consistency = Some(level);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn is_count(&self) -> bool {
        self.output_fields.iter().any(|f| f == COUNT_STAR)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<RowRecord>),
    Count(u64),
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub output: QueryOutput,
    pub read_view: ReadView,
}

impl QueryResponse {
    /// Row count: the `count(*)` value, or the number of rows returned.
    #[must_use]
    pub fn count(&self) -> u64 {
        match &self.output {
            QueryOutput::Count(n) => *n,
            QueryOutput::Rows(rows) => rows.len() as u64,
        }
    }

    #[must_use]
    pub fn rows(&self) -> &[RowRecord] {
        match &self.output {
            QueryOutput::Rows(rows) => rows,
            QueryOutput::Count(_) => &[],
        }
    }
}

/// Tracks a client session's latest write for `Session` consistency.
#[derive(Debug, Default)]
pub struct SessionContext {
    last_write: AtomicU64,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write timestamp returned by insert, upsert or delete.
    pub fn observe(&self, ts: Timestamp) {
        self.last_write.fetch_max(ts.as_u64(), Ordering::AcqRel);
    }

    pub fn last_write(&self) -> Timestamp {
        Timestamp::from_raw(self.last_write.load(Ordering::Acquire))
    }

    /// Consistency level that reads this session's own writes.
    pub fn consistency(&self) -> ConsistencyLevel {
        ConsistencyLevel::Session(self.last_write())
    }
}
