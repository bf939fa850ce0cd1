//! Consistency-aware read path.
//!
//! A read resolves its consistency level into a [`ReadView`], waits until
//! every segment holding writes at or before `guarantee_ts` is flushed and
//! resident in the replica, then evaluates MVCC visibility at `read_ts`
//! against the resident segments and the collection's delete log.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use roaring::RoaringBitmap;
use tracing::{debug, warn};

use tidal_core::{
    CollectionDescriptor, ConsistencyLevel, CoreError, CoreResult, DistanceMetric, FieldValue,
    IndexRecord, MetadataStore, QueryConfig, ReadView, RowRecord, SearchHit, SegmentId,
    SegmentState, Timestamp, TimestampOracle,
};
use tidal_index::brute_force_search;
use tidal_query::{merge_rows, merge_top_k, visible_offsets, FilterExpr, FilterParser, SegmentView};
use tidal_storage::SegmentStateStore;

use crate::ingest::IngestBuffer;
use crate::load::{LoadCoordinator, LoadedSegment, Replica};
use crate::metrics::{
    QUERY_DURATION_SECONDS, READ_TIMEOUTS_TOTAL, SEARCH_DURATION_SECONDS, SEARCH_SEGMENTS_TOTAL,
};
use crate::types::{QueryOutput, QueryRequest, QueryResponse, SearchRequest, SearchResponse, COUNT_STAR};

/// A resident segment with the offsets visible to one read.
struct VisibleSegment {
    segment: Arc<LoadedSegment>,
    offsets: RoaringBitmap,
}

pub struct QueryRouter {
    config: QueryConfig,
    oracle: Arc<dyn TimestampOracle>,
    segments: Arc<SegmentStateStore>,
    metadata: Arc<dyn MetadataStore>,
    ingest: Arc<IngestBuffer>,
    load: Arc<LoadCoordinator>,
}

impl QueryRouter {
    pub fn new(
        config: QueryConfig,
        oracle: Arc<dyn TimestampOracle>,
        segments: Arc<SegmentStateStore>,
        metadata: Arc<dyn MetadataStore>,
        ingest: Arc<IngestBuffer>,
        load: Arc<LoadCoordinator>,
    ) -> Self {
        Self {
            config,
            oracle,
            segments,
            metadata,
            ingest,
            load,
        }
    }

    /// Vector similarity search.
    pub async fn search(
        &self,
        collection: &CollectionDescriptor,
        request: &SearchRequest,
    ) -> CoreResult<SearchResponse> {
        let started = Instant::now();
        let level = request
            .consistency
            .unwrap_or(collection.options.consistency_level);

        if request.top_k == 0 || request.top_k > self.config.max_top_k {
            return Err(CoreError::schema_violation(
                "top_k",
                format!("top_k must be between 1 and {}, got {}", self.config.max_top_k, request.top_k),
            ));
        }
        let field = collection.schema.field(&request.anns_field).ok_or_else(|| {
            CoreError::schema_violation(&request.anns_field, "field is not declared in the schema")
        })?;
        let dim = field.data_type.dimension().ok_or_else(|| {
            CoreError::schema_violation(&request.anns_field, "search requires a vector field")
        })?;
        if request.vectors.is_empty() {
            return Err(CoreError::schema_violation(
                &request.anns_field,
                "at least one query vector is required",
            ));
        }
        for (i, vector) in request.vectors.iter().enumerate() {
            if vector.len() != dim as usize {
                return Err(CoreError::schema_violation(
                    &request.anns_field,
                    format!("query vector {i}: expected dimension {dim}, got {}", vector.len()),
                ));
            }
        }
        check_output_fields(collection, &request.output_fields)?;
        let filter = self.parse_filter(collection, &request.filter)?;

        let record = self
            .metadata
            .get_index(collection.collection_id, &request.anns_field)
            .await?;
        if let Some(name) = &request.index_name {
            match &record {
                Some(r) if &r.descriptor.index_name == name => {}
                _ => {
                    return Err(CoreError::index_not_found(
                        &collection.name,
                        &request.anns_field,
                        name,
                    ))
                }
            }
        }
        if collection.options.index_required && record.is_none() {
            return Err(CoreError::index_not_found(
                &collection.name,
                &request.anns_field,
                "<none>",
            ));
        }
        let metric = resolve_metric(record.as_ref(), request.metric)?;
        if let Some(range) = &request.range {
            range.validate(metric)?;
        }

        let required = if collection.options.index_required {
            record.as_ref().map(|r| (request.anns_field.as_str(), r))
        } else {
            None
        };
        let timeout = request.timeout.unwrap_or_else(|| self.config.default_timeout());
        let (replica, view) = self
            .prepare(collection, level, timeout, "search", required)
            .await?;
        let visible = self.visible_segments(collection, &replica, &filter, view.read_ts)?;

        let mut indexed_segments = Vec::new();
        let mut brute_force_segments = Vec::new();
        let mut per_query: Vec<Vec<Vec<SearchHit>>> = vec![Vec::new(); request.vectors.len()];
        for entry in &visible {
            let segment = &entry.segment;
            let attached = record
                .as_ref()
                .and_then(|r| segment.index_for(&request.anns_field, r.build_id));
            match attached {
                Some(_) => indexed_segments.push(segment.segment_id()),
                None => brute_force_segments.push(segment.segment_id()),
            }
            if entry.offsets.is_empty() {
                continue;
            }

            // A range search scores every candidate so the window is applied before the cut
            let k = match request.range {
                Some(_) => entry.offsets.len() as usize,
                None => request.top_k,
            };
            for (query, hits) in request.vectors.iter().zip(per_query.iter_mut()) {
                let scored = match attached {
                    Some(attached) => attached.index.search(query, k, &entry.offsets)?,
                    None => brute_force_search(
                        &segment.data,
                        &request.anns_field,
                        metric,
                        query,
                        k,
                        &entry.offsets,
                    )?,
                };
                hits.push(
                    scored
                        .into_iter()
                        .filter(|s| {
                            request
                                .range
                                .map_or(true, |range| range.contains(metric, s.score))
                        })
                        .filter_map(|s| {
                            let row = segment.data.rows.get(s.offset as usize)?;
                            Some(
                                SearchHit::new(row.pk.clone(), s.score, segment.segment_id())
                                    .with_fields(project(row, &request.output_fields)),
                            )
                        })
                        .collect(),
                );
            }
        }

        let results = per_query
            .into_iter()
            .map(|hits| merge_top_k(metric, hits, request.top_k))
            .collect();

        SEARCH_SEGMENTS_TOTAL
            .with_label_values(&["index"])
            .inc_by(indexed_segments.len() as f64);
        SEARCH_SEGMENTS_TOTAL
            .with_label_values(&["brute_force"])
            .inc_by(brute_force_segments.len() as f64);
        SEARCH_DURATION_SECONDS
            .with_label_values(&[level.as_str()])
            .observe(started.elapsed().as_secs_f64());
        if !brute_force_segments.is_empty() {
            debug!(
                collection = %collection.name,
                field = %request.anns_field,
                segments = brute_force_segments.len(),
                "searching unindexed segments by brute force"
            );
        }

        Ok(SearchResponse {
            results,
            read_view: view,
            indexed_segments,
            brute_force_segments,
        })
    }

    /// Scalar query: matching rows, or their count for `count(*)`.
    pub async fn query(
        &self,
        collection: &CollectionDescriptor,
        request: &QueryRequest,
    ) -> CoreResult<QueryResponse> {
        let started = Instant::now();
        let level = request
            .consistency
            .unwrap_or(collection.options.consistency_level);

        let is_count = request.is_count();
        if is_count && request.output_fields.len() > 1 {
            return Err(CoreError::schema_violation(
                COUNT_STAR,
                "count(*) cannot be combined with other output fields",
            ));
        }
        if !is_count {
            check_output_fields(collection, &request.output_fields)?;
        }
        let filter = self.parse_filter(collection, &request.filter)?;

        let timeout = request.timeout.unwrap_or_else(|| self.config.default_timeout());
        let (replica, view) = self
            .prepare(collection, level, timeout, "query", None)
            .await?;
        let visible = self.visible_segments(collection, &replica, &filter, view.read_ts)?;

        let output = if is_count {
            QueryOutput::Count(visible.iter().map(|entry| entry.offsets.len()).sum())
        } else {
            let pk_name = primary_key_name(collection);
            let per_segment = visible
                .iter()
                .map(|entry| {
                    entry
                        .offsets
                        .iter()
                        .filter_map(|offset| entry.segment.data.rows.get(offset as usize))
                        .map(|row| project_row(row, &request.output_fields, pk_name))
                        .collect()
                })
                .collect();
            QueryOutput::Rows(merge_rows(per_segment, request.limit))
        };

        QUERY_DURATION_SECONDS
            .with_label_values(&[level.as_str()])
            .observe(started.elapsed().as_secs_f64());
        Ok(QueryResponse {
            output,
            read_view: view,
        })
    }

    /// Number of visible rows matching `filter`.
    pub async fn count(
        &self,
        collection: &CollectionDescriptor,
        filter: &str,
        consistency: Option<ConsistencyLevel>,
    ) -> CoreResult<u64> {
        let mut request = QueryRequest::count(collection.name.as_str(), filter);
        request.consistency = consistency;
        Ok(self.query(collection, &request).await?.count())
    }

    fn parse_filter(&self, collection: &CollectionDescriptor, filter: &str) -> CoreResult<FilterExpr> {
        let expr = FilterParser::new(self.config.max_filter_depth).parse(filter)?;
        expr.check(&collection.schema)?;
        Ok(expr)
    }

    /// Resolves the read view and waits until the replica covers it.
    ///
    /// With `required` set, every resident segment must also carry the
    /// current build of that field's index.
    async fn prepare(
        &self,
        collection: &CollectionDescriptor,
        level: ConsistencyLevel,
        timeout: Duration,
        operation: &'static str,
        required: Option<(&str, &IndexRecord)>,
    ) -> CoreResult<(Arc<Replica>, ReadView)> {
        let started = Instant::now();
        let collection_id = collection.collection_id;
        if !self.load.is_loaded(collection_id) {
            return Err(CoreError::not_loaded(&collection.name));
        }

        let latest = match level {
            ConsistencyLevel::Strong => self.ingest.read_barrier(collection_id).await?,
            ConsistencyLevel::Customized(ts) => ts,
            _ => self.oracle.allocate().await?,
        };
        let view = level.read_view(latest);

        loop {
            let replica = self
                .load
                .replica(collection_id)
                .ok_or_else(|| CoreError::not_loaded(&collection.name))?;
            let missing = self.missing_segments(collection, &replica, view.guarantee_ts, required);
            if missing.is_empty() {
                debug!(
                    collection = %collection.name,
                    consistency = level.as_str(),
                    guarantee_ts = %view.guarantee_ts,
                    read_ts = %view.read_ts,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "read view ready"
                );
                return Ok((replica, view));
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                READ_TIMEOUTS_TOTAL.with_label_values(&[operation]).inc();
                warn!(
                    collection = %collection.name,
                    consistency = level.as_str(),
                    guarantee_ts = %view.guarantee_ts,
                    missing = ?missing,
                    "read timed out waiting for segments"
                );
                return Err(CoreError::timeout(
                    format!(
                        "{operation} on `{}` to observe {} at {}",
                        collection.name,
                        level.as_str(),
                        view.guarantee_ts
                    ),
                    elapsed,
                ));
            }
            tokio::time::sleep(self.config.wait_poll_interval().min(timeout - elapsed)).await;
        }
    }

    /// Segments the read must wait for.
    fn missing_segments(
        &self,
        collection: &CollectionDescriptor,
        replica: &Replica,
        guarantee_ts: Timestamp,
        required: Option<(&str, &IndexRecord)>,
    ) -> Vec<SegmentId> {
        let mut missing: Vec<SegmentId> = self
            .segments
            .list(collection.collection_id)
            .into_iter()
            .filter(|info| {
                info.state != SegmentState::Dropped
                    && info.holds_writes_at_or_before(guarantee_ts)
                    && !(info.state == SegmentState::Flushed && replica.contains(info.segment_id))
            })
            .map(|info| info.segment_id)
            .collect();

        if let Some((field, record)) = required {
            missing.extend(
                replica
                    .segments()
                    .iter()
                    .filter(|segment| segment.index_for(field, record.build_id).is_none())
                    .map(|segment| segment.segment_id()),
            );
        }
        missing
    }

    fn visible_segments(
        &self,
        collection: &CollectionDescriptor,
        replica: &Replica,
        filter: &FilterExpr,
        read_ts: Timestamp,
    ) -> CoreResult<Vec<VisibleSegment>> {
        let resident = replica.segments();
        let bitmaps = {
            let buffer = self.ingest.buffer(collection.collection_id)?;
            let tombstones = buffer.tombstones();
            let views: Vec<SegmentView<'_>> = resident
                .iter()
                .map(|segment| SegmentView {
                    segment_id: segment.segment_id(),
                    rows: &segment.data.rows,
                })
                .collect();
            visible_offsets(&views, &tombstones, read_ts)
        };

        Ok(resident
            .into_iter()
            .zip(bitmaps)
            .map(|(segment, visible)| {
                let offsets = filter.filter_offsets(&segment.data.rows, &visible);
                VisibleSegment { segment, offsets }
            })
            .collect())
    }
}

/// Metric for a search: the index's, else the request's, else L2.
fn resolve_metric(record: Option<&IndexRecord>, requested: Option<DistanceMetric>) -> CoreResult<DistanceMetric> {
    match (record.and_then(|r| r.descriptor.metric), requested) {
        (Some(indexed), Some(requested)) if indexed != requested => Err(CoreError::schema_violation(
            "metric_type",
            format!("index was built with {indexed:?}, search requested {requested:?}"),
        )),
        (Some(indexed), _) => Ok(indexed),
        (None, Some(requested)) => Ok(requested),
        (None, None) => Ok(DistanceMetric::L2),
    }
}

fn check_output_fields(collection: &CollectionDescriptor, fields: &[String]) -> CoreResult<()> {
    for name in fields {
        if collection.schema.field(name).is_none() {
            return Err(CoreError::schema_violation(
                name,
                "output field is not declared in the schema",
            ));
        }
    }
    Ok(())
}

fn primary_key_name(collection: &CollectionDescriptor) -> &str {
    collection
        .schema
        .primary_key()
        .map_or("", |field| field.name.as_str())
}

fn project(row: &RowRecord, fields: &[String]) -> BTreeMap<String, FieldValue> {
    fields
        .iter()
        .filter_map(|name| row.get(name).map(|value| (name.clone(), value.clone())))
        .collect()
}

/// Copies `row` keeping the requested fields and the primary key; an empty
/// request keeps every field.
fn project_row(row: &RowRecord, fields: &[String], pk_name: &str) -> RowRecord {
    if fields.is_empty() {
        return row.clone();
    }
    RowRecord {
        pk: row.pk.clone(),
        timestamp: row.timestamp,
        fields: row
            .fields
            .iter()
            .filter(|(name, _)| name.as_str() == pk_name || fields.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    }
}
