//! Ingestion buffer: growing segments, batch timestamps and the delete log.
//!
//! Every insert, upsert, delete and flush-seal of a collection runs under the
//! collection's ingestion lock and stamps itself with exactly one oracle
//! timestamp while holding it. A timestamp allocated under the lock is
//! therefore greater than every row already appended, which is what
//! [`IngestBuffer::read_barrier`] relies on.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use tokio::sync::Mutex;
use tracing::{debug, info};

use tidal_core::{
    CollectionDescriptor, CollectionId, CoreError, CoreResult, PrimaryKey, Row,
    RowRecord, SegmentConfig, SegmentData, SegmentId, SegmentInfo, SegmentState, SegmentStorage,
    Timestamp, TimestampOracle, Tombstone,
};
use tidal_query::{visible_offsets, FilterExpr, SegmentView, TombstoneSet};
use tidal_storage::SegmentStateStore;

use crate::metrics::{KEYS_DELETED_TOTAL, ROWS_INSERTED_TOTAL, SEGMENTS_SEALED_TOTAL};
use crate::types::{DeleteResult, InsertResult};

struct GrowingSegment {
    segment_id: SegmentId,
    rows: Vec<RowRecord>,
    size_bytes: u64,
}

struct IngestState {
    /// Open segment per shard, created on the shard's first row.
    growing: Vec<Option<GrowingSegment>>,
    next_auto_id: i64,
    /// Set when the collection is dropped; later writes fail with `NotFound`.
    closed: bool,
}

impl IngestState {
    fn ensure_open(&self, descriptor: &CollectionDescriptor) -> CoreResult<()> {
        if self.closed {
            return Err(CoreError::not_found("collection", &descriptor.name));
        }
        Ok(())
    }
}

/// Per-collection ingestion state.
pub(crate) struct CollectionBuffer {
    descriptor: CollectionDescriptor,
    state: Mutex<IngestState>,
    /// Sealed segments not yet durably persisted.
    sealed: RwLock<HashMap<SegmentId, Arc<SegmentData>>>,
    tombstones: RwLock<TombstoneSet>,
}

impl CollectionBuffer {
    fn new(descriptor: CollectionDescriptor) -> Self {
        let shards = descriptor.options.shards_num.max(1) as usize;
        Self {
            descriptor,
            state: Mutex::new(IngestState {
                growing: (0..shards).map(|_| None).collect(),
                next_auto_id: 1,
                closed: false,
            }),
            sealed: RwLock::new(HashMap::new()),
            tombstones: RwLock::new(TombstoneSet::new()),
        }
    }

    /// The collection's delete log.
    pub(crate) fn tombstones(&self) -> RwLockReadGuard<'_, TombstoneSet> {
        self.tombstones.read()
    }
}

/// Accepts writes and accumulates them into growing segments.
pub struct IngestBuffer {
    config: SegmentConfig,
    oracle: Arc<dyn TimestampOracle>,
    segments: Arc<SegmentStateStore>,
    storage: Arc<dyn SegmentStorage>,
    buffers: RwLock<HashMap<CollectionId, Arc<CollectionBuffer>>>,
}

impl IngestBuffer {
    pub fn new(
        config: SegmentConfig,
        oracle: Arc<dyn TimestampOracle>,
        segments: Arc<SegmentStateStore>,
        storage: Arc<dyn SegmentStorage>,
    ) -> Self {
        Self {
            config,
            oracle,
            segments,
            storage,
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// Creates the collection's buffer unless it already has one.
    pub(crate) fn register(&self, descriptor: &CollectionDescriptor) {
        if self.buffers.read().contains_key(&descriptor.collection_id) {
            return;
        }
        self.buffers
            .write()
            .entry(descriptor.collection_id)
            .or_insert_with(|| Arc::new(CollectionBuffer::new(descriptor.clone())));
    }

    /// Forgets the collection's buffer and waits for in-progress writes to
    /// finish; writers still holding the buffer fail afterwards.
    pub(crate) async fn remove(&self, collection_id: CollectionId) {
        let removed = self.buffers.write().remove(&collection_id);
        if let Some(buffer) = removed {
            buffer.state.lock().await.closed = true;
        }
    }

    pub(crate) fn buffer(&self, collection_id: CollectionId) -> CoreResult<Arc<CollectionBuffer>> {
        self.buffers
            .read()
            .get(&collection_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("collection", collection_id.to_string()))
    }

    /// Appends a batch of rows at one timestamp.
    pub async fn insert(&self, collection_id: CollectionId, rows: Vec<Row>) -> CoreResult<InsertResult> {
        let buffer = self.buffer(collection_id)?;
        let keys = validate_batch(&buffer.descriptor, &rows)?;

        let mut state = buffer.state.lock().await;
        state.ensure_open(&buffer.descriptor)?;
        let timestamp = self.oracle.allocate().await?;

        let pk_field = primary_key_name(&buffer.descriptor)?;
        let mut records = Vec::with_capacity(rows.len());
        for (row, key) in rows.into_iter().zip(keys) {
            let pk = match key {
                Some(pk) => pk,
                None => {
                    let id = state.next_auto_id;
                    state.next_auto_id += 1;
                    PrimaryKey::Int64(id)
                }
            };
            records.push(into_record(row, pk, &pk_field, timestamp));
        }
        let primary_keys: Vec<PrimaryKey> = records.iter().map(|r| r.pk.clone()).collect();
        let insert_count = records.len();

        self.append(&buffer, &mut state, records, timestamp)?;
        drop(state);

        ROWS_INSERTED_TOTAL
            .with_label_values(&[buffer.descriptor.name.as_str()])
            .inc_by(insert_count as f64);
        debug!(
            collection = %buffer.descriptor.name,
            rows = insert_count,
            ts = %timestamp,
            "batch inserted"
        );
        Ok(InsertResult {
            timestamp,
            insert_count,
            primary_keys,
        })
    }

    /// Replaces rows by primary key: tombstones the supplied keys and appends
    /// the new versions at one shared timestamp.
    pub async fn upsert(&self, collection_id: CollectionId, rows: Vec<Row>) -> CoreResult<InsertResult> {
        let buffer = self.buffer(collection_id)?;
        let pk_field = primary_key_name(&buffer.descriptor)?;
        if buffer
            .descriptor
            .schema
            .primary_key()
            .map_or(false, |pk| pk.auto_id)
        {
            return Err(CoreError::schema_violation(
                &pk_field,
                "upsert requires caller-supplied primary keys; the collection uses auto_id",
            ));
        }
        let keys: Vec<PrimaryKey> = validate_batch(&buffer.descriptor, &rows)?
            .into_iter()
            .flatten()
            .collect();

        let mut state = buffer.state.lock().await;
        state.ensure_open(&buffer.descriptor)?;
        let timestamp = self.oracle.allocate().await?;

        {
            let mut tombstones = buffer.tombstones.write();
            for pk in &keys {
                tombstones.insert(Tombstone {
                    pk: pk.clone(),
                    timestamp,
                });
            }
        }
        let records: Vec<RowRecord> = rows
            .into_iter()
            .zip(keys.iter().cloned())
            .map(|(row, pk)| into_record(row, pk, &pk_field, timestamp))
            .collect();
        let insert_count = records.len();
        self.append(&buffer, &mut state, records, timestamp)?;
        drop(state);

        ROWS_INSERTED_TOTAL
            .with_label_values(&[buffer.descriptor.name.as_str()])
            .inc_by(insert_count as f64);
        KEYS_DELETED_TOTAL
            .with_label_values(&[buffer.descriptor.name.as_str()])
            .inc_by(keys.len() as f64);
        debug!(collection = %buffer.descriptor.name, rows = insert_count, ts = %timestamp, "batch upserted");
        Ok(InsertResult {
            timestamp,
            insert_count,
            primary_keys: keys,
        })
    }

    /// Tombstones every row matching `predicate` written before the delete's
    /// timestamp.
    pub async fn delete(
        &self,
        collection_id: CollectionId,
        predicate: &FilterExpr,
    ) -> CoreResult<DeleteResult> {
        let buffer = self.buffer(collection_id)?;
        let descriptor = &buffer.descriptor;
        predicate.check(&descriptor.schema)?;
        if predicate.is_all() {
            return Err(CoreError::schema_violation(
                "<filter>",
                "delete requires a non-empty filter expression",
            ));
        }
        let pk_field = primary_key_name(descriptor)?;

        let state = buffer.state.lock().await;
        state.ensure_open(descriptor)?;
        let timestamp = self.oracle.allocate().await?;

        let mut keys = match predicate.primary_keys(&pk_field) {
            Some(keys) => keys,
            None => self.matching_keys(&buffer, &state, predicate, timestamp).await?,
        };
        let mut seen = HashSet::new();
        keys.retain(|pk| seen.insert(pk.clone()));

        {
            let mut tombstones = buffer.tombstones.write();
            for pk in &keys {
                tombstones.insert(Tombstone {
                    pk: pk.clone(),
                    timestamp,
                });
            }
        }
        drop(state);

        KEYS_DELETED_TOTAL
            .with_label_values(&[descriptor.name.as_str()])
            .inc_by(keys.len() as f64);
        info!(
            collection = %descriptor.name,
            filter = %predicate,
            keys = keys.len(),
            ts = %timestamp,
            "delete applied"
        );
        Ok(DeleteResult {
            timestamp,
            delete_count: keys.len(),
        })
    }

    pub(crate) fn collection_name(&self, collection_id: CollectionId) -> Option<String> {
        self.buffers
            .read()
            .get(&collection_id)
            .map(|buffer| buffer.descriptor.name.clone())
    }

    /// Allocates a timestamp ordered after every batch already appended.
    pub async fn read_barrier(&self, collection_id: CollectionId) -> CoreResult<Timestamp> {
        let buffer = self.buffer(collection_id)?;
        let _state = buffer.state.lock().await;
        self.oracle.allocate().await
    }

    /// Seals every growing segment of the collection.
    ///
    /// Returns the flush timestamp (allocated under the ingestion lock, so no
    /// earlier write remains growing) and the ids sealed by this call.
    pub(crate) async fn seal_all(
        &self,
        collection_id: CollectionId,
    ) -> CoreResult<(Timestamp, Vec<SegmentId>)> {
        let buffer = self.buffer(collection_id)?;
        let mut state = buffer.state.lock().await;
        state.ensure_open(&buffer.descriptor)?;
        let flush_ts = self.oracle.allocate().await?;

        let mut sealed = Vec::new();
        for shard in 0..state.growing.len() {
            if let Some(growing) = state.growing[shard].take() {
                sealed.push(self.seal(&buffer, shard as u32, growing, flush_ts, "flush")?);
            }
        }
        Ok((flush_ts, sealed))
    }

    /// Rows of a sealed segment awaiting persistence.
    pub(crate) fn sealed_data(
        &self,
        collection_id: CollectionId,
        segment_id: SegmentId,
    ) -> Option<Arc<SegmentData>> {
        self.buffer(collection_id)
            .ok()?
            .sealed
            .read()
            .get(&segment_id)
            .cloned()
    }

    /// Drops the in-memory copy of a segment once it is durable.
    pub(crate) fn release_sealed(&self, collection_id: CollectionId, segment_id: SegmentId) {
        if let Ok(buffer) = self.buffer(collection_id) {
            buffer.sealed.write().remove(&segment_id);
        }
    }

    fn append(
        &self,
        buffer: &CollectionBuffer,
        state: &mut IngestState,
        records: Vec<RowRecord>,
        ts: Timestamp,
    ) -> CoreResult<()> {
        let shards = state.growing.len();
        let mut by_shard: Vec<Vec<RowRecord>> = (0..shards).map(|_| Vec::new()).collect();
        for record in records {
            by_shard[shard_of(&record.pk, shards)].push(record);
        }

        for (shard, rows) in by_shard.into_iter().enumerate() {
            let mut rows = rows.into_iter().peekable();
            while rows.peek().is_some() {
                if state.growing[shard].is_none() {
                    state.growing[shard] = Some(self.open_segment(buffer, shard as u32)?);
                }
                let Some(growing) = state.growing[shard].as_mut() else {
                    return Err(CoreError::internal("growing segment vanished during append"));
                };

                while !self.is_full(growing) {
                    let Some(record) = rows.next() else { break };
                    growing.size_bytes += record.approx_size_bytes() as u64;
                    growing.rows.push(record);
                }

                let (row_count, size_bytes) = (growing.rows.len() as u64, growing.size_bytes);
                self.segments.update(growing.segment_id, |info| {
                    info.row_count = row_count;
                    info.size_bytes = size_bytes;
                    info.min_ts.get_or_insert(ts);
                    info.max_ts = Some(ts);
                    Ok(true)
                })?;

                if self.is_full(growing) {
                    if let Some(full) = state.growing[shard].take() {
                        self.seal(buffer, shard as u32, full, ts, "threshold")?;
                    }
                }
            }
        }
        Ok(())
    }

    fn is_full(&self, growing: &GrowingSegment) -> bool {
        growing.rows.len() as u64 >= self.config.max_rows
            || growing.size_bytes >= self.config.max_bytes
    }

    fn open_segment(&self, buffer: &CollectionBuffer, shard: u32) -> CoreResult<GrowingSegment> {
        let segment_id = self.segments.allocate_segment_id();
        self.segments.insert(SegmentInfo::growing(
            segment_id,
            buffer.descriptor.collection_id,
            shard,
        ))?;
        debug!(collection = %buffer.descriptor.name, segment_id = %segment_id, shard, "growing segment opened");
        Ok(GrowingSegment {
            segment_id,
            rows: Vec::new(),
            size_bytes: 0,
        })
    }

    fn seal(
        &self,
        buffer: &CollectionBuffer,
        shard: u32,
        growing: GrowingSegment,
        ts: Timestamp,
        trigger: &'static str,
    ) -> CoreResult<SegmentId> {
        let segment_id = growing.segment_id;
        let data = SegmentData {
            segment_id,
            collection_id: buffer.descriptor.collection_id,
            shard,
            rows: growing.rows,
        };
        buffer.sealed.write().insert(segment_id, Arc::new(data));
        self.segments.compare_and_transition(
            segment_id,
            SegmentState::Growing,
            SegmentState::Sealed,
            |info| info.seal_ts = Some(ts),
        )?;
        SEGMENTS_SEALED_TOTAL.with_label_values(&[trigger]).inc();
        info!(
            collection = %buffer.descriptor.name,
            segment_id = %segment_id,
            shard,
            trigger,
            "segment sealed"
        );
        Ok(segment_id)
    }

    /// Resolves a non-key predicate to the keys whose newest version before
    /// `ts` matches it.
    async fn matching_keys(
        &self,
        buffer: &CollectionBuffer,
        state: &IngestState,
        predicate: &FilterExpr,
        ts: Timestamp,
    ) -> CoreResult<Vec<PrimaryKey>> {
        let collection_id = buffer.descriptor.collection_id;
        let sealed: Vec<Arc<SegmentData>> = buffer.sealed.read().values().cloned().collect();

        let mut persisted = Vec::new();
        for info in self
            .segments
            .list_in_states(collection_id, &[SegmentState::Flushing, SegmentState::Flushed])
        {
            if sealed.iter().any(|s| s.segment_id == info.segment_id) {
                continue;
            }
            persisted.push(self.storage.read_segment(info.segment_id).await?);
        }

        let mut views: Vec<SegmentView<'_>> = state
            .growing
            .iter()
            .flatten()
            .map(|g| SegmentView {
                segment_id: g.segment_id,
                rows: &g.rows,
            })
            .collect();
        views.extend(sealed.iter().map(|s| SegmentView {
            segment_id: s.segment_id,
            rows: &s.rows,
        }));
        views.extend(persisted.iter().map(|s| SegmentView {
            segment_id: s.segment_id,
            rows: &s.rows,
        }));

        let before = Timestamp::from_raw(ts.as_u64().saturating_sub(1));
        let visible = {
            let tombstones = buffer.tombstones.read();
            visible_offsets(&views, &tombstones, before)
        };

        let mut keys = Vec::new();
        for (view, offsets) in views.iter().zip(&visible) {
            for offset in &predicate.filter_offsets(view.rows, offsets) {
                keys.push(view.rows[offset as usize].pk.clone());
            }
        }
        Ok(keys)
    }
}

fn primary_key_name(descriptor: &CollectionDescriptor) -> CoreResult<String> {
    descriptor
        .schema
        .primary_key()
        .map(|pk| pk.name.clone())
        .ok_or_else(|| CoreError::internal(format!("collection `{}` has no primary key", descriptor.name)))
}

/// Validates a batch against the schema. Returns each row's supplied key,
/// `None` for auto-assigned keys.
fn validate_batch(descriptor: &CollectionDescriptor, rows: &[Row]) -> CoreResult<Vec<Option<PrimaryKey>>> {
    if rows.is_empty() {
        return Err(CoreError::schema_violation("<rows>", "batch contains no rows"));
    }
    let pk_field = primary_key_name(descriptor)?;
    let mut seen = HashSet::with_capacity(rows.len());
    let mut keys = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        descriptor.schema.check_row(row, idx)?;
        match row.get(&pk_field) {
            None => keys.push(None),
            Some(value) => {
                let pk = PrimaryKey::from_value(value).ok_or_else(|| {
                    CoreError::schema_violation(&pk_field, format!("row {idx}: invalid primary key"))
                })?;
                if !seen.insert(pk.clone()) {
                    return Err(CoreError::schema_violation(
                        &pk_field,
                        format!("row {idx}: duplicate primary key {pk} in batch"),
                    ));
                }
                keys.push(Some(pk));
            }
        }
    }
    Ok(keys)
}

fn into_record(row: Row, pk: PrimaryKey, pk_field: &str, timestamp: Timestamp) -> RowRecord {
    let mut fields = row.fields;
    fields
        .entry(pk_field.to_string())
        .or_insert_with(|| pk.to_value());
    RowRecord {
        pk,
        timestamp,
        fields,
    }
}

fn shard_of(pk: &PrimaryKey, shards: usize) -> usize {
    if shards <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    pk.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_core::{
        CollectionOptions, CollectionSchema, FieldSchema, HybridTimestampOracle,
    };
    use tidal_storage::MemorySegmentStorage;

    fn descriptor(auto_id: bool, shards: u32) -> CollectionDescriptor {
        let schema = CollectionSchema::new(vec![
            FieldSchema::int64_primary_key("id", auto_id),
            FieldSchema::float_vector("vec", 2),
            FieldSchema::new("tag", tidal_core::DataType::VarChar { max_length: 16 }).nullable(),
        ]);
        CollectionDescriptor::new(
            CollectionDescriptor::DEFAULT_DATABASE,
            "books",
            schema,
            CollectionOptions {
                shards_num: shards,
                ..CollectionOptions::default()
            },
            Timestamp::ZERO,
        )
        .unwrap()
    }

    fn buffer_with(max_rows: u64, descriptor: &CollectionDescriptor) -> (IngestBuffer, Arc<SegmentStateStore>) {
        let segments = Arc::new(SegmentStateStore::new());
        let ingest = IngestBuffer::new(
            SegmentConfig {
                max_rows,
                ..SegmentConfig::default()
            },
            Arc::new(HybridTimestampOracle::new()),
            Arc::clone(&segments),
            Arc::new(MemorySegmentStorage::new()),
        );
        ingest.register(descriptor);
        (ingest, segments)
    }

    fn row(id: i64) -> Row {
        Row::new().with("id", id).with("vec", vec![id as f32, 0.0])
    }

    #[tokio::test]
    async fn test_batch_split_at_seal_boundary() {
        let desc = descriptor(false, 1);
        let (ingest, segments) = buffer_with(4, &desc);

        let result = ingest
            .insert(desc.collection_id, (0..10).map(row).collect())
            .await
            .unwrap();
        assert_eq!(result.insert_count, 10);

        let infos = segments.list(desc.collection_id);
        let states: Vec<_> = infos.iter().map(|i| (i.state, i.row_count)).collect();
        assert_eq!(
            states,
            vec![
                (SegmentState::Sealed, 4),
                (SegmentState::Sealed, 4),
                (SegmentState::Growing, 2)
            ]
        );
        let total: usize = infos
            .iter()
            .filter(|i| i.state == SegmentState::Sealed)
            .filter_map(|i| ingest.sealed_data(desc.collection_id, i.segment_id))
            .map(|d| d.len())
            .sum();
        assert_eq!(total, 8);
    }

    #[tokio::test]
    async fn test_schema_violation_rejects_whole_batch() {
        let desc = descriptor(false, 1);
        let (ingest, segments) = buffer_with(100, &desc);

        let rows = vec![row(1), Row::new().with("id", 2i64).with("vec", vec![1.0f32])];
        let err = ingest.insert(desc.collection_id, rows).await.unwrap_err();
        match err {
            CoreError::SchemaViolation { field, message } => {
                assert_eq!(field, "vec");
                assert!(message.contains("row 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(segments.list(desc.collection_id).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_key_in_batch() {
        let desc = descriptor(false, 1);
        let (ingest, _) = buffer_with(100, &desc);
        let err = ingest
            .insert(desc.collection_id, vec![row(1), row(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation { .. }));
    }

    #[tokio::test]
    async fn test_auto_id_assigns_keys() {
        let desc = descriptor(true, 1);
        let (ingest, _) = buffer_with(100, &desc);
        let rows = vec![
            Row::new().with("vec", vec![0.0f32, 0.0]),
            Row::new().with("vec", vec![1.0f32, 0.0]),
        ];
        let result = ingest.insert(desc.collection_id, rows).await.unwrap();
        assert_eq!(
            result.primary_keys,
            vec![PrimaryKey::from(1), PrimaryKey::from(2)]
        );

        let err = ingest
            .insert(desc.collection_id, vec![row(5)])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation { .. }));
    }

    #[tokio::test]
    async fn test_sharding_spreads_rows() {
        let desc = descriptor(false, 4);
        let (ingest, segments) = buffer_with(1000, &desc);
        ingest
            .insert(desc.collection_id, (0..200).map(row).collect())
            .await
            .unwrap();
        let infos = segments.list(desc.collection_id);
        assert!(infos.len() > 1);
        assert_eq!(infos.iter().map(|i| i.row_count).sum::<u64>(), 200);
    }

    #[tokio::test]
    async fn test_seal_all_and_barrier_ordering() {
        let desc = descriptor(false, 1);
        let (ingest, segments) = buffer_with(100, &desc);
        let inserted = ingest
            .insert(desc.collection_id, vec![row(1)])
            .await
            .unwrap();

        let (flush_ts, sealed) = ingest.seal_all(desc.collection_id).await.unwrap();
        assert!(flush_ts > inserted.timestamp);
        assert_eq!(sealed.len(), 1);
        assert_eq!(
            segments.require(sealed[0]).unwrap().info.state,
            SegmentState::Sealed
        );

        let (_, none) = ingest.seal_all(desc.collection_id).await.unwrap();
        assert!(none.is_empty());

        let barrier = ingest.read_barrier(desc.collection_id).await.unwrap();
        assert!(barrier > flush_ts);
    }

    #[tokio::test]
    async fn test_delete_by_scalar_predicate() {
        let desc = descriptor(false, 1);
        let (ingest, _) = buffer_with(100, &desc);
        let rows = vec![
            row(1).with("tag", "a"),
            row(2).with("tag", "b"),
            row(3).with("tag", "a"),
        ];
        ingest.insert(desc.collection_id, rows).await.unwrap();

        let predicate = FilterExpr::parse("tag == \"a\"").unwrap();
        let result = ingest.delete(desc.collection_id, &predicate).await.unwrap();
        assert_eq!(result.delete_count, 2);

        let buffer = ingest.buffer(desc.collection_id).unwrap();
        let tombstones = buffer.tombstones();
        assert!(tombstones.hides(&PrimaryKey::from(1), Timestamp::ZERO, result.timestamp));
        assert!(!tombstones.hides(&PrimaryKey::from(2), Timestamp::ZERO, result.timestamp));
    }

    #[tokio::test]
    async fn test_delete_requires_predicate() {
        let desc = descriptor(false, 1);
        let (ingest, _) = buffer_with(100, &desc);
        let err = ingest
            .delete(desc.collection_id, &FilterExpr::All)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation { .. }));
    }

    #[tokio::test]
    async fn test_removed_buffer_rejects_late_writers() {
        let desc = descriptor(false, 1);
        let (ingest, segments) = buffer_with(100, &desc);
        ingest.insert(desc.collection_id, vec![row(1)]).await.unwrap();

        // A writer that resolved the buffer before the drop
        let held = ingest.buffer(desc.collection_id).unwrap();
        ingest.remove(desc.collection_id).await;

        let err = held.state.lock().await.ensure_open(&held.descriptor).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        let err = ingest
            .insert(desc.collection_id, vec![row(2)])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert!(ingest.collection_name(desc.collection_id).is_none());
        assert_eq!(segments.list(desc.collection_id).len(), 1);
    }
}
