//! In-memory metadata store for collection descriptors, index records,
//! load state and flush records.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use tidal_core::{
    CollectionDescriptor, CollectionId, CoreError, CoreResult, FlushRecord, IndexRecord,
    LoadState, MetadataStore,
};

#[derive(Default)]
struct MetadataInner {
    collections: HashMap<CollectionId, CollectionDescriptor>,
    names: HashMap<(String, String), CollectionId>,
    indexes: HashMap<CollectionId, BTreeMap<String, IndexRecord>>,
    load_states: HashMap<CollectionId, LoadState>,
    flush_records: HashMap<CollectionId, FlushRecord>,
}

/// Metadata store held in process memory.
#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: RwLock<MetadataInner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_collection(inner: &MetadataInner, collection_id: CollectionId) -> CoreResult<()> {
        if inner.collections.contains_key(&collection_id) {
            Ok(())
        } else {
            Err(CoreError::not_found("collection", collection_id.to_string()))
        }
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create_collection(&self, collection: &CollectionDescriptor) -> CoreResult<()> {
        let mut inner = self.inner.write();
        let key = (collection.database.clone(), collection.name.clone());
        if inner.names.contains_key(&key) {
            return Err(CoreError::already_exists(
                "collection",
                collection.qualified_name(),
            ));
        }
        inner.names.insert(key, collection.collection_id);
        inner
            .collections
            .insert(collection.collection_id, collection.clone());
        Ok(())
    }

    async fn get_collection(
        &self,
        collection_id: CollectionId,
    ) -> CoreResult<Option<CollectionDescriptor>> {
        Ok(self.inner.read().collections.get(&collection_id).cloned())
    }

    async fn find_collection(
        &self,
        database: &str,
        name: &str,
    ) -> CoreResult<Option<CollectionDescriptor>> {
        let inner = self.inner.read();
        Ok(inner
            .names
            .get(&(database.to_string(), name.to_string()))
            .and_then(|id| inner.collections.get(id))
            .cloned())
    }

    async fn list_collections(&self, database: &str) -> CoreResult<Vec<CollectionDescriptor>> {
        let mut collections: Vec<_> = self
            .inner
            .read()
            .collections
            .values()
            .filter(|c| c.database == database)
            .cloned()
            .collect();
        collections.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(collections)
    }

    async fn delete_collection(&self, collection_id: CollectionId) -> CoreResult<()> {
        let mut inner = self.inner.write();
        let descriptor = inner
            .collections
            .remove(&collection_id)
            .ok_or_else(|| CoreError::not_found("collection", collection_id.to_string()))?;
        inner.names.remove(&(descriptor.database, descriptor.name));
        inner.indexes.remove(&collection_id);
        inner.load_states.remove(&collection_id);
        inner.flush_records.remove(&collection_id);
        Ok(())
    }

    async fn put_index(&self, collection_id: CollectionId, record: &IndexRecord) -> CoreResult<()> {
        let mut inner = self.inner.write();
        Self::require_collection(&inner, collection_id)?;
        inner
            .indexes
            .entry(collection_id)
            .or_default()
            .insert(record.descriptor.field_name.clone(), record.clone());
        Ok(())
    }

    async fn get_index(
        &self,
        collection_id: CollectionId,
        field: &str,
    ) -> CoreResult<Option<IndexRecord>> {
        Ok(self
            .inner
            .read()
            .indexes
            .get(&collection_id)
            .and_then(|fields| fields.get(field))
            .cloned())
    }

    async fn list_indexes(&self, collection_id: CollectionId) -> CoreResult<Vec<IndexRecord>> {
        Ok(self
            .inner
            .read()
            .indexes
            .get(&collection_id)
            .map(|fields| fields.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_index(&self, collection_id: CollectionId, field: &str) -> CoreResult<bool> {
        Ok(self
            .inner
            .write()
            .indexes
            .get_mut(&collection_id)
            .map_or(false, |fields| fields.remove(field).is_some()))
    }

    async fn set_load_state(
        &self,
        collection_id: CollectionId,
        state: LoadState,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write();
        Self::require_collection(&inner, collection_id)?;
        inner.load_states.insert(collection_id, state);
        Ok(())
    }

    async fn load_state(&self, collection_id: CollectionId) -> CoreResult<LoadState> {
        Ok(self
            .inner
            .read()
            .load_states
            .get(&collection_id)
            .copied()
            .unwrap_or_default())
    }

    async fn put_flush_record(&self, record: &FlushRecord) -> CoreResult<()> {
        let mut inner = self.inner.write();
        Self::require_collection(&inner, record.collection_id)?;
        inner
            .flush_records
            .insert(record.collection_id, record.clone());
        Ok(())
    }

    async fn flush_record(&self, collection_id: CollectionId) -> CoreResult<Option<FlushRecord>> {
        Ok(self.inner.read().flush_records.get(&collection_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_core::{
        BuildId, CollectionOptions, CollectionSchema, DistanceMetric, FieldSchema,
        IndexDescriptor, IndexType, Timestamp,
    };

    fn descriptor(name: &str) -> CollectionDescriptor {
        let schema = CollectionSchema::new(vec![
            FieldSchema::int64_primary_key("pk", false),
            FieldSchema::float_vector("vec", 4),
        ]);
        CollectionDescriptor::new(
            CollectionDescriptor::DEFAULT_DATABASE,
            name,
            schema,
            CollectionOptions::default(),
            Timestamp::from_raw(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_collection_names_are_unique_per_database() {
        let store = MemoryMetadataStore::new();
        store.create_collection(&descriptor("books")).await.unwrap();
        let err = store
            .create_collection(&descriptor("books"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));

        let found = store.find_collection("default", "books").await.unwrap();
        assert!(found.is_some());
        assert!(store.find_collection("other", "books").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = MemoryMetadataStore::new();
        let desc = descriptor("books");
        let cid = desc.collection_id;
        store.create_collection(&desc).await.unwrap();

        let record = IndexRecord {
            descriptor: IndexDescriptor::new("vec", "_default", IndexType::Flat)
                .with_metric(DistanceMetric::L2),
            build_id: BuildId::new(),
            created_ts: Timestamp::from_raw(2),
        };
        store.put_index(cid, &record).await.unwrap();
        store.set_load_state(cid, LoadState::Loaded).await.unwrap();

        store.delete_collection(cid).await.unwrap();
        assert!(store.get_collection(cid).await.unwrap().is_none());
        assert!(store.get_index(cid, "vec").await.unwrap().is_none());
        assert_eq!(store.load_state(cid).await.unwrap(), LoadState::NotLoaded);

        // Name is free again
        store.create_collection(&descriptor("books")).await.unwrap();
        assert!(matches!(
            store.delete_collection(cid).await,
            Err(CoreError::NotFound { .. })
        ));
    }
}
