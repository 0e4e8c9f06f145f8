use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{cosine_similarity, DocumentBatch, Metadata, QueryHit, StoreError, VectorStore};
use crate::embedding::Embedder;

struct Record {
    id: String,
    document: String,
    metadata: Metadata,
    embedding: Vec<f32>,
}

#[derive(Default)]
struct MemoryCollection {
    metadata: Metadata,
    records: Vec<Record>,
    ids: HashSet<String>,
}

/// Ephemeral in-process store. Contents live as long as the value does.
pub struct InMemoryStore {
    embedder: Arc<dyn Embedder>,
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl InMemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            collections: RwLock::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn collection_metadata(&self, name: &str) -> Option<Metadata> {
        self.collections.read().get(name).map(|c| c.metadata.clone())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn create_collection(&self, name: &str, metadata: &Metadata) -> Result<(), StoreError> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(StoreError::CollectionExists(name.to_string()));
        }
        collections.insert(
            name.to_string(),
            MemoryCollection {
                metadata: metadata.clone(),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let removed = self
            .collections
            .write()
            .remove(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;
        tracing::debug!(
            collection = name,
            records = removed.records.len(),
            metadata = ?removed.metadata,
            "Dropped collection"
        );
        Ok(())
    }

    async fn add(&self, collection: &str, batch: DocumentBatch) -> Result<(), StoreError> {
        batch.validate(collection)?;

        {
            let collections = self.collections.read();
            let existing = collections
                .get(collection)
                .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
            if let Some(id) = batch.ids.iter().find(|id| existing.ids.contains(*id)) {
                return Err(StoreError::DuplicateId {
                    collection: collection.to_string(),
                    id: id.clone(),
                });
            }
        }

        if batch.is_empty() {
            return Ok(());
        }

        // embed outside the lock
        let embeddings = self.embedder.embed(&batch.documents)?;
        if embeddings.len() != batch.len() {
            return Err(crate::embedding::EmbedError::CountMismatch {
                expected: batch.len(),
                actual: embeddings.len(),
            }
            .into());
        }

        let mut collections = self.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        // re-check: the collection may have changed while embedding
        if let Some(id) = batch.ids.iter().find(|id| target.ids.contains(*id)) {
            return Err(StoreError::DuplicateId {
                collection: collection.to_string(),
                id: id.clone(),
            });
        }

        let DocumentBatch {
            ids,
            documents,
            metadatas,
        } = batch;
        for (((id, document), metadata), embedding) in ids
            .into_iter()
            .zip(documents)
            .zip(metadatas)
            .zip(embeddings)
        {
            target.ids.insert(id.clone());
            target.records.push(Record {
                id,
                document,
                metadata,
                embedding,
            });
        }
        tracing::debug!(collection, total = target.records.len(), "Batch stored");

        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query_text: &str,
        n_results: usize,
    ) -> Result<Vec<QueryHit>, StoreError> {
        if !self.collections.read().contains_key(collection) {
            return Err(StoreError::CollectionNotFound(collection.to_string()));
        }

        let embedding = self.embedder.embed_query(query_text)?;

        let collections = self.collections.read();
        let target = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        let mut scored: Vec<(&Record, f32)> = target
            .records
            .iter()
            .map(|record| (record, cosine_similarity(&record.embedding, &embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(n_results)
            .map(|(record, similarity)| QueryHit {
                id: record.id.clone(),
                document: record.document.clone(),
                metadata: record.metadata.clone(),
                distance: 1.0 - similarity,
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.records.len())
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::store::MetadataValue;

    fn store() -> InMemoryStore {
        InMemoryStore::new(Arc::new(HashEmbedder::new(128)))
    }

    fn batch(entries: &[(&str, &str)]) -> DocumentBatch {
        let mut batch = DocumentBatch::default();
        for (id, text) in entries {
            let mut metadata = Metadata::new();
            metadata.insert("name".into(), MetadataValue::from(*text));
            batch.push(id.to_string(), text.to_string(), metadata);
        }
        batch
    }

    #[tokio::test]
    async fn test_delete_missing_collection_is_not_found() {
        let store = store();
        let err = store.delete_collection("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let store = store();
        let mut metadata = Metadata::new();
        metadata.insert("description".into(), MetadataValue::from("test"));
        store.create_collection("c", &metadata).await.unwrap();
        assert_eq!(store.collection_metadata("c"), Some(metadata));
        let err = store.create_collection("c", &Metadata::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionExists(_)));

        store.delete_collection("c").await.unwrap();
        assert!(store.create_collection("c", &Metadata::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_add_and_count() {
        let store = store();
        store.create_collection("c", &Metadata::new()).await.unwrap();
        store
            .add("c", batch(&[("p1", "red dress"), ("p2", "blue jeans")]))
            .await
            .unwrap();
        assert_eq!(store.count("c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_batch_inserts_nothing() {
        let store = store();
        store.create_collection("c", &Metadata::new()).await.unwrap();
        let err = store
            .add("c", batch(&[("p1", "red dress"), ("p1", "blue jeans")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
        assert_eq!(store.count("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_existing_id_rejected() {
        let store = store();
        store.create_collection("c", &Metadata::new()).await.unwrap();
        store.add("c", batch(&[("p1", "red dress")])).await.unwrap();
        let err = store
            .add("c", batch(&[("p2", "coat"), ("p1", "again")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { id, .. } if id == "p1"));
        assert_eq!(store.count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_to_missing_collection() {
        let store = store();
        let err = store.add("c", batch(&[("p1", "x")])).await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_query_orders_by_distance() {
        let store = store();
        store.create_collection("c", &Metadata::new()).await.unwrap();
        store
            .add(
                "c",
                batch(&[
                    ("p1", "wool winter coat"),
                    ("p2", "red summer dress"),
                    ("p3", "leather belt"),
                ]),
            )
            .await
            .unwrap();

        let hits = store.query("c", "red summer dress", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "p2");
        assert_eq!(hits[0].document, "red summer dress");
        assert_eq!(hits[0].metadata["name"], MetadataValue::from("red summer dress"));
        assert!(hits[0].distance.abs() < 1e-5);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn test_query_empty_collection() {
        let store = store();
        store.create_collection("c", &Metadata::new()).await.unwrap();
        store.add("c", DocumentBatch::default()).await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 0);
        assert!(store.query("c", "赤い服", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_more_than_stored() {
        let store = store();
        store.create_collection("c", &Metadata::new()).await.unwrap();
        store.add("c", batch(&[("p1", "a b c")])).await.unwrap();
        assert_eq!(store.query("c", "a", 10).await.unwrap().len(), 1);
    }
}
