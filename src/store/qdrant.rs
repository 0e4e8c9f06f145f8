use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, PointStruct, ScoredPoint,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use uuid::Uuid;

use super::{DocumentBatch, Metadata, MetadataValue, QueryHit, StoreError, VectorStore};
use crate::embedding::{EmbedError, Embedder};

/// Payload key holding the caller's document id.
const ID_KEY: &str = "_id";
/// Payload key holding the embedded document text.
const DOCUMENT_KEY: &str = "_document";

/// Collections on a Qdrant server. Embeddings are computed locally before
/// upsert and search.
pub struct QdrantStore {
    client: Qdrant,
    embedder: Arc<dyn Embedder>,
}

impl QdrantStore {
    pub fn connect(
        url: &str,
        api_key: Option<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        let client = Qdrant::from_url(url).api_key(api_key).build()?;
        tracing::info!(url, "Connected to Qdrant");
        Ok(Self { client, embedder })
    }

    /// Server errors for a missing collection are opaque, so existence is
    /// checked up front.
    async fn require_collection(&self, name: &str) -> Result<(), StoreError> {
        let exists = self.client.collection_exists(name).await?;
        require_exists(exists, name)
    }
}

pub(crate) fn require_exists(exists: bool, name: &str) -> Result<(), StoreError> {
    if exists {
        Ok(())
    } else {
        Err(StoreError::CollectionNotFound(name.to_string()))
    }
}

/// Qdrant only accepts unsigned integers or UUIDs as point ids, so string ids
/// are mapped onto UUIDv5 values. The same id always lands on the same point.
pub(crate) fn point_id(id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()).to_string()
}

pub(crate) fn to_payload(id: &str, document: &str, metadata: Metadata) -> Payload {
    let mut map = serde_json::Map::with_capacity(metadata.len() + 2);
    for (key, value) in metadata {
        let value = match value {
            MetadataValue::Bool(b) => serde_json::Value::from(b),
            MetadataValue::Int(i) => serde_json::Value::from(i),
            MetadataValue::Float(x) => serde_json::Value::from(x),
            MetadataValue::Str(s) => serde_json::Value::from(s),
        };
        map.insert(key, value);
    }
    map.insert(ID_KEY.to_string(), id.into());
    map.insert(DOCUMENT_KEY.to_string(), document.into());
    Payload::from(map)
}

pub(crate) fn hit_from_json(
    point: &str,
    payload: HashMap<String, serde_json::Value>,
    score: f32,
) -> Result<QueryHit, StoreError> {
    let mut id = None;
    let mut document = None;
    let mut metadata = Metadata::new();
    for (key, value) in payload {
        match key.as_str() {
            ID_KEY => id = value.as_str().map(str::to_string),
            DOCUMENT_KEY => document = value.as_str().map(str::to_string),
            _ => {
                if let Some(value) = MetadataValue::from_json(value) {
                    metadata.insert(key, value);
                }
            }
        }
    }

    let missing = |field: &str| StoreError::Payload {
        point: point.to_string(),
        reason: format!("missing {field}"),
    };
    Ok(QueryHit {
        id: id.ok_or_else(|| missing(ID_KEY))?,
        document: document.ok_or_else(|| missing(DOCUMENT_KEY))?,
        metadata,
        distance: 1.0 - score,
    })
}

fn hit_from_point(point: ScoredPoint) -> Result<QueryHit, StoreError> {
    let label = format!("{:?}", point.id);
    let payload = point
        .payload
        .into_iter()
        .map(|(key, value)| (key, value.into_json()))
        .collect();
    hit_from_json(&label, payload, point.score)
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn create_collection(&self, name: &str, metadata: &Metadata) -> Result<(), StoreError> {
        if self.client.collection_exists(name).await? {
            return Err(StoreError::CollectionExists(name.to_string()));
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
                    self.embedder.dimension() as u64,
                    Distance::Cosine,
                )),
            )
            .await?;
        // Qdrant has no collection-level metadata
        tracing::debug!(collection = name, ?metadata, "Collection metadata not persisted");

        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.require_collection(name).await?;
        self.client.delete_collection(name).await?;
        Ok(())
    }

    async fn add(&self, collection: &str, batch: DocumentBatch) -> Result<(), StoreError> {
        batch.validate(collection)?;
        self.require_collection(collection).await?;
        if batch.is_empty() {
            return Ok(());
        }

        let embeddings = self.embedder.embed(&batch.documents)?;
        if embeddings.len() != batch.len() {
            return Err(EmbedError::CountMismatch {
                expected: batch.len(),
                actual: embeddings.len(),
            }
            .into());
        }

        let DocumentBatch {
            ids,
            documents,
            metadatas,
        } = batch;
        let points: Vec<PointStruct> = ids
            .iter()
            .zip(documents.iter())
            .zip(metadatas)
            .zip(embeddings)
            .map(|(((id, document), metadata), embedding)| {
                PointStruct::new(point_id(id), embedding, to_payload(id, document, metadata))
            })
            .collect();

        let start_time = Instant::now();
        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await?;
        tracing::info!(collection, "Upsert points time: {:?}", start_time.elapsed());

        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query_text: &str,
        n_results: usize,
    ) -> Result<Vec<QueryHit>, StoreError> {
        self.require_collection(collection).await?;
        if n_results == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed_query(query_text)?;

        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, embedding, n_results as u64).with_payload(true),
            )
            .await?;

        search_result
            .result
            .into_iter()
            .map(hit_from_point)
            .collect()
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        self.require_collection(collection).await?;
        let response = self
            .client
            .count(CountPointsBuilder::new(collection).exact(true))
            .await?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}
