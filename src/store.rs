use std::collections::{BTreeMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::embedding::EmbedError;

pub mod memory;
pub mod qdrant;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("duplicate id in collection {collection}: {id}")]
    DuplicateId { collection: String, id: String },

    #[error("document at index {0} has an empty id")]
    EmptyId(usize),

    #[error("batch length mismatch: {ids} ids, {documents} documents, {metadatas} metadatas")]
    BatchLength {
        ids: usize,
        documents: usize,
        metadatas: usize,
    },

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error("qdrant request failed: {0}")]
    Qdrant(#[from] qdrant_client::QdrantError),

    #[error("malformed payload for point {point}: {reason}")]
    Payload { point: String, reason: String },
}

/// A single metadata value. Stores only accept scalars.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    /// Converts a JSON value, dropping anything that is not a scalar.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(MetadataValue::Bool(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(MetadataValue::Int(i)),
                None => n.as_f64().map(MetadataValue::Float),
            },
            serde_json::Value::String(s) => Some(MetadataValue::Str(s)),
            _ => None,
        }
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Str(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Str(value.to_string())
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Int(i) => write!(f, "{i}"),
            MetadataValue::Float(x) => write!(f, "{x}"),
            MetadataValue::Str(s) => f.write_str(s),
        }
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// Parallel ids, documents and metadata submitted to a collection in one call.
#[derive(Debug, Clone, Default)]
pub struct DocumentBatch {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
}

impl DocumentBatch {
    pub fn push(&mut self, id: String, document: String, metadata: Metadata) {
        self.ids.push(id);
        self.documents.push(document);
        self.metadatas.push(metadata);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Checks the batch before anything is written, so a bad batch inserts
    /// nothing.
    pub fn validate(&self, collection: &str) -> Result<(), StoreError> {
        if self.ids.len() != self.documents.len() || self.ids.len() != self.metadatas.len() {
            return Err(StoreError::BatchLength {
                ids: self.ids.len(),
                documents: self.documents.len(),
                metadatas: self.metadatas.len(),
            });
        }

        let mut seen = HashSet::with_capacity(self.ids.len());
        for (index, id) in self.ids.iter().enumerate() {
            if id.is_empty() {
                return Err(StoreError::EmptyId(index));
            }
            if !seen.insert(id.as_str()) {
                return Err(StoreError::DuplicateId {
                    collection: collection.to_string(),
                    id: id.clone(),
                });
            }
        }
        Ok(())
    }
}

/// One similarity search result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    /// Cosine distance, `1 - similarity`. Lower is closer.
    pub distance: f32,
}

/// A vector database holding named collections. Implementations own the
/// embedder and compute vectors for documents and queries themselves.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates an empty collection. Fails with `CollectionExists` if the
    /// name is taken.
    async fn create_collection(&self, name: &str, metadata: &Metadata) -> Result<(), StoreError>;

    /// Drops a collection and everything in it. Fails with
    /// `CollectionNotFound` if there is no such collection.
    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Embeds and inserts a batch. All-or-nothing. Fails with
    /// `CollectionNotFound` if the collection does not exist.
    async fn add(&self, collection: &str, batch: DocumentBatch) -> Result<(), StoreError>;

    /// Returns up to `n_results` hits ordered by ascending distance. Fails
    /// with `CollectionNotFound` if the collection does not exist.
    async fn query(
        &self,
        collection: &str,
        query_text: &str,
        n_results: usize,
    ) -> Result<Vec<QueryHit>, StoreError>;

    /// Number of stored documents. Fails with `CollectionNotFound` if the
    /// collection does not exist.
    async fn count(&self, collection: &str) -> Result<usize, StoreError>;
}

/// A store bound to one collection name.
pub struct Collection<'a> {
    name: String,
    store: &'a dyn VectorStore,
}

impl<'a> Collection<'a> {
    pub fn new(store: &'a dyn VectorStore, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn add(&self, batch: DocumentBatch) -> Result<(), StoreError> {
        self.store.add(&self.name, batch).await
    }

    pub async fn query(&self, query_text: &str, n_results: usize) -> Result<Vec<QueryHit>, StoreError> {
        self.store.query(&self.name, query_text, n_results).await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.store.count(&self.name).await
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product = a.iter().zip(b.iter()).map(|(a, b)| a * b).sum::<f32>();
    let norm_a = a.iter().map(|a| a * a).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|b| b * b).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot_product / (norm_a * norm_b)
}
