use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::embedding::ModelChoice;
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Ephemeral in-process store
    Memory,
    /// Qdrant server over gRPC
    Qdrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// Local ONNX model via FastEmbed
    Fastembed,
    /// Deterministic feature hashing, no model download
    Hash,
}

/// Load a product catalog into a vector collection and run a sample search
#[derive(Parser, Debug, Clone)]
#[command(name = "product-vector-db", version, about, long_about = None)]
pub struct Config {
    /// JSON array of product records
    #[arg(long, env = "PRODUCTS_PATH", default_value = "./public/data/products.json")]
    pub products: PathBuf,

    /// Collection to (re)create
    #[arg(long, env = "COLLECTION_NAME", default_value = "fashion_products")]
    pub collection: String,

    #[arg(long, env = "VECTOR_BACKEND", value_enum, default_value_t = Backend::Memory)]
    pub backend: Backend,

    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6334")]
    pub qdrant_url: String,

    #[arg(long, env = "QDRANT_API_KEY")]
    pub qdrant_api_key: Option<String>,

    #[arg(long, env = "EMBEDDER", value_enum, default_value_t = EmbedderKind::Fastembed)]
    pub embedder: EmbedderKind,

    #[arg(long, env = "EMBEDDING_MODEL", value_enum, default_value_t = ModelChoice::MultilingualE5Small)]
    pub model: ModelChoice,

    /// Vector size for the hash embedder
    #[arg(long, env = "HASH_DIM", default_value_t = 256)]
    pub hash_dim: usize,

    /// Documents per embedding batch
    #[arg(long, env = "EMBED_BATCH_SIZE", default_value_t = 256)]
    pub batch_size: usize,

    /// Sample query run after loading
    #[arg(long, env = "SAMPLE_QUERY", default_value = "赤い服")]
    pub query: String,

    #[arg(long, env = "TOP_K", default_value_t = 3)]
    pub top_k: usize,

    /// Used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.collection.trim().is_empty() {
            return Err(IngestError::InvalidConfig("collection name is empty".into()));
        }
        if self.top_k == 0 {
            return Err(IngestError::InvalidConfig("top-k must be at least 1".into()));
        }
        if self.hash_dim == 0 {
            return Err(IngestError::InvalidConfig("hash-dim must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(IngestError::InvalidConfig("batch-size must be at least 1".into()));
        }
        Ok(())
    }
}
