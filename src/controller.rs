use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Backend, Config, EmbedderKind};
use crate::embedding::{Embedder, FastEmbedder, HashEmbedder};
use crate::error::IngestError;
use crate::product::{create_metadata, create_product_text, Product};
use crate::store::memory::InMemoryStore;
use crate::store::qdrant::QdrantStore;
use crate::store::{Collection, DocumentBatch, Metadata, QueryHit, StoreError, VectorStore};

pub const COLLECTION_DESCRIPTION: &str = "ファッション商品のベクトルデータベース";

/// Outcome of a full run, printed by `main`.
#[derive(Debug)]
pub struct Report {
    pub loaded: usize,
    pub query: String,
    pub hits: Vec<QueryHit>,
    pub total: usize,
    pub collection: String,
}

/// Builds the embedder selected in the configuration.
///
/// `fastembed` loads the ONNX model (downloading it on first use); `hash`
/// needs no model files.
///
/// # Arguments
///
/// * `config` - Parsed configuration; `embedder`, `model`, `batch_size` and
///   `hash_dim` are read.
///
/// # Returns
///
/// A shared embedder handed to the vector store, or the model load error.
///
/// # Example
///
/// ```ignore
/// let embedder = initialize_embedder(&config)?;
/// ```
pub fn initialize_embedder(config: &Config) -> Result<Arc<dyn Embedder>, IngestError> {
    let embedder: Arc<dyn Embedder> = match config.embedder {
        EmbedderKind::Fastembed => Arc::new(FastEmbedder::try_new(config.model, config.batch_size)?),
        EmbedderKind::Hash => Arc::new(HashEmbedder::new(config.hash_dim)),
    };
    tracing::info!(
        model = embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder ready"
    );
    Ok(embedder)
}

/// Opens the configured vector store.
///
/// # Arguments
///
/// * `config` - Parsed configuration; `backend`, `qdrant_url` and
///   `qdrant_api_key` are read.
/// * `embedder` - Embedder the store uses on `add` and `query`.
///
/// # Returns
///
/// The store behind the `VectorStore` trait, or the client build error.
///
/// # Example
///
/// ```ignore
/// let store = connect_store(&config, embedder)?;
/// ```
pub fn connect_store(
    config: &Config,
    embedder: Arc<dyn Embedder>,
) -> Result<Box<dyn VectorStore>, IngestError> {
    let store: Box<dyn VectorStore> = match config.backend {
        Backend::Memory => Box::new(InMemoryStore::new(embedder)),
        Backend::Qdrant => Box::new(QdrantStore::connect(
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
            embedder,
        )?),
    };
    Ok(store)
}

/// Reads the product catalog, a JSON array of product objects.
///
/// # Arguments
///
/// * `path` - Path to the JSON file.
///
/// # Returns
///
/// The products in file order. A missing file or malformed JSON is an error
/// naming the path.
///
/// # Example
///
/// ```ignore
/// let products = load_products(Path::new("./public/data/products.json"))?;
/// ```
pub fn load_products(path: &Path) -> Result<Vec<Product>, IngestError> {
    let bytes = std::fs::read(path).map_err(|source| IngestError::ReadProducts {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| IngestError::ParseProducts {
        path: path.to_path_buf(),
        source,
    })
}

/// Turns products into the parallel ids/documents/metadata of one batch.
pub fn build_batch(products: &[Product]) -> DocumentBatch {
    let mut batch = DocumentBatch::default();
    for product in products {
        batch.push(
            product.id.clone(),
            create_product_text(product),
            create_metadata(product),
        );
    }
    batch
}

/// Drops `name` if it exists and creates it again, empty.
///
/// Only a missing collection is tolerated on delete; connection and
/// permission failures still surface.
///
/// # Arguments
///
/// * `store` - The vector store.
/// * `name` - Collection to recreate.
///
/// # Returns
///
/// A handle bound to the fresh collection.
///
/// # Example
///
/// ```ignore
/// let collection = setup_collection(store.as_ref(), "fashion_products").await?;
/// ```
pub async fn setup_collection<'a>(
    store: &'a dyn VectorStore,
    name: &str,
) -> Result<Collection<'a>, StoreError> {
    match store.delete_collection(name).await {
        Ok(()) => tracing::info!(collection = name, "Deleted existing collection"),
        Err(StoreError::CollectionNotFound(_)) => {
            tracing::debug!(collection = name, "No existing collection to delete")
        }
        Err(e) => return Err(e),
    }

    let mut metadata = Metadata::new();
    metadata.insert("description".into(), COLLECTION_DESCRIPTION.into());
    store.create_collection(name, &metadata).await?;
    tracing::info!(collection = name, "Collection created");

    Ok(Collection::new(store, name))
}

/// Embeds and stores every product in a single batch.
///
/// The batch is all-or-nothing: a duplicate or empty id fails the call and
/// nothing is inserted.
///
/// # Arguments
///
/// * `collection` - Target collection handle.
/// * `products` - Products to store, keyed by their `id`.
///
/// # Returns
///
/// The number of documents submitted.
///
/// # Example
///
/// ```ignore
/// let stored = add_products(&collection, &products).await?;
/// ```
pub async fn add_products(
    collection: &Collection<'_>,
    products: &[Product],
) -> Result<usize, StoreError> {
    let batch = build_batch(products);
    let submitted = batch.len();

    let start_time = Instant::now();
    collection.add(batch).await?;
    tracing::info!(
        collection = collection.name(),
        documents = submitted,
        "Stored products in {:?}",
        start_time.elapsed()
    );

    Ok(submitted)
}

/// Runs the whole pipeline: load, transform, recreate collection, add,
/// then one sample search.
///
/// # Arguments
///
/// * `config` - Validated before anything else happens.
///
/// # Returns
///
/// A `Report` with the sample hits and the stored count.
///
/// # Example
///
/// ```ignore
/// let report = run(&Config::parse()).await?;
/// print_report(&report);
/// ```
pub async fn run(config: &Config) -> Result<Report, IngestError> {
    config.validate()?;

    tracing::info!(path = %config.products.display(), "Loading products");
    let products = load_products(&config.products)?;
    tracing::info!(count = products.len(), "Products loaded");

    let embedder = initialize_embedder(config)?;
    let store = connect_store(config, embedder)?;

    let collection = setup_collection(store.as_ref(), &config.collection).await?;
    add_products(&collection, &products).await?;

    let hits = collection.query(&config.query, config.top_k).await?;
    let total = collection.count().await?;

    Ok(Report {
        loaded: products.len(),
        query: config.query.clone(),
        hits,
        total,
        collection: collection.name().to_string(),
    })
}

/// Formats one search hit as `{rank}. {name} (ID: {id}) - {brand}`.
/// Missing name or brand metadata renders empty.
pub fn format_hit(rank: usize, hit: &QueryHit) -> String {
    let field = |key: &str| {
        hit.metadata
            .get(key)
            .map(|v| v.to_string())
            .unwrap_or_default()
    };
    format!("{}. {} (ID: {}) - {}", rank, field("name"), hit.id, field("brand"))
}

/// Prints the sample hits, then the stored count and collection name.
pub fn print_report(report: &Report) {
    println!("Search results for \"{}\":", report.query);
    for (i, hit) in report.hits.iter().enumerate() {
        println!("{}", format_hit(i + 1, hit));
    }

    println!();
    println!("Collection stats:");
    println!("- products loaded: {}", report.loaded);
    println!("- total stored: {}", report.total);
    println!("- collection: {}", report.collection);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MetadataValue;
    use async_trait::async_trait;
    use clap::Parser;
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::NamedTempFile;

    /// A store whose deletes always fail with something other than
    /// not-found.
    #[derive(Default)]
    struct FailingDeleteStore {
        created: AtomicBool,
    }

    #[async_trait]
    impl VectorStore for FailingDeleteStore {
        async fn create_collection(&self, _name: &str, _metadata: &Metadata) -> Result<(), StoreError> {
            self.created.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
            Err(StoreError::Payload {
                point: name.to_string(),
                reason: "connection refused".to_string(),
            })
        }

        async fn add(&self, _collection: &str, _batch: DocumentBatch) -> Result<(), StoreError> {
            Ok(())
        }

        async fn query(
            &self,
            _collection: &str,
            _query_text: &str,
            _n_results: usize,
        ) -> Result<Vec<QueryHit>, StoreError> {
            Ok(Vec::new())
        }

        async fn count(&self, _collection: &str) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn products_file(value: serde_json::Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Unable to create file");
        write!(file, "{value}").expect("Unable to write to file");
        file
    }

    fn config_for(path: &Path) -> Config {
        Config::parse_from([
            "product-vector-db",
            "--products",
            path.to_str().unwrap(),
            "--backend",
            "memory",
            "--embedder",
            "hash",
            "--collection",
            "fashion_products",
        ])
    }

    fn catalog() -> serde_json::Value {
        json!([
            {"id": "p1", "name": "Red Dress", "brand": "Rouge", "category": ["Dress"],
             "color": ["レッド"], "price": 5000, "keywords": ["赤い服", "ワンピース"]},
            {"id": "p2", "name": "Wool Coat", "brand": "Nord", "category": ["Outer"],
             "color": ["グレー"], "price": 18000},
            {"id": "p3", "name": "Denim", "brand": "Blue", "category": ["Pants"],
             "price": 7900, "is_new": true}
        ])
    }

    #[test]
    fn test_load_products() {
        let file = products_file(catalog());
        let products = load_products(file.path()).unwrap();
        assert_eq!(products.len(), 3);
        assert_eq!(products[0].id, "p1");
        assert_eq!(products[0].category, vec!["Dress".to_string()]);
        assert!(products[2].is_new);
    }

    #[test]
    fn test_load_products_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_products(&dir.path().join("products.json")).unwrap_err();
        assert!(matches!(err, IngestError::ReadProducts { .. }));
    }

    #[test]
    fn test_load_products_malformed_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[{{\"id\": \"p1\",").unwrap();
        let err = load_products(file.path()).unwrap_err();
        assert!(matches!(err, IngestError::ParseProducts { .. }));
    }

    #[test]
    fn test_build_batch_keeps_order() {
        let products: Vec<Product> = serde_json::from_value(catalog()).unwrap();
        let batch = build_batch(&products);
        assert_eq!(batch.ids, vec!["p1", "p2", "p3"]);
        assert!(batch.documents[1].contains("商品名: Wool Coat"));
        assert_eq!(batch.metadatas[2]["price"], MetadataValue::Int(7900));
    }

    #[tokio::test]
    async fn test_run_stores_every_product() {
        let file = products_file(catalog());
        let config = config_for(file.path());

        let report = run(&config).await.unwrap();
        assert_eq!(report.loaded, 3);
        assert_eq!(report.total, 3);
        assert_eq!(report.collection, "fashion_products");
        assert_eq!(report.hits.len(), 3);
    }

    #[tokio::test]
    async fn test_stored_ids_match_input() {
        let products: Vec<Product> = serde_json::from_value(catalog()).unwrap();
        let store = InMemoryStore::new(Arc::new(HashEmbedder::new(64)));
        let collection = setup_collection(&store, "fashion_products").await.unwrap();
        add_products(&collection, &products).await.unwrap();

        let mut ids: Vec<String> = collection
            .query("服", products.len())
            .await
            .unwrap()
            .into_iter()
            .map(|hit| hit.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
        assert_eq!(
            store.collection_metadata("fashion_products").unwrap()["description"],
            MetadataValue::from(COLLECTION_DESCRIPTION)
        );
    }

    #[tokio::test]
    async fn test_setup_collection_is_idempotent() {
        let products: Vec<Product> = serde_json::from_value(catalog()).unwrap();
        let store = InMemoryStore::new(Arc::new(HashEmbedder::new(64)));

        let first = setup_collection(&store, "fashion_products").await.unwrap();
        add_products(&first, &products).await.unwrap();
        assert_eq!(first.count().await.unwrap(), 3);

        let second = setup_collection(&store, "fashion_products").await.unwrap();
        assert_eq!(second.count().await.unwrap(), 0);
        add_products(&second, &products).await.unwrap();
        assert_eq!(second.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_empty_catalog() {
        let file = products_file(json!([]));
        let config = config_for(file.path());

        let report = run(&config).await.unwrap();
        assert_eq!(report.loaded, 0);
        assert_eq!(report.total, 0);
        assert!(report.hits.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_ids_fail_the_batch() {
        let products: Vec<Product> = serde_json::from_value(json!([
            {"id": "p1", "name": "A"},
            {"id": "p1", "name": "B"}
        ]))
        .unwrap();
        let store = InMemoryStore::new(Arc::new(HashEmbedder::new(64)));
        let collection = setup_collection(&store, "fashion_products").await.unwrap();

        let err = add_products(&collection, &products).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
        assert_eq!(collection.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_red_query_finds_red_dress() {
        let file = products_file(catalog());
        let config = Config::parse_from([
            "product-vector-db",
            "--products",
            file.path().to_str().unwrap(),
            "--embedder",
            "hash",
            "--backend",
            "memory",
            "--query",
            "Red Dress",
            "--top-k",
            "1",
        ]);

        let report = run(&config).await.unwrap();
        assert_eq!(report.hits.len(), 1);
        assert_eq!(report.hits[0].id, "p1");
    }

    #[tokio::test]
    async fn test_setup_collection_surfaces_other_delete_errors() {
        let store = FailingDeleteStore::default();

        let result = setup_collection(&store, "fashion_products").await;
        match result {
            Err(StoreError::Payload { reason, .. }) => assert_eq!(reason, "connection refused"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("delete failure was swallowed"),
        }
        assert!(!store.created.load(Ordering::SeqCst));
    }

    #[test]
    fn test_format_hit() {
        let mut metadata = Metadata::new();
        metadata.insert("name".into(), MetadataValue::from("Red Dress"));
        metadata.insert("brand".into(), MetadataValue::from("Rouge"));
        let hit = QueryHit {
            id: "p1".into(),
            document: String::new(),
            metadata,
            distance: 0.1,
        };
        assert_eq!(format_hit(1, &hit), "1. Red Dress (ID: p1) - Rouge");

        let bare = QueryHit {
            metadata: Metadata::new(),
            ..hit
        };
        assert_eq!(format_hit(3, &bare), "3.  (ID: p1) - ");
    }
}
