use serde::Deserialize;
use serde_json::Number;

use crate::store::{Metadata, MetadataValue};

/// A catalog entry as it appears in `products.json`.
///
/// Every field is optional; anything missing falls back to its empty value so
/// partially filled records still produce a document and metadata.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub category: Vec<String>,
    pub price: Price,
    pub size: Vec<String>,
    pub color: Vec<String>,
    pub material: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub target: String,
    pub scene: String,
    pub recommend_for: String,
    pub catchcopy: String,
    pub season: String,
    pub rating: f64,
    pub reviews: i64,
    pub is_new: bool,
}

/// Price as written in the source file. Integer prices stay integers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Price(Number);

impl Default for Price {
    fn default() -> Self {
        Price(Number::from(0))
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&Price> for MetadataValue {
    fn from(price: &Price) -> Self {
        match price.0.as_i64() {
            Some(value) => MetadataValue::Int(value),
            None => MetadataValue::Float(price.0.as_f64().unwrap_or(0.0)),
        }
    }
}

fn join(values: &[String]) -> String {
    values.join(", ")
}

/// Renders a product as the labeled multi-line text that gets embedded.
pub fn create_product_text(product: &Product) -> String {
    format!(
        "商品名: {}\n\
         ブランド: {}\n\
         カテゴリ: {}\n\
         価格: {}円\n\
         サイズ: {}\n\
         カラー: {}\n\
         素材: {}\n\
         説明: {}\n\
         キーワード: {}\n\
         ターゲット: {}\n\
         シーン: {}\n\
         おすすめ: {}\n\
         キャッチコピー: {}\n\
         季節: {}",
        product.name,
        product.brand,
        join(&product.category),
        product.price,
        join(&product.size),
        join(&product.color),
        product.material,
        product.description,
        join(&product.keywords),
        product.target,
        product.scene,
        product.recommend_for,
        product.catchcopy,
        product.season,
    )
}

/// Flattens a product into scalar-only metadata.
///
/// List fields are joined with `", "` since the store rejects list values.
pub fn create_metadata(product: &Product) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("id".into(), product.id.clone().into());
    metadata.insert("name".into(), product.name.clone().into());
    metadata.insert("brand".into(), product.brand.clone().into());
    metadata.insert("category".into(), join(&product.category).into());
    metadata.insert("price".into(), MetadataValue::from(&product.price));
    metadata.insert("size".into(), join(&product.size).into());
    metadata.insert("color".into(), join(&product.color).into());
    metadata.insert("material".into(), product.material.clone().into());
    metadata.insert("target".into(), product.target.clone().into());
    metadata.insert("scene".into(), product.scene.clone().into());
    metadata.insert("rating".into(), MetadataValue::Float(product.rating));
    metadata.insert("reviews".into(), MetadataValue::Int(product.reviews));
    metadata.insert("is_new".into(), MetadataValue::Bool(product.is_new));
    metadata.insert("season".into(), product.season.clone().into());
    metadata.insert("keywords".into(), join(&product.keywords).into());
    metadata
}
