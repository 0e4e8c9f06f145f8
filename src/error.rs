use std::path::PathBuf;

use thiserror::Error;

use crate::embedding::EmbedError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to read products from {path}")]
    ReadProducts {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse products in {path}")]
    ParseProducts {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
