use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use clap::ValueEnum;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("failed to initialize embedding model {model}: {reason}")]
    Init { model: String, reason: String },

    #[error("embedding inference failed: {0}")]
    Inference(String),

    #[error("embedder returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
}

/// Turns text into fixed-size vectors. Stores hold one and call it on
/// every `add` and `query`.
pub trait Embedder: Send + Sync {
    /// Embeds documents destined for storage.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embeds a search query. Models that distinguish queries from passages
    /// override this.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed(&[text.to_string()])?;
        if vectors.len() != 1 {
            return Err(EmbedError::CountMismatch {
                expected: 1,
                actual: vectors.len(),
            });
        }
        Ok(vectors.remove(0))
    }

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Models selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelChoice {
    #[value(name = "multilingual-e5-small")]
    MultilingualE5Small,
    #[value(name = "all-mini-lm-l6-v2")]
    AllMiniLmL6V2,
}

impl ModelChoice {
    fn model(self) -> EmbeddingModel {
        match self {
            ModelChoice::MultilingualE5Small => EmbeddingModel::MultilingualE5Small,
            ModelChoice::AllMiniLmL6V2 => EmbeddingModel::AllMiniLML6V2,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ModelChoice::MultilingualE5Small => "intfloat/multilingual-e5-small",
            ModelChoice::AllMiniLmL6V2 => "sentence-transformers/all-MiniLM-L6-v2",
        }
    }

    /// E5 models are trained with `query: ` / `passage: ` prefixes.
    fn uses_prefixes(self) -> bool {
        matches!(self, ModelChoice::MultilingualE5Small)
    }
}

/// Local ONNX embedding through FastEmbed.
pub struct FastEmbedder {
    model: TextEmbedding,
    choice: ModelChoice,
    dimension: usize,
    batch_size: usize,
}

impl FastEmbedder {
    /// Loads the model, downloading it on first use, and probes its output
    /// dimension.
    pub fn try_new(choice: ModelChoice, batch_size: usize) -> Result<Self, EmbedError> {
        let start_time = Instant::now();
        let model = TextEmbedding::try_new(InitOptions {
            model_name: choice.model(),
            show_download_progress: true,
            ..Default::default()
        })
        .map_err(|e| EmbedError::Init {
            model: choice.name().to_string(),
            reason: format!("{e:#}"),
        })?;

        let probe = model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| EmbedError::Inference(format!("{e:#}")))?;
        let dimension = probe.first().map(Vec::len).ok_or(EmbedError::CountMismatch {
            expected: 1,
            actual: 0,
        })?;

        tracing::info!(
            model = choice.name(),
            dimension,
            "Model initialization time: {:?}",
            start_time.elapsed()
        );

        Ok(Self {
            model,
            choice,
            dimension,
            batch_size,
        })
    }

    fn run(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedError> {
        let expected = inputs.len();
        let embeddings = self
            .model
            .embed(inputs, Some(self.batch_size))
            .map_err(|e| EmbedError::Inference(format!("{e:#}")))?;
        if embeddings.len() != expected {
            return Err(EmbedError::CountMismatch {
                expected,
                actual: embeddings.len(),
            });
        }
        Ok(embeddings)
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start_time = Instant::now();
        let inputs = if self.choice.uses_prefixes() {
            texts.iter().map(|t| format!("passage: {t}")).collect()
        } else {
            texts.to_vec()
        };
        let embeddings = self.run(inputs)?;
        tracing::info!(
            count = embeddings.len(),
            "Embedding generation time: {:?}",
            start_time.elapsed()
        );
        Ok(embeddings)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let input = if self.choice.uses_prefixes() {
            format!("query: {text}")
        } else {
            text.to_string()
        };
        let mut embeddings = self.run(vec![input])?;
        embeddings.pop().ok_or(EmbedError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        self.choice.name()
    }
}

/// Deterministic feature-hashing embedder. Needs no model files, which
/// makes it the choice for offline runs and tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }
        let normalized = text.to_lowercase();

        for trigram in trigrams(&normalized) {
            vector[self.slot(&trigram)] += 1.0;
        }
        // words carry more weight than their fragments
        for word in normalized.split_whitespace() {
            vector[self.slot(word)] += 2.0;
        }

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for v in &mut vector {
                *v /= magnitude;
            }
        }
        vector
    }

    fn slot(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimension
    }
}

fn trigrams(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() < 3 {
        return vec![chars.iter().collect()];
    }
    chars.windows(3).map(|w| w.iter().collect()).collect()
}

impl Embedder for HashEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "feature-hash"
    }
}
