//! Local embeddings through fastembed (ONNX inference, no network calls
//! after the first model download).

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;

use super::service::{Embedder, MAX_TEXT_LENGTH};
use super::vector::{Embedding, EmbeddingError};

/// Dimensions kept after Matryoshka truncation (768 → 256)
pub const EMBEDDING_DIMENSIONS: usize = 256;

/// Cache directory for model files: `FASTEMBED_CACHE_PATH`, else the
/// platform cache directory
fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "mnemo", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".cache/mnemo/fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

/// nomic-embed-text-v1.5 running in-process
pub struct LocalEmbedder {
    model: Mutex<TextEmbedding>,
}

impl LocalEmbedder {
    /// Load the model, downloading it on first use
    pub fn new() -> Result<Self, EmbeddingError> {
        let cache_dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!("Failed to create cache directory {:?}: {}", cache_dir, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(cache_dir);

        let model = TextEmbedding::try_new(options).map_err(|e| {
            EmbeddingError::Unavailable(format!(
                "Failed to initialize nomic-embed-text-v1.5: {}. \
                 Ensure ONNX runtime is available and model files can be downloaded.",
                e
            ))
        })?;
        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }
        let text: String = text.chars().take(MAX_TEXT_LENGTH).collect();

        let mut model = self
            .model
            .lock()
            .map_err(|e| EmbeddingError::Unavailable(format!("Lock poisoned: {}", e)))?;
        let mut embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        let vector = embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding generated".to_string()))?;
        Ok(Embedding::new(matryoshka_truncate(vector)))
    }

    fn model_name(&self) -> &str {
        "nomic-ai/nomic-embed-text-v1.5"
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }
}

/// Truncate to [`EMBEDDING_DIMENSIONS`] and L2-normalize
pub fn matryoshka_truncate(mut vector: Vec<f32>) -> Vec<f32> {
    if vector.len() > EMBEDDING_DIMENSIONS {
        vector.truncate(EMBEDDING_DIMENSIONS);
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}
