//! Embedding provider boundary.
//!
//! The ranking core never computes embeddings itself; it asks an
//! [`EmbeddingProvider`]. Two providers ship with the crate:
//! - [`crate::semantic::GeminiEmbedder`]: remote, Google `text-embedding-004`
//! - [`LocalEmbedder`] (feature `local`): in-process fastembed model

use std::time::Duration;

use async_trait::async_trait;

use crate::semantic::types::Embedding;

/// Why a provider call failed. Drives the resolver's retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The call did not complete in time. Retryable.
    Timeout,
    /// Rate limit or quota exhausted. Not retried.
    Quota,
    /// Connection failure or upstream 5xx. Retryable.
    Network,
    /// The provider refused the request or answered with garbage. Not retried.
    Rejected,
}

impl ProviderErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::Network)
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Quota => "quota",
            Self::Network => "network",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("embedding provider error ({kind}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Quota, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Rejected, message)
    }
}

/// Something that turns text into a vector.
///
/// Implementations should honor `timeout` themselves where they can; the
/// resolver also enforces it from the outside.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn embed(&self, text: &str, timeout: Duration) -> Result<Embedding, ProviderError>;
}

/// Scale a vector to unit L2 norm. Zero vectors are returned unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Whether a vector can take part in a cosine comparison: non-empty, all
/// values finite, non-zero norm.
pub fn is_usable_vector(v: &[f32]) -> bool {
    !v.is_empty()
        && v.iter().all(|x| x.is_finite())
        && v.iter().map(|x| x * x).sum::<f32>() > f32::EPSILON
}

#[cfg(feature = "local")]
pub use local::LocalEmbedder;

#[cfg(feature = "local")]
mod local {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use fastembed::{InitOptions, TextEmbedding};

    use super::{EmbeddingProvider, ProviderError};
    use crate::semantic::types::Embedding;

    const SUPPORTED_MODELS: &str =
        "all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5";

    /// In-process embedding model backed by fastembed.
    /// Uses a Mutex because fastembed's embed() requires &mut self.
    pub struct LocalEmbedder {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: String,
    }

    #[derive(Debug, thiserror::Error)]
    pub enum LocalEmbedderError {
        #[error("Model initialization failed: {0}")]
        InitFailed(String),

        #[error("Invalid model name: {0}")]
        InvalidModel(String),
    }

    impl LocalEmbedder {
        /// Load (downloading on first use) the named model into `cache_dir/models`.
        pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, LocalEmbedderError> {
            let model_enum = Self::parse_model_name(model_name)?;

            let models_dir = cache_dir.join("models");
            std::fs::create_dir_all(&models_dir).map_err(|e| {
                LocalEmbedderError::InitFailed(format!("Failed to create models directory: {}", e))
            })?;

            let options = InitOptions::new(model_enum)
                .with_cache_dir(models_dir)
                .with_show_download_progress(false);

            let model = TextEmbedding::try_new(options)
                .map_err(|e| LocalEmbedderError::InitFailed(e.to_string()))?;

            log::info!("loaded local embedding model '{model_name}'");

            Ok(Self {
                model: Arc::new(Mutex::new(model)),
                model_name: model_name.to_string(),
            })
        }

        fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, LocalEmbedderError> {
            match name.to_lowercase().as_str() {
                "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
                "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
                "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
                "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
                _ => Err(LocalEmbedderError::InvalidModel(format!(
                    "Unknown model: {}. Supported models: {}",
                    name, SUPPORTED_MODELS
                ))),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LocalEmbedder {
        fn name(&self) -> &str {
            &self.model_name
        }

        async fn embed(&self, text: &str, _timeout: Duration) -> Result<Embedding, ProviderError> {
            let model = self.model.clone();
            let text = text.to_string();

            let result = tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|e| ProviderError::rejected(format!("model lock poisoned: {e}")))?;
                model
                    .embed(vec![text], None)
                    .map_err(|e| ProviderError::rejected(e.to_string()))
            })
            .await
            .map_err(|e| ProviderError::rejected(format!("embedding task failed: {e}")))??;

            result
                .into_iter()
                .next()
                .map(Embedding::from)
                .ok_or_else(|| ProviderError::rejected("No embedding returned"))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_invalid_model_name() {
            let temp_dir = std::env::temp_dir().join("semrank-embed-invalid");
            let result = LocalEmbedder::new("nonexistent-model", temp_dir);
            assert!(matches!(result, Err(LocalEmbedderError::InvalidModel(_))));
        }

        #[tokio::test]
        #[ignore = "requires model download"]
        async fn test_embedding_generation() {
            let temp_dir = std::env::temp_dir().join("semrank-embed-gen");
            let model = LocalEmbedder::new("all-MiniLM-L6-v2", temp_dir.clone()).unwrap();

            let embedding = model
                .embed("black leather wallet", Duration::from_secs(30))
                .await
                .unwrap();
            assert_eq!(embedding.len(), 384);

            let _ = std::fs::remove_dir_all(&temp_dir);
        }
    }
}
