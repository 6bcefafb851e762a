//! Vector store and hybrid search settings.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::llm::duration_secs;

/// Settings for chunking, embedding and searching vector stores.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VectorStoreConfig {
    /// Default maximum chunk size, in tokens.
    pub chunk_size: usize,
    /// Default overlap between consecutive chunks, in tokens.
    pub chunk_overlap: usize,
    /// Dimensionality every stored embedding must have.
    pub vector_dimension: usize,
    /// Default similarity score threshold when the search request carries none.
    pub min_score: f32,
    /// Interval of the background cleanup and expiration sweeper, in seconds.
    #[serde(deserialize_with = "duration_secs")]
    pub sweep_interval: Duration,
    /// Embedding endpoint settings.
    pub embedding: EmbeddingConfig,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 200,
            vector_dimension: 1536,
            min_score: 0.0,
            sweep_interval: Duration::from_secs(60),
            embedding: EmbeddingConfig::default(),
        }
    }
}

/// OpenAI-compatible embeddings endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Base URL of the embeddings API.
    pub base_url: String,
    /// Embedding model identifier.
    pub model: String,
    /// API key for the embeddings endpoint. Falls back to the request's
    /// bearer credential when absent.
    pub api_key: Option<SecretString>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
        }
    }
}
