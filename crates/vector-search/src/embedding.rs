//! Embedding generation behind a narrow trait.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{SearchError, SearchResult};

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> SearchResult<Vec<Vec<f32>>>;

    /// The dimensionality every returned vector has.
    fn dimension(&self) -> usize;
}

/// Embedder calling an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &config::VectorStoreConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.embedding.base_url.trim_end_matches('/').to_string(),
            model: config.embedding.model.clone(),
            api_key: config.embedding.api_key.clone(),
            dimension: config.vector_dimension,
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> SearchResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);

        let mut request = self.client.post(&url).json(&serde_json::json!({
            "model": self.model,
            "input": texts,
        }));

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SearchError::Embedding(format!("Failed to reach embeddings endpoint: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<empty response>".to_string());
            return Err(SearchError::Embedding(format!(
                "Embeddings request failed with status {status}: {body}"
            )));
        }

        let mut payload: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Embedding(format!("Failed to parse embeddings response: {e}")))?;

        payload.data.sort_by_key(|row| row.index);

        for row in &payload.data {
            if row.embedding.len() != self.dimension {
                return Err(SearchError::Embedding(format!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    row.embedding.len()
                )));
            }
        }

        if payload.data.len() != texts.len() {
            return Err(SearchError::Embedding(format!(
                "Embeddings response carried {} vectors for {} inputs",
                payload.data.len(),
                texts.len()
            )));
        }

        Ok(payload.data.into_iter().map(|row| row.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic hashing embedder for tests and offline runs.
///
/// Projects token hashes onto a fixed-dimension unit sphere; equal texts get
/// equal vectors and token overlap correlates with cosine similarity.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text.split_whitespace() {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in token.to_ascii_lowercase().bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x1000_0000_01b3);
            }

            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> SearchResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);

        let a = embedder.embed(&["hello world".to_string()]).await.unwrap();
        let b = embedder.embed(&["hello world".to_string()]).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let embedder = HashingEmbedder::new(128);

        let vectors = embedder
            .embed(&[
                "the quick brown fox".to_string(),
                "the quick brown foxes".to_string(),
                "completely unrelated topic entirely".to_string(),
            ])
            .await
            .unwrap();

        let cosine = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };

        let related = cosine(&vectors[0], &vectors[1]);
        let unrelated = cosine(&vectors[0], &vectors[2]);

        assert!(related > unrelated);
    }
}
