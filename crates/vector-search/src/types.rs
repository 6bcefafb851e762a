//! Vector store domain types.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Seconds since the Unix epoch.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

/// Lifecycle status of a vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorStoreStatus {
    InProgress,
    Completed,
    Expired,
}

/// Lifecycle status of a file within a vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Per-status file counts, re-aggregated on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileCounts {
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

/// Expiration policy anchored to the store's last activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationPolicy {
    /// Anchor timestamp field; only `last_active_at` is supported.
    pub anchor: ExpirationAnchor,
    /// Days after the anchor until the store expires.
    pub days: u64,
}

/// Anchor for the expiration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationAnchor {
    LastActiveAt,
}

/// A named collection of indexed files and their chunk embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStore {
    pub id: String,
    /// Always `"vector_store"`.
    pub object: String,
    pub name: String,
    pub created_at: u64,
    pub last_active_at: u64,
    /// Total bytes of completed files.
    pub usage_bytes: u64,
    pub file_counts: FileCounts,
    pub status: VectorStoreStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_after: Option<ExpirationPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl VectorStore {
    /// Mint a fresh in-progress store.
    pub fn new(name: impl Into<String>, expires_after: Option<ExpirationPolicy>) -> Self {
        let now = unix_timestamp();

        let mut store = Self {
            id: format!("vs_{}", uuid::Uuid::new_v4().simple()),
            object: "vector_store".to_string(),
            name: name.into(),
            created_at: now,
            last_active_at: now,
            usage_bytes: 0,
            file_counts: FileCounts::default(),
            status: VectorStoreStatus::InProgress,
            expires_after,
            expires_at: None,
            metadata: None,
        };

        store.refresh_expiry();
        store
    }

    /// Recompute `expires_at` from the policy and the last activity.
    pub fn refresh_expiry(&mut self) {
        self.expires_at = self
            .expires_after
            .map(|policy| self.last_active_at + policy.days * 86_400);
    }

    /// Whether the store's deadline has passed.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

/// Reason an indexing run failed, stored on the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileError {
    pub code: String,
    pub message: String,
}

/// Chunking parameters governing text-to-chunk splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingStrategy {
    pub max_chunk_size_tokens: usize,
    pub chunk_overlap_tokens: usize,
}

/// A file attached to a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreFile {
    /// Equals the file id of the underlying blob.
    pub id: String,
    /// Always `"vector_store.file"`.
    pub object: String,
    pub vector_store_id: String,
    pub status: FileStatus,
    pub usage_bytes: u64,
    pub created_at: u64,
    /// Always includes `filename`.
    pub attributes: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunking_strategy: Option<ChunkingStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<FileError>,
}

/// One chunk of an indexed file.
///
/// `(file_id, chunk_index)` uniquely identifies a chunk within a store;
/// `chunk_id` is globally unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub file_id: String,
    pub vector_store_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Structured metadata filter over file and chunk attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Filter {
    /// Attribute equality.
    Eq { key: String, value: Value },
    /// All sub-filters must match.
    And { filters: Vec<Filter> },
    /// Any sub-filter must match.
    Or { filters: Vec<Filter> },
}

impl Filter {
    /// Evaluate the filter against an attribute map.
    pub fn matches(&self, attributes: &BTreeMap<String, Value>) -> bool {
        match self {
            Self::Eq { key, value } => attributes.get(key) == Some(value),
            Self::And { filters } => filters.iter().all(|filter| filter.matches(attributes)),
            Self::Or { filters } => filters.iter().any(|filter| filter.matches(attributes)),
        }
    }
}

/// Ranking options of a search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RankingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,
}

/// Body of `POST /v1/vector_stores/{id}/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub max_num_results: Option<usize>,
    #[serde(default)]
    pub filters: Option<Filter>,
    #[serde(default)]
    pub ranking_options: Option<RankingOptions>,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_id: String,
    pub filename: String,
    pub score: f32,
    /// File attributes merged with the chunk metadata.
    pub attributes: BTreeMap<String, Value>,
    pub content: Vec<SearchContent>,
}

/// Text content of a hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchContent {
    Text { text: String },
}
