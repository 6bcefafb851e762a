//! In-process vector index with metadata filtering.
//!
//! Chunks live per store in insertion order; search is an exact cosine scan
//! over the store's chunks. Deletes are linearizable per file.

use std::collections::{BTreeMap, HashSet};

use dashmap::DashMap;
use serde_json::Value;

use crate::types::{Chunk, Filter};

/// A chunk plus the metadata written alongside it at indexing time.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    /// `{file_id, filename, chunk_id, chunk_index, total_chunks, ...attributes}`
    pub metadata: BTreeMap<String, Value>,
}

/// A scored search candidate.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub file_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub score: f32,
    pub metadata: BTreeMap<String, Value>,
}

/// Shared, concurrency-safe vector index keyed by store id.
#[derive(Default)]
pub struct VectorIndex {
    stores: DashMap<String, Vec<IndexedChunk>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append chunks for one file.
    pub fn add_chunks(&self, store_id: &str, chunks: Vec<IndexedChunk>) {
        self.stores.entry(store_id.to_string()).or_default().extend(chunks);
    }

    /// Remove every chunk of a file. Returns how many were dropped.
    pub fn delete_file(&self, store_id: &str, file_id: &str) -> usize {
        let Some(mut chunks) = self.stores.get_mut(store_id) else {
            return 0;
        };

        let before = chunks.len();
        chunks.retain(|indexed| indexed.chunk.file_id != file_id);
        before - chunks.len()
    }

    /// Drop an entire store.
    pub fn delete_store(&self, store_id: &str) {
        self.stores.remove(store_id);
    }

    /// File ids currently present in a store's index.
    pub fn file_ids(&self, store_id: &str) -> HashSet<String> {
        self.stores
            .get(store_id)
            .map(|chunks| chunks.iter().map(|indexed| indexed.chunk.file_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Top-k cosine search constrained to permitted files and the filter AST.
    pub fn search(
        &self,
        store_id: &str,
        embedding: &[f32],
        filter: Option<&Filter>,
        permitted_file_ids: &HashSet<String>,
        top_k: usize,
        min_score: f32,
    ) -> Vec<ScoredChunk> {
        let Some(chunks) = self.stores.get(store_id) else {
            return Vec::new();
        };

        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|indexed| permitted_file_ids.contains(&indexed.chunk.file_id))
            .filter(|indexed| filter.is_none_or(|filter| filter.matches(&indexed.metadata)))
            .map(|indexed| ScoredChunk {
                chunk_id: indexed.chunk.chunk_id.clone(),
                file_id: indexed.chunk.file_id.clone(),
                chunk_index: indexed.chunk.chunk_index,
                text: indexed.chunk.text.clone(),
                score: cosine(embedding, &indexed.chunk.embedding),
                metadata: indexed.metadata.clone(),
            })
            .filter(|scored| scored.score >= min_score)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

/// Cosine similarity of two vectors of equal dimension.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn indexed(store: &str, file: &str, index: usize, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk: Chunk {
                chunk_id: format!("chunk_{file}_{index}"),
                file_id: file.to_string(),
                vector_store_id: store.to_string(),
                chunk_index: index,
                text: format!("text {index}"),
                embedding,
            },
            metadata: [
                ("file_id".to_string(), json!(file)),
                ("chunk_index".to_string(), json!(index)),
            ]
            .into(),
        }
    }

    #[test]
    fn search_ranks_by_cosine_and_respects_top_k() {
        let index = VectorIndex::new();
        index.add_chunks(
            "vs_1",
            vec![
                indexed("vs_1", "file_a", 0, vec![1.0, 0.0]),
                indexed("vs_1", "file_a", 1, vec![0.7, 0.7]),
                indexed("vs_1", "file_a", 2, vec![0.0, 1.0]),
            ],
        );

        let permitted: HashSet<String> = ["file_a".to_string()].into();
        let hits = index.search("vs_1", &[1.0, 0.0], None, &permitted, 2, 0.0);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_index, 0);
        assert_eq!(hits[1].chunk_index, 1);
    }

    #[test]
    fn unpermitted_files_never_surface() {
        let index = VectorIndex::new();
        index.add_chunks(
            "vs_1",
            vec![
                indexed("vs_1", "file_a", 0, vec![1.0, 0.0]),
                indexed("vs_1", "file_gone", 0, vec![1.0, 0.0]),
            ],
        );

        let permitted: HashSet<String> = ["file_a".to_string()].into();
        let hits = index.search("vs_1", &[1.0, 0.0], None, &permitted, 10, 0.0);

        assert!(hits.iter().all(|hit| hit.file_id == "file_a"));
    }

    #[test]
    fn filter_ast_applies_to_chunk_metadata() {
        let index = VectorIndex::new();
        index.add_chunks(
            "vs_1",
            vec![
                indexed("vs_1", "file_a", 0, vec![1.0, 0.0]),
                indexed("vs_1", "file_b", 0, vec![1.0, 0.0]),
            ],
        );

        let permitted: HashSet<String> = ["file_a".to_string(), "file_b".to_string()].into();
        let filter = Filter::Eq {
            key: "file_id".into(),
            value: json!("file_b"),
        };

        let hits = index.search("vs_1", &[1.0, 0.0], Some(&filter), &permitted, 10, 0.0);

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_id, "file_b");
    }

    #[test]
    fn min_score_drops_weak_candidates() {
        let index = VectorIndex::new();
        index.add_chunks(
            "vs_1",
            vec![
                indexed("vs_1", "file_a", 0, vec![1.0, 0.0]),
                indexed("vs_1", "file_a", 1, vec![0.0, 1.0]),
            ],
        );

        let permitted: HashSet<String> = ["file_a".to_string()].into();
        let hits = index.search("vs_1", &[1.0, 0.0], None, &permitted, 10, 0.5);

        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn delete_file_removes_all_its_chunks() {
        let index = VectorIndex::new();
        index.add_chunks(
            "vs_1",
            vec![
                indexed("vs_1", "file_a", 0, vec![1.0]),
                indexed("vs_1", "file_a", 1, vec![1.0]),
                indexed("vs_1", "file_b", 0, vec![1.0]),
            ],
        );

        assert_eq!(index.delete_file("vs_1", "file_a"), 2);
        assert_eq!(index.file_ids("vs_1"), ["file_b".to_string()].into());
    }

    #[test]
    fn cosine_basics() {
        assert_eq!(cosine(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[], &[1.0]), 0.0);
        assert_eq!(cosine(&[0.0], &[0.0]), 0.0);
    }
}
