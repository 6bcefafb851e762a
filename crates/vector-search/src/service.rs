//! The vector store service: file indexing, hybrid search, consistency
//! cleanup and expiration.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use fastrace::Span;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use telemetry::attributes::VECTOR_STORE_ID;
use telemetry::metrics::{VECTOR_STORE_INDEX_DURATION, VECTOR_STORE_SEARCH_DURATION};

use crate::chunker::TextChunker;
use crate::embedding::Embedder;
use crate::error::{SearchError, SearchResult};
use crate::index::{IndexedChunk, VectorIndex};
use crate::lexical::LexicalIndex;
use crate::repository::{VectorStoreRepository, reaggregate};
use crate::storage::{FileStorage, PersistedChunk, PersistedEmbeddings};
use crate::types::{
    Chunk, ChunkingStrategy, ExpirationPolicy, FileError, FileStatus, SearchContent, SearchHit, SearchRequest,
    VectorStore, VectorStoreFile, VectorStoreStatus, unix_timestamp,
};

/// Weight of the cosine score in the hybrid rescoring pass.
const HYBRID_VECTOR_WEIGHT: f32 = 0.7;
const DEFAULT_TOP_K: usize = 10;

/// Body of `POST /v1/vector_stores`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreateVectorStoreRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub expires_after: Option<ExpirationPolicy>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Body of `POST /v1/vector_stores/{id}`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModifyVectorStoreRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub expires_after: Option<ExpirationPolicy>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Body of `POST /v1/vector_stores/{id}/files`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVectorStoreFileRequest {
    pub file_id: String,
    #[serde(default)]
    pub attributes: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub chunking_strategy: Option<ChunkingStrategy>,
}

/// One page of search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    /// Always `"vector_store.search_results.page"`.
    pub object: String,
    pub search_query: String,
    pub data: Vec<SearchHit>,
}

/// Ties together the repository, blob storage, chunker, embedder and the two
/// indexes. Cloned handles share state.
pub struct VectorStoreService {
    repository: Arc<dyn VectorStoreRepository>,
    storage: FileStorage,
    chunker: TextChunker,
    embedder: Arc<dyn Embedder>,
    vector_index: VectorIndex,
    lexical_index: LexicalIndex,
    min_score: f32,
}

impl VectorStoreService {
    pub fn new(
        repository: Arc<dyn VectorStoreRepository>,
        storage: FileStorage,
        embedder: Arc<dyn Embedder>,
        config: &config::VectorStoreConfig,
    ) -> SearchResult<Self> {
        Ok(Self {
            repository,
            storage,
            chunker: TextChunker::new(config)?,
            embedder,
            vector_index: VectorIndex::new(),
            lexical_index: LexicalIndex::new()?,
            min_score: config.min_score,
        })
    }

    /// Access to the underlying blob storage for the files surface.
    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    /// Rebuild the in-process indexes from persisted embedding documents.
    pub async fn rehydrate(&self) {
        let documents = self.storage.load_all_embeddings().await;
        let count = documents.len();

        for document in documents {
            let Some(store_id) = document
                .metadata
                .get("vector_store_id")
                .and_then(|value| value.as_str())
                .map(str::to_string)
            else {
                log::warn!("Embeddings document '{}' lacks a vector_store_id", document.file_id);
                continue;
            };

            let chunk_texts: Vec<(String, String)> = document
                .chunks
                .iter()
                .map(|chunk| (chunk.chunk_id.clone(), chunk.content.clone()))
                .collect();

            let indexed: Vec<IndexedChunk> = document
                .chunks
                .into_iter()
                .enumerate()
                .map(|(position, chunk)| IndexedChunk {
                    chunk: Chunk {
                        chunk_id: chunk.chunk_id,
                        file_id: chunk.file_id,
                        vector_store_id: store_id.clone(),
                        chunk_index: position,
                        text: chunk.content,
                        embedding: chunk.embedding,
                    },
                    metadata: chunk.chunk_metadata,
                })
                .collect();

            self.vector_index.add_chunks(&store_id, indexed);

            if let Err(e) = self
                .lexical_index
                .add_chunks(&store_id, &document.file_id, &chunk_texts)
            {
                log::warn!("Failed to rehydrate lexical index for '{}': {e}", document.file_id);
            }
        }

        if count > 0 {
            log::info!("Rehydrated {count} persisted embedding document(s)");
        }
    }

    // ------------------------------------------------------------------
    // Store lifecycle
    // ------------------------------------------------------------------

    pub async fn create_store(&self, request: CreateVectorStoreRequest) -> SearchResult<VectorStore> {
        let mut store = VectorStore::new(
            request.name.unwrap_or_else(|| "vector_store".to_string()),
            request.expires_after,
        );
        store.metadata = request.metadata;
        // An empty store has nothing left to index.
        store.status = VectorStoreStatus::Completed;

        self.repository.insert_store(store.clone()).await?;

        log::debug!("Created vector store '{}'", store.id);
        Ok(store)
    }

    /// Fetch a store, transitioning it to expired when its deadline passed.
    pub async fn get_store(&self, store_id: &str) -> SearchResult<VectorStore> {
        let mut store = self.repository.get_store(store_id).await?;

        if store.status != VectorStoreStatus::Expired && store.is_expired(unix_timestamp()) {
            log::debug!("Vector store '{store_id}' expired on read");
            store.status = VectorStoreStatus::Expired;
            self.repository.update_store(store.clone()).await?;
        }

        Ok(store)
    }

    pub async fn list_stores(&self) -> SearchResult<Vec<VectorStore>> {
        self.repository.list_stores().await
    }

    pub async fn modify_store(&self, store_id: &str, request: ModifyVectorStoreRequest) -> SearchResult<VectorStore> {
        let mut store = self.get_store(store_id).await?;

        if let Some(name) = request.name {
            store.name = name;
        }
        if request.expires_after.is_some() {
            store.expires_after = request.expires_after;
        }
        if request.metadata.is_some() {
            store.metadata = request.metadata;
        }

        store.last_active_at = unix_timestamp();
        store.refresh_expiry();

        self.repository.update_store(store.clone()).await?;
        Ok(store)
    }

    pub async fn delete_store(&self, store_id: &str) -> SearchResult<()> {
        let files = self.repository.list_files(store_id).await.unwrap_or_default();

        for file in files {
            self.drop_file_indexes(store_id, &file.id).await;
        }

        if !self.repository.delete_store(store_id).await? {
            return Err(SearchError::NotFound(format!("Vector store '{store_id}' not found")));
        }

        self.vector_index.delete_store(store_id);
        log::debug!("Deleted vector store '{store_id}'");
        Ok(())
    }

    // ------------------------------------------------------------------
    // File lifecycle
    // ------------------------------------------------------------------

    /// Attach a stored file and schedule its indexing. Returns immediately
    /// with the file in `in_progress`.
    pub async fn add_file(
        self: &Arc<Self>,
        store_id: &str,
        request: CreateVectorStoreFileRequest,
    ) -> SearchResult<VectorStoreFile> {
        let store = self.get_store(store_id).await?;

        let blob = self.storage.get(&request.file_id).await?;

        let mut attributes = request.attributes.unwrap_or_default();
        attributes.insert("filename".to_string(), json!(blob.filename));

        let file = VectorStoreFile {
            id: request.file_id.clone(),
            object: "vector_store.file".to_string(),
            vector_store_id: store.id.clone(),
            status: FileStatus::InProgress,
            usage_bytes: blob.bytes,
            created_at: unix_timestamp(),
            attributes,
            chunking_strategy: request.chunking_strategy,
            last_error: None,
        };

        self.repository.insert_file(file.clone()).await?;
        self.refresh_aggregates(&store.id).await?;

        let service = Arc::clone(self);
        let store_id = store.id.clone();
        let file_id = request.file_id;

        tokio::spawn(async move {
            service.run_indexing(&store_id, &file_id).await;
        });

        Ok(file)
    }

    pub async fn get_file(&self, store_id: &str, file_id: &str) -> SearchResult<VectorStoreFile> {
        self.repository.get_file(store_id, file_id).await
    }

    pub async fn list_files(&self, store_id: &str) -> SearchResult<Vec<VectorStoreFile>> {
        self.repository.list_files(store_id).await
    }

    /// Detach a file from the store and drop its index entries.
    pub async fn remove_file(&self, store_id: &str, file_id: &str) -> SearchResult<()> {
        if !self.repository.delete_file(store_id, file_id).await? {
            return Err(SearchError::NotFound(format!(
                "File '{file_id}' not found in vector store '{store_id}'"
            )));
        }

        self.drop_file_indexes(store_id, file_id).await;
        self.refresh_aggregates(store_id).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// The hybrid search pipeline.
    ///
    /// Validates the query, drops stale file references, embeds the query
    /// once, runs the cosine scan under the filter AST and the permitted
    /// file-id disjunction, optionally rescores with the lexical ranker, and
    /// maps hits. Never partially mutates state on failure.
    pub async fn search(&self, store_id: &str, request: SearchRequest) -> SearchResult<SearchResults> {
        let started = Instant::now();
        let span = Span::enter_with_local_parent("vector_store_search")
            .with_property(|| (VECTOR_STORE_ID, store_id.to_string()));

        let result = self.search_inner(store_id, &request).await;

        match &result {
            Ok(results) => {
                let document_ids: Vec<&str> = results.data.iter().map(|hit| hit.file_id.as_str()).collect();
                let chunk_ids: Vec<String> = results
                    .data
                    .iter()
                    .filter_map(|hit| hit.attributes.get("chunk_id").and_then(|value| value.as_str()))
                    .map(str::to_string)
                    .collect();
                let scores: Vec<String> = results.data.iter().map(|hit| format!("{:.4}", hit.score)).collect();

                let _span = span
                    .with_property(|| ("results_count", results.data.len().to_string()))
                    .with_property(|| ("document_ids", document_ids.join(",")))
                    .with_property(|| ("chunk_ids", chunk_ids.join(",")))
                    .with_property(|| ("scores", scores.join(",")));
            }
            Err(e) => {
                let _span = span
                    .with_property(|| ("error", "true".to_string()))
                    .with_property(|| ("error.type", e.error_type().to_string()));
            }
        }

        telemetry::metrics::meter()
            .f64_histogram(VECTOR_STORE_SEARCH_DURATION)
            .with_unit("s")
            .build()
            .record(
                started.elapsed().as_secs_f64(),
                &[telemetry::KeyValue::new(VECTOR_STORE_ID, store_id.to_string())],
            );

        result
    }

    async fn search_inner(&self, store_id: &str, request: &SearchRequest) -> SearchResult<SearchResults> {
        if request.query.trim().is_empty() {
            return Ok(SearchResults {
                object: "vector_store.search_results.page".to_string(),
                search_query: request.query.clone(),
                data: Vec::new(),
            });
        }

        // Drop references whose blobs vanished before searching over them.
        self.ensure_consistency(store_id).await?;

        let mut store = self.get_store(store_id).await?;
        let files = self.repository.list_files(store_id).await?;

        let permitted: HashSet<String> = files
            .iter()
            .filter(|file| file.status == FileStatus::Completed)
            .map(|file| file.id.clone())
            .collect();

        let top_k = request.max_num_results.unwrap_or(DEFAULT_TOP_K).clamp(1, 100);
        let min_score = request
            .ranking_options
            .as_ref()
            .and_then(|options| options.score_threshold)
            .unwrap_or(self.min_score);

        let embedding = self
            .embedder
            .embed(std::slice::from_ref(&request.query))
            .await?
            .into_iter()
            .next()
            .ok_or(SearchError::Internal)?;

        // Over-fetch so the rescoring pass has candidates to demote.
        let candidates = self.vector_index.search(
            store_id,
            &embedding,
            request.filters.as_ref(),
            &permitted,
            top_k * 2,
            min_score,
        );

        let reranker = request
            .ranking_options
            .as_ref()
            .and_then(|options| options.ranker.as_deref())
            .filter(|ranker| *ranker != "none");

        let mut candidates = match reranker {
            Some(_) => self.rescore_with_lexical(store_id, &request.query, candidates)?,
            None => candidates,
        };

        candidates.truncate(top_k);

        let files_by_id: BTreeMap<&str, &VectorStoreFile> =
            files.iter().map(|file| (file.id.as_str(), file)).collect();

        let data = candidates
            .into_iter()
            .map(|scored| {
                let file = files_by_id.get(scored.file_id.as_str());

                let filename = file
                    .and_then(|file| file.attributes.get("filename"))
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_string();

                let mut attributes = file.map(|file| file.attributes.clone()).unwrap_or_default();
                attributes.extend(scored.metadata.clone());

                SearchHit {
                    file_id: scored.file_id,
                    filename,
                    score: scored.score,
                    attributes,
                    content: vec![SearchContent::Text { text: scored.text }],
                }
            })
            .collect();

        store.last_active_at = unix_timestamp();
        store.refresh_expiry();
        self.repository.update_store(store).await?;

        Ok(SearchResults {
            object: "vector_store.search_results.page".to_string(),
            search_query: request.query.clone(),
            data,
        })
    }

    /// Blend lexical BM25 into the cosine ranking.
    fn rescore_with_lexical(
        &self,
        store_id: &str,
        query: &str,
        mut candidates: Vec<crate::index::ScoredChunk>,
    ) -> SearchResult<Vec<crate::index::ScoredChunk>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let lexical_hits = self.lexical_index.search(store_id, query, candidates.len() * 2)?;

        let max_lexical = lexical_hits.iter().map(|hit| hit.score).fold(0.0f32, f32::max);
        let lexical_by_chunk: BTreeMap<&str, f32> = lexical_hits
            .iter()
            .map(|hit| (hit.chunk_id.as_str(), hit.score))
            .collect();

        for candidate in &mut candidates {
            let lexical = lexical_by_chunk
                .get(candidate.chunk_id.as_str())
                .map(|score| if max_lexical > 0.0 { score / max_lexical } else { 0.0 })
                .unwrap_or(0.0);

            candidate.score = HYBRID_VECTOR_WEIGHT * candidate.score + (1.0 - HYBRID_VECTOR_WEIGHT) * lexical;
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(candidates)
    }

    // ------------------------------------------------------------------
    // Consistency and expiration
    // ------------------------------------------------------------------

    /// Drop file references whose underlying blob no longer exists, then
    /// update the aggregates.
    pub async fn ensure_consistency(&self, store_id: &str) -> SearchResult<()> {
        let files = self.repository.list_files(store_id).await?;
        let mut dropped = false;

        for file in files {
            if self.storage.exists(&file.id).await {
                continue;
            }

            log::debug!("Dropping file '{}' from '{store_id}': blob is gone", file.id);
            self.repository.delete_file(store_id, &file.id).await?;
            self.drop_file_indexes(store_id, &file.id).await;
            dropped = true;
        }

        if dropped {
            self.refresh_aggregates(store_id).await?;
        }

        Ok(())
    }

    /// One sweeper pass: global consistency cleanup plus expiration.
    pub async fn sweep(&self) {
        let stores = match self.repository.list_stores().await {
            Ok(stores) => stores,
            Err(e) => {
                log::error!("Sweeper failed to list vector stores: {e}");
                return;
            }
        };

        let now = unix_timestamp();

        for store in stores {
            if let Err(e) = self.ensure_consistency(&store.id).await {
                log::warn!("Sweeper cleanup failed for '{}': {e}", store.id);
            }

            if store.status != VectorStoreStatus::Expired && store.is_expired(now) {
                log::info!("Vector store '{}' expired", store.id);

                let mut expired = store;
                expired.status = VectorStoreStatus::Expired;

                if let Err(e) = self.repository.update_store(expired).await {
                    log::warn!("Failed to persist expiration: {e}");
                }
            }
        }
    }

    async fn refresh_aggregates(&self, store_id: &str) -> SearchResult<()> {
        let mut store = self.repository.get_store(store_id).await?;
        let files = self.repository.list_files(store_id).await?;

        reaggregate(&mut store, &files);
        self.repository.update_store(store).await
    }

    async fn drop_file_indexes(&self, store_id: &str, file_id: &str) {
        self.vector_index.delete_file(store_id, file_id);

        if let Err(e) = self.lexical_index.delete_file(file_id) {
            log::warn!("Failed to drop lexical entries for '{file_id}': {e}");
        }

        self.storage.delete_embeddings(file_id).await;
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    /// The async indexing task body: extract, chunk, embed, index, persist,
    /// transition status, re-aggregate counts. Errors mark the file `failed`
    /// with `last_error` and are never retried automatically.
    pub async fn run_indexing(&self, store_id: &str, file_id: &str) {
        let started = Instant::now();

        let result = self.index_file(store_id, file_id).await;

        let status = match result {
            Ok(chunks) => {
                log::debug!("Indexed '{file_id}' into {chunks} chunk(s)");
                FileStatus::Completed
            }
            Err(ref e) => {
                log::error!("Indexing failed for '{file_id}': {e}");
                FileStatus::Failed
            }
        };

        match self.repository.get_file(store_id, file_id).await {
            Ok(mut file) => {
                file.status = status;
                file.last_error = result.err().map(|e| FileError {
                    code: "indexing_error".to_string(),
                    message: e.to_string(),
                });

                if let Err(e) = self.repository.update_file(file).await {
                    log::error!("Failed to persist indexing outcome for '{file_id}': {e}");
                }
            }
            Err(e) => log::warn!("File '{file_id}' vanished during indexing: {e}"),
        }

        if let Err(e) = self.refresh_aggregates(store_id).await {
            log::warn!("Failed to refresh aggregates for '{store_id}': {e}");
        }

        telemetry::metrics::meter()
            .f64_histogram(VECTOR_STORE_INDEX_DURATION)
            .with_unit("s")
            .build()
            .record(
                started.elapsed().as_secs_f64(),
                &[telemetry::KeyValue::new(VECTOR_STORE_ID, store_id.to_string())],
            );
    }

    async fn index_file(&self, store_id: &str, file_id: &str) -> SearchResult<usize> {
        let file = self.repository.get_file(store_id, file_id).await?;

        let bytes = self.storage.read_content(file_id).await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let chunk_texts = self.chunker.chunk(&text, file.chunking_strategy)?;
        let total_chunks = chunk_texts.len();

        let embeddings = self.embedder.embed(&chunk_texts).await?;

        let filename = file
            .attributes
            .get("filename")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string();

        let mut indexed = Vec::with_capacity(total_chunks);
        let mut persisted_chunks = Vec::with_capacity(total_chunks);
        let mut lexical_entries = Vec::with_capacity(total_chunks);

        for (chunk_index, (content, embedding)) in chunk_texts.into_iter().zip(embeddings).enumerate() {
            let chunk_id = format!("chunk_{}", uuid::Uuid::new_v4().simple());

            let mut metadata: BTreeMap<String, Value> = [
                ("file_id".to_string(), json!(file_id)),
                ("filename".to_string(), json!(filename)),
                ("chunk_id".to_string(), json!(chunk_id)),
                ("chunk_index".to_string(), json!(chunk_index)),
                ("total_chunks".to_string(), json!(total_chunks)),
            ]
            .into();
            metadata.extend(file.attributes.clone());

            lexical_entries.push((chunk_id.clone(), content.clone()));
            persisted_chunks.push(PersistedChunk {
                file_id: file_id.to_string(),
                chunk_id: chunk_id.clone(),
                content: content.clone(),
                embedding: embedding.clone(),
                chunk_metadata: metadata.clone(),
            });

            indexed.push(IndexedChunk {
                chunk: Chunk {
                    chunk_id,
                    file_id: file_id.to_string(),
                    vector_store_id: store_id.to_string(),
                    chunk_index,
                    text: content,
                    embedding,
                },
                metadata,
            });
        }

        self.vector_index.add_chunks(store_id, indexed);
        self.lexical_index.add_chunks(store_id, file_id, &lexical_entries)?;

        let document = PersistedEmbeddings {
            file_id: file_id.to_string(),
            metadata: [
                ("filename".to_string(), json!(filename)),
                ("vector_store_id".to_string(), json!(store_id)),
            ]
            .into(),
            chunks: persisted_chunks,
        };

        self.storage.save_embeddings(&document).await?;

        Ok(total_chunks)
    }
}

impl std::fmt::Debug for VectorStoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStoreService")
            .field("min_score", &self.min_score)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::repository::InMemoryVectorStoreRepository;
    use crate::types::ExpirationAnchor;

    async fn service_with_storage() -> (tempfile::TempDir, Arc<VectorStoreService>) {
        let dir = tempfile::tempdir().unwrap();
        let storage_config = config::StorageConfig {
            root_dir: dir.path().to_path_buf(),
        };
        let vector_config: config::VectorStoreConfig = toml::from_str("chunk_size = 32\nchunk_overlap = 4").unwrap();

        let service = VectorStoreService::new(
            Arc::new(InMemoryVectorStoreRepository::new()),
            FileStorage::new(&storage_config),
            Arc::new(HashingEmbedder::new(64)),
            &vector_config,
        )
        .unwrap();

        (dir, Arc::new(service))
    }

    async fn indexed_file(service: &Arc<VectorStoreService>, store_id: &str, content: &str) -> String {
        let blob = service
            .storage()
            .put("assistants", "doc.md", content.as_bytes().to_vec())
            .await
            .unwrap();

        service
            .add_file(
                store_id,
                CreateVectorStoreFileRequest {
                    file_id: blob.id.clone(),
                    attributes: None,
                    chunking_strategy: None,
                },
            )
            .await
            .unwrap();

        // The indexing task was spawned; run it to completion deterministically.
        service.run_indexing(store_id, &blob.id).await;
        blob.id
    }

    #[tokio::test]
    async fn index_and_search_round_trip() {
        let (_dir, service) = service_with_storage().await;

        let store = service.create_store(CreateVectorStoreRequest::default()).await.unwrap();
        let file_id = indexed_file(&service, &store.id, "the quarterly search migration plan").await;

        let file = service.get_file(&store.id, &file_id).await.unwrap();
        assert_eq!(file.status, FileStatus::Completed);

        let results = service
            .search(
                &store.id,
                SearchRequest {
                    query: "search migration".into(),
                    max_num_results: Some(5),
                    filters: None,
                    ranking_options: None,
                },
            )
            .await
            .unwrap();

        assert!(!results.data.is_empty());
        assert_eq!(results.data[0].file_id, file_id);
        assert_eq!(results.data[0].filename, "doc.md");
        assert!(results.data[0].attributes.contains_key("chunk_id"));
    }

    #[tokio::test]
    async fn blank_query_returns_empty_page() {
        let (_dir, service) = service_with_storage().await;
        let store = service.create_store(CreateVectorStoreRequest::default()).await.unwrap();

        let results = service
            .search(
                &store.id,
                SearchRequest {
                    query: "   ".into(),
                    max_num_results: None,
                    filters: None,
                    ranking_options: None,
                },
            )
            .await
            .unwrap();

        assert!(results.data.is_empty());
    }

    #[tokio::test]
    async fn deleted_blob_is_dropped_before_search() {
        let (_dir, service) = service_with_storage().await;

        let store = service.create_store(CreateVectorStoreRequest::default()).await.unwrap();
        let file_id = indexed_file(&service, &store.id, "ephemeral content").await;

        service.storage().delete(&file_id).await.unwrap();

        let results = service
            .search(
                &store.id,
                SearchRequest {
                    query: "ephemeral".into(),
                    max_num_results: None,
                    filters: None,
                    ranking_options: None,
                },
            )
            .await
            .unwrap();

        assert!(results.data.iter().all(|hit| hit.file_id != file_id));

        let store = service.get_store(&store.id).await.unwrap();
        assert_eq!(store.file_counts.total, 0);
    }

    #[tokio::test]
    async fn sweeper_expires_overdue_stores() {
        let (_dir, service) = service_with_storage().await;

        let store = service
            .create_store(CreateVectorStoreRequest {
                name: Some("short-lived".into()),
                expires_after: Some(ExpirationPolicy {
                    anchor: ExpirationAnchor::LastActiveAt,
                    days: 1,
                }),
                metadata: None,
            })
            .await
            .unwrap();

        // Force the deadline into the past.
        let mut overdue = service.get_store(&store.id).await.unwrap();
        overdue.last_active_at = 0;
        overdue.expires_at = Some(0);
        service.repository.update_store(overdue).await.unwrap();

        service.sweep().await;

        let store = service.get_store(&store.id).await.unwrap();
        assert_eq!(store.status, VectorStoreStatus::Expired);
    }

    #[tokio::test]
    async fn hybrid_ranker_rescans_with_lexical_signal() {
        let (_dir, service) = service_with_storage().await;

        let store = service.create_store(CreateVectorStoreRequest::default()).await.unwrap();
        indexed_file(&service, &store.id, "rust async runtime internals").await;
        indexed_file(&service, &store.id, "gardening tips for spring").await;

        let results = service
            .search(
                &store.id,
                SearchRequest {
                    query: "async runtime".into(),
                    max_num_results: Some(2),
                    filters: None,
                    ranking_options: Some(crate::types::RankingOptions {
                        ranker: Some("hybrid".into()),
                        score_threshold: None,
                    }),
                },
            )
            .await
            .unwrap();

        assert!(!results.data.is_empty());
        assert_eq!(results.data[0].filename, "doc.md");
        let top_text = match &results.data[0].content[0] {
            SearchContent::Text { text } => text,
        };
        assert!(top_text.contains("async"));
    }

    #[tokio::test]
    async fn failed_indexing_sets_last_error() {
        let (_dir, service) = service_with_storage().await;
        let store = service.create_store(CreateVectorStoreRequest::default()).await.unwrap();

        let blob = service
            .storage()
            .put("assistants", "doc.md", b"content".to_vec())
            .await
            .unwrap();

        service
            .add_file(
                &store.id,
                CreateVectorStoreFileRequest {
                    file_id: blob.id.clone(),
                    attributes: None,
                    chunking_strategy: Some(ChunkingStrategy {
                        max_chunk_size_tokens: 4,
                        chunk_overlap_tokens: 4,
                    }),
                },
            )
            .await
            .unwrap();

        service.run_indexing(&store.id, &blob.id).await;

        let file = service.get_file(&store.id, &blob.id).await.unwrap();
        assert_eq!(file.status, FileStatus::Failed);
        assert!(file.last_error.is_some());
    }
}
