//! Vector stores, hybrid retrieval search and file storage.
//!
//! Exposes the `/v1/files` and `/v1/vector_stores` surfaces and the
//! [`VectorStoreService`] the orchestration layer's retrieval tools call into.

mod chunker;
mod embedding;
mod error;
mod index;
mod lexical;
mod repository;
mod service;
mod storage;
pub mod sweeper;
mod types;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

pub use chunker::TextChunker;
pub use embedding::{Embedder, HashingEmbedder, HttpEmbedder};
pub use error::{SearchError, SearchResult};
pub use repository::{InMemoryVectorStoreRepository, VectorStoreRepository};
pub use service::{
    CreateVectorStoreFileRequest, CreateVectorStoreRequest, ModifyVectorStoreRequest, SearchResults,
    VectorStoreService,
};
pub use storage::{FileObject, FileStorage, PersistedChunk, PersistedEmbeddings};
pub use types::{
    Chunk, ChunkingStrategy, ExpirationAnchor, ExpirationPolicy, FileCounts, FileStatus, Filter, RankingOptions,
    SearchContent, SearchHit, SearchRequest, VectorStore, VectorStoreFile, VectorStoreStatus,
};

/// Build the service from configuration with the HTTP embedder.
pub async fn build_service(config: &config::Config) -> SearchResult<Arc<VectorStoreService>> {
    let storage = FileStorage::new(&config.storage);
    let embedder = Arc::new(HttpEmbedder::new(&config.vector_store));
    let repository = Arc::new(InMemoryVectorStoreRepository::new());

    let service = Arc::new(VectorStoreService::new(
        repository,
        storage,
        embedder,
        &config.vector_store,
    )?);

    service.rehydrate().await;

    Ok(service)
}

/// Creates an axum router for the files and vector-store endpoints.
pub fn router(service: Arc<VectorStoreService>) -> Router {
    Router::new()
        .route("/v1/files", post(upload_file).get(list_files))
        .route("/v1/files/{file_id}", get(get_file).delete(delete_file))
        .route("/v1/files/{file_id}/content", get(get_file_content))
        .route("/v1/vector_stores", post(create_store).get(list_stores))
        .route(
            "/v1/vector_stores/{store_id}",
            get(get_store).post(modify_store).delete(delete_store),
        )
        .route("/v1/vector_stores/{store_id}/search", post(search_store))
        .route(
            "/v1/vector_stores/{store_id}/files",
            post(create_store_file).get(list_store_files),
        )
        .route(
            "/v1/vector_stores/{store_id}/files/{file_id}",
            get(get_store_file).delete(delete_store_file),
        )
        .with_state(service)
}

#[derive(Debug, Serialize)]
struct ListResponse<T> {
    object: &'static str,
    data: Vec<T>,
}

#[derive(Debug, Serialize)]
struct DeletedResponse {
    id: String,
    object: &'static str,
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct ListFilesQuery {
    purpose: Option<String>,
}

async fn upload_file(
    State(service): State<Arc<VectorStoreService>>,
    mut multipart: Multipart,
) -> SearchResult<impl IntoResponse> {
    let mut purpose: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SearchError::InvalidRequest(format!("Malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("purpose") => {
                purpose = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| SearchError::InvalidRequest(format!("Unreadable purpose field: {e}")))?,
                );
            }
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| SearchError::InvalidRequest(format!("Unreadable file field: {e}")))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let purpose = purpose.ok_or_else(|| SearchError::InvalidRequest("Missing 'purpose' field".to_string()))?;
    let bytes = bytes.ok_or_else(|| SearchError::InvalidRequest("Missing 'file' field".to_string()))?;
    let filename = filename.unwrap_or_else(|| "file".to_string());

    let file = service.storage().put(&purpose, &filename, bytes).await?;

    log::debug!("Stored file '{}' ({} bytes)", file.id, file.bytes);
    Ok(Json(file))
}

async fn list_files(
    State(service): State<Arc<VectorStoreService>>,
    Query(query): Query<ListFilesQuery>,
) -> SearchResult<impl IntoResponse> {
    let data = service.storage().list(query.purpose.as_deref()).await?;

    Ok(Json(ListResponse { object: "list", data }))
}

async fn get_file(
    State(service): State<Arc<VectorStoreService>>,
    Path(file_id): Path<String>,
) -> SearchResult<impl IntoResponse> {
    Ok(Json(service.storage().get(&file_id).await?))
}

async fn delete_file(
    State(service): State<Arc<VectorStoreService>>,
    Path(file_id): Path<String>,
) -> SearchResult<impl IntoResponse> {
    if !service.storage().delete(&file_id).await? {
        return Err(SearchError::NotFound(format!("File '{file_id}' not found")));
    }

    Ok(Json(DeletedResponse {
        id: file_id,
        object: "file.deleted",
        deleted: true,
    }))
}

async fn get_file_content(
    State(service): State<Arc<VectorStoreService>>,
    Path(file_id): Path<String>,
) -> SearchResult<impl IntoResponse> {
    Ok(service.storage().read_content(&file_id).await?)
}

async fn create_store(
    State(service): State<Arc<VectorStoreService>>,
    axum_serde::Sonic(request): axum_serde::Sonic<CreateVectorStoreRequest>,
) -> SearchResult<impl IntoResponse> {
    Ok(Json(service.create_store(request).await?))
}

async fn list_stores(State(service): State<Arc<VectorStoreService>>) -> SearchResult<impl IntoResponse> {
    let data = service.list_stores().await?;

    Ok(Json(ListResponse {
        object: "list",
        data,
    }))
}

async fn get_store(
    State(service): State<Arc<VectorStoreService>>,
    Path(store_id): Path<String>,
) -> SearchResult<impl IntoResponse> {
    Ok(Json(service.get_store(&store_id).await?))
}

async fn modify_store(
    State(service): State<Arc<VectorStoreService>>,
    Path(store_id): Path<String>,
    axum_serde::Sonic(request): axum_serde::Sonic<ModifyVectorStoreRequest>,
) -> SearchResult<impl IntoResponse> {
    Ok(Json(service.modify_store(&store_id, request).await?))
}

async fn delete_store(
    State(service): State<Arc<VectorStoreService>>,
    Path(store_id): Path<String>,
) -> SearchResult<impl IntoResponse> {
    service.delete_store(&store_id).await?;

    Ok(Json(DeletedResponse {
        id: store_id,
        object: "vector_store.deleted",
        deleted: true,
    }))
}

async fn search_store(
    State(service): State<Arc<VectorStoreService>>,
    Path(store_id): Path<String>,
    axum_serde::Sonic(request): axum_serde::Sonic<SearchRequest>,
) -> SearchResult<impl IntoResponse> {
    Ok(Json(service.search(&store_id, request).await?))
}

async fn create_store_file(
    State(service): State<Arc<VectorStoreService>>,
    Path(store_id): Path<String>,
    axum_serde::Sonic(request): axum_serde::Sonic<CreateVectorStoreFileRequest>,
) -> SearchResult<impl IntoResponse> {
    Ok(Json(service.add_file(&store_id, request).await?))
}

async fn list_store_files(
    State(service): State<Arc<VectorStoreService>>,
    Path(store_id): Path<String>,
) -> SearchResult<impl IntoResponse> {
    let data = service.list_files(&store_id).await?;

    Ok(Json(ListResponse {
        object: "list",
        data,
    }))
}

async fn get_store_file(
    State(service): State<Arc<VectorStoreService>>,
    Path((store_id, file_id)): Path<(String, String)>,
) -> SearchResult<impl IntoResponse> {
    Ok(Json(service.get_file(&store_id, &file_id).await?))
}

async fn delete_store_file(
    State(service): State<Arc<VectorStoreService>>,
    Path((store_id, file_id)): Path<(String, String)>,
) -> SearchResult<impl IntoResponse> {
    service.remove_file(&store_id, &file_id).await?;

    Ok(Json(DeletedResponse {
        id: file_id,
        object: "vector_store.file.deleted",
        deleted: true,
    }))
}
