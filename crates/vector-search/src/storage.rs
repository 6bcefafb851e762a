//! Disk-backed blob storage with metadata sidecars and the file-backed
//! embeddings layout.
//!
//! Blobs land under `{root_dir}/{purpose}/{file_id}` with a sibling
//! `{file_id}.metadata` JSON; embeddings under
//! `{root_dir}/embeddings/{file_id}.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SearchError, SearchResult};
use crate::types::unix_timestamp;

const EMBEDDINGS_DIR: &str = "embeddings";

/// API shape of a stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
    /// Always `"file"`.
    pub object: String,
    pub bytes: u64,
    pub created_at: u64,
    pub filename: String,
    pub purpose: String,
}

/// Sidecar metadata stored next to each blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileMetadata {
    filename: String,
    purpose: String,
    bytes: u64,
    created_at: u64,
}

/// One chunk of the persisted embedding sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedChunk {
    pub file_id: String,
    pub chunk_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub chunk_metadata: BTreeMap<String, Value>,
}

/// The persisted embedding document of one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEmbeddings {
    pub file_id: String,
    pub metadata: BTreeMap<String, Value>,
    pub chunks: Vec<PersistedChunk>,
}

/// Disk storage rooted at the configured directory.
#[derive(Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(config: &config::StorageConfig) -> Self {
        Self {
            root: config.root_dir.clone(),
        }
    }

    /// Store a blob and its sidecar. Returns the public file object.
    pub async fn put(&self, purpose: &str, filename: &str, bytes: Vec<u8>) -> SearchResult<FileObject> {
        validate_purpose(purpose)?;

        let file_id = format!("file_{}", uuid::Uuid::new_v4().simple());
        let dir = self.root.join(purpose);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SearchError::Storage(format!("Failed to create '{}': {e}", dir.display())))?;

        let blob_path = dir.join(&file_id);
        let size = bytes.len() as u64;

        tokio::fs::write(&blob_path, bytes)
            .await
            .map_err(|e| SearchError::Storage(format!("Failed to write blob '{file_id}': {e}")))?;

        let metadata = FileMetadata {
            filename: filename.to_string(),
            purpose: purpose.to_string(),
            bytes: size,
            created_at: unix_timestamp(),
        };

        let sidecar = serde_json::to_vec_pretty(&metadata).map_err(|_| SearchError::Internal)?;

        tokio::fs::write(sidecar_path(&blob_path), sidecar)
            .await
            .map_err(|e| SearchError::Storage(format!("Failed to write metadata for '{file_id}': {e}")))?;

        Ok(FileObject {
            id: file_id,
            object: "file".to_string(),
            bytes: size,
            created_at: metadata.created_at,
            filename: metadata.filename,
            purpose: metadata.purpose,
        })
    }

    /// Whether the blob for a file id still exists.
    pub async fn exists(&self, file_id: &str) -> bool {
        self.locate(file_id).await.is_some()
    }

    /// Public file object for an id.
    pub async fn get(&self, file_id: &str) -> SearchResult<FileObject> {
        let blob_path = self
            .locate(file_id)
            .await
            .ok_or_else(|| SearchError::NotFound(format!("File '{file_id}' not found")))?;

        let metadata = self.read_metadata(&blob_path, file_id).await?;

        Ok(FileObject {
            id: file_id.to_string(),
            object: "file".to_string(),
            bytes: metadata.bytes,
            created_at: metadata.created_at,
            filename: metadata.filename,
            purpose: metadata.purpose,
        })
    }

    /// Raw blob content.
    pub async fn read_content(&self, file_id: &str) -> SearchResult<Vec<u8>> {
        let blob_path = self
            .locate(file_id)
            .await
            .ok_or_else(|| SearchError::NotFound(format!("File '{file_id}' not found")))?;

        tokio::fs::read(&blob_path)
            .await
            .map_err(|e| SearchError::Storage(format!("Failed to read blob '{file_id}': {e}")))
    }

    /// Delete a blob, its sidecar and any persisted embeddings.
    pub async fn delete(&self, file_id: &str) -> SearchResult<bool> {
        let Some(blob_path) = self.locate(file_id).await else {
            return Ok(false);
        };

        tokio::fs::remove_file(&blob_path)
            .await
            .map_err(|e| SearchError::Storage(format!("Failed to delete blob '{file_id}': {e}")))?;

        let sidecar = sidecar_path(&blob_path);
        if let Err(e) = tokio::fs::remove_file(&sidecar).await {
            log::warn!("Failed to delete metadata sidecar for '{file_id}': {e}");
        }

        self.delete_embeddings(file_id).await;

        Ok(true)
    }

    /// Every stored file, optionally filtered by purpose.
    pub async fn list(&self, purpose: Option<&str>) -> SearchResult<Vec<FileObject>> {
        let mut files = Vec::new();

        let mut root_entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(_) => return Ok(files),
        };

        while let Ok(Some(dir_entry)) = root_entries.next_entry().await {
            let dir_name = dir_entry.file_name();
            let Some(dir_name) = dir_name.to_str() else { continue };

            if dir_name == EMBEDDINGS_DIR || !dir_entry.path().is_dir() {
                continue;
            }

            if purpose.is_some_and(|purpose| purpose != dir_name) {
                continue;
            }

            let mut entries = match tokio::fs::read_dir(dir_entry.path()).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };

                if name.ends_with(".metadata") {
                    continue;
                }

                match self.read_metadata(&entry.path(), name).await {
                    Ok(metadata) => files.push(FileObject {
                        id: name.to_string(),
                        object: "file".to_string(),
                        bytes: metadata.bytes,
                        created_at: metadata.created_at,
                        filename: metadata.filename,
                        purpose: metadata.purpose,
                    }),
                    Err(e) => log::warn!("Skipping file '{name}' with unreadable metadata: {e}"),
                }
            }
        }

        files.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(files)
    }

    /// Persist the embedding document of one file.
    pub async fn save_embeddings(&self, embeddings: &PersistedEmbeddings) -> SearchResult<()> {
        let dir = self.root.join(EMBEDDINGS_DIR);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SearchError::Storage(format!("Failed to create embeddings dir: {e}")))?;

        let payload = serde_json::to_vec(embeddings).map_err(|_| SearchError::Internal)?;
        let path = dir.join(format!("{}.json", embeddings.file_id));

        tokio::fs::write(&path, payload)
            .await
            .map_err(|e| SearchError::Storage(format!("Failed to persist embeddings for '{}': {e}", embeddings.file_id)))
    }

    /// Load every persisted embedding document, skipping unreadable ones.
    pub async fn load_all_embeddings(&self) -> Vec<PersistedEmbeddings> {
        let dir = self.root.join(EMBEDDINGS_DIR);
        let mut documents = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return documents,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();

            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };

            match serde_json::from_slice::<PersistedEmbeddings>(&bytes) {
                Ok(document) => documents.push(document),
                Err(e) => log::warn!("Skipping unreadable embeddings document '{}': {e}", path.display()),
            }
        }

        documents
    }

    /// Remove the persisted embeddings of a file, if any.
    pub async fn delete_embeddings(&self, file_id: &str) {
        let path = self.root.join(EMBEDDINGS_DIR).join(format!("{file_id}.json"));

        if let Err(e) = tokio::fs::remove_file(&path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            log::warn!("Failed to delete embeddings for '{file_id}': {e}");
        }
    }

    async fn locate(&self, file_id: &str) -> Option<PathBuf> {
        let mut root_entries = tokio::fs::read_dir(&self.root).await.ok()?;

        while let Ok(Some(dir_entry)) = root_entries.next_entry().await {
            let dir_name = dir_entry.file_name();
            let Some(dir_name) = dir_name.to_str() else { continue };

            if dir_name == EMBEDDINGS_DIR {
                continue;
            }

            let candidate = dir_entry.path().join(file_id);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some(candidate);
            }
        }

        None
    }

    async fn read_metadata(&self, blob_path: &Path, file_id: &str) -> SearchResult<FileMetadata> {
        let bytes = tokio::fs::read(sidecar_path(blob_path))
            .await
            .map_err(|e| SearchError::Storage(format!("Failed to read metadata for '{file_id}': {e}")))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| SearchError::Storage(format!("Corrupt metadata sidecar for '{file_id}': {e}")))
    }
}

fn sidecar_path(blob_path: &Path) -> PathBuf {
    let mut name = blob_path.file_name().unwrap_or_default().to_os_string();
    name.push(".metadata");
    blob_path.with_file_name(name)
}

fn validate_purpose(purpose: &str) -> SearchResult<()> {
    if purpose.is_empty()
        || purpose == EMBEDDINGS_DIR
        || !purpose.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(SearchError::InvalidRequest(format!("Invalid file purpose '{purpose}'")));
    }

    Ok(())
}
