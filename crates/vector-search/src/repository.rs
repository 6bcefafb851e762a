//! Vector store metadata persistence.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{SearchError, SearchResult};
use crate::types::{FileCounts, FileStatus, VectorStore, VectorStoreFile, VectorStoreStatus, unix_timestamp};

/// Narrow persistence interface for vector store metadata.
///
/// Implementations must keep per-id writes linearizable; readers may observe
/// a consistent snapshot.
#[async_trait]
pub trait VectorStoreRepository: Send + Sync {
    async fn insert_store(&self, store: VectorStore) -> SearchResult<()>;
    async fn get_store(&self, store_id: &str) -> SearchResult<VectorStore>;
    async fn list_stores(&self) -> SearchResult<Vec<VectorStore>>;
    async fn update_store(&self, store: VectorStore) -> SearchResult<()>;
    async fn delete_store(&self, store_id: &str) -> SearchResult<bool>;

    async fn insert_file(&self, file: VectorStoreFile) -> SearchResult<()>;
    async fn get_file(&self, store_id: &str, file_id: &str) -> SearchResult<VectorStoreFile>;
    async fn list_files(&self, store_id: &str) -> SearchResult<Vec<VectorStoreFile>>;
    async fn update_file(&self, file: VectorStoreFile) -> SearchResult<()>;
    async fn delete_file(&self, store_id: &str, file_id: &str) -> SearchResult<bool>;
}

/// Process-wide in-memory repository.
#[derive(Default)]
pub struct InMemoryVectorStoreRepository {
    stores: DashMap<String, VectorStore>,
    /// Keyed by `(store_id, file_id)`; files also index under their store.
    files: DashMap<String, Vec<VectorStoreFile>>,
}

impl InMemoryVectorStoreRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn store_not_found(store_id: &str) -> SearchError {
    SearchError::NotFound(format!("Vector store '{store_id}' not found"))
}

#[async_trait]
impl VectorStoreRepository for InMemoryVectorStoreRepository {
    async fn insert_store(&self, store: VectorStore) -> SearchResult<()> {
        self.files.entry(store.id.clone()).or_default();
        self.stores.insert(store.id.clone(), store);
        Ok(())
    }

    async fn get_store(&self, store_id: &str) -> SearchResult<VectorStore> {
        self.stores
            .get(store_id)
            .map(|store| store.clone())
            .ok_or_else(|| store_not_found(store_id))
    }

    async fn list_stores(&self) -> SearchResult<Vec<VectorStore>> {
        let mut stores: Vec<VectorStore> = self.stores.iter().map(|entry| entry.clone()).collect();
        stores.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(stores)
    }

    async fn update_store(&self, store: VectorStore) -> SearchResult<()> {
        if !self.stores.contains_key(&store.id) {
            return Err(store_not_found(&store.id));
        }

        self.stores.insert(store.id.clone(), store);
        Ok(())
    }

    async fn delete_store(&self, store_id: &str) -> SearchResult<bool> {
        self.files.remove(store_id);
        Ok(self.stores.remove(store_id).is_some())
    }

    async fn insert_file(&self, file: VectorStoreFile) -> SearchResult<()> {
        let mut files = self
            .files
            .get_mut(&file.vector_store_id)
            .ok_or_else(|| store_not_found(&file.vector_store_id))?;

        files.retain(|existing| existing.id != file.id);
        files.push(file);
        Ok(())
    }

    async fn get_file(&self, store_id: &str, file_id: &str) -> SearchResult<VectorStoreFile> {
        let files = self.files.get(store_id).ok_or_else(|| store_not_found(store_id))?;

        files
            .iter()
            .find(|file| file.id == file_id)
            .cloned()
            .ok_or_else(|| SearchError::NotFound(format!("File '{file_id}' not found in vector store '{store_id}'")))
    }

    async fn list_files(&self, store_id: &str) -> SearchResult<Vec<VectorStoreFile>> {
        let files = self.files.get(store_id).ok_or_else(|| store_not_found(store_id))?;

        let mut files: Vec<VectorStoreFile> = files.clone();
        files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(files)
    }

    async fn update_file(&self, file: VectorStoreFile) -> SearchResult<()> {
        let mut files = self
            .files
            .get_mut(&file.vector_store_id)
            .ok_or_else(|| store_not_found(&file.vector_store_id))?;

        let Some(slot) = files.iter_mut().find(|existing| existing.id == file.id) else {
            return Err(SearchError::NotFound(format!(
                "File '{}' not found in vector store '{}'",
                file.id, file.vector_store_id
            )));
        };

        *slot = file;
        Ok(())
    }

    async fn delete_file(&self, store_id: &str, file_id: &str) -> SearchResult<bool> {
        let mut files = self.files.get_mut(store_id).ok_or_else(|| store_not_found(store_id))?;

        let before = files.len();
        files.retain(|file| file.id != file_id);
        Ok(files.len() != before)
    }
}

/// Recompute a store's aggregates from its file list.
///
/// Flips the store to completed once nothing is in progress, and refreshes
/// the activity timestamp and expiry.
pub fn reaggregate(store: &mut VectorStore, files: &[VectorStoreFile]) {
    let mut counts = FileCounts::default();
    let mut usage_bytes = 0;

    for file in files {
        counts.total += 1;
        match file.status {
            FileStatus::InProgress => counts.in_progress += 1,
            FileStatus::Completed => {
                counts.completed += 1;
                usage_bytes += file.usage_bytes;
            }
            FileStatus::Failed => counts.failed += 1,
            FileStatus::Cancelled => counts.cancelled += 1,
        }
    }

    store.file_counts = counts;
    store.usage_bytes = usage_bytes;
    store.last_active_at = unix_timestamp();
    store.refresh_expiry();

    if store.status != VectorStoreStatus::Expired {
        store.status = if counts.in_progress == 0 {
            VectorStoreStatus::Completed
        } else {
            VectorStoreStatus::InProgress
        };
    }
}
