//! Disk-backed response store with the same observable semantics as the
//! in-memory one.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::api::items::{InputItem, OutputItem};
use crate::api::response::Response;
use crate::error::{ResponseError, ResponseResult};

use super::{ResponseStore, StoredResponse};

const RESPONSES_DIR: &str = "responses";

/// JSON documents under `{root_dir}/responses/{response_id}.json`.
pub struct DiskResponseStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DiskResponseStore {
    pub fn new(config: &config::StorageConfig) -> Self {
        Self {
            dir: config.root_dir.join(RESPONSES_DIR),
            write_lock: Mutex::new(()),
        }
    }

    fn path(&self, response_id: &str) -> ResponseResult<PathBuf> {
        // Response ids are minted by this gateway; anything else cannot
        // address a document.
        if !response_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ResponseError::NotFound(format!("Response '{response_id}' not found")));
        }

        Ok(self.dir.join(format!("{response_id}.json")))
    }

    async fn read(&self, response_id: &str) -> ResponseResult<StoredResponse> {
        let path = self.path(response_id)?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| ResponseError::NotFound(format!("Response '{response_id}' not found")))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| ResponseError::InternalError(Some(format!("Corrupt response document: {e}"))))
    }

    async fn write(&self, record: &StoredResponse) -> ResponseResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ResponseError::InternalError(Some(format!("Failed to create store dir: {e}"))))?;

        let path = self.path(&record.response.id)?;
        let payload = serde_json::to_vec(record).map_err(|_| ResponseError::InternalError(None))?;

        tokio::fs::write(&path, payload)
            .await
            .map_err(|e| ResponseError::InternalError(Some(format!("Failed to persist response: {e}"))))
    }
}

#[async_trait]
impl ResponseStore for DiskResponseStore {
    async fn store_response(&self, response: &Response, input_items: &[InputItem]) -> ResponseResult<()> {
        let _guard = self.write_lock.lock().await;

        let record = match self.read(&response.id).await {
            Ok(mut record) => {
                record.merge(response, input_items);
                record
            }
            Err(ResponseError::NotFound(_)) => StoredResponse::new(response, input_items),
            Err(e) => return Err(e),
        };

        self.write(&record).await
    }

    async fn get_response(&self, response_id: &str) -> ResponseResult<Response> {
        Ok(self.read(response_id).await?.response)
    }

    async fn get_input_items(&self, response_id: &str) -> ResponseResult<Vec<InputItem>> {
        Ok(self.read(response_id).await?.input_items)
    }

    async fn get_output_items(&self, response_id: &str) -> ResponseResult<Vec<OutputItem>> {
        Ok(self.read(response_id).await?.output_items)
    }

    async fn delete_response(&self, response_id: &str) -> ResponseResult<bool> {
        let _guard = self.write_lock.lock().await;

        let path = self.path(response_id)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ResponseError::InternalError(Some(format!(
                "Failed to delete response: {e}"
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::items::Role;

    fn store() -> (tempfile::TempDir, DiskResponseStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = config::StorageConfig {
            root_dir: dir.path().to_path_buf(),
        };
        (dir, DiskResponseStore::new(&config))
    }

    #[tokio::test]
    async fn survives_the_same_merge_semantics_as_memory() {
        let (_dir, store) = store();

        let mut response = Response::in_progress("m");
        response.id = "resp_disk".to_string();

        let first = vec![InputItem::message(Role::User, "a")];
        let second = vec![
            InputItem::message(Role::User, "a"),
            InputItem::message(Role::Assistant, "b"),
        ];

        store.store_response(&response, &first).await.unwrap();
        store.store_response(&response, &second).await.unwrap();

        let items = store.get_input_items("resp_disk").await.unwrap();
        assert_eq!(items.len(), 2);

        assert!(store.delete_response("resp_disk").await.unwrap());
        assert!(matches!(
            store.get_response("resp_disk").await,
            Err(ResponseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_path_escaping_ids() {
        let (_dir, store) = store();

        assert!(matches!(
            store.get_response("../../etc/passwd").await,
            Err(ResponseError::NotFound(_))
        ));
    }
}
