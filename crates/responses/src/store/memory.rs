//! Bounded in-memory stores.

use std::sync::Arc;

use async_trait::async_trait;
use mini_moka::sync::Cache;
use tokio::sync::Mutex;

use crate::api::items::{InputItem, OutputItem};
use crate::api::response::Response;
use crate::chat::{ChatCompletion, ChatMessage};
use crate::error::{ResponseError, ResponseResult};

use super::{CompletionStore, ResponseStore, StoredResponse, merge_items};

/// Fixed-capacity LRU response store.
pub struct InMemoryResponseStore {
    cache: Cache<String, Arc<StoredResponse>>,
    write_lock: Mutex<()>,
}

impl InMemoryResponseStore {
    pub fn new(cache_size: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(cache_size).build(),
            write_lock: Mutex::new(()),
        }
    }

    fn record(&self, response_id: &str) -> ResponseResult<Arc<StoredResponse>> {
        self.cache
            .get(&response_id.to_string())
            .ok_or_else(|| ResponseError::NotFound(format!("Response '{response_id}' not found")))
    }
}

#[async_trait]
impl ResponseStore for InMemoryResponseStore {
    async fn store_response(&self, response: &Response, input_items: &[InputItem]) -> ResponseResult<()> {
        // Merges are read-modify-write; serialize them so concurrent
        // orchestrations on the same id stay linearizable.
        let _guard = self.write_lock.lock().await;

        let record = match self.cache.get(&response.id) {
            Some(existing) => {
                let mut record = (*existing).clone();
                record.merge(response, input_items);
                record
            }
            None => StoredResponse::new(response, input_items),
        };

        self.cache.insert(response.id.clone(), Arc::new(record));
        Ok(())
    }

    async fn get_response(&self, response_id: &str) -> ResponseResult<Response> {
        Ok(self.record(response_id)?.response.clone())
    }

    async fn get_input_items(&self, response_id: &str) -> ResponseResult<Vec<InputItem>> {
        Ok(self.record(response_id)?.input_items.clone())
    }

    async fn get_output_items(&self, response_id: &str) -> ResponseResult<Vec<OutputItem>> {
        Ok(self.record(response_id)?.output_items.clone())
    }

    async fn delete_response(&self, response_id: &str) -> ResponseResult<bool> {
        let _guard = self.write_lock.lock().await;

        let existed = self.cache.get(&response_id.to_string()).is_some();
        self.cache.invalidate(&response_id.to_string());
        Ok(existed)
    }
}

#[derive(Clone)]
struct StoredCompletion {
    completion: ChatCompletion,
    messages: Vec<ChatMessage>,
}

/// Fixed-capacity LRU completion store.
pub struct InMemoryCompletionStore {
    cache: Cache<String, Arc<StoredCompletion>>,
    write_lock: Mutex<()>,
}

impl InMemoryCompletionStore {
    pub fn new(cache_size: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(cache_size).build(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl CompletionStore for InMemoryCompletionStore {
    async fn store_completion(&self, completion: &ChatCompletion, messages: &[ChatMessage]) -> ResponseResult<()> {
        let Some(id) = completion.id.clone() else {
            return Err(ResponseError::InternalError(Some(
                "Cannot store a completion without an id".to_string(),
            )));
        };

        let _guard = self.write_lock.lock().await;

        let record = match self.cache.get(&id) {
            Some(existing) => {
                let mut record = (*existing).clone();
                record.completion = completion.clone();
                merge_items(&mut record.messages, messages);
                record
            }
            None => StoredCompletion {
                completion: completion.clone(),
                messages: messages.to_vec(),
            },
        };

        self.cache.insert(id, Arc::new(record));
        Ok(())
    }

    async fn get_completion(&self, completion_id: &str) -> ResponseResult<ChatCompletion> {
        self.cache
            .get(&completion_id.to_string())
            .map(|record| record.completion.clone())
            .ok_or_else(|| ResponseError::NotFound(format!("Completion '{completion_id}' not found")))
    }

    async fn delete_completion(&self, completion_id: &str) -> ResponseResult<bool> {
        let _guard = self.write_lock.lock().await;

        let existed = self.cache.get(&completion_id.to_string()).is_some();
        self.cache.invalidate(&completion_id.to_string());
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::items::Role;

    #[tokio::test]
    async fn two_stores_union_their_input_lists() {
        let store = InMemoryResponseStore::new(10);
        let mut response = Response::in_progress("m");
        response.id = "resp_fixed".to_string();

        let first = vec![
            InputItem::message(Role::User, "a"),
            InputItem::message(Role::Assistant, "b"),
        ];
        let second = vec![
            InputItem::message(Role::Assistant, "b"),
            InputItem::message(Role::User, "c"),
        ];

        store.store_response(&response, &first).await.unwrap();
        store.store_response(&response, &second).await.unwrap();

        let items = store.get_input_items("resp_fixed").await.unwrap();

        assert_eq!(
            items,
            vec![
                InputItem::message(Role::User, "a"),
                InputItem::message(Role::Assistant, "b"),
                InputItem::message(Role::User, "c"),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = InMemoryResponseStore::new(10);

        assert!(matches!(
            store.get_response("resp_missing").await,
            Err(ResponseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = InMemoryResponseStore::new(10);
        let mut response = Response::in_progress("m");
        response.id = "resp_x".to_string();

        store.store_response(&response, &[]).await.unwrap();

        assert!(store.delete_response("resp_x").await.unwrap());
        assert!(!store.delete_response("resp_x").await.unwrap());
    }

    #[tokio::test]
    async fn completion_store_round_trip() {
        let store = InMemoryCompletionStore::new(10);

        let completion = ChatCompletion {
            id: Some("chatcmpl-1".into()),
            model: "gpt-4o".into(),
            choices: vec![],
            usage: None,
            created: 0,
        };

        store.store_completion(&completion, &[]).await.unwrap();

        let fetched = store.get_completion("chatcmpl-1").await.unwrap();
        assert_eq!(fetched.model, "gpt-4o");

        assert!(store.delete_completion("chatcmpl-1").await.unwrap());
    }
}
