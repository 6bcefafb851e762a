//! Response and completion persistence.
//!
//! Stores accumulate the full interaction log across turns: item lists merge
//! by structural equality in first-seen order, and function-call output
//! items are projected into input form before storage.

mod disk;
mod memory;

use async_trait::async_trait;

pub use disk::DiskResponseStore;
pub use memory::{InMemoryCompletionStore, InMemoryResponseStore};

use crate::api::items::{InputItem, OutputItem, project_into_input};
use crate::api::response::Response;
use crate::chat::{ChatCompletion, ChatMessage};
use crate::error::ResponseResult;

/// Narrow persistence interface for responses.
///
/// Writes on the same id are linearizable; readers observe a consistent
/// snapshot.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Persist a response and merge its item lists with existing records.
    async fn store_response(&self, response: &Response, input_items: &[InputItem]) -> ResponseResult<()>;

    async fn get_response(&self, response_id: &str) -> ResponseResult<Response>;

    async fn get_input_items(&self, response_id: &str) -> ResponseResult<Vec<InputItem>>;

    async fn get_output_items(&self, response_id: &str) -> ResponseResult<Vec<OutputItem>>;

    /// Returns false when the id was unknown.
    async fn delete_response(&self, response_id: &str) -> ResponseResult<bool>;
}

/// Persistence interface for stored chat completions.
#[async_trait]
pub trait CompletionStore: Send + Sync {
    async fn store_completion(&self, completion: &ChatCompletion, messages: &[ChatMessage]) -> ResponseResult<()>;

    async fn get_completion(&self, completion_id: &str) -> ResponseResult<ChatCompletion>;

    async fn delete_completion(&self, completion_id: &str) -> ResponseResult<bool>;
}

/// One persisted response with its accumulated item log.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct StoredResponse {
    pub response: Response,
    pub input_items: Vec<InputItem>,
    pub output_items: Vec<OutputItem>,
}

impl StoredResponse {
    /// Build the record for a first write.
    pub(crate) fn new(response: &Response, input_items: &[InputItem]) -> Self {
        let mut record = Self {
            response: response.clone(),
            input_items: Vec::new(),
            output_items: Vec::new(),
        };

        record.merge(response, input_items);
        record
    }

    /// Merge a subsequent write into this record.
    ///
    /// The latest envelope wins; item lists grow by set-union under
    /// structural equality, preserving first-seen order. Function calls in
    /// the output are projected into the input log.
    pub(crate) fn merge(&mut self, response: &Response, input_items: &[InputItem]) {
        self.response = response.clone();

        merge_items(&mut self.input_items, input_items);

        let projected = project_into_input(&response.output);
        let projected_calls: Vec<InputItem> = projected.into_iter().filter(InputItem::is_function_call).collect();
        merge_items(&mut self.input_items, &projected_calls);

        merge_items(&mut self.output_items, &response.output);
    }
}

/// Append the items not yet present, preserving first-seen order.
pub(crate) fn merge_items<T: PartialEq + Clone>(existing: &mut Vec<T>, incoming: &[T]) {
    for item in incoming {
        if !existing.contains(item) {
            existing.push(item.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::items::{ItemStatus, Role};

    #[test]
    fn merge_is_set_union_in_first_seen_order() {
        let mut existing = vec!["a", "b"];
        merge_items(&mut existing, &["b", "c", "a", "d"]);

        assert_eq!(existing, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn output_function_calls_are_projected_into_input() {
        let mut response = Response::in_progress("m");
        response.output = vec![
            OutputItem::FunctionCall {
                id: "fc_1".into(),
                call_id: "call_1".into(),
                name: "file_search".into(),
                arguments: "{}".into(),
                status: ItemStatus::Completed,
            },
            OutputItem::Message {
                id: "msg_1".into(),
                role: Role::Assistant,
                status: ItemStatus::Completed,
                content: vec![],
            },
        ];

        let record = StoredResponse::new(&response, &[InputItem::message(Role::User, "hi")]);

        assert_eq!(record.input_items.len(), 2);
        assert!(matches!(&record.input_items[1], InputItem::FunctionCall { call_id, .. } if call_id == "call_1"));
        assert_eq!(record.output_items.len(), 2);
    }

    #[test]
    fn repeated_merges_are_idempotent() {
        let mut response = Response::in_progress("m");
        response.output = vec![OutputItem::Message {
            id: "msg_1".into(),
            role: Role::Assistant,
            status: ItemStatus::Completed,
            content: vec![],
        }];

        let input = vec![InputItem::message(Role::User, "hi")];
        let mut record = StoredResponse::new(&response, &input);
        record.merge(&response, &input);
        record.merge(&response, &input);

        assert_eq!(record.input_items.len(), 1);
        assert_eq!(record.output_items.len(), 1);
    }
}
