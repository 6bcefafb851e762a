//! Tool-call classification and dispatch.
//!
//! Every tool call of a completion is native (executed server-side),
//! terminal (its output ends the orchestration) or client-side (echoed back
//! for the caller to resolve). The outcome is a sum type the orchestrator
//! matches exhaustively.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use fastrace::Span;
use telemetry::attributes::{GEN_AI_OPERATION_NAME, GEN_AI_TOOL_CALL_ID, GEN_AI_TOOL_DESCRIPTION, GEN_AI_TOOL_NAME};

use crate::api::events::{StreamEvent, ToolCallPhase, ToolEventKind};
use crate::api::items::{InputItem, ItemStatus, OutputItem};
use crate::api::request::{ResponseParams, ToolDefinition};
use crate::chat::{ChatCompletion, ChatMessage, ChatRole, ChatToolCall};
use crate::error::ResponseResult;
use crate::request::RequestContext;

use super::service::{ToolExecution, ToolService};

/// Sink for streaming tool progress events. Buffered orchestration passes none.
#[async_trait]
pub trait ToolEvents: Send + Sync {
    async fn emit(&self, event: StreamEvent);
}

/// Outcome of handling one completion's tool calls in response mode.
#[derive(Debug)]
pub enum ToolOutcome {
    /// Every call resolved server-side; the loop continues with these items.
    Continue { items: Vec<InputItem> },
    /// Some call belongs to the client; the interim response carries the
    /// unresolved calls for the client to execute and re-submit.
    ContinueWithUnresolved { items: Vec<InputItem> },
    /// A terminal tool produced the final answer.
    Terminate { items: Vec<InputItem>, output: OutputItem },
}

/// Outcome of handling tool calls in chat-completions mode.
#[derive(Debug)]
pub struct CompletionOutcome {
    /// Messages to append to the next upstream request.
    pub messages: Vec<ChatMessage>,
    pub has_unresolved_client_tools: bool,
}

enum Classification<'a> {
    Native(&'a ToolDefinition),
    Mcp,
    ClientSide,
}

/// Classifies and executes the tool calls of a reconstructed completion.
pub struct ToolHandler {
    service: Arc<ToolService>,
}

impl ToolHandler {
    pub fn new(service: Arc<ToolService>) -> Self {
        Self { service }
    }

    /// Handle the tool calls of a completion in response mode.
    pub async fn handle(
        &self,
        completion: &ChatCompletion,
        params: &ResponseParams,
        ctx: &RequestContext,
        events: Option<&dyn ToolEvents>,
    ) -> ResponseResult<ToolOutcome> {
        let alias_map = ToolService::build_alias_map(&params.tools);
        let mcp_names = self.mcp_names_if_declared(&params.tools).await;

        let mut items = Vec::new();
        let mut has_unresolved = false;
        let mut output_index = 0usize;

        for choice in &completion.choices {
            for call in choice.message.tool_calls.as_deref().unwrap_or_default() {
                let item_id = format!("fc_{}", uuid::Uuid::new_v4().simple());

                items.push(InputItem::FunctionCall {
                    call_id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                });

                match classify(&call.function.name, &alias_map, &mcp_names) {
                    Classification::Native(definition) => {
                        let kind = ToolEventKind::Native(call.function.name.clone());

                        emit_progress(events, &kind, ToolCallPhase::InProgress, &item_id, output_index, None).await;
                        emit_progress(events, &kind, ToolCallPhase::Executing, &item_id, output_index, None).await;

                        let is_image = matches!(definition, ToolDefinition::ImageGeneration { .. });
                        if is_image {
                            emit_progress(events, &kind, ToolCallPhase::Generating, &item_id, output_index, None)
                                .await;
                        }

                        match self.execute_native(definition, call, ctx).await {
                            Ok(ToolExecution::TerminalImage(b64)) => {
                                emit_progress(events, &kind, ToolCallPhase::Completed, &item_id, output_index, None)
                                    .await;

                                let output = OutputItem::ImageGenerationCall {
                                    id: format!("ig_{}", uuid::Uuid::new_v4().simple()),
                                    status: ItemStatus::Completed,
                                    result: Some(b64),
                                };

                                return Ok(ToolOutcome::Terminate { items, output });
                            }
                            Ok(ToolExecution::Output(output)) => {
                                emit_progress(events, &kind, ToolCallPhase::Completed, &item_id, output_index, None)
                                    .await;

                                items.push(InputItem::FunctionCallOutput {
                                    call_id: call.id.clone(),
                                    output,
                                });
                            }
                            Err(e) => {
                                // Embedded so the model can react; tool failures
                                // never abort the orchestration on their own.
                                let message = e.client_message();
                                log::warn!("Tool '{}' failed: {message}", call.function.name);

                                emit_progress(
                                    events,
                                    &kind,
                                    ToolCallPhase::Completed,
                                    &item_id,
                                    output_index,
                                    Some(message.clone()),
                                )
                                .await;

                                items.push(InputItem::FunctionCallOutput {
                                    call_id: call.id.clone(),
                                    output: serde_json::json!({ "error": message }).to_string(),
                                });
                            }
                        }
                    }
                    Classification::Mcp => {
                        let kind = ToolEventKind::Mcp(call.function.name.clone());

                        emit_progress(events, &kind, ToolCallPhase::InProgress, &item_id, output_index, None).await;
                        emit_progress(events, &kind, ToolCallPhase::Executing, &item_id, output_index, None).await;

                        match self.execute_mcp_spanned(call).await {
                            Ok(output) => {
                                emit_progress(events, &kind, ToolCallPhase::Completed, &item_id, output_index, None)
                                    .await;

                                items.push(InputItem::FunctionCallOutput {
                                    call_id: call.id.clone(),
                                    output,
                                });
                            }
                            Err(e) => {
                                let message = e.client_message();
                                log::warn!("MCP tool '{}' failed: {message}", call.function.name);

                                emit_progress(
                                    events,
                                    &kind,
                                    ToolCallPhase::Completed,
                                    &item_id,
                                    output_index,
                                    Some(message.clone()),
                                )
                                .await;

                                items.push(InputItem::FunctionCallOutput {
                                    call_id: call.id.clone(),
                                    output: serde_json::json!({ "error": message }).to_string(),
                                });
                            }
                        }
                    }
                    Classification::ClientSide => {
                        has_unresolved = true;
                    }
                }

                output_index += 1;
            }
        }

        if has_unresolved {
            Ok(ToolOutcome::ContinueWithUnresolved { items })
        } else {
            Ok(ToolOutcome::Continue { items })
        }
    }

    /// Handle tool calls in chat-completions mode: resolved calls become
    /// assistant + tool messages, client calls stay with the caller.
    pub async fn handle_completion(
        &self,
        completion: &ChatCompletion,
        tools: &[ToolDefinition],
        ctx: &RequestContext,
    ) -> ResponseResult<CompletionOutcome> {
        let alias_map = ToolService::build_alias_map(tools);
        let mcp_names = self.mcp_names_if_declared(tools).await;

        let mut messages = Vec::new();
        let mut has_unresolved = false;

        for choice in &completion.choices {
            let calls = choice.message.tool_calls.as_deref().unwrap_or_default();
            if calls.is_empty() {
                continue;
            }

            messages.push(ChatMessage {
                role: ChatRole::Assistant,
                content: choice.message.content.clone(),
                tool_calls: Some(calls.to_vec()),
                tool_call_id: None,
                annotations: None,
            });

            for call in calls {
                let execution = match classify(&call.function.name, &alias_map, &mcp_names) {
                    Classification::Native(definition) => self.execute_native(definition, call, ctx).await,
                    Classification::Mcp => self.execute_mcp_spanned(call).await.map(ToolExecution::Output),
                    Classification::ClientSide => {
                        has_unresolved = true;
                        continue;
                    }
                };

                let output = match execution {
                    // Completion mode has no terminal path; image payloads
                    // travel as regular tool output.
                    Ok(ToolExecution::TerminalImage(b64)) => serde_json::json!({ "data": b64 }).to_string(),
                    Ok(ToolExecution::Output(output)) => output,
                    Err(e) => {
                        let message = e.client_message();
                        log::warn!("Tool '{}' failed: {message}", call.function.name);
                        serde_json::json!({ "error": message }).to_string()
                    }
                };

                messages.push(ChatMessage::tool_output(call.id.clone(), output));
            }
        }

        Ok(CompletionOutcome {
            messages,
            has_unresolved_client_tools: has_unresolved,
        })
    }

    async fn execute_native(
        &self,
        definition: &ToolDefinition,
        call: &ChatToolCall,
        ctx: &RequestContext,
    ) -> ResponseResult<ToolExecution> {
        let mut span = Span::enter_with_local_parent("execute_tool")
            .with_property(|| (GEN_AI_OPERATION_NAME, "execute_tool".to_string()))
            .with_property(|| (GEN_AI_TOOL_NAME, call.function.name.clone()))
            .with_property(|| (GEN_AI_TOOL_CALL_ID, call.id.clone()));

        if let Some(description) = ToolService::description(definition) {
            span = span.with_property(|| (GEN_AI_TOOL_DESCRIPTION, description.to_string()));
        }

        let result = self.service.execute(definition, &call.function.arguments, ctx).await;

        if let Err(e) = &result {
            span.add_properties(|| {
                [
                    ("error", "true".to_string()),
                    ("error.type", e.error_type().to_string()),
                ]
            });
        }

        result
    }

    async fn execute_mcp_spanned(&self, call: &ChatToolCall) -> ResponseResult<String> {
        let mut span = Span::enter_with_local_parent("execute_tool")
            .with_property(|| (GEN_AI_OPERATION_NAME, "execute_tool".to_string()))
            .with_property(|| (GEN_AI_TOOL_NAME, call.function.name.clone()))
            .with_property(|| (GEN_AI_TOOL_CALL_ID, call.id.clone()));

        let result = self.service.execute_mcp(&call.function.name, &call.function.arguments).await;

        if let Err(e) = &result {
            span.add_properties(|| {
                [
                    ("error", "true".to_string()),
                    ("error.type", e.error_type().to_string()),
                ]
            });
        }

        match result? {
            ToolExecution::Output(output) => Ok(output),
            ToolExecution::TerminalImage(_) => unreachable!("MCP tools never produce terminal images"),
        }
    }

    async fn mcp_names_if_declared(&self, tools: &[ToolDefinition]) -> HashSet<String> {
        if tools.iter().any(|tool| matches!(tool, ToolDefinition::Mcp { .. })) {
            self.service.mcp_tool_names().await
        } else {
            HashSet::new()
        }
    }
}

fn classify<'a>(
    name: &str,
    alias_map: &'a HashMap<String, ToolDefinition>,
    mcp_names: &HashSet<String>,
) -> Classification<'a> {
    match alias_map.get(name) {
        Some(ToolDefinition::Function { .. }) | None => {
            if mcp_names.contains(name) {
                Classification::Mcp
            } else {
                Classification::ClientSide
            }
        }
        Some(definition) => Classification::Native(definition),
    }
}

async fn emit_progress(
    events: Option<&dyn ToolEvents>,
    kind: &ToolEventKind,
    phase: ToolCallPhase,
    item_id: &str,
    output_index: usize,
    error: Option<String>,
) {
    let Some(events) = events else { return };

    events
        .emit(StreamEvent::ToolCall {
            kind: kind.clone(),
            phase,
            item_id: item_id.to_string(),
            output_index,
            error,
        })
        .await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vector_search::{FileStorage, HashingEmbedder, InMemoryVectorStoreRepository, VectorStoreService};

    use super::*;
    use crate::chat::{ChatChoice, ChatFunctionCall, FinishReason};

    fn tool_call(name: &str, call_id: &str, arguments: &str) -> ChatToolCall {
        ChatToolCall {
            id: call_id.to_string(),
            r#type: "function".to_string(),
            function: ChatFunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    fn completion_with_calls(calls: Vec<ChatToolCall>) -> ChatCompletion {
        ChatCompletion {
            id: Some("chatcmpl-1".into()),
            model: "gpt-4o".into(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: ChatRole::Assistant,
                    content: None,
                    tool_calls: Some(calls),
                    tool_call_id: None,
                    annotations: None,
                },
                finish_reason: Some(FinishReason::ToolCalls),
            }],
            usage: None,
            created: 0,
        }
    }

    fn params_with(tools: Vec<ToolDefinition>) -> ResponseParams {
        ResponseParams {
            model: "openai@gpt-4o".into(),
            instructions: None,
            max_output_tokens: None,
            temperature: None,
            top_p: None,
            tools,
            tool_choice: None,
            store: false,
            previous_response_id: None,
            metadata: None,
        }
    }

    async fn handler_with_store() -> (tempfile::TempDir, ToolHandler, Arc<VectorStoreService>, String) {
        let dir = tempfile::tempdir().unwrap();
        let storage_config = config::StorageConfig {
            root_dir: dir.path().to_path_buf(),
        };
        let vector_config: config::VectorStoreConfig = toml::from_str("chunk_size = 32\nchunk_overlap = 4").unwrap();

        let vector_search = Arc::new(
            VectorStoreService::new(
                Arc::new(InMemoryVectorStoreRepository::new()),
                FileStorage::new(&storage_config),
                Arc::new(HashingEmbedder::new(64)),
                &vector_config,
            )
            .unwrap(),
        );

        let store = vector_search
            .create_store(vector_search::CreateVectorStoreRequest::default())
            .await
            .unwrap();

        let blob = vector_search
            .storage()
            .put("assistants", "doc.md", b"the quarterly search migration plan".to_vec())
            .await
            .unwrap();

        vector_search
            .add_file(
                &store.id,
                vector_search::CreateVectorStoreFileRequest {
                    file_id: blob.id,
                    attributes: None,
                    chunking_strategy: None,
                },
            )
            .await
            .unwrap();

        // Let the spawned indexing task finish.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let llm_config: config::LlmConfig = toml::from_str("").unwrap();
        let service = Arc::new(ToolService::new(Arc::clone(&vector_search), &llm_config, None));

        let store_id = store.id;
        (dir, ToolHandler::new(service), vector_search, store_id)
    }

    #[tokio::test]
    async fn client_side_tool_is_echoed_unresolved() {
        let (_dir, handler, _search, _store) = handler_with_store().await;

        let params = params_with(vec![ToolDefinition::Function {
            name: "book_flight".into(),
            description: None,
            parameters: None,
            strict: None,
        }]);

        let completion = completion_with_calls(vec![tool_call("book_flight", "call_1", "{}")]);

        let outcome = handler
            .handle(&completion, &params, &RequestContext::default(), None)
            .await
            .unwrap();

        let ToolOutcome::ContinueWithUnresolved { items } = outcome else {
            panic!("expected unresolved outcome");
        };

        assert_eq!(items.len(), 1);
        assert!(items[0].is_function_call());
    }

    #[tokio::test]
    async fn native_retrieval_call_resolves_with_payload() {
        let (_dir, handler, _search, store_id) = handler_with_store().await;

        let params = params_with(vec![ToolDefinition::FileSearch {
            name: None,
            vector_store_ids: vec![store_id],
            max_num_results: None,
            ranking_options: None,
            filters: None,
        }]);

        let completion = completion_with_calls(vec![tool_call("file_search", "call_1", r#"{"query":"migration"}"#)]);

        let outcome = handler
            .handle(&completion, &params, &RequestContext::default(), None)
            .await
            .unwrap();

        let ToolOutcome::Continue { items } = outcome else {
            panic!("expected continue outcome");
        };

        assert_eq!(items.len(), 2);
        let InputItem::FunctionCallOutput { call_id, output } = &items[1] else {
            panic!("expected output item");
        };
        assert_eq!(call_id, "call_1");

        let payload: super::super::FileSearchResponse = serde_json::from_str(output).unwrap();
        assert!(!payload.data.is_empty());
    }

    #[tokio::test]
    async fn tool_failure_is_embedded_not_fatal() {
        let (_dir, handler, _search, store_id) = handler_with_store().await;

        let params = params_with(vec![ToolDefinition::FileSearch {
            name: None,
            vector_store_ids: vec![store_id],
            max_num_results: None,
            ranking_options: None,
            filters: None,
        }]);

        // Arguments that fail parsing inside the tool.
        let completion = completion_with_calls(vec![tool_call("file_search", "call_1", "not json")]);

        let outcome = handler
            .handle(&completion, &params, &RequestContext::default(), None)
            .await
            .unwrap();

        let ToolOutcome::Continue { items } = outcome else {
            panic!("expected continue outcome");
        };

        let InputItem::FunctionCallOutput { output, .. } = &items[1] else {
            panic!("expected embedded error output");
        };
        assert!(output.contains("error"));
    }

    #[tokio::test]
    async fn mixed_calls_keep_provider_order_and_flag_unresolved() {
        let (_dir, handler, _search, store_id) = handler_with_store().await;

        let params = params_with(vec![
            ToolDefinition::FileSearch {
                name: None,
                vector_store_ids: vec![store_id],
                max_num_results: None,
                ranking_options: None,
                filters: None,
            },
            ToolDefinition::Function {
                name: "book_flight".into(),
                description: None,
                parameters: None,
                strict: None,
            },
        ]);

        let completion = completion_with_calls(vec![
            tool_call("file_search", "call_1", r#"{"query":"plan"}"#),
            tool_call("book_flight", "call_2", "{}"),
        ]);

        let outcome = handler
            .handle(&completion, &params, &RequestContext::default(), None)
            .await
            .unwrap();

        let ToolOutcome::ContinueWithUnresolved { items } = outcome else {
            panic!("expected unresolved outcome");
        };

        // call_1, its output, then the unresolved call_2.
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], InputItem::FunctionCall { call_id, .. } if call_id == "call_1"));
        assert!(matches!(&items[1], InputItem::FunctionCallOutput { call_id, .. } if call_id == "call_1"));
        assert!(matches!(&items[2], InputItem::FunctionCall { call_id, .. } if call_id == "call_2"));
    }

    #[tokio::test]
    async fn completion_mode_builds_messages() {
        let (_dir, handler, _search, store_id) = handler_with_store().await;

        let tools = vec![ToolDefinition::FileSearch {
            name: None,
            vector_store_ids: vec![store_id],
            max_num_results: None,
            ranking_options: None,
            filters: None,
        }];

        let completion = completion_with_calls(vec![tool_call("file_search", "call_1", r#"{"query":"plan"}"#)]);

        let outcome = handler
            .handle_completion(&completion, &tools, &RequestContext::default())
            .await
            .unwrap();

        assert!(!outcome.has_unresolved_client_tools);
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.messages[0].role, ChatRole::Assistant);
        assert_eq!(outcome.messages[1].role, ChatRole::Tool);
    }
}
