//! The request-to-response orchestration engine.
//!
//! One client call becomes an iterative conversation with the upstream
//! model: each turn either terminates (plain completion, terminal tool,
//! unresolved client tools) or appends resolved tool calls to the input log
//! and goes around again, bounded by the configured tool-call limits.

mod buffered;
mod streaming;

pub use streaming::ResponseEventStream;

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::api::items::InputItem;
use crate::api::request::ResponseParams;
use crate::api::response::Response;
use crate::chat::{ChatCompletion, ChatCompletionRequest, ChatTool, StreamOptions};
use crate::convert::messages_from_input;
use crate::error::{ResponseError, ResponseResult};
use crate::request::RequestContext;
use crate::store::{CompletionStore, ResponseStore};
use crate::tools::{ToolHandler, ToolService};
use crate::upstream::{ChatChunkStream, Upstream, UpstreamClient, resolve_upstream};

/// The upstream seam, scripted in tests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        upstream: &Upstream,
        request: &ChatCompletionRequest,
        credential: Option<&SecretString>,
    ) -> ResponseResult<ChatCompletion>;

    async fn complete_stream(
        &self,
        upstream: &Upstream,
        request: &ChatCompletionRequest,
        credential: Option<&SecretString>,
    ) -> ResponseResult<ChatChunkStream>;
}

#[async_trait]
impl ChatBackend for UpstreamClient {
    async fn complete(
        &self,
        upstream: &Upstream,
        request: &ChatCompletionRequest,
        credential: Option<&SecretString>,
    ) -> ResponseResult<ChatCompletion> {
        self.chat_completion(upstream, request, credential).await
    }

    async fn complete_stream(
        &self,
        upstream: &Upstream,
        request: &ChatCompletionRequest,
        credential: Option<&SecretString>,
    ) -> ResponseResult<ChatChunkStream> {
        self.chat_completion_stream(upstream, request, credential).await
    }
}

/// Explicit state of the turn loop, so depth bounds and cancellation stay
/// visible instead of hiding in recursion.
pub(crate) struct TurnState {
    pub params: ResponseParams,
    pub input_items: Vec<InputItem>,
    pub turn: usize,
}

impl TurnState {
    pub(crate) fn new(params: ResponseParams, input_items: Vec<InputItem>) -> Self {
        Self {
            params,
            input_items,
            turn: 0,
        }
    }

    /// Cumulative function-call items in the input log.
    pub(crate) fn function_call_count(&self) -> usize {
        self.input_items.iter().filter(|item| item.is_function_call()).count()
    }
}

/// Orchestrates `/v1/responses` and `/v1/chat/completions` requests.
pub struct Orchestrator {
    backend: Arc<dyn ChatBackend>,
    tool_service: Arc<ToolService>,
    tool_handler: ToolHandler,
    response_store: Arc<dyn ResponseStore>,
    completion_store: Arc<dyn CompletionStore>,
    llm_config: config::LlmConfig,
    limits: config::ResponsesConfig,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        tool_service: Arc<ToolService>,
        response_store: Arc<dyn ResponseStore>,
        completion_store: Arc<dyn CompletionStore>,
        llm_config: config::LlmConfig,
        limits: config::ResponsesConfig,
    ) -> Self {
        Self {
            backend,
            tool_handler: ToolHandler::new(Arc::clone(&tool_service)),
            tool_service,
            response_store,
            completion_store,
            llm_config,
            limits,
        }
    }

    pub(crate) fn response_store(&self) -> &Arc<dyn ResponseStore> {
        &self.response_store
    }

    pub(crate) fn completion_store(&self) -> &Arc<dyn CompletionStore> {
        &self.completion_store
    }

    /// Resolve the upstream once per request; the model is stable across turns.
    pub(crate) fn resolve(&self, ctx: &RequestContext, model: &str) -> ResponseResult<Upstream> {
        resolve_upstream(ctx.provider_tag.as_deref(), model, &self.llm_config)
    }

    /// Build one turn's upstream request from the current state.
    pub(crate) fn build_chat_request(
        &self,
        upstream: &Upstream,
        state: &TurnState,
        advertised_tools: &[ChatTool],
        stream: bool,
    ) -> ChatCompletionRequest {
        let messages = messages_from_input(state.params.instructions.as_deref(), &state.input_items);

        let tool_choice = state.params.tool_choice.as_ref().map(|choice| match choice {
            crate::api::request::ToolChoice::Mode(mode) => serde_json::json!(mode),
            crate::api::request::ToolChoice::Specific(value) => value.clone(),
        });

        ChatCompletionRequest {
            model: upstream.model.clone(),
            messages,
            temperature: state.params.temperature,
            top_p: state.params.top_p,
            max_tokens: state.params.max_output_tokens,
            tools: (!advertised_tools.is_empty()).then(|| advertised_tools.to_vec()),
            tool_choice,
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }

    /// Normalize the request input and chain the previous response's log.
    pub(crate) async fn assemble_input(
        &self,
        request: &crate::api::request::ResponseRequest,
        params: &ResponseParams,
    ) -> ResponseResult<Vec<InputItem>> {
        let mut input_items = request.input_items();

        if let Some(previous_id) = &params.previous_response_id {
            let mut chained = self.response_store.get_input_items(previous_id).await?;

            // The prior turn's output joins the context too; calls are
            // already in the stored input log, so union them in.
            let outputs = self.response_store.get_output_items(previous_id).await?;
            for item in crate::api::items::project_into_input(&outputs) {
                if !chained.contains(&item) {
                    chained.push(item);
                }
            }

            chained.extend(input_items);
            input_items = chained;
        }

        if input_items.is_empty() {
            return Err(ResponseError::InvalidRequest("Request carries no input".to_string()));
        }

        Ok(input_items)
    }

    /// Persist a response if the client asked for it. Storage failures are
    /// logged and swallowed; they never break the response path.
    pub(crate) async fn persist(&self, response: &Response, input_items: &[InputItem]) {
        if !response.store {
            return;
        }

        if let Err(e) = self.response_store.store_response(response, input_items).await {
            log::error!("Failed to persist response '{}': {e}", response.id);
        }
    }

    /// Guard the cumulative function-call count against the given limit.
    pub(crate) fn check_tool_call_limit(&self, state: &TurnState, limit: usize) -> ResponseResult<()> {
        if state.function_call_count() > limit {
            return Err(ResponseError::TooManyToolCalls { limit });
        }

        Ok(())
    }
}
