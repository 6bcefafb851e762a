//! Streaming orchestration: canonical event emission and provider-chunk
//! reconstruction.
//!
//! The driver task owns the turn loop and posts events into a bounded
//! channel; the SSE transport drains it. Sequence numbers are assigned at
//! emission, so they are monotonically non-decreasing in emit order and
//! nothing follows a terminal event.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::api::events::{SequencedEvent, StreamEvent};
use crate::api::items::{ItemStatus, OutputItem, Role};
use crate::api::request::{CompletionsRequest, ResponseParams, ResponseRequest, ToolDefinition};
use crate::api::response::{Response, ResponseStatus, new_response_id, unix_timestamp};
use crate::chat::{
    ChatChoice, ChatCompletion, ChatCompletionChunk, ChatMessage, ChatRole, ChatToolCall, ChatUsage, ChatFunctionCall,
    FinishReason,
};
use crate::convert::{BackwardContext, response_from_completion};
use crate::error::{ResponseError, ResponseResult};
use crate::request::RequestContext;
use crate::telemetry::TurnTelemetry;
use crate::tools::{ToolEvents, ToolOutcome, ToolService};
use crate::upstream::ChatChunkStream;

use super::{Orchestrator, TurnState};

/// The canonical event stream handed to the SSE transport.
pub type ResponseEventStream = BoxStream<'static, SequencedEvent>;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Assigns sequence numbers and enforces terminal-event finality.
#[derive(Clone)]
pub(crate) struct EventEmitter {
    tx: mpsc::Sender<SequencedEvent>,
    sequence: Arc<AtomicU64>,
    terminated: Arc<AtomicBool>,
}

impl EventEmitter {
    fn new(tx: mpsc::Sender<SequencedEvent>) -> Self {
        Self {
            tx,
            sequence: Arc::new(AtomicU64::new(0)),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emit one event. Returns false once the receiver is gone or a terminal
    /// event was already sent.
    async fn send(&self, event: StreamEvent) -> bool {
        if self.terminated.load(Ordering::Acquire) {
            return false;
        }

        if event.is_terminal() {
            self.terminated.store(true, Ordering::Release);
        }

        let sequence_number = self.sequence.fetch_add(1, Ordering::AcqRel);

        self.tx
            .send(SequencedEvent {
                sequence_number,
                event,
            })
            .await
            .is_ok()
    }
}

#[async_trait]
impl ToolEvents for EventEmitter {
    async fn emit(&self, event: StreamEvent) {
        self.send(event).await;
    }
}

/// Per-call fragment accumulator.
#[derive(Debug, Default)]
struct CallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    item_id: String,
}

/// Per-choice accumulator for text, calls and the finish reason.
#[derive(Debug, Default)]
struct ChoiceAccumulator {
    text: String,
    message_item_id: Option<String>,
    finish_reason: Option<FinishReason>,
    calls: BTreeMap<u32, CallAccumulator>,
}

/// The reconstruction state of one streaming turn.
#[derive(Debug, Default)]
struct TurnAccumulator {
    completion_id: Option<String>,
    model: Option<String>,
    choices: BTreeMap<u32, ChoiceAccumulator>,
    /// Taken from the last chunk that carries it.
    usage: Option<ChatUsage>,
    finish: Option<FinishReason>,
}

impl TurnAccumulator {
    fn absorb_metadata(&mut self, chunk: &ChatCompletionChunk) {
        if let Some(id) = &chunk.id {
            self.completion_id.get_or_insert_with(|| id.clone());
        }
        if let Some(model) = &chunk.model {
            self.model.get_or_insert_with(|| model.clone());
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
    }

    /// Rebuild a completion from the accumulated fragments.
    ///
    /// A choice survives iff it has non-empty content, at least one complete
    /// tool call, or an explicit finish reason. Argument fragments were
    /// concatenated in arrival order per `(choice, call)`.
    fn into_completion(self, fallback_model: &str) -> ChatCompletion {
        let mut chat_choices = Vec::with_capacity(self.choices.len());

        for (index, choice) in self.choices {
            let tool_calls: Vec<ChatToolCall> = choice
                .calls
                .into_values()
                .filter_map(|call| {
                    let (Some(id), Some(name)) = (call.id, call.name) else {
                        return None;
                    };

                    Some(ChatToolCall {
                        id,
                        r#type: "function".to_string(),
                        function: ChatFunctionCall {
                            name,
                            arguments: call.arguments,
                        },
                    })
                })
                .collect();

            if choice.text.is_empty() && tool_calls.is_empty() && choice.finish_reason.is_none() {
                continue;
            }

            chat_choices.push(ChatChoice {
                index,
                message: ChatMessage {
                    role: ChatRole::Assistant,
                    content: (!choice.text.is_empty()).then(|| crate::chat::ChatContent::Text(choice.text)),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                    annotations: None,
                },
                finish_reason: choice.finish_reason,
            });
        }

        ChatCompletion {
            id: Some(
                self.completion_id
                    .unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())),
            ),
            model: self.model.unwrap_or_else(|| fallback_model.to_string()),
            choices: chat_choices,
            usage: self.usage,
            created: unix_timestamp(),
        }
    }
}

impl Orchestrator {
    /// Produce the lazy canonical event sequence for `stream=true`.
    ///
    /// Resolution and input assembly happen before the stream opens so
    /// malformed requests still surface as plain HTTP errors.
    pub async fn create_response_stream(
        self: &Arc<Self>,
        request: ResponseRequest,
        ctx: &RequestContext,
    ) -> ResponseResult<ResponseEventStream> {
        let params = ResponseParams::from_request(&request);
        let input_items = self.assemble_input(&request, &params).await?;
        self.resolve(ctx, &params.model)?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let emitter = EventEmitter::new(tx);

        let orchestrator = Arc::clone(self);
        let ctx = ctx.clone();
        let deadline = self.limits.max_streaming_timeout;

        tokio::spawn(async move {
            let drive = orchestrator.drive_response_stream(params, input_items, &ctx, &emitter);

            match tokio::time::timeout(deadline, drive).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    emitter
                        .send(StreamEvent::Error {
                            code: e.stream_code().to_string(),
                            message: e.client_message(),
                        })
                        .await;
                }
                Err(_) => {
                    log::warn!("Streaming response exceeded the {deadline:?} deadline");
                    emitter
                        .send(StreamEvent::Error {
                            code: "timeout".to_string(),
                            message: "The request exceeded the maximum allowed streaming duration".to_string(),
                        })
                        .await;
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(stream.boxed())
    }

    async fn drive_response_stream(
        &self,
        params: ResponseParams,
        input_items: Vec<crate::api::items::InputItem>,
        ctx: &RequestContext,
        emitter: &EventEmitter,
    ) -> ResponseResult<()> {
        let upstream = self.resolve(ctx, &params.model)?;
        let advertised_tools = self.tool_service.advertised_tools(&params.tools).await;
        let retrieval_tool_names = ToolService::retrieval_tool_names(&params.tools);
        let native_names = self.native_tool_names(&params.tools).await;

        let envelope = base_envelope(&params);
        let envelope_id = envelope.id.clone();
        let envelope_created_at = envelope.created_at;

        emitter.send(StreamEvent::Created {
            response: Box::new(envelope.clone()),
        })
        .await;

        let mut state = TurnState::new(params, input_items);
        let mut in_progress_sent = false;

        loop {
            let chat_request = self.build_chat_request(&upstream, &state, &advertised_tools, true);

            let telemetry = TurnTelemetry::start(ctx, &upstream, &chat_request);

            let mut stream = match self
                .backend
                .complete_stream(&upstream, &chat_request, ctx.credential.as_ref())
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    telemetry.fail(&e);
                    return Err(e);
                }
            };

            let mut accumulator = TurnAccumulator::default();

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        telemetry.fail(&e);
                        return Err(e);
                    }
                };

                if !in_progress_sent {
                    in_progress_sent = true;
                    emitter
                        .send(StreamEvent::InProgress {
                            response: Box::new(envelope.clone()),
                        })
                        .await;
                }

                accumulator.absorb_metadata(&chunk);

                let delivered = self
                    .absorb_choices(&mut accumulator, chunk, emitter, &native_names)
                    .await;

                if !delivered {
                    // Receiver is gone; stop reading the upstream.
                    log::debug!("Client disconnected, closing upstream stream");
                    telemetry.fail(&ResponseError::ConnectionError("client disconnected".to_string()));
                    return Ok(());
                }
            }

            let finish = accumulator.finish;

            // Keep the item ids the argument deltas were emitted under.
            let call_item_ids: BTreeMap<String, String> = accumulator
                .choices
                .values()
                .flat_map(|choice| choice.calls.values())
                .filter_map(|call| call.id.clone().map(|id| (id, call.item_id.clone())))
                .collect();

            let completion = accumulator.into_completion(&upstream.model);
            telemetry.succeed(&completion);

            if finish != Some(FinishReason::ToolCalls) {
                return self
                    .finish_terminal_turn(&completion, &state, &retrieval_tool_names, &envelope_id, envelope_created_at, emitter)
                    .await;
            }

            // Flush argument-done events for the calls the client will see.
            for choice in &completion.choices {
                for call in choice.message.tool_calls.as_deref().unwrap_or_default() {
                    if native_names.contains(call.function.name.as_str()) {
                        continue;
                    }

                    let item_id = call_item_ids.get(&call.id).cloned().unwrap_or_else(|| call.id.clone());

                    emitter
                        .send(StreamEvent::FunctionCallArgumentsDone {
                            item_id,
                            output_index: choice.index as usize,
                            arguments: call.function.arguments.clone(),
                        })
                        .await;
                }
            }

            match self
                .tool_handler
                .handle(&completion, &state.params, ctx, Some(emitter as &dyn ToolEvents))
                .await?
            {
                ToolOutcome::Terminate { items, output } => {
                    state.input_items.extend(items);

                    let mut response = response_from_completion(
                        &completion,
                        BackwardContext {
                            params: &state.params,
                            input_items: &state.input_items,
                            retrieval_tool_names: &retrieval_tool_names,
                        },
                    );
                    response.id = envelope_id.clone();
                    response.created_at = envelope_created_at;
                    response.output.push(output);
                    response.status = ResponseStatus::Completed;
                    response.error = None;
                    response.incomplete_details = None;

                    self.persist(&response, &state.input_items).await;

                    emitter
                        .send(StreamEvent::Completed {
                            response: Box::new(response),
                        })
                        .await;
                    return Ok(());
                }
                ToolOutcome::ContinueWithUnresolved { items } => {
                    state.input_items.extend(items);

                    let mut response = response_from_completion(
                        &completion,
                        BackwardContext {
                            params: &state.params,
                            input_items: &state.input_items,
                            retrieval_tool_names: &retrieval_tool_names,
                        },
                    );
                    response.id = envelope_id.clone();
                    response.created_at = envelope_created_at;
                    response.status = ResponseStatus::Completed;

                    self.persist(&response, &state.input_items).await;

                    emitter
                        .send(StreamEvent::Completed {
                            response: Box::new(response),
                        })
                        .await;
                    return Ok(());
                }
                ToolOutcome::Continue { items } => {
                    state.input_items.extend(items);
                    self.check_tool_call_limit(&state, self.limits.max_streaming_tool_calls)?;
                    state.turn += 1;
                }
            }
        }
    }

    /// Feed one chunk's choices into the accumulator, emitting deltas.
    /// Returns false once the receiver is gone.
    async fn absorb_choices(
        &self,
        accumulator: &mut TurnAccumulator,
        chunk: ChatCompletionChunk,
        emitter: &EventEmitter,
        native_names: &HashSet<String>,
    ) -> bool {
        let mut delivered = true;

        for chunk_choice in chunk.choices {
            let choice = accumulator.choices.entry(chunk_choice.index).or_default();

            if let Some(content) = chunk_choice.delta.content
                && !content.is_empty()
            {
                if choice.message_item_id.is_none() {
                    let item_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
                    choice.message_item_id = Some(item_id.clone());

                    delivered &= emitter
                        .send(StreamEvent::OutputItemAdded {
                            output_index: chunk_choice.index as usize,
                            item: OutputItem::Message {
                                id: item_id,
                                role: Role::Assistant,
                                status: ItemStatus::InProgress,
                                content: Vec::new(),
                            },
                        })
                        .await;
                }

                choice.text.push_str(&content);

                delivered &= emitter
                    .send(StreamEvent::OutputTextDelta {
                        item_id: choice.message_item_id.clone().unwrap_or_default(),
                        output_index: chunk_choice.index as usize,
                        delta: content,
                    })
                    .await;
            }

            for fragment in chunk_choice.delta.tool_calls.unwrap_or_default() {
                let call = choice.calls.entry(fragment.index).or_insert_with(|| CallAccumulator {
                    item_id: format!("fc_{}", uuid::Uuid::new_v4().simple()),
                    ..CallAccumulator::default()
                });

                if let Some(id) = fragment.id {
                    call.id = Some(id);
                }

                let Some(function) = fragment.function else { continue };

                if let Some(name) = function.name {
                    call.name = Some(name);
                }

                if let Some(arguments) = function.arguments
                    && !arguments.is_empty()
                {
                    call.arguments.push_str(&arguments);

                    // The client never sees partial arguments of tools the
                    // gateway executes itself.
                    let suppressed = call
                        .name
                        .as_deref()
                        .is_none_or(|name| native_names.contains(name));

                    if !suppressed {
                        delivered &= emitter
                            .send(StreamEvent::FunctionCallArgumentsDelta {
                                item_id: call.item_id.clone(),
                                output_index: chunk_choice.index as usize,
                                delta: arguments,
                            })
                            .await;
                    }
                }
            }

            if let Some(reason) = chunk_choice.finish_reason {
                choice.finish_reason = Some(reason);
                accumulator.finish = Some(reason);
            }
        }

        delivered
    }

    /// Flush text, build the terminal response and emit the closing event.
    async fn finish_terminal_turn(
        &self,
        completion: &ChatCompletion,
        state: &TurnState,
        retrieval_tool_names: &HashSet<String>,
        envelope_id: &str,
        envelope_created_at: u64,
        emitter: &EventEmitter,
    ) -> ResponseResult<()> {
        let mut response = response_from_completion(
            completion,
            BackwardContext {
                params: &state.params,
                input_items: &state.input_items,
                retrieval_tool_names,
            },
        );
        response.id = envelope_id.to_string();
        response.created_at = envelope_created_at;

        for (output_index, item) in response.output.iter().enumerate() {
            if let OutputItem::Message { id, content, .. } = item {
                emitter
                    .send(StreamEvent::OutputTextDone {
                        item_id: id.clone(),
                        output_index,
                        text: content.iter().map(|part| part.text()).collect(),
                    })
                    .await;
            }

            emitter
                .send(StreamEvent::OutputItemDone {
                    output_index,
                    item: item.clone(),
                })
                .await;
        }

        self.persist(&response, &state.input_items).await;

        let event = match response.status {
            ResponseStatus::Incomplete => StreamEvent::Incomplete {
                response: Box::new(response),
            },
            ResponseStatus::Failed => {
                let (code, message) = response
                    .error
                    .as_ref()
                    .map(|failure| (failure.code.clone(), failure.message.clone()))
                    .unwrap_or_else(|| ("server_error".to_string(), "The response failed".to_string()));

                StreamEvent::Error { code, message }
            }
            _ => StreamEvent::Completed {
                response: Box::new(response),
            },
        };

        emitter.send(event).await;
        Ok(())
    }

    /// Names of the tools the gateway executes itself, alias-aware, plus
    /// whatever the MCP executor serves.
    async fn native_tool_names(&self, tools: &[ToolDefinition]) -> HashSet<String> {
        let mut names: HashSet<String> = ToolService::build_alias_map(tools)
            .into_iter()
            .filter(|(_, definition)| !matches!(definition, ToolDefinition::Function { .. }))
            .map(|(name, _)| name)
            .collect();

        if tools.iter().any(|tool| matches!(tool, ToolDefinition::Mcp { .. })) {
            names.extend(self.tool_service.mcp_tool_names().await);
        }

        names
    }

    /// Streaming `/v1/chat/completions`: chunks pass through while resolved
    /// native tool calls keep the loop going between turns.
    pub async fn chat_completion_stream(
        self: &Arc<Self>,
        request: CompletionsRequest,
        ctx: &RequestContext,
    ) -> ResponseResult<ChatChunkStream> {
        let upstream = self.resolve(ctx, &request.model)?;
        let tools = request.tool_definitions();
        let advertised_tools = self.tool_service.advertised_tools(&tools).await;

        let (tx, rx) = mpsc::channel::<ResponseResult<ChatCompletionChunk>>(EVENT_CHANNEL_CAPACITY);

        let orchestrator = Arc::clone(self);
        let ctx = ctx.clone();
        let deadline = self.limits.max_streaming_timeout;

        tokio::spawn(async move {
            let mut messages = request.messages.clone();
            let mut executed_calls = 0usize;

            let drive = async {
                loop {
                    let chat_request = crate::chat::ChatCompletionRequest {
                        model: upstream.model.clone(),
                        messages: messages.clone(),
                        temperature: request.temperature,
                        top_p: request.top_p,
                        max_tokens: request.max_tokens,
                        tools: (!advertised_tools.is_empty()).then(|| advertised_tools.clone()),
                        tool_choice: request.tool_choice.clone(),
                        stream: true,
                        stream_options: Some(crate::chat::StreamOptions { include_usage: true }),
                    };

                    let telemetry = TurnTelemetry::start(&ctx, &upstream, &chat_request);

                    let mut stream = match orchestrator
                        .backend
                        .complete_stream(&upstream, &chat_request, ctx.credential.as_ref())
                        .await
                    {
                        Ok(stream) => stream,
                        Err(e) => {
                            telemetry.fail(&e);
                            return Err(e);
                        }
                    };

                    let mut accumulator = TurnAccumulator::default();

                    while let Some(chunk_result) = stream.next().await {
                        let chunk = match chunk_result {
                            Ok(chunk) => chunk,
                            Err(e) => {
                                telemetry.fail(&e);
                                return Err(e);
                            }
                        };

                        accumulator.absorb_metadata(&chunk);
                        absorb_silently(&mut accumulator, &chunk);

                        let mut forwarded = chunk;
                        forwarded.model = Some(request.model.clone());

                        if tx.send(Ok(forwarded)).await.is_err() {
                            telemetry.fail(&ResponseError::ConnectionError("client disconnected".to_string()));
                            return Ok(());
                        }
                    }

                    let finish = accumulator.finish;
                    let completion = accumulator.into_completion(&upstream.model);
                    telemetry.succeed(&completion);

                    if finish != Some(FinishReason::ToolCalls) {
                        return Ok(());
                    }

                    let outcome = orchestrator
                        .tool_handler
                        .handle_completion(&completion, &tools, &ctx)
                        .await?;

                    if outcome.has_unresolved_client_tools || outcome.messages.is_empty() {
                        return Ok(());
                    }

                    executed_calls += outcome
                        .messages
                        .iter()
                        .filter(|message| message.tool_call_id.is_some())
                        .count();

                    if executed_calls > orchestrator.limits.max_streaming_tool_calls {
                        return Err(ResponseError::TooManyToolCalls {
                            limit: orchestrator.limits.max_streaming_tool_calls,
                        });
                    }

                    messages.extend(outcome.messages);
                }
            };

            match tokio::time::timeout(deadline, drive).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let _ = tx.send(Err(e)).await;
                }
                Err(_) => {
                    let _ = tx.send(Err(ResponseError::Timeout)).await;
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });

        Ok(stream.boxed())
    }
}

/// Accumulate one chunk without emitting canonical events; the chat surface
/// forwards raw chunks instead.
fn absorb_silently(accumulator: &mut TurnAccumulator, chunk: &ChatCompletionChunk) {
    for chunk_choice in &chunk.choices {
        let choice = accumulator.choices.entry(chunk_choice.index).or_default();

        if let Some(content) = &chunk_choice.delta.content {
            choice.text.push_str(content);
        }

        for fragment in chunk_choice.delta.tool_calls.as_deref().unwrap_or_default() {
            let call = choice.calls.entry(fragment.index).or_default();

            if let Some(id) = &fragment.id {
                call.id = Some(id.clone());
            }

            if let Some(function) = &fragment.function {
                if let Some(name) = &function.name {
                    call.name = Some(name.clone());
                }
                if let Some(arguments) = &function.arguments {
                    call.arguments.push_str(arguments);
                }
            }
        }

        if let Some(reason) = chunk_choice.finish_reason {
            choice.finish_reason = Some(reason);
            accumulator.finish = Some(reason);
        }
    }
}

/// The envelope shared by `response.created` and every later event.
fn base_envelope(params: &ResponseParams) -> Response {
    Response {
        id: new_response_id(),
        object: "response".to_string(),
        created_at: unix_timestamp(),
        model: params.model.clone(),
        status: ResponseStatus::InProgress,
        error: None,
        incomplete_details: None,
        output: Vec::new(),
        usage: None,
        instructions: params.instructions.clone(),
        tools: params.tools.clone(),
        tool_choice: params.tool_choice.clone(),
        temperature: params.temperature,
        top_p: params.top_p,
        max_output_tokens: params.max_output_tokens,
        previous_response_id: params.previous_response_id.clone(),
        metadata: params.metadata.clone(),
        store: params.store,
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ScriptedBackend, ScriptedReply};
    use super::*;
    use crate::chat::{ChunkChoice, ChunkDelta, StreamingFunction, StreamingToolCall};
    use crate::store::ResponseStore;

    fn text_chunk(index: u32, content: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: Some("chatcmpl-s".into()),
            model: Some("gpt-4o-mini".into()),
            choices: vec![ChunkChoice {
                index,
                delta: ChunkDelta {
                    role: Some(ChatRole::Assistant),
                    content: Some(content.to_string()),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    fn finish_chunk(index: u32, reason: FinishReason, usage: Option<ChatUsage>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: Some("chatcmpl-s".into()),
            model: Some("gpt-4o-mini".into()),
            choices: vec![ChunkChoice {
                index,
                delta: ChunkDelta::default(),
                finish_reason: Some(reason),
            }],
            usage,
        }
    }

    fn call_fragment(
        choice: u32,
        call_index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: &str,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: Some("chatcmpl-s".into()),
            model: Some("gpt-4o-mini".into()),
            choices: vec![ChunkChoice {
                index: choice,
                delta: ChunkDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![StreamingToolCall {
                        index: call_index,
                        id: id.map(str::to_string),
                        function: Some(StreamingFunction {
                            name: name.map(str::to_string),
                            arguments: Some(arguments.to_string()),
                        }),
                    }]),
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    #[test]
    fn fragments_concatenate_in_arrival_order() {
        let mut accumulator = TurnAccumulator::default();

        for chunk in [
            call_fragment(0, 0, Some("call_1"), Some("file_search"), ""),
            call_fragment(0, 0, None, None, r#"{"qu"#),
            call_fragment(0, 0, None, None, r#"ery":"doc"#),
            call_fragment(0, 0, None, None, r#" X"}"#),
        ] {
            absorb_silently(&mut accumulator, &chunk);
        }

        let completion = accumulator.into_completion("gpt-4o-mini");

        let calls = completion.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"query":"doc X"}"#);
        assert_eq!(calls[0].id, "call_1");
    }

    #[test]
    fn incomplete_calls_and_empty_choices_are_dropped() {
        let mut accumulator = TurnAccumulator::default();

        // A fragment without an id or name never completes.
        absorb_silently(&mut accumulator, &call_fragment(0, 0, None, None, "{}"));
        // An untouched choice index with no content.
        accumulator.choices.entry(1).or_default();

        let completion = accumulator.into_completion("gpt-4o-mini");

        assert!(completion.choices.is_empty());
    }

    #[test]
    fn usage_comes_from_the_last_chunk_that_carries_it() {
        let mut accumulator = TurnAccumulator::default();

        let usage_a = ChatUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
            completion_tokens_details: None,
        };
        let usage_b = ChatUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            completion_tokens_details: None,
        };

        let mut chunk = text_chunk(0, "hi");
        chunk.usage = Some(usage_a);
        accumulator.absorb_metadata(&chunk);
        absorb_silently(&mut accumulator, &chunk);

        let chunk = finish_chunk(0, FinishReason::Stop, Some(usage_b));
        accumulator.absorb_metadata(&chunk);
        absorb_silently(&mut accumulator, &chunk);

        let completion = accumulator.into_completion("gpt-4o-mini");
        assert_eq!(completion.usage.unwrap().total_tokens, 15);
    }

    async fn collect_events(stream: ResponseEventStream) -> Vec<SequencedEvent> {
        stream.collect::<Vec<_>>().await
    }

    #[tokio::test]
    async fn streamed_text_ends_with_completed() {
        let fixture = super::super::test_support::fixture(
            vec![ScriptedReply::Chunks(vec![
                text_chunk(0, "An old "),
                text_chunk(0, "silent pond"),
                finish_chunk(
                    0,
                    FinishReason::Stop,
                    Some(ChatUsage {
                        prompt_tokens: 10,
                        completion_tokens: 15,
                        total_tokens: 25,
                        completion_tokens_details: None,
                    }),
                ),
            ])],
            "",
        )
        .await;

        let orchestrator = Arc::new(fixture.orchestrator);
        let request: ResponseRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "input": "Write a haiku",
            "stream": true,
        }))
        .unwrap();

        let stream = orchestrator
            .create_response_stream(request, &RequestContext::default())
            .await
            .unwrap();

        let events = collect_events(stream).await;

        let types: Vec<String> = events.iter().map(|event| event.event.event_type()).collect();
        assert_eq!(types.first().map(String::as_str), Some("response.created"));
        assert_eq!(types.get(1).map(String::as_str), Some("response.in_progress"));
        assert!(types.contains(&"response.output_text.delta".to_string()));
        assert_eq!(types.last().map(String::as_str), Some("response.completed"));

        // P1: sequence numbers are monotone and nothing follows the terminal.
        let numbers: Vec<u64> = events.iter().map(|event| event.sequence_number).collect();
        assert!(numbers.windows(2).all(|pair| pair[0] < pair[1]));

        let StreamEvent::Completed { response } = &events.last().unwrap().event else {
            panic!("expected completed");
        };
        assert_eq!(response.usage.unwrap().total_tokens, 25);
    }

    #[tokio::test]
    async fn native_deltas_are_suppressed_and_tool_events_flow() {
        let fixture = super::super::test_support::fixture(
            vec![
                ScriptedReply::Chunks(vec![
                    call_fragment(0, 0, Some("call_1"), Some("file_search"), ""),
                    call_fragment(0, 0, None, None, r#"{"query":"doc X"}"#),
                    finish_chunk(0, FinishReason::ToolCalls, None),
                ]),
                ScriptedReply::Chunks(vec![
                    text_chunk(0, "Doc X plans the rollout."),
                    finish_chunk(0, FinishReason::Stop, None),
                ]),
            ],
            "",
        )
        .await;

        let store_id = super::super::test_support::seeded_store(&fixture).await;

        let orchestrator = Arc::new(fixture.orchestrator);
        let request: ResponseRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "input": "summarize doc X",
            "stream": true,
            "tools": [{"type": "file_search", "vector_store_ids": [store_id]}],
        }))
        .unwrap();

        let stream = orchestrator
            .create_response_stream(request, &RequestContext::default())
            .await
            .unwrap();

        let events = collect_events(stream).await;
        let types: Vec<String> = events.iter().map(|event| event.event.event_type()).collect();

        assert!(!types.contains(&"response.function_call_arguments.delta".to_string()));
        assert!(types.contains(&"response.file_search.in_progress".to_string()));
        assert!(types.contains(&"response.file_search.executing".to_string()));
        assert!(types.contains(&"response.file_search.completed".to_string()));
        assert_eq!(types.last().map(String::as_str), Some("response.completed"));
    }

    #[tokio::test]
    async fn client_tool_arguments_stream_through() {
        let fixture = super::super::test_support::fixture(
            vec![ScriptedReply::Chunks(vec![
                call_fragment(0, 0, Some("call_1"), Some("book_flight"), ""),
                call_fragment(0, 0, None, None, r#"{"to":"#),
                call_fragment(0, 0, None, None, r#""HEL"}"#),
                finish_chunk(0, FinishReason::ToolCalls, None),
            ])],
            "",
        )
        .await;

        let orchestrator = Arc::new(fixture.orchestrator);
        let request: ResponseRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "input": "book it",
            "stream": true,
            "tools": [{"type": "function", "name": "book_flight"}],
        }))
        .unwrap();

        let stream = orchestrator
            .create_response_stream(request, &RequestContext::default())
            .await
            .unwrap();

        let events = collect_events(stream).await;
        let types: Vec<String> = events.iter().map(|event| event.event.event_type()).collect();

        assert!(types.contains(&"response.function_call_arguments.delta".to_string()));
        assert!(types.contains(&"response.function_call_arguments.done".to_string()));
        assert_eq!(types.last().map(String::as_str), Some("response.completed"));

        let StreamEvent::Completed { response } = &events.last().unwrap().event else {
            panic!("expected completed");
        };
        assert!(matches!(
            &response.output[0],
            OutputItem::FunctionCall { name, arguments, .. }
                if name == "book_flight" && arguments == r#"{"to":"HEL"}"#
        ));
    }

    #[tokio::test]
    async fn too_many_streaming_tool_calls_emits_error() {
        let fixture = super::super::test_support::fixture(
            vec![
                ScriptedReply::Chunks(vec![
                    call_fragment(0, 0, Some("call_1"), Some("file_search"), r#"{"query":"a"}"#),
                    call_fragment(0, 1, Some("call_2"), Some("file_search"), r#"{"query":"b"}"#),
                    finish_chunk(0, FinishReason::ToolCalls, None),
                ]),
                ScriptedReply::Chunks(vec![
                    call_fragment(0, 0, Some("call_3"), Some("file_search"), r#"{"query":"c"}"#),
                    finish_chunk(0, FinishReason::ToolCalls, None),
                ]),
            ],
            "max_streaming_tool_calls = 2",
        )
        .await;

        let store_id = super::super::test_support::seeded_store(&fixture).await;

        let orchestrator = Arc::new(fixture.orchestrator);
        let request: ResponseRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "input": "search a lot",
            "stream": true,
            "tools": [{"type": "file_search", "vector_store_ids": [store_id]}],
        }))
        .unwrap();

        let stream = orchestrator
            .create_response_stream(request, &RequestContext::default())
            .await
            .unwrap();

        let events = collect_events(stream).await;

        let StreamEvent::Error { code, .. } = &events.last().unwrap().event else {
            panic!("expected terminal error");
        };
        assert_eq!(code, "too_many_tool_calls");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_emits_timeout_and_persists_nothing() {
        let fixture = super::super::test_support::fixture(
            vec![ScriptedReply::SlowChunks(
                vec![
                    text_chunk(0, "dripping"),
                    text_chunk(0, " tokens"),
                    finish_chunk(0, FinishReason::Stop, None),
                ],
                std::time::Duration::from_millis(600),
            )],
            "max_streaming_timeout = 1000",
        )
        .await;

        let response_store = Arc::clone(&fixture.response_store);

        let orchestrator = Arc::new(fixture.orchestrator);
        let request: ResponseRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "input": "slow",
            "stream": true,
        }))
        .unwrap();

        let stream = orchestrator
            .create_response_stream(request, &RequestContext::default())
            .await
            .unwrap();

        let events = collect_events(stream).await;
        let types: Vec<String> = events.iter().map(|event| event.event.event_type()).collect();

        assert_eq!(types.first().map(String::as_str), Some("response.created"));
        assert!(types.contains(&"response.in_progress".to_string()));

        let StreamEvent::Error { code, .. } = &events.last().unwrap().event else {
            panic!("expected timeout error");
        };
        assert_eq!(code, "timeout");

        // No completed response was persisted for this stream.
        let StreamEvent::Created { response } = &events[0].event else {
            panic!("expected created first");
        };
        assert!(response_store.get_response(&response.id).await.is_err());
    }

    #[tokio::test]
    async fn image_generation_terminates_with_expected_event_order() {
        // The image tool would call an HTTP endpoint; point the default base
        // URL at a closed port so the failure path is exercised instead, and
        // assert the lifecycle events around it.
        let fixture = super::super::test_support::fixture(
            vec![
                ScriptedReply::Chunks(vec![
                    call_fragment(0, 0, Some("call_1"), Some("image_generation"), r#"{"prompt":"a fox"}"#),
                    finish_chunk(0, FinishReason::ToolCalls, None),
                ]),
                ScriptedReply::Chunks(vec![
                    text_chunk(0, "done"),
                    finish_chunk(0, FinishReason::Stop, None),
                ]),
            ],
            "",
        )
        .await;

        let orchestrator = Arc::new(fixture.orchestrator);
        let request: ResponseRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "input": "draw a fox",
            "stream": true,
            "tools": [{"type": "image_generation"}],
        }))
        .unwrap();

        let stream = orchestrator
            .create_response_stream(request, &RequestContext::default())
            .await
            .unwrap();

        let events = collect_events(stream).await;
        let types: Vec<String> = events.iter().map(|event| event.event.event_type()).collect();

        let in_progress = types
            .iter()
            .position(|t| t == "response.image_generation.in_progress")
            .unwrap();
        let executing = types
            .iter()
            .position(|t| t == "response.image_generation.executing")
            .unwrap();
        let generating = types
            .iter()
            .position(|t| t == "response.image_generation.generating")
            .unwrap();
        let completed_tool = types
            .iter()
            .position(|t| t == "response.image_generation.completed")
            .unwrap();

        assert!(in_progress < executing && executing < generating && generating < completed_tool);

        // The tool fails against the unreachable endpoint; the error is
        // embedded and the loop continues to the scripted second turn.
        assert_eq!(types.last().map(String::as_str), Some("response.completed"));
    }
}
