//! Buffered orchestration for `/v1/responses` and `/v1/chat/completions`.

use crate::api::request::{CompletionsRequest, ResponseParams, ResponseRequest};
use crate::api::response::{Response, ResponseStatus};
use crate::chat::{ChatCompletion, ChatCompletionRequest};
use crate::convert::{BackwardContext, response_from_completion};
use crate::error::{ResponseError, ResponseResult};
use crate::request::RequestContext;
use crate::telemetry::TurnTelemetry;
use crate::tools::{ToolOutcome, ToolService};

use super::{Orchestrator, TurnState};

impl Orchestrator {
    /// Produce a terminal response for a buffered `/v1/responses` call.
    pub async fn create_response(&self, request: ResponseRequest, ctx: &RequestContext) -> ResponseResult<Response> {
        let params = ResponseParams::from_request(&request);
        let input_items = self.assemble_input(&request, &params).await?;

        let upstream = self.resolve(ctx, &params.model)?;
        let advertised_tools = self.tool_service.advertised_tools(&params.tools).await;
        let retrieval_tool_names = ToolService::retrieval_tool_names(&params.tools);

        let mut state = TurnState::new(params, input_items);

        loop {
            let chat_request = self.build_chat_request(&upstream, &state, &advertised_tools, false);

            let telemetry = TurnTelemetry::start(ctx, &upstream, &chat_request);
            let result = self
                .backend
                .complete(&upstream, &chat_request, ctx.credential.as_ref())
                .await;
            telemetry.finish(&result);

            let completion = result?;

            fn backward<'a>(
                state: &'a TurnState,
                retrieval_tool_names: &'a std::collections::HashSet<String>,
            ) -> BackwardContext<'a> {
                BackwardContext {
                    params: &state.params,
                    input_items: &state.input_items,
                    retrieval_tool_names,
                }
            }

            if !completion.has_tool_calls() {
                let response = response_from_completion(&completion, backward(&state, &retrieval_tool_names));
                self.persist(&response, &state.input_items).await;
                return Ok(response);
            }

            match self.tool_handler.handle(&completion, &state.params, ctx, None).await? {
                ToolOutcome::Terminate { items, output } => {
                    state.input_items.extend(items);

                    let mut response = response_from_completion(&completion, backward(&state, &retrieval_tool_names));
                    response.output.push(output);
                    response.status = ResponseStatus::Completed;
                    response.error = None;
                    response.incomplete_details = None;

                    self.persist(&response, &state.input_items).await;
                    return Ok(response);
                }
                ToolOutcome::ContinueWithUnresolved { items } => {
                    state.input_items.extend(items);

                    // The client owns at least one call; hand the calls back
                    // so it can execute and re-submit.
                    let mut response = response_from_completion(&completion, backward(&state, &retrieval_tool_names));
                    response.status = ResponseStatus::Completed;

                    self.persist(&response, &state.input_items).await;
                    return Ok(response);
                }
                ToolOutcome::Continue { items } => {
                    state.input_items.extend(items);
                    self.check_tool_call_limit(&state, self.limits.max_tool_calls)?;
                    state.turn += 1;

                    log::debug!(
                        "Turn {} continues with {} input item(s)",
                        state.turn,
                        state.input_items.len()
                    );
                }
            }
        }
    }

    /// Fetch a persisted response.
    pub async fn get_response(&self, response_id: &str) -> ResponseResult<Response> {
        self.response_store().get_response(response_id).await
    }

    /// Fetch the persisted input items of a response.
    pub async fn get_input_items(&self, response_id: &str) -> ResponseResult<Vec<crate::api::items::InputItem>> {
        self.response_store().get_input_items(response_id).await
    }

    /// Delete a persisted response.
    pub async fn delete_response(&self, response_id: &str) -> ResponseResult<()> {
        if !self.response_store().delete_response(response_id).await? {
            return Err(ResponseError::NotFound(format!("Response '{response_id}' not found")));
        }

        Ok(())
    }

    /// Produce a terminal completion for a buffered `/v1/chat/completions`
    /// call, running the same turn loop over chat messages.
    pub async fn chat_completion(
        &self,
        request: CompletionsRequest,
        ctx: &RequestContext,
    ) -> ResponseResult<ChatCompletion> {
        let upstream = self.resolve(ctx, &request.model)?;
        let tools = request.tool_definitions();
        let advertised_tools = self.tool_service.advertised_tools(&tools).await;

        let mut messages = request.messages.clone();
        let mut executed_calls = 0usize;

        loop {
            let chat_request = ChatCompletionRequest {
                model: upstream.model.clone(),
                messages: messages.clone(),
                temperature: request.temperature,
                top_p: request.top_p,
                max_tokens: request.max_tokens,
                tools: (!advertised_tools.is_empty()).then(|| advertised_tools.clone()),
                tool_choice: request.tool_choice.clone(),
                stream: false,
                stream_options: None,
            };

            let telemetry = TurnTelemetry::start(ctx, &upstream, &chat_request);
            let result = self
                .backend
                .complete(&upstream, &chat_request, ctx.credential.as_ref())
                .await;
            telemetry.finish(&result);

            let mut completion = result?;
            // Hand the routed model id back to the client unchanged.
            completion.model = request.model.clone();

            if !completion.has_tool_calls() {
                self.persist_completion(&request, &completion, &messages).await;
                return Ok(completion);
            }

            let outcome = self.tool_handler.handle_completion(&completion, &tools, ctx).await?;

            if outcome.has_unresolved_client_tools || outcome.messages.is_empty() {
                self.persist_completion(&request, &completion, &messages).await;
                return Ok(completion);
            }

            executed_calls += outcome
                .messages
                .iter()
                .filter(|message| message.tool_call_id.is_some())
                .count();

            if executed_calls > self.limits.max_tool_calls {
                return Err(ResponseError::TooManyToolCalls {
                    limit: self.limits.max_tool_calls,
                });
            }

            messages.extend(outcome.messages);
        }
    }

    async fn persist_completion(
        &self,
        request: &CompletionsRequest,
        completion: &ChatCompletion,
        messages: &[crate::chat::ChatMessage],
    ) {
        if request.store != Some(true) {
            return;
        }

        if let Err(e) = self.completion_store().store_completion(completion, messages).await {
            log::error!("Failed to persist completion: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ScriptedReply, fixture, seeded_store, text_completion, tool_call_completion};
    use super::*;
    use crate::api::items::{Annotation, ContentPart, InputItem, OutputItem};
    use crate::store::ResponseStore;

    fn plain_request(input: &str) -> ResponseRequest {
        serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "input": input,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn plain_completion_maps_usage_and_text() {
        let fixture = fixture(
            vec![ScriptedReply::Completion(text_completion(
                "An old silent pond",
                Some((10, 15)),
            ))],
            "",
        )
        .await;

        let response = fixture
            .orchestrator
            .create_response(plain_request("Write a haiku"), &RequestContext::default())
            .await
            .unwrap();

        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.output.len(), 1);
        assert!(matches!(
            &response.output[0],
            OutputItem::Message { content, .. } if content[0].text() == "An old silent pond"
        ));

        let usage = response.usage.unwrap();
        assert_eq!((usage.input_tokens, usage.output_tokens, usage.total_tokens), (10, 15, 25));
    }

    #[tokio::test]
    async fn native_tool_round_trip_attaches_citations_and_persists_pairs() {
        let fixture = fixture(
            vec![
                ScriptedReply::Completion(tool_call_completion(vec![(
                    "file_search",
                    "call_1",
                    r#"{"query":"doc X"}"#,
                )])),
                ScriptedReply::Completion(text_completion("Doc X plans the rollout.", Some((20, 9)))),
            ],
            "",
        )
        .await;

        let store_id = seeded_store(&fixture).await;

        let request: ResponseRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "input": "summarize doc X",
            "tools": [{"type": "file_search", "vector_store_ids": [store_id]}],
        }))
        .unwrap();

        let response = fixture
            .orchestrator
            .create_response(request, &RequestContext::default())
            .await
            .unwrap();

        assert_eq!(response.status, ResponseStatus::Completed);

        let OutputItem::Message { content, .. } = &response.output[0] else {
            panic!("expected message output");
        };
        let ContentPart::OutputText { annotations, .. } = &content[0] else {
            panic!("expected annotated text");
        };
        assert!(
            annotations
                .iter()
                .all(|annotation| matches!(annotation, Annotation::FileCitation { .. }))
        );
        assert!(!annotations.is_empty());

        // Exactly one call/output pair in the persisted input log.
        let items = fixture.response_store.get_input_items(&response.id).await.unwrap();
        let calls: Vec<_> = items.iter().filter(|item| item.is_function_call()).collect();
        let outputs: Vec<_> = items
            .iter()
            .filter(|item| matches!(item, InputItem::FunctionCallOutput { .. }))
            .collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(outputs.len(), 1);
    }

    #[tokio::test]
    async fn client_side_tool_returns_interim_without_second_call() {
        let fixture = fixture(
            vec![ScriptedReply::Completion(tool_call_completion(vec![(
                "book_flight",
                "call_1",
                r#"{"to":"HEL"}"#,
            )]))],
            "",
        )
        .await;

        let request: ResponseRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "input": "book me a flight",
            "tools": [{"type": "function", "name": "book_flight"}],
        }))
        .unwrap();

        let response = fixture
            .orchestrator
            .create_response(request, &RequestContext::default())
            .await
            .unwrap();

        // Completed with the call visible, no recursive upstream call.
        assert_eq!(response.status, ResponseStatus::Completed);
        assert!(matches!(
            &response.output[0],
            OutputItem::FunctionCall { name, .. } if name == "book_flight"
        ));

        assert!(fixture.response_store.get_response(&response.id).await.is_ok());
    }

    #[tokio::test]
    async fn too_many_tool_calls_is_a_client_error() {
        let fixture = fixture(
            vec![
                ScriptedReply::Completion(tool_call_completion(vec![
                    ("file_search", "call_1", r#"{"query":"a"}"#),
                    ("file_search", "call_2", r#"{"query":"b"}"#),
                ])),
                ScriptedReply::Completion(tool_call_completion(vec![(
                    "file_search",
                    "call_3",
                    r#"{"query":"c"}"#,
                )])),
            ],
            "max_tool_calls = 2",
        )
        .await;

        let store_id = seeded_store(&fixture).await;

        let request: ResponseRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "input": "search a lot",
            "tools": [{"type": "file_search", "vector_store_ids": [store_id]}],
        }))
        .unwrap();

        let error = fixture
            .orchestrator
            .create_response(request, &RequestContext::default())
            .await
            .unwrap_err();

        assert!(matches!(error, ResponseError::TooManyToolCalls { limit: 2 }));
        assert!(error.to_string().contains("Too many tool calls"));
    }

    #[tokio::test]
    async fn store_false_skips_persistence() {
        let fixture = fixture(
            vec![ScriptedReply::Completion(text_completion("hi", None))],
            "",
        )
        .await;

        let request: ResponseRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "input": "hello",
            "store": false,
        }))
        .unwrap();

        let response = fixture
            .orchestrator
            .create_response(request, &RequestContext::default())
            .await
            .unwrap();

        assert!(matches!(
            fixture.response_store.get_response(&response.id).await,
            Err(ResponseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn previous_response_chains_prior_input() {
        let fixture = fixture(
            vec![
                ScriptedReply::Completion(text_completion("first answer", None)),
                ScriptedReply::Completion(text_completion("second answer", None)),
            ],
            "",
        )
        .await;

        let first = fixture
            .orchestrator
            .create_response(plain_request("first question"), &RequestContext::default())
            .await
            .unwrap();

        let request: ResponseRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "input": "second question",
            "previous_response_id": first.id,
        }))
        .unwrap();

        fixture
            .orchestrator
            .create_response(request, &RequestContext::default())
            .await
            .unwrap();

        // The second upstream request carries the chained history: the first
        // question, the stored assistant answer, and the new question.
        let requests = fixture.backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn upstream_error_propagates() {
        let fixture = fixture(
            vec![ScriptedReply::Error(|| ResponseError::ConnectionError("refused".into()))],
            "",
        )
        .await;

        let error = fixture
            .orchestrator
            .create_response(plain_request("hi"), &RequestContext::default())
            .await
            .unwrap_err();

        assert!(matches!(error, ResponseError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn chat_completions_loop_resolves_native_tools() {
        let fixture = fixture(
            vec![
                ScriptedReply::Completion(tool_call_completion(vec![(
                    "file_search",
                    "call_1",
                    r#"{"query":"rollout"}"#,
                )])),
                ScriptedReply::Completion(text_completion("rollout is on track", None)),
            ],
            "",
        )
        .await;

        let store_id = seeded_store(&fixture).await;

        let request: CompletionsRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "messages": [{"role": "user", "content": "how is the rollout?"}],
            "tools": [{"type": "file_search", "vector_store_ids": [store_id]}],
        }))
        .unwrap();

        let completion = fixture
            .orchestrator
            .chat_completion(request, &RequestContext::default())
            .await
            .unwrap();

        assert_eq!(completion.model, "openai@gpt-4o-mini");
        assert_eq!(
            completion.choices[0].message.content.as_ref().unwrap().text(),
            "rollout is on track"
        );
    }

    #[tokio::test]
    async fn chat_completions_returns_client_tools_untouched() {
        let fixture = fixture(
            vec![ScriptedReply::Completion(tool_call_completion(vec![(
                "book_flight",
                "call_1",
                "{}",
            )]))],
            "",
        )
        .await;

        let request: CompletionsRequest = serde_json::from_value(serde_json::json!({
            "model": "openai@gpt-4o-mini",
            "messages": [{"role": "user", "content": "book it"}],
            "tools": [{"type": "function", "function": {"name": "book_flight"}}],
        }))
        .unwrap();

        let completion = fixture
            .orchestrator
            .chat_completion(request, &RequestContext::default())
            .await
            .unwrap();

        let calls = completion.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "book_flight");
    }
}
