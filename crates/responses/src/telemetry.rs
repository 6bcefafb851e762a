//! Per-turn chat telemetry: the `chat` span, message events and the
//! token-usage and duration histograms.
//!
//! One [`TurnTelemetry`] covers exactly one upstream call. In streaming it is
//! finished once the synthetic completion is reconstructed (or the stream
//! errors), so the span closes exactly once on every path.

use std::time::Instant;

use fastrace::{Event, Span};
use itertools::Itertools;
use opentelemetry::{Key, Value};
use telemetry::KeyValue;
use telemetry::attributes::{
    EVENT_GEN_AI_ASSISTANT_MESSAGE, EVENT_GEN_AI_SYSTEM_MESSAGE, EVENT_GEN_AI_TOOL_MESSAGE,
    EVENT_GEN_AI_USER_MESSAGE, GEN_AI_OPERATION_NAME, GEN_AI_OUTPUT_TYPE, GEN_AI_PROVIDER_NAME,
    GEN_AI_REQUEST_MAX_TOKENS, GEN_AI_REQUEST_MODEL, GEN_AI_REQUEST_TEMPERATURE, GEN_AI_REQUEST_TOP_P,
    GEN_AI_RESPONSE_FINISH_REASONS, GEN_AI_RESPONSE_ID, GEN_AI_RESPONSE_MODEL, GEN_AI_TOKEN_TYPE,
    GEN_AI_USAGE_INPUT_TOKENS, GEN_AI_USAGE_OUTPUT_TOKENS, SERVER_ADDRESS,
};
use telemetry::metrics::{GEN_AI_CLIENT_OPERATION_DURATION, GEN_AI_CLIENT_TOKEN_USAGE};

use crate::chat::{ChatCompletion, ChatCompletionRequest, ChatRole, FinishReason};
use crate::error::ResponseError;
use crate::request::RequestContext;
use crate::upstream::Upstream;

const OPERATION_NAME: &str = "chat";

/// Span plus metric recorder for one upstream turn.
pub(crate) struct TurnTelemetry {
    span: Span,
    start: Instant,
    attributes: Vec<KeyValue>,
}

impl TurnTelemetry {
    /// Open the `chat` span, mirror the request messages onto it and seed
    /// the metric attributes.
    pub(crate) fn start(ctx: &RequestContext, upstream: &Upstream, request: &ChatCompletionRequest) -> Self {
        let mut span = ctx.new_span("chat");

        span = span
            .with_property(|| (GEN_AI_OPERATION_NAME, OPERATION_NAME.to_string()))
            .with_property(|| (GEN_AI_PROVIDER_NAME, upstream.provider.to_string()))
            .with_property(|| (GEN_AI_OUTPUT_TYPE, "text".to_string()))
            .with_property(|| (GEN_AI_REQUEST_MODEL, request.model.clone()))
            .with_property(|| (SERVER_ADDRESS, upstream.base_url.clone()));

        if let Some(max_tokens) = request.max_tokens {
            span = span.with_property(|| (GEN_AI_REQUEST_MAX_TOKENS, max_tokens.to_string()));
        }
        if let Some(temperature) = request.temperature {
            span = span.with_property(|| (GEN_AI_REQUEST_TEMPERATURE, temperature.to_string()));
        }
        if let Some(top_p) = request.top_p {
            span = span.with_property(|| (GEN_AI_REQUEST_TOP_P, top_p.to_string()));
        }

        for message in &request.messages {
            let event_name = match message.role {
                ChatRole::System => EVENT_GEN_AI_SYSTEM_MESSAGE,
                ChatRole::User => EVENT_GEN_AI_USER_MESSAGE,
                ChatRole::Assistant => EVENT_GEN_AI_ASSISTANT_MESSAGE,
                ChatRole::Tool => EVENT_GEN_AI_TOOL_MESSAGE,
            };

            let payload = serde_json::to_string(message).unwrap_or_default();
            let provider = upstream.provider.to_string();

            Event::add_to_parent(event_name, &span, || {
                [
                    (std::borrow::Cow::Borrowed("content"), std::borrow::Cow::Owned(payload)),
                    (std::borrow::Cow::Borrowed(GEN_AI_PROVIDER_NAME), std::borrow::Cow::Owned(provider)),
                ]
            });
        }

        let mut attributes = Vec::with_capacity(6);
        push_attribute(&mut attributes, GEN_AI_OPERATION_NAME, OPERATION_NAME.to_string());
        push_attribute(&mut attributes, GEN_AI_PROVIDER_NAME, upstream.provider.to_string());
        push_attribute(&mut attributes, GEN_AI_REQUEST_MODEL, request.model.clone());
        push_attribute(&mut attributes, SERVER_ADDRESS, upstream.base_url.clone());

        Self {
            span,
            start: Instant::now(),
            attributes,
        }
    }

    /// Close the turn with its outcome. Consumes the recorder, so a turn can
    /// only ever be finished once.
    pub(crate) fn finish(self, result: &Result<ChatCompletion, ResponseError>) {
        match result {
            Ok(completion) => self.succeed(completion),
            Err(error) => self.fail(error),
        }
    }

    /// Close the turn with a (possibly reconstructed) completion.
    pub(crate) fn succeed(self, completion: &ChatCompletion) {
        self.finish_inner(Ok(completion));
    }

    /// Close the turn in error state.
    pub(crate) fn fail(self, error: &ResponseError) {
        self.finish_inner(Err(error));
    }

    fn finish_inner(mut self, result: Result<&ChatCompletion, &ResponseError>) {
        match result {
            Ok(completion) => {
                if let Some(id) = &completion.id {
                    self.span.add_property(|| (GEN_AI_RESPONSE_ID, id.clone()));
                }

                self.span.add_property(|| (GEN_AI_RESPONSE_MODEL, completion.model.clone()));
                push_attribute(&mut self.attributes, GEN_AI_RESPONSE_MODEL, completion.model.clone());

                let finish_reasons = completion
                    .choices
                    .iter()
                    .filter_map(|choice| choice.finish_reason)
                    .map(finish_reason_str)
                    .join(",");

                if !finish_reasons.is_empty() {
                    self.span
                        .add_property(|| (GEN_AI_RESPONSE_FINISH_REASONS, finish_reasons));
                }

                if let Some(usage) = completion.usage {
                    self.span
                        .add_property(|| (GEN_AI_USAGE_INPUT_TOKENS, usage.prompt_tokens.to_string()));
                    self.span
                        .add_property(|| (GEN_AI_USAGE_OUTPUT_TOKENS, usage.completion_tokens.to_string()));

                    record_tokens(&self.attributes, "input", usage.prompt_tokens as u64);
                    record_tokens(&self.attributes, "output", usage.completion_tokens as u64);
                }
            }
            Err(error) => {
                self.span.add_properties(|| {
                    [
                        ("error", "true".to_string()),
                        ("error.type", error.error_type().to_string()),
                    ]
                });
                push_attribute(&mut self.attributes, "error.type", error.error_type().to_string());
            }
        }

        telemetry::metrics::meter()
            .f64_histogram(GEN_AI_CLIENT_OPERATION_DURATION)
            .with_unit("s")
            .build()
            .record(self.start.elapsed().as_secs_f64(), &self.attributes);
    }
}

fn record_tokens(attributes: &[KeyValue], token_type: &'static str, count: u64) {
    if count == 0 {
        return;
    }

    let mut attributes = attributes.to_vec();
    push_attribute(&mut attributes, GEN_AI_TOKEN_TYPE, token_type.to_string());

    telemetry::metrics::meter()
        .u64_histogram(GEN_AI_CLIENT_TOKEN_USAGE)
        .build()
        .record(count, &attributes);
}

fn push_attribute<K, V>(attributes: &mut Vec<KeyValue>, key: K, value: V)
where
    K: Into<Key>,
    V: Into<Value>,
{
    attributes.push(KeyValue::new(key, value));
}

fn finish_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::ToolCalls => "tool_calls",
    }
}
