//! Conversion from provider completions to the canonical response envelope.

use std::collections::HashSet;

use crate::api::items::{Annotation, ContentPart, InputItem, ItemStatus, OutputItem, Role};
use crate::api::request::ResponseParams;
use crate::api::response::{
    IncompleteDetails, IncompleteReason, Response, ResponseFailure, ResponseStatus, ResponseUsage, new_response_id,
    unix_timestamp,
};
use crate::chat::{ChatAnnotation, ChatCompletion, FinishReason};
use crate::tools::FileSearchResponse;

/// Context needed to turn a completion into a canonical response.
pub struct BackwardContext<'a> {
    pub params: &'a ResponseParams,
    /// The input log of the turn that produced the completion.
    pub input_items: &'a [InputItem],
    /// Alias-resolved names of the retrieval tools declared on the request.
    pub retrieval_tool_names: &'a HashSet<String>,
}

/// Build a canonical response from a provider completion.
///
/// Reasoning between `<think>` tags becomes a separate item, provider URL
/// citations carry over, and a trailing retrieval tool output contributes
/// file citations onto the last text item.
pub fn response_from_completion(completion: &ChatCompletion, ctx: BackwardContext<'_>) -> Response {
    let mut output = Vec::new();
    let mut status = ResponseStatus::Completed;
    let mut incomplete_details = None;
    let mut error = None;

    let file_citations = trailing_retrieval_citations(ctx.input_items, ctx.retrieval_tool_names);

    for choice in &completion.choices {
        let text = choice.message.content.as_ref().map(|content| content.text());

        if let Some(text) = text {
            let (reasoning, remaining) = split_reasoning(&text);

            if let Some(summary) = reasoning {
                output.push(OutputItem::Reasoning {
                    id: format!("rsn_{}", uuid::Uuid::new_v4().simple()),
                    summary,
                });
            }

            if !remaining.is_empty() {
                let mut annotations = url_annotations(choice.message.annotations.as_deref().unwrap_or_default());
                annotations.extend(file_citations.iter().cloned());

                output.push(OutputItem::Message {
                    id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
                    role: Role::Assistant,
                    status: ItemStatus::Completed,
                    content: vec![ContentPart::OutputText {
                        text: remaining,
                        annotations,
                    }],
                });
            }
        }

        for call in choice.message.tool_calls.as_deref().unwrap_or_default() {
            output.push(OutputItem::FunctionCall {
                id: format!("fc_{}", uuid::Uuid::new_v4().simple()),
                call_id: call.id.clone(),
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
                status: ItemStatus::Completed,
            });
        }

        match choice.finish_reason {
            Some(FinishReason::Length) => {
                status = ResponseStatus::Incomplete;
                incomplete_details = Some(IncompleteDetails {
                    reason: IncompleteReason::MaxOutputTokens,
                });
            }
            Some(FinishReason::ContentFilter) => {
                status = ResponseStatus::Failed;
                incomplete_details = Some(IncompleteDetails {
                    reason: IncompleteReason::ContentFilter,
                });
                error = Some(ResponseFailure {
                    code: "server_error".to_string(),
                    message: "The response was filtered by the provider".to_string(),
                });
            }
            _ => {}
        }
    }

    Response {
        id: new_response_id(),
        object: "response".to_string(),
        created_at: unix_timestamp(),
        model: ctx.params.model.clone(),
        status,
        error,
        incomplete_details,
        output,
        usage: completion.usage.map(|usage| ResponseUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            reasoning_tokens: usage
                .completion_tokens_details
                .map(|details| details.reasoning_tokens)
                .unwrap_or(0),
            total_tokens: usage.total_tokens,
        }),
        instructions: ctx.params.instructions.clone(),
        tools: ctx.params.tools.clone(),
        tool_choice: ctx.params.tool_choice.clone(),
        temperature: ctx.params.temperature,
        top_p: ctx.params.top_p,
        max_output_tokens: ctx.params.max_output_tokens,
        previous_response_id: ctx.params.previous_response_id.clone(),
        metadata: ctx.params.metadata.clone(),
        store: ctx.params.store,
    }
}

/// Split assistant text into `<think>` reasoning and the remaining content.
///
/// Multiple think sections concatenate into one summary. An unterminated tag
/// is left in place untouched.
pub fn split_reasoning(text: &str) -> (Option<String>, String) {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut reasoning = Vec::new();
    let mut remaining = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(OPEN) {
        let Some(end) = rest[start + OPEN.len()..].find(CLOSE) else {
            break;
        };

        remaining.push_str(&rest[..start]);

        let inner = &rest[start + OPEN.len()..start + OPEN.len() + end];
        if !inner.trim().is_empty() {
            reasoning.push(inner.trim().to_string());
        }

        rest = &rest[start + OPEN.len() + end + CLOSE.len()..];
    }

    remaining.push_str(rest);

    let summary = if reasoning.is_empty() {
        None
    } else {
        Some(reasoning.join("\n\n"))
    };

    (summary, remaining.trim().to_string())
}

fn url_annotations(annotations: &[ChatAnnotation]) -> Vec<Annotation> {
    annotations
        .iter()
        .map(|annotation| match annotation {
            ChatAnnotation::UrlCitation { url_citation } => Annotation::UrlCitation {
                url: url_citation.url.clone(),
                title: url_citation.title.clone(),
                start_index: url_citation.start_index,
                end_index: url_citation.end_index,
            },
        })
        .collect()
}

/// File citations contributed by a trailing retrieval tool output.
///
/// When the last input item is the output of a `file_search`/`agentic_search`
/// call, its JSON payload is parsed for hits; a payload that fails to parse
/// is logged and ignored.
fn trailing_retrieval_citations(input_items: &[InputItem], retrieval_tool_names: &HashSet<String>) -> Vec<Annotation> {
    let Some(InputItem::FunctionCallOutput { call_id, output }) = input_items.last() else {
        return Vec::new();
    };

    let is_retrieval = input_items.iter().any(|item| {
        matches!(
            item,
            InputItem::FunctionCall { call_id: c, name, .. }
                if c == call_id && retrieval_tool_names.contains(name.as_str())
        )
    });

    if !is_retrieval {
        return Vec::new();
    }

    let payload: FileSearchResponse = match serde_json::from_str(output) {
        Ok(payload) => payload,
        Err(e) => {
            log::debug!("Ignoring unparsable retrieval payload for call '{call_id}': {e}");
            return Vec::new();
        }
    };

    payload
        .data
        .iter()
        .enumerate()
        .map(|(index, hit)| Annotation::FileCitation {
            file_id: hit.file_id.clone(),
            filename: hit.filename.clone(),
            index: index as u32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatChoice, ChatMessage, ChatRole, ChatUsage, CompletionTokensDetails};

    fn params() -> ResponseParams {
        ResponseParams {
            model: "openai@gpt-4o-mini".into(),
            instructions: None,
            max_output_tokens: None,
            temperature: Some(0.2),
            top_p: None,
            tools: Vec::new(),
            tool_choice: None,
            store: true,
            previous_response_id: None,
            metadata: None,
        }
    }

    fn completion_with(message: ChatMessage, finish_reason: FinishReason) -> ChatCompletion {
        ChatCompletion {
            id: Some("chatcmpl-1".into()),
            model: "gpt-4o-mini".into(),
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason: Some(finish_reason),
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 10,
                completion_tokens: 15,
                total_tokens: 25,
                completion_tokens_details: None,
            }),
            created: 0,
        }
    }

    #[test]
    fn think_tags_become_reasoning_item() {
        let message = ChatMessage::text(ChatRole::Assistant, "<think>count syllables</think>An old pond");
        let completion = completion_with(message, FinishReason::Stop);

        let params = params();
        let names = HashSet::new();
        let response = response_from_completion(
            &completion,
            BackwardContext {
                params: &params,
                input_items: &[],
                retrieval_tool_names: &names,
            },
        );

        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.output.len(), 2);
        assert!(matches!(&response.output[0], OutputItem::Reasoning { summary, .. } if summary == "count syllables"));
        assert!(matches!(
            &response.output[1],
            OutputItem::Message { content, .. }
                if content[0].text() == "An old pond"
        ));
    }

    #[test]
    fn usage_maps_with_default_reasoning_tokens() {
        let message = ChatMessage::text(ChatRole::Assistant, "hi");
        let completion = completion_with(message, FinishReason::Stop);

        let params = params();
        let names = HashSet::new();
        let response = response_from_completion(
            &completion,
            BackwardContext {
                params: &params,
                input_items: &[],
                retrieval_tool_names: &names,
            },
        );

        let usage = response.usage.unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 15);
        assert_eq!(usage.reasoning_tokens, 0);
        assert_eq!(usage.total_tokens, 25);
    }

    #[test]
    fn reasoning_tokens_carry_over_when_reported() {
        let message = ChatMessage::text(ChatRole::Assistant, "hi");
        let mut completion = completion_with(message, FinishReason::Stop);
        completion.usage.as_mut().unwrap().completion_tokens_details =
            Some(CompletionTokensDetails { reasoning_tokens: 5 });

        let params = params();
        let names = HashSet::new();
        let response = response_from_completion(
            &completion,
            BackwardContext {
                params: &params,
                input_items: &[],
                retrieval_tool_names: &names,
            },
        );

        assert_eq!(response.usage.unwrap().reasoning_tokens, 5);
    }

    #[test]
    fn length_maps_to_incomplete() {
        let message = ChatMessage::text(ChatRole::Assistant, "truncat");
        let completion = completion_with(message, FinishReason::Length);

        let params = params();
        let names = HashSet::new();
        let response = response_from_completion(
            &completion,
            BackwardContext {
                params: &params,
                input_items: &[],
                retrieval_tool_names: &names,
            },
        );

        assert_eq!(response.status, ResponseStatus::Incomplete);
        assert_eq!(
            response.incomplete_details.unwrap().reason,
            IncompleteReason::MaxOutputTokens
        );
    }

    #[test]
    fn content_filter_maps_to_failed_with_server_error() {
        let message = ChatMessage::text(ChatRole::Assistant, "");
        let completion = completion_with(message, FinishReason::ContentFilter);

        let params = params();
        let names = HashSet::new();
        let response = response_from_completion(
            &completion,
            BackwardContext {
                params: &params,
                input_items: &[],
                retrieval_tool_names: &names,
            },
        );

        assert_eq!(response.status, ResponseStatus::Failed);
        assert_eq!(response.error.unwrap().code, "server_error");
        assert_eq!(response.incomplete_details.unwrap().reason, IncompleteReason::ContentFilter);
    }

    #[test]
    fn trailing_retrieval_output_attaches_file_citations() {
        let message = ChatMessage::text(ChatRole::Assistant, "Doc X says hello.");
        let completion = completion_with(message, FinishReason::Stop);

        let input_items = vec![
            InputItem::message(Role::User, "summarize doc X"),
            InputItem::FunctionCall {
                call_id: "call_1".into(),
                name: "file_search".into(),
                arguments: r#"{"query":"doc X"}"#.into(),
            },
            InputItem::FunctionCallOutput {
                call_id: "call_1".into(),
                output: r#"{"data":[
                    {"file_id":"file_a","filename":"a.md","score":0.9,"content":["..."]},
                    {"file_id":"file_b","filename":"b.md","score":0.7,"content":["..."]}
                ]}"#
                .into(),
            },
        ];

        let params = params();
        let names: HashSet<String> = ["file_search".to_string()].into();
        let response = response_from_completion(
            &completion,
            BackwardContext {
                params: &params,
                input_items: &input_items,
                retrieval_tool_names: &names,
            },
        );

        let OutputItem::Message { content, .. } = &response.output[0] else {
            panic!("expected message item");
        };
        let ContentPart::OutputText { annotations, .. } = &content[0] else {
            panic!("expected output_text");
        };

        assert_eq!(annotations.len(), 2);
        assert!(matches!(&annotations[0], Annotation::FileCitation { file_id, .. } if file_id == "file_a"));
    }

    #[test]
    fn unparsable_retrieval_payload_is_ignored() {
        let message = ChatMessage::text(ChatRole::Assistant, "hello");
        let completion = completion_with(message, FinishReason::Stop);

        let input_items = vec![
            InputItem::FunctionCall {
                call_id: "call_1".into(),
                name: "file_search".into(),
                arguments: "{}".into(),
            },
            InputItem::FunctionCallOutput {
                call_id: "call_1".into(),
                output: "not json".into(),
            },
        ];

        let params = params();
        let names: HashSet<String> = ["file_search".to_string()].into();
        let response = response_from_completion(
            &completion,
            BackwardContext {
                params: &params,
                input_items: &input_items,
                retrieval_tool_names: &names,
            },
        );

        let OutputItem::Message { content, .. } = &response.output[0] else {
            panic!("expected message item");
        };
        let ContentPart::OutputText { annotations, .. } = &content[0] else {
            panic!("expected output_text");
        };
        assert!(annotations.is_empty());
    }

    #[test]
    fn split_reasoning_handles_plain_text() {
        assert_eq!(split_reasoning("no tags"), (None, "no tags".to_string()));
    }

    #[test]
    fn split_reasoning_joins_multiple_sections() {
        let (summary, rest) = split_reasoning("<think>a</think>mid<think>b</think>end");

        assert_eq!(summary.as_deref(), Some("a\n\nb"));
        assert_eq!(rest, "midend");
    }

    #[test]
    fn split_reasoning_leaves_unterminated_tag() {
        let (summary, rest) = split_reasoning("<think>never closed");

        assert_eq!(summary, None);
        assert_eq!(rest, "<think>never closed");
    }
}
