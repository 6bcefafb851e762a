//! Conversion from canonical input items to provider chat messages.

use crate::api::items::{InputContent, InputItem, MessageContent, Role};
use crate::chat::{
    ChatContent, ChatContentPart, ChatFunctionCall, ChatMessage, ChatRole, ChatToolCall, FilePart, ImageUrl,
};

/// Translate the input item log into the provider `messages` array.
///
/// Consecutive `FunctionCall` items collapse into a single assistant message
/// with multiple `tool_calls`, matching what providers emitted them as.
/// Reasoning summaries never travel back upstream.
pub fn messages_from_input(instructions: Option<&str>, items: &[InputItem]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(items.len() + 1);

    if let Some(instructions) = instructions {
        messages.push(ChatMessage::text(ChatRole::System, instructions));
    }

    let mut pending_calls: Vec<ChatToolCall> = Vec::new();

    for item in items {
        if !matches!(item, InputItem::FunctionCall { .. }) {
            flush_tool_calls(&mut messages, &mut pending_calls);
        }

        match item {
            InputItem::Message { role, content } => {
                messages.push(ChatMessage {
                    role: chat_role(*role),
                    content: Some(chat_content(content)),
                    tool_calls: None,
                    tool_call_id: None,
                    annotations: None,
                });
            }
            InputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                pending_calls.push(ChatToolCall {
                    id: call_id.clone(),
                    r#type: "function".to_string(),
                    function: ChatFunctionCall {
                        name: name.clone(),
                        arguments: arguments.clone(),
                    },
                });
            }
            InputItem::FunctionCallOutput { call_id, output } => {
                messages.push(ChatMessage::tool_output(call_id.clone(), output.clone()));
            }
            InputItem::Reasoning { .. } => {}
        }
    }

    flush_tool_calls(&mut messages, &mut pending_calls);

    messages
}

fn flush_tool_calls(messages: &mut Vec<ChatMessage>, pending: &mut Vec<ChatToolCall>) {
    if pending.is_empty() {
        return;
    }

    messages.push(ChatMessage {
        role: ChatRole::Assistant,
        content: None,
        tool_calls: Some(std::mem::take(pending)),
        tool_call_id: None,
        annotations: None,
    });
}

fn chat_role(role: Role) -> ChatRole {
    match role {
        Role::System | Role::Developer => ChatRole::System,
        Role::User => ChatRole::User,
        Role::Assistant => ChatRole::Assistant,
    }
}

fn chat_content(content: &MessageContent) -> ChatContent {
    match content {
        MessageContent::Text(text) => ChatContent::Text(text.clone()),
        MessageContent::Parts(parts) => ChatContent::Parts(parts.iter().map(chat_content_part).collect()),
    }
}

fn chat_content_part(part: &InputContent) -> ChatContentPart {
    match part {
        InputContent::InputText { text } => ChatContentPart::Text { text: text.clone() },
        InputContent::InputImage { image_url, detail } => ChatContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image_url.clone(),
                detail: detail.clone(),
            },
        },
        InputContent::InputFile {
            file_id,
            file_data,
            filename,
        } => ChatContentPart::File {
            file: FilePart {
                file_data: file_data.clone(),
                file_id: file_id.clone(),
                filename: filename.clone(),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_become_leading_system_message() {
        let items = vec![InputItem::message(Role::User, "hi")];
        let messages = messages_from_input(Some("be terse"), &items);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1].role, ChatRole::User);
    }

    #[test]
    fn developer_maps_to_system() {
        let items = vec![InputItem::message(Role::Developer, "context")];
        let messages = messages_from_input(None, &items);

        assert_eq!(messages[0].role, ChatRole::System);
    }

    #[test]
    fn consecutive_calls_collapse_into_one_assistant_message() {
        let items = vec![
            InputItem::message(Role::User, "do both"),
            InputItem::FunctionCall {
                call_id: "call_1".into(),
                name: "file_search".into(),
                arguments: "{}".into(),
            },
            InputItem::FunctionCall {
                call_id: "call_2".into(),
                name: "agentic_search".into(),
                arguments: "{}".into(),
            },
            InputItem::FunctionCallOutput {
                call_id: "call_1".into(),
                output: "{}".into(),
            },
            InputItem::FunctionCallOutput {
                call_id: "call_2".into(),
                output: "{}".into(),
            },
        ];

        let messages = messages_from_input(None, &items);

        assert_eq!(messages.len(), 4);
        let calls = messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_2"));
    }

    #[test]
    fn image_parts_retain_detail() {
        let items = vec![InputItem::Message {
            role: Role::User,
            content: MessageContent::Parts(vec![InputContent::InputImage {
                image_url: "https://example.com/a.png".into(),
                detail: Some("low".into()),
            }]),
        }];

        let messages = messages_from_input(None, &items);

        let ChatContent::Parts(parts) = messages[0].content.as_ref().unwrap() else {
            panic!("expected parts");
        };
        let ChatContentPart::ImageUrl { image_url } = &parts[0] else {
            panic!("expected image part");
        };
        assert_eq!(image_url.detail.as_deref(), Some("low"));
    }
}
