//! Conversation item types: the model output items and the input log fed back
//! into subsequent turns.

use serde::{Deserialize, Serialize};

/// Message sender role in the conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions that guide model behavior.
    System,
    /// Developer instructions, treated as system-level context.
    Developer,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
}

/// Lifecycle status of an individual item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    Completed,
    Incomplete,
}

/// Inline citation attached to an output text part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    /// Reference into a vector-store file surfaced by a retrieval tool.
    FileCitation {
        file_id: String,
        filename: String,
        index: u32,
    },
    /// Reference to an external URL surfaced by the model.
    UrlCitation {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        start_index: u32,
        end_index: u32,
    },
}

/// One part of an assistant message's content list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Annotated assistant text.
    OutputText {
        text: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
    },
    /// Raw text without annotations.
    Text { text: String },
}

impl ContentPart {
    /// The textual content regardless of variant.
    pub fn text(&self) -> &str {
        match self {
            Self::OutputText { text, .. } | Self::Text { text } => text,
        }
    }
}

/// One element of the model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    /// Assistant message with ordered content parts.
    Message {
        id: String,
        role: Role,
        status: ItemStatus,
        content: Vec<ContentPart>,
    },
    /// Model reasoning summary extracted from `<think>` sections.
    Reasoning { id: String, summary: String },
    /// A tool call requested by the model.
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
        status: ItemStatus,
    },
    /// The output of a resolved tool call.
    FunctionCallOutput { id: String, call_id: String, output: String },
    /// A terminal image generation result.
    ImageGenerationCall {
        id: String,
        status: ItemStatus,
        /// Base64-encoded image payload, present once completed.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
}

impl OutputItem {
    /// The item id.
    pub fn id(&self) -> &str {
        match self {
            Self::Message { id, .. }
            | Self::Reasoning { id, .. }
            | Self::FunctionCall { id, .. }
            | Self::FunctionCallOutput { id, .. }
            | Self::ImageGenerationCall { id, .. } => id,
        }
    }
}

/// One part of a user-supplied message content list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContent {
    /// Plain text.
    InputText { text: String },
    /// Image reference, either a URL or a data URI.
    InputImage {
        image_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// File reference or inline file data.
    InputFile {
        #[serde(skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_data: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

/// Message content: a bare string or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content.
    Text(String),
    /// Typed content parts.
    Parts(Vec<InputContent>),
}

/// One element of the conversation log used as next-turn context.
///
/// Mirrors [`OutputItem`] and additionally carries role-tagged messages and
/// resolved tool outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    /// A role-tagged message.
    Message { role: Role, content: MessageContent },
    /// A tool call recorded from a previous turn.
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// The matching output of a recorded tool call.
    FunctionCallOutput { call_id: String, output: String },
    /// A reasoning summary carried over from a previous turn.
    Reasoning { summary: String },
}

impl InputItem {
    /// Convenience constructor for a plain-text message.
    pub fn message(role: Role, text: impl Into<String>) -> Self {
        Self::Message {
            role,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Whether this item is a function call awaiting or carrying resolution.
    pub fn is_function_call(&self) -> bool {
        matches!(self, Self::FunctionCall { .. })
    }
}

/// Project output items into input form so the next turn sees the full log.
///
/// Messages keep their text, function calls keep call id, name and arguments,
/// resolved outputs keep their payloads. Image generation results are terminal
/// and never re-enter the loop.
pub fn project_into_input(items: &[OutputItem]) -> Vec<InputItem> {
    let mut projected = Vec::with_capacity(items.len());

    for item in items {
        match item {
            OutputItem::Message { content, role, .. } => {
                let text: String = content.iter().map(ContentPart::text).collect();
                projected.push(InputItem::message(*role, text));
            }
            OutputItem::Reasoning { summary, .. } => {
                projected.push(InputItem::Reasoning {
                    summary: summary.clone(),
                });
            }
            OutputItem::FunctionCall {
                call_id, name, arguments, ..
            } => {
                projected.push(InputItem::FunctionCall {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                });
            }
            OutputItem::FunctionCallOutput { call_id, output, .. } => {
                projected.push(InputItem::FunctionCallOutput {
                    call_id: call_id.clone(),
                    output: output.clone(),
                });
            }
            OutputItem::ImageGenerationCall { .. } => {}
        }
    }

    projected
}
