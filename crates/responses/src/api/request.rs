//! The `/v1/responses` request body and tool declarations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::items::InputItem;

/// Free text or an ordered item log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseInput {
    /// A single user message.
    Text(String),
    /// An explicit conversation log.
    Items(Vec<InputItem>),
}

impl Default for ResponseInput {
    fn default() -> Self {
        Self::Items(Vec::new())
    }
}

/// Ranking options for retrieval tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RankingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,
}

/// Tool declaration in a `/v1/responses` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    /// Client-side function the gateway only echoes back.
    Function {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        parameters: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        strict: Option<bool>,
    },
    /// Server-side single-shot retrieval over vector stores.
    FileSearch {
        /// Optional alias so two retrieval tools can coexist in one request.
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        vector_store_ids: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_num_results: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ranking_options: Option<RankingOptions>,
        #[serde(skip_serializing_if = "Option::is_none")]
        filters: Option<vector_search::Filter>,
    },
    /// Server-side iterative retrieval over vector stores.
    AgenticSearch {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        vector_store_ids: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_num_results: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_iterations: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ranking_options: Option<RankingOptions>,
    },
    /// Terminal image generation tool.
    ImageGeneration {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Remote MCP toolset reached through the configured executor.
    Mcp {
        server_label: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        allowed_tools: Option<Vec<String>>,
    },
}

impl ToolDefinition {
    /// The name this tool is addressed by in model tool calls.
    pub fn call_name(&self) -> &str {
        match self {
            Self::Function { name, .. } => name,
            Self::FileSearch { name, .. } => name.as_deref().unwrap_or("file_search"),
            Self::AgenticSearch { name, .. } => name.as_deref().unwrap_or("agentic_search"),
            Self::ImageGeneration { name, .. } => name.as_deref().unwrap_or("image_generation"),
            Self::Mcp { server_label, .. } => server_label,
        }
    }
}

/// Tool choice directive forwarded to the upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// `"auto"`, `"none"` or `"required"`.
    Mode(String),
    /// A specific tool selection object.
    Specific(Value),
}

/// Body of `POST /v1/responses`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseRequest {
    pub model: String,
    #[serde(default)]
    pub input: ResponseInput,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub store: Option<bool>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub previous_response_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
    /// Accepted for API compatibility; truncation is left to the provider.
    #[serde(default)]
    pub truncation: Option<String>,
    /// Accepted for API compatibility.
    #[serde(default)]
    pub text: Option<Value>,
    /// Accepted for API compatibility.
    #[serde(default)]
    pub reasoning: Option<Value>,
}

/// Body of `POST /v1/chat/completions`.
///
/// OpenAI-compatible, with the gateway extension that tools may also be
/// declared in the extended `/v1/responses` shapes (file_search, mcp, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionsRequest {
    pub model: String,
    pub messages: Vec<crate::chat::ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Option<Vec<ChatToolDeclaration>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub store: Option<bool>,
}

/// A tool declaration on the chat surface: the conventional nested function
/// shape, or one of the extended gateway tools.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChatToolDeclaration {
    /// `{type: "function", function: {...}}`
    Chat(crate::chat::ChatTool),
    /// Extended gateway tool (`file_search`, `agentic_search`, ...).
    Extended(ToolDefinition),
}

impl CompletionsRequest {
    /// Normalize the declared tools into the extended definitions.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|declaration| match declaration {
                ChatToolDeclaration::Chat(tool) => ToolDefinition::Function {
                    name: tool.function.name.clone(),
                    description: tool.function.description.clone(),
                    parameters: tool.function.parameters.clone(),
                    strict: tool.function.strict,
                },
                ChatToolDeclaration::Extended(definition) => definition.clone(),
            })
            .collect()
    }
}

/// The request parameters carried across orchestration turns.
///
/// This is everything of [`ResponseRequest`] except the input log and the
/// stream flag, which the turn loop owns.
#[derive(Debug, Clone)]
pub struct ResponseParams {
    pub model: String,
    pub instructions: Option<String>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub store: bool,
    pub previous_response_id: Option<String>,
    pub metadata: Option<BTreeMap<String, String>>,
}

impl ResponseParams {
    /// Extract the turn-stable parameters from a request.
    pub fn from_request(request: &ResponseRequest) -> Self {
        Self {
            model: request.model.clone(),
            instructions: request.instructions.clone(),
            max_output_tokens: request.max_output_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            tools: request.tools().to_vec(),
            tool_choice: request.tool_choice.clone(),
            store: request.wants_store(),
            previous_response_id: request.previous_response_id.clone(),
            metadata: request.metadata.clone(),
        }
    }
}

impl ResponseRequest {
    /// The declared tools, empty when absent.
    pub fn tools(&self) -> &[ToolDefinition] {
        self.tools.as_deref().unwrap_or_default()
    }

    /// Whether the caller asked for persistence. Defaults to true.
    pub fn wants_store(&self) -> bool {
        self.store.unwrap_or(true)
    }

    /// The input normalized into an item log.
    pub fn input_items(&self) -> Vec<InputItem> {
        match &self.input {
            ResponseInput::Text(text) => vec![InputItem::message(super::items::Role::User, text.clone())],
            ResponseInput::Items(items) => items.clone(),
        }
    }
}
