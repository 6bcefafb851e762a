//! The canonical `Response` envelope.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::items::OutputItem;
use super::request::{ToolChoice, ToolDefinition};

/// Terminal and intermediate status of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Incomplete,
    Failed,
}

/// Why a response ended incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteReason {
    MaxOutputTokens,
    ContentFilter,
}

/// Incomplete-status details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteDetails {
    pub reason: IncompleteReason,
}

/// Error object attached to failed responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFailure {
    pub code: String,
    pub message: String,
}

/// Token accounting for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResponseUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Tokens spent on reasoning, 0 when the provider does not report them.
    pub reasoning_tokens: u32,
    pub total_tokens: u32,
}

/// The client-facing response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    /// Always `"response"`.
    pub object: String,
    pub created_at: u64,
    pub model: String,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incomplete_details: Option<IncompleteDetails>,
    pub output: Vec<OutputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponseUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    /// Whether the caller asked for persistence.
    #[serde(default = "default_store")]
    pub store: bool,
}

fn default_store() -> bool {
    true
}

/// Mint a fresh response identifier.
pub fn new_response_id() -> String {
    format!("resp_{}", uuid::Uuid::new_v4().simple())
}

/// Seconds since the Unix epoch.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

impl Response {
    /// A fresh in-progress envelope carrying the request's generation params.
    pub fn in_progress(model: impl Into<String>) -> Self {
        Self {
            id: new_response_id(),
            object: "response".to_string(),
            created_at: unix_timestamp(),
            model: model.into(),
            status: ResponseStatus::InProgress,
            error: None,
            incomplete_details: None,
            output: Vec::new(),
            usage: None,
            instructions: None,
            tools: Vec::new(),
            tool_choice: None,
            temperature: None,
            top_p: None,
            max_output_tokens: None,
            previous_response_id: None,
            metadata: None,
            store: true,
        }
    }

    /// Whether the response reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, ResponseStatus::InProgress)
    }
}
