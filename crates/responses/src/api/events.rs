//! Canonical streaming events for the `/v1/responses` SSE surface.
//!
//! Every emitted payload carries `type` and a monotonically non-decreasing
//! `sequence_number`; terminal events embed the full final response.

use serde_json::{Value, json};

use super::items::OutputItem;
use super::response::Response;

/// Lifecycle phase of a server-side tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallPhase {
    InProgress,
    Executing,
    /// Image generation only.
    Generating,
    Completed,
}

impl ToolCallPhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Executing => "executing",
            Self::Generating => "generating",
            Self::Completed => "completed",
        }
    }
}

/// Which tool a lifecycle event belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEventKind {
    /// A gateway-native tool, addressed by its canonical name.
    Native(String),
    /// A remote MCP tool; events are prefixed `mcp_call.<tool>`.
    Mcp(String),
}

impl ToolEventKind {
    fn prefix(&self) -> String {
        match self {
            Self::Native(name) => name.clone(),
            Self::Mcp(tool) => format!("mcp_call.{tool}"),
        }
    }
}

/// One canonical streaming event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Emitted exactly once, before any upstream call.
    Created { response: Box<Response> },
    /// Emitted at most once, when upstream chunks begin flowing.
    InProgress { response: Box<Response> },
    /// An output item boundary opened.
    OutputItemAdded { output_index: usize, item: OutputItem },
    /// An output item boundary closed.
    OutputItemDone { output_index: usize, item: OutputItem },
    /// Incremental assistant text.
    OutputTextDelta {
        item_id: String,
        output_index: usize,
        delta: String,
    },
    /// Assistant text for one choice is complete.
    OutputTextDone {
        item_id: String,
        output_index: usize,
        text: String,
    },
    /// Incremental tool-call argument assembly. Suppressed for native tools.
    FunctionCallArgumentsDelta {
        item_id: String,
        output_index: usize,
        delta: String,
    },
    /// Tool-call arguments for one call are complete.
    FunctionCallArgumentsDone {
        item_id: String,
        output_index: usize,
        arguments: String,
    },
    /// Per-tool lifecycle progress.
    ToolCall {
        kind: ToolEventKind,
        phase: ToolCallPhase,
        item_id: String,
        output_index: usize,
        error: Option<String>,
    },
    /// Terminal: the response completed.
    Completed { response: Box<Response> },
    /// Terminal: the response ended incomplete.
    Incomplete { response: Box<Response> },
    /// Terminal: the orchestration failed.
    Error { code: String, message: String },
}

impl StreamEvent {
    /// The SSE `event:` name, also mirrored into the payload's `type` field.
    pub fn event_type(&self) -> String {
        match self {
            Self::Created { .. } => "response.created".to_string(),
            Self::InProgress { .. } => "response.in_progress".to_string(),
            Self::OutputItemAdded { .. } => "response.output_item.added".to_string(),
            Self::OutputItemDone { .. } => "response.output_item.done".to_string(),
            Self::OutputTextDelta { .. } => "response.output_text.delta".to_string(),
            Self::OutputTextDone { .. } => "response.output_text.done".to_string(),
            Self::FunctionCallArgumentsDelta { .. } => "response.function_call_arguments.delta".to_string(),
            Self::FunctionCallArgumentsDone { .. } => "response.function_call_arguments.done".to_string(),
            Self::ToolCall { kind, phase, .. } => {
                format!("response.{}.{}", kind.prefix(), phase.as_str())
            }
            Self::Completed { .. } => "response.completed".to_string(),
            Self::Incomplete { .. } => "response.incomplete".to_string(),
            Self::Error { .. } => "response.error".to_string(),
        }
    }

    /// Whether no further events may follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Incomplete { .. } | Self::Error { .. })
    }
}

/// A stream event stamped with its emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedEvent {
    pub sequence_number: u64,
    pub event: StreamEvent,
}

impl SequencedEvent {
    /// The JSON payload serialized into the SSE `data:` line.
    pub fn payload(&self) -> Value {
        let mut payload = match &self.event {
            StreamEvent::Created { response }
            | StreamEvent::InProgress { response }
            | StreamEvent::Completed { response }
            | StreamEvent::Incomplete { response } => {
                json!({ "response": response })
            }
            StreamEvent::OutputItemAdded { output_index, item } | StreamEvent::OutputItemDone { output_index, item } => {
                json!({ "output_index": output_index, "item": item })
            }
            StreamEvent::OutputTextDelta {
                item_id,
                output_index,
                delta,
            } => json!({ "item_id": item_id, "output_index": output_index, "delta": delta }),
            StreamEvent::OutputTextDone {
                item_id,
                output_index,
                text,
            } => json!({ "item_id": item_id, "output_index": output_index, "text": text }),
            StreamEvent::FunctionCallArgumentsDelta {
                item_id,
                output_index,
                delta,
            } => json!({ "item_id": item_id, "output_index": output_index, "delta": delta }),
            StreamEvent::FunctionCallArgumentsDone {
                item_id,
                output_index,
                arguments,
            } => json!({ "item_id": item_id, "output_index": output_index, "arguments": arguments }),
            StreamEvent::ToolCall {
                item_id,
                output_index,
                error,
                ..
            } => {
                let mut value = json!({ "item_id": item_id, "output_index": output_index });
                if let Some(error) = error {
                    value["error"] = json!(error);
                }
                value
            }
            StreamEvent::Error { code, message } => json!({ "code": code, "message": message }),
        };

        payload["type"] = json!(self.event.event_type());
        payload["sequence_number"] = json!(self.sequence_number);
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types() {
        let event = StreamEvent::OutputTextDelta {
            item_id: "msg_1".into(),
            output_index: 0,
            delta: "he".into(),
        };
        assert_eq!(event.event_type(), "response.output_text.delta");

        let event = StreamEvent::ToolCall {
            kind: ToolEventKind::Native("image_generation".into()),
            phase: ToolCallPhase::Generating,
            item_id: "ig_1".into(),
            output_index: 0,
            error: None,
        };
        assert_eq!(event.event_type(), "response.image_generation.generating");

        let event = StreamEvent::ToolCall {
            kind: ToolEventKind::Mcp("list_issues".into()),
            phase: ToolCallPhase::Completed,
            item_id: "fc_1".into(),
            output_index: 1,
            error: None,
        };
        assert_eq!(event.event_type(), "response.mcp_call.list_issues.completed");
    }

    #[test]
    fn delta_payload_shape() {
        let sequenced = SequencedEvent {
            sequence_number: 3,
            event: StreamEvent::OutputTextDelta {
                item_id: "msg_1".into(),
                output_index: 0,
                delta: "pond".into(),
            },
        };

        insta::assert_json_snapshot!(sequenced.payload(), @r#"
        {
          "delta": "pond",
          "item_id": "msg_1",
          "output_index": 0,
          "sequence_number": 3,
          "type": "response.output_text.delta"
        }
        "#);
    }

    #[test]
    fn payload_carries_type_and_sequence() {
        let sequenced = SequencedEvent {
            sequence_number: 7,
            event: StreamEvent::Error {
                code: "timeout".into(),
                message: "deadline exceeded".into(),
            },
        };

        let payload = sequenced.payload();

        assert_eq!(payload["type"], "response.error");
        assert_eq!(payload["sequence_number"], 7);
        assert_eq!(payload["code"], "timeout");
    }

    #[test]
    fn terminal_classification() {
        let response = Box::new(crate::api::response::Response::in_progress("m"));

        assert!(StreamEvent::Completed { response: response.clone() }.is_terminal());
        assert!(
            !StreamEvent::InProgress {
                response: response.clone()
            }
            .is_terminal()
        );
    }
}
