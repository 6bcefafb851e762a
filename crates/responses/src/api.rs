//! Client-facing canonical types for the `/v1/responses` surface.
//!
//! The canonical `Response` envelope and its item enums are the gateway's
//! native output shape. The provider-facing chat completion types never leak
//! through this module.

pub mod events;
pub mod items;
pub mod request;
pub mod response;

pub use events::{SequencedEvent, StreamEvent, ToolCallPhase, ToolEventKind};
pub use items::{Annotation, ContentPart, InputContent, InputItem, ItemStatus, MessageContent, OutputItem, Role};
pub use request::{
    ChatToolDeclaration, CompletionsRequest, RankingOptions, ResponseInput, ResponseParams, ResponseRequest,
    ToolChoice, ToolDefinition,
};
pub use response::{
    IncompleteDetails, IncompleteReason, Response, ResponseFailure, ResponseStatus, ResponseUsage,
    new_response_id,
};
