//! Server-side tool registry, classification and execution.

mod handler;
mod image_generation;
mod mcp;
mod service;

pub use handler::{CompletionOutcome, ToolEvents, ToolHandler, ToolOutcome};
pub use image_generation::ImageGenerationClient;
pub use mcp::{McpExecutor, McpToolSchema};
pub use service::{FileSearchHit, FileSearchResponse, ToolService};
