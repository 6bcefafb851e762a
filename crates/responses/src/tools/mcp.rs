//! The opaque seam to remote MCP toolsets.
//!
//! The transport lives outside this crate; the orchestration layer only
//! needs tool discovery and `execute_tool(name, args) -> json`.

use async_trait::async_trait;
use serde_json::Value;

/// Schema of one remotely served tool.
#[derive(Debug, Clone)]
pub struct McpToolSchema {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Option<Value>,
}

/// Executes tools on a remote MCP server.
#[async_trait]
pub trait McpExecutor: Send + Sync {
    /// Tools the executor can currently serve.
    async fn list_tools(&self) -> anyhow::Result<Vec<McpToolSchema>>;

    /// Execute a tool by name with JSON arguments.
    async fn execute_tool(&self, name: &str, arguments: Value) -> anyhow::Result<Value>;
}
