//! The tool registry: declaration-to-implementation resolution and native
//! tool execution.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use vector_search::{SearchRequest, VectorStoreService};

use crate::api::request::{RankingOptions, ToolDefinition};
use crate::chat::{ChatFunctionDefinition, ChatTool};
use crate::error::{ResponseError, ResponseResult};
use crate::request::RequestContext;

use super::image_generation::ImageGenerationClient;
use super::mcp::McpExecutor;

const DEFAULT_SEARCH_RESULTS: usize = 10;
const DEFAULT_AGENTIC_ITERATIONS: usize = 3;

/// Payload every retrieval tool returns to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSearchResponse {
    pub data: Vec<FileSearchHit>,
}

/// One retrieval hit in the tool payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSearchHit {
    pub file_id: String,
    pub filename: String,
    pub score: f32,
    #[serde(default)]
    pub content: Vec<String>,
}

/// What a native execution produced.
pub(crate) enum ToolExecution {
    /// Tool output fed back into the conversation.
    Output(String),
    /// A terminal image payload; the orchestration ends with it.
    TerminalImage(String),
}

#[derive(Debug, Deserialize)]
struct SearchArguments {
    query: String,
    #[serde(default)]
    max_num_results: Option<usize>,
}

/// Resolves tool names to implementations and executes the native ones.
pub struct ToolService {
    vector_search: Arc<VectorStoreService>,
    image: ImageGenerationClient,
    mcp: Option<Arc<dyn McpExecutor>>,
}

impl ToolService {
    pub fn new(
        vector_search: Arc<VectorStoreService>,
        llm_config: &config::LlmConfig,
        mcp: Option<Arc<dyn McpExecutor>>,
    ) -> Self {
        Self {
            vector_search,
            image: ImageGenerationClient::new(llm_config),
            mcp,
        }
    }

    /// Human-readable description of a declared tool, for telemetry.
    pub(crate) fn description(definition: &ToolDefinition) -> Option<&str> {
        match definition {
            ToolDefinition::Function { description, .. } => description.as_deref(),
            ToolDefinition::FileSearch { .. } => {
                Some("Search the attached vector stores for passages relevant to a query.")
            }
            ToolDefinition::AgenticSearch { .. } => {
                Some("Iteratively search the attached vector stores, refining the query until enough relevant passages are found.")
            }
            ToolDefinition::ImageGeneration { .. } => Some("Generate an image from a text prompt."),
            ToolDefinition::Mcp { .. } => None,
        }
    }

    /// Map every declared call name to its definition, so client-declared
    /// aliases resolve to the same underlying implementation.
    pub fn build_alias_map(tools: &[ToolDefinition]) -> HashMap<String, ToolDefinition> {
        tools
            .iter()
            .map(|tool| (tool.call_name().to_string(), tool.clone()))
            .collect()
    }

    /// Call names of the declared retrieval tools, alias-aware.
    pub fn retrieval_tool_names(tools: &[ToolDefinition]) -> HashSet<String> {
        tools
            .iter()
            .filter(|tool| {
                matches!(
                    tool,
                    ToolDefinition::FileSearch { .. } | ToolDefinition::AgenticSearch { .. }
                )
            })
            .map(|tool| tool.call_name().to_string())
            .collect()
    }

    /// Tool names the remote MCP executor currently serves, if any.
    pub async fn mcp_tool_names(&self) -> HashSet<String> {
        let Some(mcp) = &self.mcp else {
            return HashSet::new();
        };

        match mcp.list_tools().await {
            Ok(tools) => tools.into_iter().map(|tool| tool.name).collect(),
            Err(e) => {
                log::warn!("Failed to list MCP tools: {e}");
                HashSet::new()
            }
        }
    }

    /// Function-tool schemas advertised to the upstream model.
    pub async fn advertised_tools(&self, tools: &[ToolDefinition]) -> Vec<ChatTool> {
        let mut advertised = Vec::with_capacity(tools.len());

        for tool in tools {
            match tool {
                ToolDefinition::Function {
                    name,
                    description,
                    parameters,
                    strict,
                } => {
                    advertised.push(function_tool(
                        name.clone(),
                        description.clone(),
                        parameters.clone(),
                        *strict,
                    ));
                }
                ToolDefinition::FileSearch { .. } | ToolDefinition::AgenticSearch { .. } => {
                    advertised.push(function_tool(
                        tool.call_name().to_string(),
                        Self::description(tool).map(str::to_string),
                        Some(search_parameters()),
                        None,
                    ));
                }
                ToolDefinition::ImageGeneration { .. } => {
                    advertised.push(function_tool(
                        tool.call_name().to_string(),
                        Self::description(tool).map(str::to_string),
                        Some(json!({
                            "type": "object",
                            "properties": {
                                "prompt": { "type": "string" },
                                "size": { "type": "string" }
                            },
                            "required": ["prompt"]
                        })),
                        None,
                    ));
                }
                ToolDefinition::Mcp {
                    server_label,
                    allowed_tools,
                } => {
                    let Some(mcp) = &self.mcp else {
                        log::warn!("MCP toolset '{server_label}' declared but no executor is configured");
                        continue;
                    };

                    match mcp.list_tools().await {
                        Ok(schemas) => {
                            for schema in schemas {
                                if allowed_tools
                                    .as_ref()
                                    .is_some_and(|allowed| !allowed.contains(&schema.name))
                                {
                                    continue;
                                }

                                advertised.push(function_tool(
                                    schema.name,
                                    schema.description,
                                    schema.parameters,
                                    None,
                                ));
                            }
                        }
                        Err(e) => log::warn!("Failed to advertise MCP toolset '{server_label}': {e}"),
                    }
                }
            }
        }

        advertised
    }

    /// Execute a native tool call.
    pub(crate) async fn execute(
        &self,
        definition: &ToolDefinition,
        arguments: &str,
        ctx: &RequestContext,
    ) -> ResponseResult<ToolExecution> {
        match definition {
            ToolDefinition::FileSearch {
                vector_store_ids,
                max_num_results,
                ranking_options,
                filters,
                ..
            } => {
                let payload = self
                    .file_search(vector_store_ids, arguments, *max_num_results, ranking_options, filters)
                    .await?;
                Ok(ToolExecution::Output(payload))
            }
            ToolDefinition::AgenticSearch {
                vector_store_ids,
                max_num_results,
                max_iterations,
                ranking_options,
                ..
            } => {
                let payload = self
                    .agentic_search(
                        vector_store_ids,
                        arguments,
                        *max_num_results,
                        *max_iterations,
                        ranking_options,
                    )
                    .await?;
                Ok(ToolExecution::Output(payload))
            }
            ToolDefinition::ImageGeneration { .. } => {
                let b64 = self.image.generate(arguments, ctx.credential.as_ref()).await?;
                Ok(ToolExecution::TerminalImage(b64))
            }
            ToolDefinition::Function { name, .. } => Err(ResponseError::InternalError(Some(format!(
                "Client-side tool '{name}' cannot be executed server-side"
            )))),
            ToolDefinition::Mcp { .. } => {
                // Addressed through execute_mcp with the concrete tool name.
                Err(ResponseError::InternalError(Some(
                    "MCP toolsets are executed per tool name".to_string(),
                )))
            }
        }
    }

    /// Execute a remote MCP tool by its concrete name.
    pub(crate) async fn execute_mcp(&self, name: &str, arguments: &str) -> ResponseResult<ToolExecution> {
        let Some(mcp) = &self.mcp else {
            return Err(ResponseError::InternalError(Some(
                "No MCP executor is configured".to_string(),
            )));
        };

        let arguments: Value = serde_json::from_str(arguments)
            .map_err(|e| ResponseError::InvalidRequest(format!("Invalid MCP tool arguments: {e}")))?;

        let output = mcp
            .execute_tool(name, arguments)
            .await
            .map_err(|e| ResponseError::InternalError(Some(format!("MCP tool '{name}' failed: {e}"))))?;

        let rendered = serde_json::to_string(&output).map_err(|_| ResponseError::InternalError(None))?;
        Ok(ToolExecution::Output(rendered))
    }

    async fn file_search(
        &self,
        vector_store_ids: &[String],
        arguments: &str,
        max_num_results: Option<usize>,
        ranking_options: &Option<RankingOptions>,
        filters: &Option<vector_search::Filter>,
    ) -> ResponseResult<String> {
        let arguments: SearchArguments = serde_json::from_str(arguments)
            .map_err(|e| ResponseError::InvalidRequest(format!("Invalid search arguments: {e}")))?;

        let limit = arguments
            .max_num_results
            .or(max_num_results)
            .unwrap_or(DEFAULT_SEARCH_RESULTS);

        let hits = self
            .search_stores(vector_store_ids, &arguments.query, limit, ranking_options, filters)
            .await?;

        render_payload(hits, limit)
    }

    /// Iterative retrieval: the full query first, then significant terms as
    /// refinement probes until enough distinct chunks were found.
    async fn agentic_search(
        &self,
        vector_store_ids: &[String],
        arguments: &str,
        max_num_results: Option<usize>,
        max_iterations: Option<usize>,
        ranking_options: &Option<RankingOptions>,
    ) -> ResponseResult<String> {
        let arguments: SearchArguments = serde_json::from_str(arguments)
            .map_err(|e| ResponseError::InvalidRequest(format!("Invalid search arguments: {e}")))?;

        let limit = arguments
            .max_num_results
            .or(max_num_results)
            .unwrap_or(DEFAULT_SEARCH_RESULTS);
        let max_iterations = max_iterations.unwrap_or(DEFAULT_AGENTIC_ITERATIONS).max(1);

        let mut queries = vec![arguments.query.clone()];
        queries.extend(refinement_probes(&arguments.query, max_iterations - 1));

        let mut merged: Vec<FileSearchHit> = Vec::new();
        let mut seen = HashSet::new();

        for query in queries.iter().take(max_iterations) {
            let hits = self
                .search_stores(vector_store_ids, query, limit, ranking_options, &None)
                .await?;

            for hit in hits {
                let key = (hit.file_id.clone(), hit.content.first().cloned().unwrap_or_default());
                if seen.insert(key) {
                    merged.push(hit);
                }
            }

            if merged.len() >= limit {
                break;
            }
        }

        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        render_payload(merged, limit)
    }

    async fn search_stores(
        &self,
        vector_store_ids: &[String],
        query: &str,
        limit: usize,
        ranking_options: &Option<RankingOptions>,
        filters: &Option<vector_search::Filter>,
    ) -> ResponseResult<Vec<FileSearchHit>> {
        let mut hits = Vec::new();

        for store_id in vector_store_ids {
            let results = self
                .vector_search
                .search(
                    store_id,
                    SearchRequest {
                        query: query.to_string(),
                        max_num_results: Some(limit),
                        filters: filters.clone(),
                        ranking_options: ranking_options.as_ref().map(|options| vector_search::RankingOptions {
                            ranker: options.ranker.clone(),
                            score_threshold: options.score_threshold,
                        }),
                    },
                )
                .await?;

            hits.extend(results.data.into_iter().map(|hit| FileSearchHit {
                file_id: hit.file_id,
                filename: hit.filename,
                score: hit.score,
                content: hit
                    .content
                    .into_iter()
                    .map(|content| match content {
                        vector_search::SearchContent::Text { text } => text,
                    })
                    .collect(),
            }));
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits)
    }
}

fn render_payload(mut hits: Vec<FileSearchHit>, limit: usize) -> ResponseResult<String> {
    hits.truncate(limit);

    serde_json::to_string(&FileSearchResponse { data: hits }).map_err(|_| ResponseError::InternalError(None))
}

fn function_tool(
    name: String,
    description: Option<String>,
    parameters: Option<Value>,
    strict: Option<bool>,
) -> ChatTool {
    ChatTool {
        r#type: "function".to_string(),
        function: ChatFunctionDefinition {
            name,
            description,
            parameters,
            strict,
        },
    }
}

fn search_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string" },
            "max_num_results": { "type": "integer" }
        },
        "required": ["query"]
    })
}

/// Significant terms of the query used as follow-up probes.
fn refinement_probes(query: &str, count: usize) -> Vec<String> {
    let mut seen = HashSet::new();

    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| term.len() > 3)
        .map(|term| term.to_ascii_lowercase())
        .filter(|term| seen.insert(term.clone()))
        .take(count)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_map_resolves_aliased_retrieval_tools() {
        let tools = vec![
            ToolDefinition::FileSearch {
                name: Some("docs_search".into()),
                vector_store_ids: vec!["vs_1".into()],
                max_num_results: None,
                ranking_options: None,
                filters: None,
            },
            ToolDefinition::FileSearch {
                name: None,
                vector_store_ids: vec!["vs_2".into()],
                max_num_results: None,
                ranking_options: None,
                filters: None,
            },
        ];

        let alias_map = ToolService::build_alias_map(&tools);

        assert!(alias_map.contains_key("docs_search"));
        assert!(alias_map.contains_key("file_search"));

        let names = ToolService::retrieval_tool_names(&tools);
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn refinement_probes_pick_significant_terms() {
        let probes = refinement_probes("the quarterly migration plan for search", 3);

        assert_eq!(probes, vec!["quarterly", "migration", "plan"]);
    }

    #[test]
    fn payload_round_trips_through_serde() {
        let payload = render_payload(
            vec![FileSearchHit {
                file_id: "file_a".into(),
                filename: "a.md".into(),
                score: 0.9,
                content: vec!["passage".into()],
            }],
            10,
        )
        .unwrap();

        let parsed: FileSearchResponse = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].file_id, "file_a");
    }
}
