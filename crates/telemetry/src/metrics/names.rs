//! Standard metric names following OpenTelemetry semantic conventions
//! See: https://opentelemetry.io/docs/specs/semconv/gen-ai/gen-ai-metrics/

/// HTTP server request duration in seconds
/// Note: Histograms automatically provide count and sum, so a separate counter is not needed
pub const HTTP_SERVER_REQUEST_DURATION: &str = "http.server.request.duration";

/// LLM operation duration in seconds
/// Tracks the total duration of chat orchestration turns
/// Follows OpenTelemetry GenAI semantic conventions
pub const GEN_AI_CLIENT_OPERATION_DURATION: &str = "gen_ai.client.operation.duration";

/// LLM token usage distribution, keyed by `gen_ai.token.type`
pub const GEN_AI_CLIENT_TOKEN_USAGE: &str = "gen_ai.client.token.usage";

/// Server-side tool execution duration in seconds
pub const GEN_AI_TOOL_CALL_DURATION: &str = "gen_ai.tool.call.duration";

/// Vector store search duration in seconds
pub const VECTOR_STORE_SEARCH_DURATION: &str = "vector_store.search.duration";

/// Vector store file indexing duration in seconds
pub const VECTOR_STORE_INDEX_DURATION: &str = "vector_store.index.duration";
