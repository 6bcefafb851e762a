//! GenAI telemetry attributes following OpenTelemetry semantic conventions.
//! Each constant maps to the attribute key emitted by Switchboard telemetry.
//! https://opentelemetry.io/docs/specs/semconv/registry/attributes/gen-ai/

/// Name of the GenAI operation being performed.
/// Known values: `chat`, `embeddings`, `execute_tool`.
pub const GEN_AI_OPERATION_NAME: &str = "gen_ai.operation.name";

/// Provider name identified by the instrumentation; acts as a discriminator
/// for provider-specific telemetry.
pub const GEN_AI_PROVIDER_NAME: &str = "gen_ai.provider.name";

/// Requested output modality for the response content.
/// Known values: `image`, `json`, `text`.
pub const GEN_AI_OUTPUT_TYPE: &str = "gen_ai.output.type";

/// Maximum number of tokens the model should generate for the request.
pub const GEN_AI_REQUEST_MAX_TOKENS: &str = "gen_ai.request.max_tokens";

/// Name of the model that the request targets.
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";

/// Temperature sampling setting applied to the request.
pub const GEN_AI_REQUEST_TEMPERATURE: &str = "gen_ai.request.temperature";

/// Top-p (nucleus) sampling setting applied to the request.
pub const GEN_AI_REQUEST_TOP_P: &str = "gen_ai.request.top_p";

/// Array of reasons describing why the model stopped generating tokens;
/// aligns with the returned choices.
pub const GEN_AI_RESPONSE_FINISH_REASONS: &str = "gen_ai.response.finish_reasons";

/// Unique identifier for the completion returned by the provider.
pub const GEN_AI_RESPONSE_ID: &str = "gen_ai.response.id";

/// Name of the model that generated the response.
pub const GEN_AI_RESPONSE_MODEL: &str = "gen_ai.response.model";

/// Type of token being counted by a usage metric.
/// Known values: `input`, `output`.
pub const GEN_AI_TOKEN_TYPE: &str = "gen_ai.token.type";

/// Identifier of a tool call issued by the agent or model.
pub const GEN_AI_TOOL_CALL_ID: &str = "gen_ai.tool.call.id";

/// Human-readable description of the tool invoked by the agent.
pub const GEN_AI_TOOL_DESCRIPTION: &str = "gen_ai.tool.description";

/// Name of the tool utilized by the agent.
pub const GEN_AI_TOOL_NAME: &str = "gen_ai.tool.name";

/// Number of tokens consumed in the GenAI input (prompt).
pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";

/// Number of tokens produced in the GenAI output (completion).
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";

/// Address of the upstream server servicing the request.
pub const SERVER_ADDRESS: &str = "server.address";

/// Identifier of the vector store a search operation runs against.
pub const VECTOR_STORE_ID: &str = "vector_store.id";

/// Span event name for user messages mirrored onto the chat span.
pub const EVENT_GEN_AI_USER_MESSAGE: &str = "gen_ai.user.message";

/// Span event name for system messages mirrored onto the chat span.
pub const EVENT_GEN_AI_SYSTEM_MESSAGE: &str = "gen_ai.system.message";

/// Span event name for assistant messages mirrored onto the chat span.
pub const EVENT_GEN_AI_ASSISTANT_MESSAGE: &str = "gen_ai.assistant.message";

/// Span event name for tool result messages mirrored onto the chat span.
pub const EVENT_GEN_AI_TOOL_MESSAGE: &str = "gen_ai.tool.message";
