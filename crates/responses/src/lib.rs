//! The orchestration core: the OpenAI-compatible `/v1/responses` and
//! `/v1/chat/completions` surfaces in front of arbitrary upstream providers,
//! with server-side tool execution and response persistence.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Sse, sse::Event},
    routing::{get, post},
};
use axum_serde::Sonic;
use futures::StreamExt;
use vector_search::VectorStoreService;

pub mod api;
pub mod chat;
mod convert;
mod error;
mod orchestrator;
mod request;
mod store;
mod telemetry;
mod tools;
mod upstream;

pub use error::{ResponseError, ResponseResult as Result};
pub use orchestrator::{ChatBackend, Orchestrator};
pub use request::{RequestContext, extract_context};
pub use store::{CompletionStore, DiskResponseStore, InMemoryCompletionStore, InMemoryResponseStore, ResponseStore};
pub use tools::{McpExecutor, McpToolSchema, ToolService};
pub use upstream::{Upstream, UpstreamClient, resolve_upstream};

use api::request::{CompletionsRequest, ResponseRequest};
use error::ResponseResult;

/// Build the orchestrator from configuration.
pub fn build_orchestrator(
    config: &config::Config,
    vector_search: Arc<VectorStoreService>,
    mcp: Option<Arc<dyn McpExecutor>>,
) -> ResponseResult<Arc<Orchestrator>> {
    let backend = Arc::new(UpstreamClient::new(&config.llm)?);
    let tool_service = Arc::new(ToolService::new(vector_search, &config.llm, mcp));

    let response_store: Arc<dyn ResponseStore> = match config.responses.store.backend {
        config::StoreBackend::Memory => Arc::new(InMemoryResponseStore::new(config.responses.store.cache_size)),
        config::StoreBackend::Disk => Arc::new(DiskResponseStore::new(&config.storage)),
    };

    let completion_store: Arc<dyn CompletionStore> =
        Arc::new(InMemoryCompletionStore::new(config.responses.store.cache_size));

    Ok(Arc::new(Orchestrator::new(
        backend,
        tool_service,
        response_store,
        completion_store,
        config.llm.clone(),
        config.responses.clone(),
    )))
}

/// Creates an axum router for the response and completion endpoints.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/v1/responses", post(create_response))
        .route("/v1/responses/{response_id}", get(get_response).delete(delete_response))
        .route("/v1/responses/{response_id}/input_items", get(list_input_items))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(orchestrator)
}

/// Handle response creation.
///
/// When `stream: true` is set in the request, the canonical event sequence is
/// sent as Server-Sent Events. Otherwise the terminal response is returned as
/// JSON.
async fn create_response(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    Sonic(request): Sonic<ResponseRequest>,
) -> Result<axum::response::Response> {
    log::debug!("Response creation requested for model: {}", request.model);

    let context = request::extract_context(&headers, None);

    if request.stream.unwrap_or(false) {
        let stream = orchestrator.create_response_stream(request, &context).await?;

        let event_stream = stream.map(|sequenced| {
            let event_type = sequenced.event.event_type();
            let json = sonic_rs::to_string(&sequenced.payload()).unwrap_or_else(|e| {
                log::error!("Failed to serialize stream event: {e}");
                r#"{"type":"response.error","code":"server_error","message":"serialization failed"}"#.to_string()
            });

            Ok::<_, Infallible>(Event::default().event(event_type).data(json))
        });

        log::debug!("Returning streaming response");
        Ok(Sse::new(event_stream).into_response())
    } else {
        let response = orchestrator.create_response(request, &context).await?;

        log::debug!(
            "Response '{}' finished with status {:?}",
            response.id,
            response.status
        );

        Ok(Json(response).into_response())
    }
}

async fn get_response(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(response_id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(orchestrator.get_response(&response_id).await?))
}

async fn delete_response(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(response_id): Path<String>,
) -> Result<impl IntoResponse> {
    orchestrator.delete_response(&response_id).await?;

    Ok(Json(serde_json::json!({
        "id": response_id,
        "object": "response.deleted",
        "deleted": true,
    })))
}

async fn list_input_items(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(response_id): Path<String>,
) -> Result<impl IntoResponse> {
    let data = orchestrator.get_input_items(&response_id).await?;

    Ok(Json(serde_json::json!({
        "object": "list",
        "data": data,
    })))
}

/// Handle chat completion requests.
///
/// This endpoint supports both streaming and non-streaming responses. When
/// `stream: true` is set in the request, chunks are sent as Server-Sent
/// Events terminated by `[DONE]`. Otherwise a standard JSON response is
/// returned.
async fn chat_completions(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    Sonic(request): Sonic<CompletionsRequest>,
) -> Result<axum::response::Response> {
    log::debug!("Chat completions handler called for model: {}", request.model);
    log::debug!("Request has {} messages", request.messages.len());

    let context = request::extract_context(&headers, None);

    if request.stream.unwrap_or(false) {
        let stream = orchestrator.chat_completion_stream(request, &context).await?;

        let event_stream = stream.map(|result| {
            let event = match result {
                Ok(chunk) => {
                    let json = sonic_rs::to_string(&chunk).unwrap_or_else(|e| {
                        log::error!("Failed to serialize chunk: {e}");
                        r#"{"error":"serialization failed"}"#.to_string()
                    });

                    Event::default().data(json)
                }
                Err(e) => {
                    log::error!("Stream error: {e}");
                    Event::default().data(format!(r#"{{"error":"{e}"}}"#))
                }
            };

            Ok::<_, Infallible>(event)
        });

        let with_done = event_stream.chain(futures::stream::once(async {
            Ok::<_, Infallible>(Event::default().data("[DONE]"))
        }));

        log::debug!("Returning streaming completion");
        Ok(Sse::new(with_done).into_response())
    } else {
        let completion = orchestrator.chat_completion(request, &context).await?;

        log::debug!(
            "Chat completion successful, returning response with {} choices",
            completion.choices.len()
        );

        Ok(Json(completion).into_response())
    }
}
