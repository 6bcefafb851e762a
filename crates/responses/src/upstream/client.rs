//! OpenAI-compatible chat completions client shared by every upstream.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};

use crate::chat::{ChatCompletion, ChatCompletionChunk, ChatCompletionRequest};
use crate::error::{ResponseError, ResponseResult};

use super::Upstream;

/// Stream of parsed provider chunks.
pub type ChatChunkStream = BoxStream<'static, ResponseResult<ChatCompletionChunk>>;

/// HTTP client for OpenAI-compatible chat completion endpoints.
///
/// One instance serves every upstream; routing only changes the base URL and
/// credential per call.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    pub fn new(config: &config::LlmConfig) -> ResponseResult<Self> {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::CONNECTION, http::HeaderValue::from_static("keep-alive"));

        // Hyper's pool keeps connections alive without a TTL; a short idle
        // timeout is what actually picks up upstream DNS changes.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .pool_idle_timeout(Some(Duration::from_secs(5)))
            .tcp_nodelay(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .default_headers(headers)
            .build()
            .map_err(|e| ResponseError::InternalError(Some(format!("Failed to build HTTP client: {e}"))))?;

        Ok(Self { client })
    }

    /// Send a buffered chat completion request.
    pub async fn chat_completion(
        &self,
        upstream: &Upstream,
        request: &ChatCompletionRequest,
        credential: Option<&SecretString>,
    ) -> ResponseResult<ChatCompletion> {
        let url = format!("{}/chat/completions", upstream.base_url);

        let body = sonic_rs::to_vec(request)
            .map_err(|e| ResponseError::InvalidRequest(format!("Failed to serialize request: {e}")))?;

        let mut request_builder = self.client.post(&url).header("Content-Type", "application/json");

        if let Some(credential) = credential {
            request_builder = request_builder.header(AUTHORIZATION, format!("Bearer {}", credential.expose_secret()));
        }

        let response = request_builder
            .body(body)
            .send()
            .await
            .map_err(|e| ResponseError::ConnectionError(format!("Failed to send request to {}: {e}", upstream.base_url)))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Upstream API error ({status}): {error_text}");

            return Err(map_status_error(status.as_u16(), error_text));
        }

        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read upstream response body: {e}");
            ResponseError::InternalError(None)
        })?;

        let mut completion: ChatCompletion = sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse upstream chat completion response: {e}");
            log::debug!("Response parsing failed, length: {} bytes", response_text.len());

            ResponseError::InternalError(None)
        })?;

        if completion.id.is_none() {
            completion.id = Some(format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()));
        }

        Ok(completion)
    }

    /// Open a streaming chat completion call.
    pub async fn chat_completion_stream(
        &self,
        upstream: &Upstream,
        request: &ChatCompletionRequest,
        credential: Option<&SecretString>,
    ) -> ResponseResult<ChatChunkStream> {
        let url = format!("{}/chat/completions", upstream.base_url);

        let body = sonic_rs::to_vec(request)
            .map_err(|e| ResponseError::InvalidRequest(format!("Failed to serialize request: {e}")))?;

        let mut request_builder = self.client.post(&url).header("Content-Type", "application/json");

        if let Some(credential) = credential {
            request_builder = request_builder.header(AUTHORIZATION, format!("Bearer {}", credential.expose_secret()));
        }

        let response = request_builder.body(body).send().await.map_err(|e| {
            ResponseError::ConnectionError(format!(
                "Failed to send streaming request to {}: {e}",
                upstream.base_url
            ))
        })?;

        let status = response.status();

        // Check for HTTP errors before attempting to stream
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Upstream streaming API error ({status}): {error_text}");

            return Err(map_status_error(status.as_u16(), error_text));
        }

        let event_stream = response.bytes_stream().eventsource();

        let chunk_stream = event_stream.filter_map(|event| async move {
            let Ok(event) = event else {
                log::warn!("SSE parsing error in upstream stream");
                return None;
            };

            if event.data == "[DONE]" {
                return None;
            }

            let Ok(chunk) = sonic_rs::from_str::<ChatCompletionChunk>(&event.data) else {
                log::warn!("Failed to parse upstream streaming chunk");
                return None;
            };

            Some(Ok(chunk))
        });

        Ok(Box::pin(chunk_stream))
    }
}

fn map_status_error(status: u16, message: String) -> ResponseError {
    match status {
        400 => ResponseError::InvalidRequest(message),
        401 => ResponseError::AuthenticationFailed(message),
        404 => ResponseError::NotFound(message),
        429 => ResponseError::RateLimitExceeded { message },
        500 => ResponseError::InternalError(Some(message)),
        _ => ResponseError::ProviderApiError { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_mapping() {
        assert!(matches!(
            map_status_error(401, "no key".into()),
            ResponseError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            map_status_error(429, "slow down".into()),
            ResponseError::RateLimitExceeded { .. }
        ));
        assert!(matches!(
            map_status_error(503, "overloaded".into()),
            ResponseError::ProviderApiError { status: 503, .. }
        ));
    }
}
