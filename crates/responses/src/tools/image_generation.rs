//! The terminal image generation tool.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ResponseError, ResponseResult};

const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";

/// Client for an OpenAI-compatible `/images/generations` endpoint.
///
/// The tool is terminal: its base64 payload is the final answer of the
/// orchestration, never fed back into the model.
#[derive(Clone)]
pub struct ImageGenerationClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageRow>,
}

#[derive(Debug, Deserialize)]
struct ImageRow {
    b64_json: String,
}

#[derive(Debug, Deserialize)]
struct ImageArguments {
    prompt: String,
    #[serde(default)]
    size: Option<String>,
}

impl ImageGenerationClient {
    pub fn new(config: &config::LlmConfig) -> Self {
        let base_url = config
            .default_base_url
            .clone()
            .or_else(|| config::builtin_base_url("openai").map(str::to_string))
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Generate one image and return its base64 payload.
    pub async fn generate(&self, arguments: &str, credential: Option<&SecretString>) -> ResponseResult<String> {
        let arguments: ImageArguments = serde_json::from_str(arguments)
            .map_err(|e| ResponseError::InvalidRequest(format!("Invalid image_generation arguments: {e}")))?;

        let mut body = json!({
            "model": DEFAULT_IMAGE_MODEL,
            "prompt": arguments.prompt,
        });

        if let Some(size) = arguments.size {
            body["size"] = json!(size);
        }

        let url = format!("{}/images/generations", self.base_url);
        let mut request = self.client.post(&url).json(&body);

        if let Some(credential) = credential {
            request = request.bearer_auth(credential.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ResponseError::ConnectionError(format!("Failed to reach image endpoint: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Image generation error ({status}): {message}");

            return Err(ResponseError::ProviderApiError {
                status: status.as_u16(),
                message,
            });
        }

        let payload: ImagesResponse = response
            .json()
            .await
            .map_err(|e| ResponseError::InternalError(Some(format!("Unparsable image response: {e}"))))?;

        payload
            .data
            .into_iter()
            .next()
            .map(|row| row.b64_json)
            .ok_or_else(|| ResponseError::InternalError(Some("Image response carried no data".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_arguments_are_rejected_before_any_call() {
        let arguments: Result<ImageArguments, _> = serde_json::from_str("{}");

        assert!(arguments.is_err());

        let arguments: ImageArguments = serde_json::from_str(r#"{"prompt":"a fox","size":"512x512"}"#).unwrap();
        assert_eq!(arguments.prompt, "a fox");
        assert_eq!(arguments.size.as_deref(), Some("512x512"));
    }
}
