//! Pure resolution of the upstream endpoint from the model id grammar.

use std::borrow::Cow;

use crate::error::{ResponseError, ResponseResult};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// A resolved upstream target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    /// Base URL of the OpenAI-compatible endpoint, without a trailing slash.
    pub base_url: String,
    /// Model name with any routing prefix stripped.
    pub model: String,
    /// Provider discriminator used in telemetry.
    pub provider: Cow<'static, str>,
}

/// Resolve the upstream for a request.
///
/// Grammar: `model := [prefix "@"] name`. A URL prefix is used verbatim as
/// the base URL; a known tag maps through the provider table. Without a
/// prefix, the `x-model-provider` header picks the provider, then the
/// configured default base URL, then the OpenAI default.
///
/// This function has no side effects; environment fallbacks were folded into
/// the configuration at startup.
pub fn resolve_upstream(
    provider_header: Option<&str>,
    model_field: &str,
    config: &config::LlmConfig,
) -> ResponseResult<Upstream> {
    if let Some((prefix, model)) = model_field.split_once('@') {
        if model.is_empty() {
            return Err(ResponseError::InvalidRequest(format!(
                "Invalid model format: expected '[provider@]model', got '{model_field}'"
            )));
        }

        if prefix.starts_with("http://") || prefix.starts_with("https://") {
            return Ok(Upstream {
                base_url: prefix.trim_end_matches('/').to_string(),
                model: model.to_string(),
                provider: Cow::Borrowed("custom"),
            });
        }

        let tag = prefix.to_ascii_lowercase();
        let Some(base_url) = config.provider_base_url(&tag) else {
            return Err(ResponseError::InvalidRequest(format!(
                "Unknown model provider '{prefix}'"
            )));
        };

        return Ok(Upstream {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            provider: Cow::Owned(tag),
        });
    }

    if let Some(tag) = provider_header {
        let tag = tag.to_ascii_lowercase();
        let Some(base_url) = config.provider_base_url(&tag) else {
            return Err(ResponseError::InvalidRequest(format!(
                "Unknown model provider '{tag}' in x-model-provider header"
            )));
        };

        return Ok(Upstream {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model_field.to_string(),
            provider: Cow::Owned(tag),
        });
    }

    let base_url = config.default_base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);

    Ok(Upstream {
        base_url: base_url.trim_end_matches('/').to_string(),
        model: model_field.to_string(),
        provider: Cow::Borrowed("openai"),
    })
}
