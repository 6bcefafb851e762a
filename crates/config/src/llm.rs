//! Upstream model routing configuration.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Deserializer};

/// Upstream routing configuration for the `/v1/responses` and
/// `/v1/chat/completions` surfaces.
///
/// The gateway does not enumerate providers; any OpenAI-compatible endpoint is
/// reachable through the `provider@model` / `url@model` grammar. This section
/// only carries the default base URL and optional per-provider overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Base URL used when the model id carries no prefix and no
    /// `x-model-provider` header is present. `MODEL_BASE_URL` overrides this.
    pub default_base_url: Option<String>,
    /// Connect timeout for upstream calls, in seconds.
    #[serde(deserialize_with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Read timeout for upstream calls, in seconds.
    #[serde(deserialize_with = "duration_secs")]
    pub read_timeout: Duration,
    /// Base-URL overrides for the built-in provider tags.
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_base_url: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            providers: BTreeMap::new(),
        }
    }
}

/// Per-provider settings keyed by the provider tag of the model id grammar.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Base URL overriding the built-in table for this tag.
    pub base_url: String,
}

impl LlmConfig {
    /// Resolve the base URL for a provider tag: configured override first,
    /// then the built-in table.
    pub fn provider_base_url(&self, tag: &str) -> Option<&str> {
        if let Some(provider) = self.providers.get(tag) {
            return Some(provider.base_url.as_str());
        }

        builtin_base_url(tag)
    }
}

/// Built-in provider tag table. Tags are matched case-insensitively by the
/// caller; aliases map to the same endpoint.
pub fn builtin_base_url(tag: &str) -> Option<&'static str> {
    let base_url = match tag {
        "openai" => "https://api.openai.com/v1",
        "claude" | "anthropic" => "https://api.anthropic.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "togetherai" => "https://api.together.xyz/v1",
        "gemini" | "google" => "https://generativelanguage.googleapis.com/v1beta/openai",
        "deepseek" => "https://api.deepseek.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "xai" => "https://api.x.ai/v1",
        _ => return None,
    };

    Some(base_url)
}

pub(crate) fn duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

pub(crate) fn duration_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_covers_known_tags() {
        assert_eq!(builtin_base_url("openai"), Some("https://api.openai.com/v1"));
        assert_eq!(builtin_base_url("claude"), builtin_base_url("anthropic"));
        assert_eq!(builtin_base_url("gemini"), builtin_base_url("google"));
        assert_eq!(builtin_base_url("mistral"), None);
    }

    #[test]
    fn provider_override_wins_over_builtin() {
        let config: LlmConfig = toml::from_str(
            r#"
            [providers.openai]
            base_url = "http://localhost:8080/v1"
        "#,
        )
        .unwrap();

        assert_eq!(config.provider_base_url("openai"), Some("http://localhost:8080/v1"));
        assert_eq!(config.provider_base_url("groq"), Some("https://api.groq.com/openai/v1"));
    }
}
