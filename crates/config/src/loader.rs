use std::{path::Path, time::Duration};

use anyhow::{Context, bail};

use crate::Config;

/// Environment variable overriding the default upstream base URL.
const ENV_MODEL_BASE_URL: &str = "MODEL_BASE_URL";
/// Environment variable overriding the buffered tool-call limit.
const ENV_MAX_TOOL_CALLS: &str = "OPEN_RESPONSES_MAX_TOOL_CALLS";
/// Environment variable overriding the streaming deadline, in milliseconds.
const ENV_MAX_STREAMING_TIMEOUT: &str = "OPEN_RESPONSES_MAX_STREAMING_TIMEOUT";

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;

    let mut config: Config = toml::from_str(&content)?;

    apply_env_overrides(&mut config)?;
    validate(&config)?;

    Ok(config)
}

/// Environment variables take precedence over the file. They are read once
/// here; nothing re-reads them at runtime.
pub(crate) fn apply_env_overrides(config: &mut Config) -> anyhow::Result<()> {
    if let Ok(base_url) = std::env::var(ENV_MODEL_BASE_URL)
        && !base_url.is_empty()
    {
        log::debug!("Overriding default base URL from {ENV_MODEL_BASE_URL}");
        config.llm.default_base_url = Some(base_url);
    }

    if let Ok(value) = std::env::var(ENV_MAX_TOOL_CALLS) {
        let limit: usize = value
            .parse()
            .with_context(|| format!("{ENV_MAX_TOOL_CALLS} must be a positive integer, got '{value}'"))?;

        config.responses.max_tool_calls = limit;
        config.responses.max_streaming_tool_calls = limit;
    }

    if let Ok(value) = std::env::var(ENV_MAX_STREAMING_TIMEOUT) {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("{ENV_MAX_STREAMING_TIMEOUT} must be milliseconds, got '{value}'"))?;

        config.responses.max_streaming_timeout = Duration::from_millis(millis);
    }

    Ok(())
}

fn validate(config: &Config) -> anyhow::Result<()> {
    if config.responses.max_tool_calls == 0 {
        bail!("responses.max_tool_calls must be at least 1");
    }

    if config.vector_store.chunk_overlap >= config.vector_store.chunk_size {
        bail!(
            "vector_store.chunk_overlap ({}) must be smaller than vector_store.chunk_size ({})",
            config.vector_store.chunk_overlap,
            config.vector_store.chunk_size
        );
    }

    if config.vector_store.vector_dimension == 0 {
        bail!("vector_store.vector_dimension must be at least 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use indoc::indoc;

    use crate::Config;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), content).unwrap();
        file
    }

    #[test]
    fn env_overrides_limits() {
        let file = write_config(indoc! {r#"
            [responses]
            max_tool_calls = 10
        "#});

        let config = temp_env::with_vars(
            [
                ("OPEN_RESPONSES_MAX_TOOL_CALLS", Some("2")),
                ("OPEN_RESPONSES_MAX_STREAMING_TIMEOUT", Some("1000")),
            ],
            || Config::load(file.path()).unwrap(),
        );

        assert_eq!(config.responses.max_tool_calls, 2);
        assert_eq!(config.responses.max_streaming_tool_calls, 2);
        assert_eq!(config.responses.max_streaming_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn env_base_url_override() {
        let file = write_config("");

        let config = temp_env::with_var("MODEL_BASE_URL", Some("http://proxy:9000/v1"), || {
            Config::load(file.path()).unwrap()
        });

        assert_eq!(config.llm.default_base_url.as_deref(), Some("http://proxy:9000/v1"));
    }

    #[test]
    fn invalid_env_value_is_an_error() {
        let file = write_config("");

        let result = temp_env::with_var("OPEN_RESPONSES_MAX_TOOL_CALLS", Some("lots"), || {
            Config::load(file.path())
        });

        assert!(result.is_err());
    }

    #[test]
    fn rejects_overlap_larger_than_chunk() {
        let file = write_config(indoc! {r#"
            [vector_store]
            chunk_size = 100
            chunk_overlap = 100
        "#});

        let error = Config::load(file.path()).unwrap_err().to_string();

        assert!(error.contains("chunk_overlap"));
    }
}
