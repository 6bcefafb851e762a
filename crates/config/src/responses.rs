//! Orchestration limits and response store settings.

use std::time::Duration;

use serde::Deserialize;

use crate::llm::duration_millis;

/// Limits and persistence settings for the `/v1/responses` orchestrator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResponsesConfig {
    /// Maximum cumulative function-call items per buffered orchestration.
    /// `OPEN_RESPONSES_MAX_TOOL_CALLS` overrides this.
    pub max_tool_calls: usize,
    /// Maximum cumulative function-call items per streaming orchestration.
    pub max_streaming_tool_calls: usize,
    /// Global deadline for a streaming response, in milliseconds.
    /// `OPEN_RESPONSES_MAX_STREAMING_TIMEOUT` overrides this.
    #[serde(deserialize_with = "duration_millis")]
    pub max_streaming_timeout: Duration,
    /// Response and completion store settings.
    pub store: StoreConfig,
}

impl Default for ResponsesConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: 25,
            max_streaming_tool_calls: 30,
            max_streaming_timeout: Duration::from_millis(300_000),
            store: StoreConfig::default(),
        }
    }
}

/// Persistence backend selection for responses and completions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Which backend services `store = true` requests.
    pub backend: StoreBackend,
    /// Entry capacity of the in-memory backend.
    pub cache_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            cache_size: 1000,
        }
    }
}

/// Store backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Bounded in-memory LRU store.
    Memory,
    /// JSON documents under the storage root.
    Disk,
}
