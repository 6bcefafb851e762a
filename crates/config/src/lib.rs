//! Switchboard configuration structures to map the switchboard.toml configuration.

#![deny(missing_docs)]

mod health;
mod llm;
mod loader;
mod responses;
mod storage;
mod telemetry;
mod tls;
mod vector_store;

use std::path::Path;

use serde::Deserialize;

pub use health::HealthConfig;
pub use llm::{LlmConfig, ProviderConfig, builtin_base_url};
pub use responses::{ResponsesConfig, StoreBackend, StoreConfig};
pub use storage::StorageConfig;
pub use telemetry::{OtlpExporterConfig, OtlpProtocol, TelemetryConfig};
pub use tls::TlsServerConfig;
pub use vector_store::{EmbeddingConfig, VectorStoreConfig};

/// Main configuration structure for the Switchboard application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Upstream model routing configuration.
    pub llm: LlmConfig,
    /// Response orchestration limits and store settings.
    pub responses: ResponsesConfig,
    /// Vector store and hybrid search settings.
    pub vector_store: VectorStoreConfig,
    /// File and document storage settings.
    pub storage: StorageConfig,
    /// Telemetry configuration settings.
    pub telemetry: Option<TelemetryConfig>,
}

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<std::net::SocketAddr>,
    /// TLS configuration for secure connections.
    pub tls: Option<TlsServerConfig>,
    /// Health endpoint configuration.
    pub health: HealthConfig,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Build a configuration from environment overrides alone (no file).
    pub fn from_env() -> anyhow::Result<Config> {
        let mut config = Config::default();
        loader::apply_env_overrides(&mut config)?;
        Ok(config)
    }
}
