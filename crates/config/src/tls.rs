//! TLS settings for the HTTP server.

use std::path::PathBuf;

use serde::Deserialize;

/// TLS certificate and key paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsServerConfig {
    /// Path to the PEM certificate.
    pub certificate: PathBuf,
    /// Path to the PEM private key.
    pub key: PathBuf,
}
