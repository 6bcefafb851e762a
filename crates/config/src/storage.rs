//! File and document storage settings.

use std::path::PathBuf;

use serde::Deserialize;

/// Root directory layout for blobs, metadata sidecars, embeddings and
/// disk-backed document stores.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Root directory. Files land under `{root_dir}/{purpose}/{file_id}`,
    /// embeddings under `{root_dir}/embeddings/{file_id}.json`.
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data"),
        }
    }
}
