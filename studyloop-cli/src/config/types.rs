use std::path::PathBuf;

use serde::Deserialize;
use studyloop_core::StorageBackend;

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStudyConfig {
    pub default_user: Option<String>,

    #[serde(default)]
    pub bandit: RawBanditConfig,

    #[serde(default)]
    pub storage: RawStorageConfig,

    #[serde(default)]
    pub session: RawSessionConfig,

    #[serde(default)]
    pub collaborators: RawCollaboratorConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawBanditConfig {
    /// Completed sessions before the survey preference stops applying
    pub cold_start_window: Option<u64>,
    pub prior_success: Option<f64>,
    pub prior_failure: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStorageConfig {
    pub backend: Option<StorageBackend>,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSessionConfig {
    pub ttl_secs: Option<u64>,
    pub max_chunk_chars: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawCollaboratorConfig {
    /// HTTP endpoint of the generation service
    pub generator_url: Option<String>,
    pub timeout_secs: Option<u64>,
}
