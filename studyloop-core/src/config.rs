//! Configuration types for studyloop-core.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::BanditConfig;

/// Default user when a command names none
pub const DEFAULT_USER: &str = "default";

/// Default upper bound on characters per extracted chunk
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1500;

/// Default deadline for one collaborator call
pub const DEFAULT_COLLABORATOR_TIMEOUT_SECS: u64 = 60;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    #[serde(default = "default_user")]
    pub default_user: String,
    #[serde(default)]
    pub bandit: BanditConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub collaborators: CollaboratorConfig,
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            default_user: default_user(),
            bandit: BanditConfig::default(),
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            collaborators: CollaboratorConfig::default(),
        }
    }
}

/// Which persistence medium holds policy state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Directory (json) or database file (sqlite); XDG data dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        match self.backend {
            StorageBackend::Sqlite => studyloop_paths::database_path(),
            StorageBackend::Json | StorageBackend::Memory => studyloop_paths::policies_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Expire session context entries after this many seconds; never when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

fn default_max_chunk_chars() -> usize {
    DEFAULT_MAX_CHUNK_CHARS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: None,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// HTTP endpoint of the generation service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_COLLABORATOR_TIMEOUT_SECS
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            generator_url: None,
            timeout_secs: DEFAULT_COLLABORATOR_TIMEOUT_SECS,
        }
    }
}

impl CollaboratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StudyConfig::default();
        assert_eq!(config.default_user, "default");
        assert_eq!(config.bandit.cold_start_window, 3);
        assert_eq!(config.storage.backend, StorageBackend::Json);
        assert!(config.session.ttl().is_none());
        assert_eq!(config.collaborators.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: StudyConfig = toml::from_str(
            r#"
            [storage]
            backend = "sqlite"
            path = "/tmp/study.db"

            [session]
            ttl_secs = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.resolved_path(), PathBuf::from("/tmp/study.db"));
        assert_eq!(config.session.ttl(), Some(Duration::from_secs(600)));
        assert_eq!(config.session.max_chunk_chars, DEFAULT_MAX_CHUNK_CHARS);
        assert_eq!(config.default_user, DEFAULT_USER);
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = StudyConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: StudyConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_sqlite_default_path() {
        let storage = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: None,
        };
        assert!(storage.resolved_path().ends_with("studyloop.db"));
    }
}
