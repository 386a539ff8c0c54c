use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use studyloop_core::config::{
    CollaboratorConfig, DEFAULT_COLLABORATOR_TIMEOUT_SECS, DEFAULT_MAX_CHUNK_CHARS, DEFAULT_USER,
    SessionConfig, StorageConfig, StudyConfig,
};
use studyloop_core::policy::{BanditConfig, DEFAULT_COLD_START_WINDOW};

use super::types::{
    RawBanditConfig, RawCollaboratorConfig, RawSessionConfig, RawStorageConfig, RawStudyConfig,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<StudyConfig> {
        Self::load_from(&Self::user_config_path(), &Self::project_config_path())
    }

    /// Load from explicit user and project config files; missing files are skipped
    pub fn load_from(user_path: &Path, project_path: &Path) -> Result<StudyConfig> {
        let mut raw = RawStudyConfig::default();

        // Layer 1: User config
        if let Some(user_config) = Self::read_raw(user_path)? {
            raw = Self::merge_raw(raw, user_config);
        }

        // Layer 2: Project config
        if let Some(project_config) = Self::read_raw(project_path)? {
            raw = Self::merge_raw(raw, project_config);
        }

        Self::finalize(raw)
    }

    /// `$XDG_CONFIG_HOME/studyloop/config.toml`
    pub fn user_config_path() -> PathBuf {
        studyloop_paths::config_dir().join("config.toml")
    }

    /// Get project config path
    /// Can be overridden with STUDYLOOP_PROJECT_CONFIG_DIR env var (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("STUDYLOOP_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".studyloop/config.toml")
        }
    }

    fn read_raw(path: &Path) -> Result<Option<RawStudyConfig>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let raw = toml::from_str(&contents)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(Some(raw))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawStudyConfig, overlay: RawStudyConfig) -> RawStudyConfig {
        RawStudyConfig {
            default_user: overlay.default_user.or(base.default_user),
            bandit: RawBanditConfig {
                cold_start_window: overlay
                    .bandit
                    .cold_start_window
                    .or(base.bandit.cold_start_window),
                prior_success: overlay.bandit.prior_success.or(base.bandit.prior_success),
                prior_failure: overlay.bandit.prior_failure.or(base.bandit.prior_failure),
            },
            storage: RawStorageConfig {
                backend: overlay.storage.backend.or(base.storage.backend),
                path: overlay.storage.path.or(base.storage.path),
            },
            session: RawSessionConfig {
                ttl_secs: overlay.session.ttl_secs.or(base.session.ttl_secs),
                max_chunk_chars: overlay
                    .session
                    .max_chunk_chars
                    .or(base.session.max_chunk_chars),
            },
            collaborators: RawCollaboratorConfig {
                generator_url: overlay
                    .collaborators
                    .generator_url
                    .or(base.collaborators.generator_url),
                timeout_secs: overlay
                    .collaborators
                    .timeout_secs
                    .or(base.collaborators.timeout_secs),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawStudyConfig) -> Result<StudyConfig> {
        let bandit = BanditConfig {
            cold_start_window: raw
                .bandit
                .cold_start_window
                .unwrap_or(DEFAULT_COLD_START_WINDOW),
            prior_success: raw.bandit.prior_success.unwrap_or(1.0),
            prior_failure: raw.bandit.prior_failure.unwrap_or(1.0),
        };
        for (key, value) in [
            ("bandit.prior_success", bandit.prior_success),
            ("bandit.prior_failure", bandit.prior_failure),
        ] {
            if !(value.is_finite() && value > 0.0) {
                bail!("{key} must be a positive number, got {value}");
            }
        }

        let max_chunk_chars = raw
            .session
            .max_chunk_chars
            .unwrap_or(DEFAULT_MAX_CHUNK_CHARS);
        if max_chunk_chars == 0 {
            bail!("session.max_chunk_chars must be at least 1");
        }
        if raw.session.ttl_secs == Some(0) {
            bail!("session.ttl_secs must be at least 1; omit it to keep sessions indefinitely");
        }

        let timeout_secs = raw
            .collaborators
            .timeout_secs
            .unwrap_or(DEFAULT_COLLABORATOR_TIMEOUT_SECS);
        if timeout_secs == 0 {
            bail!("collaborators.timeout_secs must be at least 1");
        }

        let default_user = raw.default_user.unwrap_or_else(|| DEFAULT_USER.to_string());
        if default_user.trim().is_empty() {
            bail!("default_user must not be empty");
        }

        Ok(StudyConfig {
            default_user,
            bandit,
            storage: StorageConfig {
                backend: raw.storage.backend.unwrap_or_default(),
                path: raw.storage.path,
            },
            session: SessionConfig {
                ttl_secs: raw.session.ttl_secs,
                max_chunk_chars,
            },
            collaborators: CollaboratorConfig {
                generator_url: raw.collaborators.generator_url,
                timeout_secs,
            },
        })
    }
}
