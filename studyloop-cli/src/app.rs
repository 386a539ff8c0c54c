//! Shared wiring: global flags, configuration and router construction

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use serde_json::Value;
use studyloop_core::{CommandRouter, Envelope, ManagerCommand, ModeId, StorageBackend, StudyConfig};

use crate::config::ConfigLoader;

/// Flags accepted by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// User whose policy state to use (defaults to config `default_user`)
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Storage backend override
    #[arg(long, global = true, value_enum)]
    pub backend: Option<BackendArg>,

    /// Storage location override (directory for json, file for sqlite)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Memory,
    Json,
    Sqlite,
}

impl From<BackendArg> for StorageBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Memory => StorageBackend::Memory,
            BackendArg::Json => StorageBackend::Json,
            BackendArg::Sqlite => StorageBackend::Sqlite,
        }
    }
}

impl GlobalArgs {
    /// Layered file config with command-line overrides applied
    pub fn config(&self) -> Result<StudyConfig> {
        let mut config = ConfigLoader::load()?;
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut StudyConfig) {
        if let Some(user) = &self.user {
            config.default_user = user.clone();
        }
        if let Some(backend) = self.backend {
            config.storage.backend = backend.into();
        }
        if let Some(path) = &self.store {
            config.storage.path = Some(path.clone());
        }
    }

    pub fn router(&self) -> Result<CommandRouter> {
        let config = self.config()?;
        CommandRouter::from_config(&config).with_context(|| {
            format!(
                "Failed to open {:?} store at {}",
                config.storage.backend,
                config.storage.resolved_path().display()
            )
        })
    }
}

/// Parse a teaching mode argument
pub fn parse_mode(s: &str) -> Result<ModeId, String> {
    s.parse().map_err(|e: studyloop_core::PolicyError| e.to_string())
}

/// Dispatch and turn a failed envelope into an error
pub async fn dispatch_ok(router: &CommandRouter, command: ManagerCommand) -> Result<Value> {
    let envelope = router.dispatch(command).await;
    expect_success(&envelope)
}

pub fn expect_success(envelope: &Envelope) -> Result<Value> {
    if !envelope.success {
        bail!(
            "{}",
            envelope.error.as_deref().unwrap_or("command failed")
        );
    }
    Ok(envelope.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_over_config() {
        let args = GlobalArgs {
            user: Some("kim".into()),
            backend: Some(BackendArg::Memory),
            store: Some(PathBuf::from("/tmp/elsewhere")),
        };
        let mut config = StudyConfig::default();
        args.apply(&mut config);

        assert_eq!(config.default_user, "kim");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/elsewhere")));
    }

    #[test]
    fn test_no_overrides_leave_config_alone() {
        let mut config = StudyConfig::default();
        GlobalArgs::default().apply(&mut config);
        assert_eq!(config, StudyConfig::default());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("Flashcard"), Ok(ModeId::Flashcard));
        assert!(parse_mode("lecture").unwrap_err().contains("lecture"));
    }

    #[test]
    fn test_expect_success_surfaces_error() {
        let envelope = Envelope::failure(&studyloop_core::StudyError::SessionNotFound("s1".into()));
        let err = expect_success(&envelope).unwrap_err();
        assert_eq!(err.to_string(), "Session not found: s1");
    }
}
