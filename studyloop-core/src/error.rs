//! Error types for studyloop-core

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the bandit policy transforms
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("Invalid mode: {0} (expected one of quiz, flashcard, interactive)")]
    InvalidMode(String),

    #[error("Invalid feedback: {0} (must be within [0, 1])")]
    InvalidFeedback(f64),
}

/// Errors from policy state persistence
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Top-level error type for command handling
#[derive(Debug, Error)]
pub enum StudyError {
    #[error("Invalid params: {0}")]
    Validation(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Collaborator call cancelled")]
    Cancelled,

    #[error("Collaborator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse failure category reported in every failed envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    SessionNotFound,
    Persistence,
    Collaborator,
    Internal,
}

impl StudyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::UnknownAction(_) | Self::Policy(_) => ErrorKind::Validation,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Collaborator(_) | Self::Cancelled | Self::Timeout(_) => ErrorKind::Collaborator,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias for studyloop operations
pub type Result<T> = std::result::Result<T, StudyError>;
