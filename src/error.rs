//! Error handling for the maintenance engine
//!
//! User errors (nothing selected, bad target drive) and engine-state errors
//! (a run already active) are `EngineError`s and stop a run before it starts.
//! Failures inside a single task never surface here: they become `failed`
//! task results in the report.

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// The plan is empty
    #[error("No tasks selected")]
    NoTasksSelected,

    /// The chosen drive cannot be used as a target
    #[error("Invalid target drive {drive}: {reason}")]
    InvalidTarget { drive: String, reason: String },

    /// Another orchestration run is active in this process
    #[error("An orchestration run is already in progress")]
    RunAlreadyInProgress,

    /// Task id is not in the catalog
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backup manifest errors (naming, layout)
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Create an invalid target error
    pub fn invalid_target(drive: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            drive: drive.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a manifest error
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    /// True for errors caused by the user's selection rather than the environment
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::NoTasksSelected | Self::InvalidTarget { .. } | Self::UnknownTask(_)
        )
    }
}
