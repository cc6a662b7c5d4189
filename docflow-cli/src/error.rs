//! Command error types for machine-readable output
//!
//! Provides structured errors that serialize to `{"code": "...", "message": "..."}`.

use docflow_core::SyncError;
use serde::Serialize;

/// Errors returned by commands
///
/// Each variant serializes with a snake_case `code` field so scripts can match on it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum CommandError {
    // Validation errors
    InvalidArgument { message: String },
    InvalidTransition { message: String, job_id: String },

    // Not found errors
    DocumentNotFound { message: String },
    JobNotFound { message: String },

    // Operation errors
    PartialDelete { message: String, failed: usize, total: usize },
    ServerError { message: String, status: u16 },
    NetworkError { message: String },
    InternalError { message: String },
}

impl CommandError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument { .. } | Self::InvalidTransition { .. } => 2,
            Self::DocumentNotFound { .. } | Self::JobNotFound { .. } => 3,
            Self::PartialDelete { .. } => 4,
            Self::ServerError { .. } | Self::NetworkError { .. } => 5,
            Self::InternalError { .. } => 1,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::InvalidArgument { message }
            | Self::InvalidTransition { message, .. }
            | Self::DocumentNotFound { message }
            | Self::JobNotFound { message }
            | Self::PartialDelete { message, .. }
            | Self::ServerError { message, .. }
            | Self::NetworkError { message }
            | Self::InternalError { message } => message,
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for CommandError {}

impl From<SyncError> for CommandError {
    fn from(err: SyncError) -> Self {
        let message = err.to_string();
        match err {
            SyncError::NotFound { kind: "job", .. } => Self::JobNotFound { message },
            SyncError::NotFound { .. } => Self::DocumentNotFound { message },
            SyncError::InvalidTransition { job_id, .. } => {
                Self::InvalidTransition { message, job_id }
            }
            SyncError::PartialBatchFailure { failed, total } => Self::PartialDelete {
                message,
                failed,
                total,
            },
            SyncError::Http { status, .. } => Self::ServerError { message, status },
            SyncError::Transport(_) | SyncError::PollExhausted { .. } => Self::NetworkError { message },
            _ => Self::InternalError { message },
        }
    }
}

// Conversion from anyhow::Error (used by docflow-core setup)
impl From<anyhow::Error> for CommandError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(err.to_string())
    }
}

/// Result type alias for commands
pub type CommandResult<T> = Result<T, CommandError>;

