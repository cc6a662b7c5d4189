//! Error types and non-blocking notices.
//!
//! [`SyncError`] is returned from fallible calls. Failures that happen inside
//! background tracking never surface as errors; they are reported as a
//! [`Notice`] on the engine's notice channel and the affected item keeps its
//! last known state.

use serde::Serialize;

use crate::models::JobStage;

/// Errors returned by the engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Connecting to or reading from the server failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },

    /// A payload could not be decoded.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A job control action is not allowed from the job's current stage.
    #[error("cannot {action} job {job_id} while {stage}")]
    InvalidTransition {
        job_id: String,
        action: &'static str,
        stage: JobStage,
    },

    /// The server signalled a state it could not back up (e.g. parsed without pages).
    #[error("server inconsistency for {document_id}: {detail}")]
    ServerInconsistency { document_id: String, detail: String },

    #[error("polling job {job_id} stopped after {iterations} iterations")]
    PollExhausted { job_id: String, iterations: u32 },

    /// Some ids of a batch delete failed. The succeeded ones are already gone.
    #[error("{failed} of {total} deletions failed")]
    PartialBatchFailure { failed: usize, total: usize },

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn document_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "document",
            id: id.into(),
        }
    }

    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "job",
            id: id.into(),
        }
    }

    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None if err.is_decode() => Self::Transport(format!("decode: {}", err)),
            None => Self::Transport(err.to_string()),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Non-blocking, surface-level notice for the presentation layer.
///
/// Each variant serializes with a snake_case `type` field for frontend matching.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// The push channel for a document gave up reconnecting; tracking continues pull-only.
    TransportDegraded {
        document_id: String,
        attempts: u32,
        error: String,
    },
    /// A "parsed" signal could not be confirmed with a page count.
    ConfirmationUnresolved { document_id: String, attempts: u32 },
    /// Job polling hit its iteration bound before a terminal stage.
    PollExhausted {
        job_id: String,
        iterations: u32,
        stage: JobStage,
    },
    /// Deleting a document failed server-side; the entry is retained.
    DeleteFailed { document_id: String, reason: String },
    /// A document has been parsing for longer than the watchdog threshold.
    ParsingStalled {
        document_id: String,
        elapsed_secs: u64,
    },
    /// Pulling the authoritative list failed; the current view is kept.
    RefreshFailed { error: String },
}

impl Notice {
    /// The document or job this notice is about, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::TransportDegraded { document_id, .. }
            | Self::ConfirmationUnresolved { document_id, .. }
            | Self::DeleteFailed { document_id, .. }
            | Self::ParsingStalled { document_id, .. } => Some(document_id),
            Self::PollExhausted { job_id, .. } => Some(job_id),
            Self::RefreshFailed { .. } => None,
        }
    }
}
