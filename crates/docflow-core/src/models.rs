//! Canonical client-side state for tracked documents and translation jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound of the Uploading phase on the 0-100 scale.
pub const UPLOAD_CEILING: f64 = 30.0;
/// Upper bound of the Parsing phase. Only Ready reaches 100.
pub const PARSE_CEILING: f64 = 99.0;
/// Progress of a finalized document.
pub const READY_PROGRESS: f64 = 100.0;

/// Prefix of client-generated ids for documents the server has not acknowledged yet.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Generate a fresh temporary document id.
pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}

/// Check whether an id was generated client-side.
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Pipeline phase of a document. Ordered: a document only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploading,
    Parsing,
    Ready,
}

impl DocumentStatus {
    /// Inclusive progress range allowed for this phase.
    pub fn progress_bounds(self) -> (f64, f64) {
        match self {
            DocumentStatus::Uploading => (0.0, UPLOAD_CEILING),
            DocumentStatus::Parsing => (UPLOAD_CEILING, PARSE_CEILING),
            DocumentStatus::Ready => (READY_PROGRESS, READY_PROGRESS),
        }
    }

    /// Clamp a progress value into this phase's range.
    pub fn clamp(self, progress: f64) -> f64 {
        let (lo, hi) = self.progress_bounds();
        progress.clamp(lo, hi)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentStatus::Uploading => write!(f, "uploading"),
            DocumentStatus::Parsing => write!(f, "parsing"),
            DocumentStatus::Ready => write!(f, "ready"),
        }
    }
}

/// One tracked upload/parse pipeline item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub status: DocumentStatus,
    /// 0-100, see [`DocumentStatus::progress_bounds`].
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_pages: Option<u32>,
    pub lang_in: String,
    pub lang_out: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_done: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub substage: Option<String>,
    #[serde(default)]
    pub thumbnail_failed: bool,
    /// Reason the last delete attempt for this entry failed server-side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_error: Option<String>,
}

impl Document {
    /// A fresh speculative entry for a file the user just started uploading.
    pub fn uploading(
        id: impl Into<String>,
        title: impl Into<String>,
        lang_in: impl Into<String>,
        lang_out: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: DocumentStatus::Uploading,
            progress: 0.0,
            num_pages: None,
            lang_in: lang_in.into(),
            lang_out: lang_out.into(),
            parse_done: None,
            parse_total: None,
            eta_seconds: None,
            message: None,
            substage: None,
            thumbnail_failed: false,
            delete_error: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == DocumentStatus::Ready
    }

    /// Drop parse telemetry that has no meaning once a document is Ready.
    pub(crate) fn clear_parse_telemetry(&mut self) {
        self.parse_done = None;
        self.parse_total = None;
        self.eta_seconds = None;
        self.substage = None;
    }
}

/// Client-side stage of a translation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Running,
    Paused,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStage::Succeeded | JobStage::Failed | JobStage::Canceled
        )
    }

    /// Map the server's stage/control pair onto the client state machine.
    ///
    /// The server reports a pipeline stage (`pending`, `parsing`, `translating`,
    /// `composing`, `exporting`, `success`, `failed`, `canceled`) and a separate
    /// `control` flag (`running`, `paused`, `canceled`).
    pub fn from_server(stage: &str, control: Option<&str>) -> Self {
        match stage {
            "success" | "succeeded" => return JobStage::Succeeded,
            "failed" => return JobStage::Failed,
            "canceled" | "cancelled" => return JobStage::Canceled,
            _ => {}
        }
        match control {
            Some("canceled") | Some("cancelled") => return JobStage::Canceled,
            Some("paused") => return JobStage::Paused,
            _ => {}
        }
        match stage {
            "pending" | "queued" => JobStage::Queued,
            _ => JobStage::Running,
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStage::Queued => "queued",
            JobStage::Running => "running",
            JobStage::Paused => "paused",
            JobStage::Succeeded => "succeeded",
            JobStage::Failed => "failed",
            JobStage::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

/// One tracked translation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationJob {
    pub id: String,
    pub document_id: String,
    pub stage: JobStage,
    /// 0-1.
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TranslationJob {
    pub fn new(id: impl Into<String>, document_id: impl Into<String>, stage: JobStage) -> Self {
        Self {
            id: id.into(),
            document_id: document_id.into(),
            stage,
            progress: 0.0,
            done: None,
            total: None,
            eta_seconds: None,
            message: None,
            updated_at: None,
        }
    }
}
