//! Server API abstraction for the pull and control endpoints
//!
//! This module provides a unified interface to the document server:
//! - Snapshot pulls (document list, single document, progress)
//! - Deletion (single and batch)
//! - Translation job control
//!
//! The engine only talks to [`DocumentApi`]; [`HttpApi`] is the production
//! implementation.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{JobStage, TranslationJob};
use crate::pdf::Page;

pub use http::HttpApi;

/// Pipeline status as reported on the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Uploading,
    Parsing,
    Parsed,
}

/// Parse job telemetry attached to progress events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseJobInfo {
    #[serde(default)]
    pub done: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    /// Either 0-1 or 0-100.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, alias = "eta_s")]
    pub eta_seconds: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub substage: Option<String>,
}

/// Raw per-document status payload. May arrive duplicated or out of order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: EventStatus,
    /// Upload transfer progress, either 0-1 or 0-100.
    #[serde(default)]
    pub progress: Option<f64>,
    /// Either 0-1 or 0-100.
    #[serde(default)]
    pub parse_progress: Option<f64>,
    #[serde(default)]
    pub parse_job: Option<ParseJobInfo>,
    #[serde(default)]
    pub num_pages: Option<i64>,
}

impl ProgressEvent {
    pub fn new(status: EventStatus) -> Self {
        Self {
            status,
            progress: None,
            parse_progress: None,
            parse_job: None,
            num_pages: None,
        }
    }

    pub fn uploading(progress: f64) -> Self {
        Self {
            progress: Some(progress),
            ..Self::new(EventStatus::Uploading)
        }
    }

    pub fn parsing_job(job: ParseJobInfo) -> Self {
        Self {
            parse_job: Some(job),
            ..Self::new(EventStatus::Parsing)
        }
    }

    pub fn parsed(num_pages: Option<i64>) -> Self {
        Self {
            num_pages,
            ..Self::new(EventStatus::Parsed)
        }
    }
}

/// One row of the authoritative document list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    #[serde(alias = "document_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub num_pages: Option<i64>,
    #[serde(default)]
    pub lang_in: String,
    #[serde(default)]
    pub lang_out: String,
    #[serde(default)]
    pub status: String,
}

impl DocumentSummary {
    /// Whether the server considers the parse stage finished.
    ///
    /// Translation and export stages all come after parsing.
    pub fn is_parsed(&self) -> bool {
        matches!(
            self.status.as_str(),
            "parsed" | "translating" | "translated" | "exporting" | "completed"
        )
    }

    /// Page count only when it is usable as a Ready confirmation.
    pub fn confirmed_pages(&self) -> Option<u32> {
        self.num_pages
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
    }
}

/// Authoritative single-document fetch, used for two-phase Ready confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentDetail {
    pub summary: DocumentSummary,
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDeleteFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of a batch delete. Partial failure is a normal result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchDeleteResult {
    #[serde(default)]
    pub succeeded_ids: Vec<String>,
    #[serde(default)]
    pub failed: Vec<BatchDeleteFailure>,
    #[serde(default)]
    pub succeeded_count: usize,
    #[serde(default)]
    pub failed_count: usize,
}

/// Job control actions exposed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobAction {
    Pause,
    Resume,
    Cancel,
    Retry,
}

impl JobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            JobAction::Pause => "pause",
            JobAction::Resume => "resume",
            JobAction::Cancel => "cancel",
            JobAction::Retry => "retry",
        }
    }
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Server view of a translation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub id: String,
    pub document_id: String,
    pub stage: String,
    #[serde(default)]
    pub control: Option<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub done: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default, alias = "eta_s")]
    pub eta_seconds: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl JobDetail {
    pub fn job_stage(&self) -> JobStage {
        JobStage::from_server(&self.stage, self.control.as_deref())
    }

    /// Convert into the client-side job model.
    pub fn to_job(&self) -> TranslationJob {
        let progress = if self.progress.is_finite() {
            self.progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        TranslationJob {
            id: self.id.clone(),
            document_id: self.document_id.clone(),
            stage: self.job_stage(),
            progress,
            done: self.done,
            total: self.total,
            eta_seconds: self.eta_seconds,
            message: self.message.clone(),
            updated_at: self.updated_at.as_deref().and_then(parse_timestamp),
        }
    }
}

/// Parse a server timestamp. Naive timestamps are taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Request to start translating a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslateRequest {
    pub document_id: String,
    pub lang_in: String,
    pub lang_out: String,
    pub provider: String,
}

/// Typed access to the document server.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Authoritative list of documents in a scope (project).
    async fn list_documents(&self, scope: &str) -> Result<Vec<DocumentSummary>>;

    async fn get_document(&self, id: &str) -> Result<DocumentDetail>;

    /// Pull the same payload the push channel would deliver.
    async fn get_progress(&self, id: &str) -> Result<ProgressEvent>;

    async fn delete_document(&self, id: &str) -> Result<()>;

    async fn batch_delete(&self, ids: &[String]) -> Result<BatchDeleteResult>;

    async fn get_job(&self, job_id: &str) -> Result<JobDetail>;

    /// Apply a control action and return the job as the server now sees it.
    async fn control_job(&self, job_id: &str, action: JobAction) -> Result<JobDetail>;

    /// Start a translation, returning the new job id.
    async fn create_translate_job(&self, request: &TranslateRequest) -> Result<String>;
}
