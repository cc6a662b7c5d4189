//! Translation job tracking and control.
//!
//! ```text
//! start_translation / track / restore
//!         │
//!         ▼
//!   JobTracker ──── adopt(server view) ───► TranslationJob change channel
//!         │                                     │
//!         │ start_polling                       └─► SessionStore (job_id, stage)
//!         ▼
//!   poller::run (interval, bounded) ──► terminal / exhausted / cancelled
//! ```
//!
//! Control actions are checked ([`state::check_transition`]) against the
//! local stage when polling keeps it current, and against a fresh server
//! read otherwise; the server's answer is then adopted as-is.
//! Each polling cycle carries a generation number so a superseded loop can
//! never overwrite what a newer one adopted.

mod poller;
pub mod state;

pub use poller::{PollExit, PollSettings};
pub use state::{check_transition, is_allowed};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::api::{DocumentApi, JobAction, TranslateRequest};
use crate::config::SyncTimings;
use crate::error::{Notice, Result, SyncError};
use crate::models::{JobStage, TranslationJob};
use crate::session::{PersistedJob, SessionStore};

struct Poller {
    generation: u64,
    cancel: CancellationToken,
}

struct TrackedJob {
    job: TranslationJob,
    poller: Option<Poller>,
}

/// Owns every tracked translation job and its poll loop.
#[derive(Clone)]
pub struct JobTracker {
    api: Arc<dyn DocumentApi>,
    session: SessionStore,
    jobs: Arc<RwLock<HashMap<String, TrackedJob>>>,
    settings: PollSettings,
    generation: Arc<AtomicU64>,
    notify_tx: mpsc::Sender<TranslationJob>,
    notice_tx: mpsc::Sender<Notice>,
    cancel: CancellationToken,
}

impl JobTracker {
    pub fn new(
        api: Arc<dyn DocumentApi>,
        session: SessionStore,
        timings: &SyncTimings,
        notice_tx: mpsc::Sender<Notice>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<TranslationJob>) {
        let (notify_tx, notify_rx) = mpsc::channel(256);
        (
            Self {
                api,
                session,
                jobs: Arc::new(RwLock::new(HashMap::new())),
                settings: PollSettings {
                    interval: timings.job_poll_interval(),
                    max_iterations: timings.job_poll_max_iterations.max(1),
                },
                generation: Arc::new(AtomicU64::new(0)),
                notify_tx,
                notice_tx,
                cancel,
            },
            notify_rx,
        )
    }

    pub(crate) fn api(&self) -> &Arc<dyn DocumentApi> {
        &self.api
    }

    pub(crate) fn notice(&self, notice: Notice) {
        let _ = self.notice_tx.try_send(notice);
    }

    pub async fn get(&self, job_id: &str) -> Option<TranslationJob> {
        self.jobs.read().await.get(job_id).map(|t| t.job.clone())
    }

    /// All tracked jobs, ordered by id.
    pub async fn list(&self) -> Vec<TranslationJob> {
        let mut jobs: Vec<TranslationJob> = self
            .jobs
            .read()
            .await
            .values()
            .map(|t| t.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Jobs for one document.
    pub async fn for_document(&self, document_id: &str) -> Vec<TranslationJob> {
        self.list()
            .await
            .into_iter()
            .filter(|j| j.document_id == document_id)
            .collect()
    }

    pub async fn is_polling(&self, job_id: &str) -> bool {
        self.jobs
            .read()
            .await
            .get(job_id)
            .is_some_and(|t| t.poller.is_some())
    }

    /// Start a translation and begin polling it.
    pub async fn start_translation(&self, request: &TranslateRequest) -> Result<TranslationJob> {
        let job_id = self.api.create_translate_job(request).await?;
        tracing::info!(job_id = %job_id, document_id = %request.document_id, "Translation job created");

        let job = TranslationJob::new(job_id.clone(), request.document_id.clone(), JobStage::Queued);
        self.adopt(job.clone(), None).await;
        let job = match self.api.get_job(&job_id).await {
            Ok(detail) => self.adopt(detail.to_job(), None).await.unwrap_or(job),
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "Initial job fetch failed");
                job
            }
        };
        if !job.stage.is_terminal() {
            self.start_polling(&job_id).await;
        }
        Ok(job)
    }

    /// Begin tracking an existing job.
    pub async fn track(&self, job_id: &str) -> Result<TranslationJob> {
        let detail = self.api.get_job(job_id).await?;
        let job = detail.to_job();
        let job = self.adopt(job.clone(), None).await.unwrap_or(job);
        if !job.stage.is_terminal() && job.stage != JobStage::Paused {
            self.start_polling(job_id).await;
        }
        Ok(job)
    }

    /// Resume tracking every non-terminal job recorded in the session.
    ///
    /// Returns the number of jobs resumed.
    pub async fn restore(&self) -> usize {
        let persisted: Vec<PersistedJob> = self
            .session
            .jobs()
            .await
            .into_iter()
            .filter(|j| !j.stage.is_terminal())
            .collect();

        let mut resumed = 0;
        for record in persisted {
            {
                let mut jobs = self.jobs.write().await;
                jobs.entry(record.job_id.clone()).or_insert_with(|| TrackedJob {
                    job: TranslationJob::new(
                        record.job_id.clone(),
                        record.document_id.clone(),
                        record.stage,
                    ),
                    poller: None,
                });
            }

            match self.track(&record.job_id).await {
                Ok(_) => resumed += 1,
                Err(SyncError::NotFound { .. }) => {
                    tracing::info!(job_id = %record.job_id, "Persisted job no longer exists");
                    self.jobs.write().await.remove(&record.job_id);
                    self.session.remove_job(&record.job_id).await;
                }
                Err(e) => {
                    tracing::warn!(job_id = %record.job_id, error = %e, "Failed to refresh persisted job, polling anyway");
                    if record.stage != JobStage::Paused {
                        self.start_polling(&record.job_id).await;
                    }
                    resumed += 1;
                }
            }
        }
        if resumed > 0 {
            tracing::info!(count = resumed, "Restored translation jobs");
        }
        resumed
    }

    pub async fn pause(&self, job_id: &str) -> Result<TranslationJob> {
        self.control(job_id, JobAction::Pause).await
    }

    pub async fn resume(&self, job_id: &str) -> Result<TranslationJob> {
        self.control(job_id, JobAction::Resume).await
    }

    pub async fn cancel(&self, job_id: &str) -> Result<TranslationJob> {
        self.control(job_id, JobAction::Cancel).await
    }

    pub async fn retry(&self, job_id: &str) -> Result<TranslationJob> {
        self.control(job_id, JobAction::Retry).await
    }

    /// Validate, send, and adopt a control action.
    ///
    /// The local stage is trusted only while a poll cycle keeps it fresh and
    /// it already allows the action. Otherwise the server's view is fetched
    /// and adopted before validating, so a job that failed or was paused
    /// after polling stopped can still be retried or resumed.
    pub async fn control(&self, job_id: &str, action: JobAction) -> Result<TranslationJob> {
        let polling = self.is_polling(job_id).await;
        let current = match self.get(job_id).await {
            Some(job) if polling && is_allowed(job.stage, action) => job,
            local => match self.api.get_job(job_id).await {
                Ok(detail) => {
                    let job = detail.to_job();
                    self.adopt(job.clone(), None).await.unwrap_or(job)
                }
                Err(e) => match local {
                    Some(job) if !matches!(e, SyncError::NotFound { .. }) => {
                        tracing::debug!(job_id = %job_id, error = %e, "Job refresh failed, validating against local stage");
                        job
                    }
                    _ => return Err(e),
                },
            },
        };
        check_transition(&current, action)?;

        let detail = match self.api.control_job(job_id, action).await {
            Ok(detail) => detail,
            Err(e) => {
                tracing::error!(job_id = %job_id, action = %action, error = %e, "Job control failed");
                return Err(e);
            }
        };
        let job = detail.to_job();
        let job = self.adopt(job.clone(), None).await.unwrap_or(job);
        tracing::info!(job_id = %job_id, action = %action, stage = %job.stage, "Job control applied");

        match action {
            JobAction::Pause | JobAction::Cancel => self.stop_polling(job_id).await,
            JobAction::Resume | JobAction::Retry => {
                if !job.stage.is_terminal() {
                    self.start_polling(job_id).await;
                }
            }
        }
        Ok(job)
    }

    /// Record the server's view of a job.
    ///
    /// With `generation`, the update is only taken if that poll cycle is still
    /// current; `None` is returned otherwise.
    pub(crate) async fn adopt(
        &self,
        job: TranslationJob,
        generation: Option<u64>,
    ) -> Option<TranslationJob> {
        let (changed, stage_changed) = {
            let mut jobs = self.jobs.write().await;
            if let Some(generation) = generation {
                let current = jobs
                    .get(&job.id)
                    .and_then(|t| t.poller.as_ref())
                    .map(|p| p.generation);
                if current != Some(generation) {
                    return None;
                }
            }
            match jobs.get_mut(&job.id) {
                Some(tracked) => {
                    let changed = tracked.job != job;
                    let stage_changed = tracked.job.stage != job.stage;
                    tracked.job = job.clone();
                    (changed, stage_changed)
                }
                None => {
                    jobs.insert(
                        job.id.clone(),
                        TrackedJob {
                            job: job.clone(),
                            poller: None,
                        },
                    );
                    (true, true)
                }
            }
        };

        if changed {
            let _ = self.notify_tx.try_send(job.clone());
        }
        if stage_changed {
            tracing::debug!(job_id = %job.id, stage = %job.stage, "Job stage changed");
            self.session
                .upsert_job(PersistedJob {
                    job_id: job.id.clone(),
                    document_id: job.document_id.clone(),
                    stage: job.stage,
                })
                .await;
        }
        Some(job)
    }

    /// Start a fresh poll cycle, replacing any running one.
    pub(crate) async fn start_polling(&self, job_id: &str) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.cancel.child_token();
        {
            let mut jobs = self.jobs.write().await;
            let Some(tracked) = jobs.get_mut(job_id) else {
                return;
            };
            if let Some(old) = tracked.poller.replace(Poller {
                generation,
                cancel: cancel.clone(),
            }) {
                old.cancel.cancel();
            }
        }

        let tracker = self.clone();
        let job_id = job_id.to_string();
        let settings = self.settings;
        tokio::spawn(async move {
            poller::run(tracker, job_id, generation, settings, cancel).await;
        });
    }

    pub(crate) async fn stop_polling(&self, job_id: &str) {
        let mut jobs = self.jobs.write().await;
        if let Some(poller) = jobs.get_mut(job_id).and_then(|t| t.poller.take()) {
            tracing::debug!(job_id = %job_id, "Job polling stopped");
            poller.cancel.cancel();
        }
    }

    /// Clear the poller slot if it still belongs to `generation`.
    pub(crate) async fn finish_polling(&self, job_id: &str, generation: u64) {
        let mut jobs = self.jobs.write().await;
        if let Some(tracked) = jobs.get_mut(job_id) {
            if tracked.poller.as_ref().map(|p| p.generation) == Some(generation) {
                tracked.poller = None;
            }
        }
    }

    /// Stop all poll loops.
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.write().await;
        for tracked in jobs.values_mut() {
            if let Some(poller) = tracked.poller.take() {
                poller.cancel.cancel();
            }
        }
    }
}
