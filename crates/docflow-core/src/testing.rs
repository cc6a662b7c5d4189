//! In-memory fakes of the server for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::api::{
    BatchDeleteFailure, BatchDeleteResult, DocumentApi, DocumentDetail, DocumentSummary,
    JobAction, JobDetail, ProgressEvent, TranslateRequest,
};
use crate::error::{Result, SyncError};
use crate::transport::{EventSource, EventStream};

pub fn summary(id: &str, status: &str, pages: i64) -> DocumentSummary {
    DocumentSummary {
        id: id.to_string(),
        title: Some(format!("{}.pdf", id)),
        num_pages: Some(pages),
        lang_in: "en".to_string(),
        lang_out: "zh".to_string(),
        status: status.to_string(),
    }
}

pub fn job_detail(id: &str, stage: &str, control: &str) -> JobDetail {
    JobDetail {
        id: id.to_string(),
        document_id: "doc-1".to_string(),
        stage: stage.to_string(),
        control: Some(control.to_string()),
        progress: 0.0,
        done: None,
        total: None,
        eta_seconds: None,
        message: None,
        updated_at: None,
    }
}

/// Scripted [`DocumentApi`]. Queued responses are popped in order; the last
/// one sticks.
#[derive(Default)]
pub struct FakeApi {
    pub snapshot: Mutex<Vec<DocumentSummary>>,
    pub details: Mutex<HashMap<String, VecDeque<DocumentSummary>>>,
    pub progress: Mutex<HashMap<String, ProgressEvent>>,
    pub delete_failures: Mutex<HashMap<String, String>>,
    pub deleted: Mutex<Vec<String>>,
    pub jobs: Mutex<HashMap<String, VecDeque<JobDetail>>>,
    pub control_calls: Mutex<Vec<(String, JobAction)>>,
    /// Number of upcoming `get_job` calls that fail.
    pub job_errors: AtomicUsize,
    pub fail_list: AtomicBool,
    pub list_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
    next_job: AtomicU32,
}

fn pop_sticky<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl FakeApi {
    pub fn set_snapshot(&self, rows: Vec<DocumentSummary>) {
        *self.snapshot.lock().unwrap() = rows;
    }

    pub fn push_detail(&self, row: DocumentSummary) {
        self.details
            .lock()
            .unwrap()
            .entry(row.id.clone())
            .or_default()
            .push_back(row);
    }

    pub fn push_job(&self, detail: JobDetail) {
        self.jobs
            .lock()
            .unwrap()
            .entry(detail.id.clone())
            .or_default()
            .push_back(detail);
    }

    pub fn fail_delete(&self, id: &str, reason: &str) {
        self.delete_failures
            .lock()
            .unwrap()
            .insert(id.to_string(), reason.to_string());
    }

    pub fn control_calls(&self) -> Vec<(String, JobAction)> {
        self.control_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentApi for FakeApi {
    async fn list_documents(&self, _scope: &str) -> Result<Vec<DocumentSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(SyncError::Http {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn get_document(&self, id: &str) -> Result<DocumentDetail> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let mut details = self.details.lock().unwrap();
        let summary = details
            .get_mut(id)
            .and_then(pop_sticky)
            .ok_or_else(|| SyncError::document_not_found(id))?;
        Ok(DocumentDetail {
            summary,
            pages: Vec::new(),
        })
    }

    async fn get_progress(&self, id: &str) -> Result<ProgressEvent> {
        self.progress
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::transport("no progress"))
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        if let Some(reason) = self.delete_failures.lock().unwrap().get(id) {
            return Err(SyncError::Http {
                status: 409,
                message: reason.clone(),
            });
        }
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<BatchDeleteResult> {
        let failures = self.delete_failures.lock().unwrap().clone();
        let mut result = BatchDeleteResult::default();
        for id in ids {
            match failures.get(id) {
                Some(reason) => result.failed.push(BatchDeleteFailure {
                    id: id.clone(),
                    reason: reason.clone(),
                }),
                None => {
                    self.deleted.lock().unwrap().push(id.clone());
                    result.succeeded_ids.push(id.clone());
                }
            }
        }
        result.succeeded_count = result.succeeded_ids.len();
        result.failed_count = result.failed.len();
        Ok(result)
    }

    async fn get_job(&self, job_id: &str) -> Result<JobDetail> {
        let pending_errors = self.job_errors.load(Ordering::SeqCst);
        if pending_errors > 0 {
            self.job_errors.store(pending_errors - 1, Ordering::SeqCst);
            return Err(SyncError::transport("connection reset"));
        }
        let mut jobs = self.jobs.lock().unwrap();
        jobs.get_mut(job_id)
            .and_then(pop_sticky)
            .ok_or_else(|| SyncError::job_not_found(job_id))
    }

    async fn control_job(&self, job_id: &str, action: JobAction) -> Result<JobDetail> {
        self.control_calls
            .lock()
            .unwrap()
            .push((job_id.to_string(), action));
        let mut jobs = self.jobs.lock().unwrap();
        let queue = jobs
            .get_mut(job_id)
            .ok_or_else(|| SyncError::job_not_found(job_id))?;
        let mut detail = queue
            .front()
            .cloned()
            .ok_or_else(|| SyncError::job_not_found(job_id))?;
        match action {
            JobAction::Pause => detail.control = Some("paused".to_string()),
            JobAction::Resume => detail.control = Some("running".to_string()),
            JobAction::Cancel => detail.control = Some("canceled".to_string()),
            JobAction::Retry => {
                detail.stage = "translating".to_string();
                detail.control = Some("running".to_string());
            }
        }
        queue.clear();
        queue.push_back(detail.clone());
        Ok(detail)
    }

    async fn create_translate_job(&self, request: &TranslateRequest) -> Result<String> {
        let n = self.next_job.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = format!("job-{}", n);
        let mut detail = job_detail(&job_id, "pending", "running");
        detail.document_id = request.document_id.clone();
        self.push_job(detail);
        Ok(job_id)
    }
}

/// [`EventSource`] whose streams are fed by the test.
#[derive(Default)]
pub struct FakeSource {
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<Result<ProgressEvent>>>>,
    refused: Mutex<HashSet<String>>,
    pub connects: AtomicUsize,
}

impl FakeSource {
    /// Make every connect for `document_id` fail.
    pub fn refuse(&self, document_id: &str) {
        self.refused.lock().unwrap().insert(document_id.to_string());
    }

    pub fn is_connected(&self, document_id: &str) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(document_id)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Deliver an event, waiting for the subscription to connect first.
    pub async fn emit(&self, document_id: &str, event: ProgressEvent) {
        for _ in 0..500 {
            let sent = {
                let senders = self.senders.lock().unwrap();
                senders
                    .get(document_id)
                    .map(|tx| tx.send(Ok(event.clone())).is_ok())
            };
            if sent == Some(true) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no subscriber for {}", document_id);
    }
}

#[async_trait]
impl EventSource for FakeSource {
    async fn connect(&self, document_id: &str) -> Result<EventStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refused.lock().unwrap().contains(document_id) {
            return Err(SyncError::transport("connection refused"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap()
            .insert(document_id.to_string(), tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// Poll `check` on the (paused) clock until it holds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..2_000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached");
}
