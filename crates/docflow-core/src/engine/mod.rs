//! The sync engine: one instance per client session.
//!
//! Owns the registry, the push transport, the job tracker and every
//! background task. All shared state (subscriptions, in-progress
//! confirmations, watchdog flags) lives on the instance; nothing is global.
//!
//! Background tasks run as children of the engine's cancellation token and
//! stop on [`SyncEngine::shutdown`].

mod tracking;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::api::{BatchDeleteResult, DocumentApi, HttpApi, ProgressEvent, TranslateRequest};
use crate::config::{PushChannel, Settings, SyncTimings};
use crate::error::{Notice, Result, SyncError};
use crate::jobs::JobTracker;
use crate::models::{new_temp_id, Document, TranslationJob};
use crate::pipeline::{
    reconcile, DocumentPatch, DocumentRegistry, ParsingWatchdog, ReconcileGate,
    ReconcileTrigger, RegistryEvent,
};
use crate::session::SessionStore;
use crate::transport::{
    EventSource, EventTransport, ReconnectPolicy, SseEventSource, SubscriptionHandle,
    WsEventSource,
};

/// Receivers for everything the engine publishes.
pub struct EngineEvents {
    pub documents: mpsc::Receiver<RegistryEvent>,
    pub jobs: mpsc::Receiver<TranslationJob>,
    pub notices: mpsc::Receiver<Notice>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Project whose documents make up the list. Without one, reconciliation is off.
    pub scope: Option<String>,
    pub timings: SyncTimings,
}

impl From<&Settings> for EngineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            scope: settings.project_id.clone(),
            timings: settings.timings.clone(),
        }
    }
}

struct EngineInner {
    api: Arc<dyn DocumentApi>,
    transport: EventTransport,
    registry: DocumentRegistry,
    jobs: JobTracker,
    session: SessionStore,
    options: EngineOptions,
    subscriptions: Mutex<HashMap<String, SubscriptionHandle>>,
    /// Documents tracked by pulling after their push channel gave up.
    degraded: Mutex<HashSet<String>>,
    confirming: Mutex<HashSet<String>>,
    /// Documents already warned about an unresolved confirmation.
    unresolved: Mutex<HashSet<String>>,
    gate: Mutex<ReconcileGate>,
    watchdog: Mutex<ParsingWatchdog>,
    notice_tx: mpsc::Sender<Notice>,
    cancel: CancellationToken,
}

/// Keeps local document and job state consistent with the server.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn DocumentApi>,
        source: Arc<dyn EventSource>,
        session: SessionStore,
        options: EngineOptions,
    ) -> (Self, EngineEvents) {
        let cancel = CancellationToken::new();
        let (notice_tx, notices) = mpsc::channel(256);
        let (registry, documents) = DocumentRegistry::new(options.timings.fallback_tau());
        let (jobs, job_rx) = JobTracker::new(
            api.clone(),
            session.clone(),
            &options.timings,
            notice_tx.clone(),
            cancel.clone(),
        );
        let transport = EventTransport::new(source, ReconnectPolicy::from_timings(&options.timings));

        let inner = EngineInner {
            api,
            transport,
            registry,
            jobs,
            session,
            gate: Mutex::new(ReconcileGate::new(options.timings.reconcile_window())),
            watchdog: Mutex::new(ParsingWatchdog::new(options.timings.parse_stall_threshold())),
            options,
            subscriptions: Mutex::new(HashMap::new()),
            degraded: Mutex::new(HashSet::new()),
            confirming: Mutex::new(HashSet::new()),
            unresolved: Mutex::new(HashSet::new()),
            notice_tx,
            cancel,
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            EngineEvents {
                documents,
                jobs: job_rx,
                notices,
            },
        )
    }

    /// Engine talking to a real server over HTTP and its push channel.
    pub fn connect(settings: &Settings, session: SessionStore) -> (Self, EngineEvents) {
        let api = HttpApi::new(&settings.server_url);
        let source: Arc<dyn EventSource> = match settings.push_channel {
            PushChannel::Websocket => Arc::new(WsEventSource::new(&api)),
            PushChannel::Sse => Arc::new(SseEventSource::new(&api)),
        };
        tracing::debug!(channel = ?settings.push_channel, "Push channel selected");
        Self::new(
            Arc::new(api),
            source,
            session,
            EngineOptions::from(settings),
        )
    }

    /// Start background loops and resume persisted jobs.
    ///
    /// Returns the number of jobs resumed.
    pub async fn start(&self) -> usize {
        self.spawn_watchdog();
        self.spawn_reconcile_timer();
        self.inner.jobs.restore().await
    }

    /// Stop every background task and subscription.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down sync engine");
        self.inner.cancel.cancel();
        self.inner.jobs.shutdown().await;
        let mut subs = self.inner.subscriptions.lock().await;
        for (_, handle) in subs.drain() {
            handle.close();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    fn notice(&self, notice: Notice) {
        let _ = self.inner.notice_tx.try_send(notice);
    }

    // ---- Documents ----

    /// Documents in user-facing order.
    pub async fn documents(&self) -> Vec<Document> {
        let order = self.inner.session.document_order().await;
        self.inner.registry.list(Some(&order)).await
    }

    pub async fn document(&self, id: &str) -> Option<Document> {
        self.inner.registry.get(id).await
    }

    /// Persist a user-chosen list order.
    pub async fn set_order(&self, ids: Vec<String>) {
        self.inner.session.set_document_order(ids).await;
    }

    /// Register a file the user started uploading. Returns the speculative entry.
    pub async fn begin_upload(&self, title: &str, lang_in: &str, lang_out: &str) -> Result<Document> {
        let id = new_temp_id();
        let doc = Document::uploading(id.clone(), title, lang_in, lang_out);
        let applied = self
            .inner
            .registry
            .apply(&id, DocumentPatch::Create(doc))
            .await?;
        tracing::debug!(temp_id = %id, title = %title, "Upload started");
        applied
            .document
            .ok_or_else(|| SyncError::document_not_found(id))
    }

    /// Transfer progress for an upload, as a 0-1 ratio or 0-100 percentage.
    pub async fn report_upload_progress(&self, temp_id: &str, progress: f64) -> Result<Document> {
        let applied = self
            .inner
            .registry
            .apply(
                temp_id,
                DocumentPatch::Event(ProgressEvent::uploading(progress)),
            )
            .await?;
        applied
            .document
            .ok_or_else(|| SyncError::document_not_found(temp_id))
    }

    /// The server accepted an upload: move the entry to its real id and follow it.
    pub async fn upload_accepted(&self, temp_id: &str, document_id: &str) -> Result<Document> {
        let doc = self.inner.registry.rekey(temp_id, document_id).await?;
        self.inner
            .session
            .rename_document(temp_id, document_id)
            .await;
        tracing::info!(temp_id = %temp_id, document_id = %document_id, "Upload accepted");
        if !doc.is_ready() {
            self.track(document_id).await;
        }
        Ok(doc)
    }

    /// The upload never reached the server; drop the speculative entry.
    pub async fn upload_failed(&self, temp_id: &str, reason: &str) -> Result<()> {
        tracing::warn!(temp_id = %temp_id, reason = %reason, "Upload failed");
        self.inner
            .registry
            .apply(temp_id, DocumentPatch::Remove)
            .await?;
        Ok(())
    }

    pub async fn mark_thumbnail_failed(&self, id: &str) -> Result<()> {
        self.inner
            .registry
            .apply(id, DocumentPatch::ThumbnailFailed)
            .await?;
        Ok(())
    }

    /// Start following a server document by id.
    pub async fn watch_document(&self, id: &str) -> Result<Document> {
        if self.inner.registry.get(id).await.is_none() {
            let detail = self.inner.api.get_document(id).await?;
            let doc = reconcile::document_from_summary(&detail.summary);
            self.inner
                .registry
                .apply(id, DocumentPatch::Create(doc))
                .await?;
            if detail.summary.is_parsed() && detail.summary.confirmed_pages().is_none() {
                self.spawn_confirmation(id);
            }
        }
        let doc = self
            .inner
            .registry
            .get(id)
            .await
            .ok_or_else(|| SyncError::document_not_found(id))?;
        if !doc.is_ready() {
            self.track(id).await;
        }
        Ok(doc)
    }

    /// Pull the authoritative list now, bypassing the refresh window.
    pub async fn refresh(&self) -> Result<Vec<Document>> {
        self.reconcile(ReconcileTrigger::Explicit).await?;
        Ok(self.documents().await)
    }

    /// Delete one document.
    ///
    /// Speculative entries are dropped locally. A server-side failure keeps
    /// the entry with the reason attached.
    pub async fn delete_document(&self, id: &str) -> Result<()> {
        if !self.inner.registry.contains(id).await {
            return Err(SyncError::document_not_found(id));
        }
        if !self.inner.registry.is_acknowledged(id).await {
            self.forget(id).await;
            return Ok(());
        }

        match self.inner.api.delete_document(id).await {
            Ok(()) | Err(SyncError::Http { status: 404, .. }) => {
                tracing::info!(document_id = %id, "Document deleted");
                self.forget(id).await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(document_id = %id, error = %e, "Delete failed");
                self.record_delete_failure(id, e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Delete several documents. Partial failure is a normal result: the
    /// succeeded ids are gone, the failed ones stay with their reason.
    pub async fn batch_delete(&self, ids: &[String]) -> Result<BatchDeleteResult> {
        let mut result = BatchDeleteResult::default();
        let mut remote = Vec::with_capacity(ids.len());

        for id in ids {
            let known = self.inner.registry.contains(id).await;
            if known && !self.inner.registry.is_acknowledged(id).await {
                self.forget(id).await;
                result.succeeded_ids.push(id.clone());
            } else {
                remote.push(id.clone());
            }
        }

        if !remote.is_empty() {
            let server = match self.inner.api.batch_delete(&remote).await {
                Ok(server) => server,
                Err(e) => {
                    tracing::error!(count = remote.len(), error = %e, "Batch delete failed");
                    for id in &remote {
                        self.record_delete_failure(id, e.to_string()).await;
                    }
                    return Err(e);
                }
            };
            for id in &server.succeeded_ids {
                self.forget(id).await;
                result.succeeded_ids.push(id.clone());
            }
            for failure in server.failed {
                self.record_delete_failure(&failure.id, failure.reason.clone())
                    .await;
                result.failed.push(failure);
            }
        }

        result.succeeded_count = result.succeeded_ids.len();
        result.failed_count = result.failed.len();
        if result.failed_count > 0 {
            tracing::warn!(
                succeeded = result.succeeded_count,
                failed = result.failed_count,
                "Batch delete partially failed"
            );
        } else {
            tracing::info!(count = result.succeeded_count, "Batch delete completed");
        }
        Ok(result)
    }

    async fn record_delete_failure(&self, id: &str, reason: String) {
        if let Err(e) = self
            .inner
            .registry
            .apply(
                id,
                DocumentPatch::DeleteFailed {
                    reason: reason.clone(),
                },
            )
            .await
        {
            tracing::debug!(document_id = %id, error = %e, "Delete failure for untracked document");
        }
        self.notice(Notice::DeleteFailed {
            document_id: id.to_string(),
            reason,
        });
    }

    /// Drop every trace of a document.
    async fn forget(&self, id: &str) {
        self.unsubscribe(id).await;
        let _ = self.inner.registry.apply(id, DocumentPatch::Remove).await;
        self.inner.confirming.lock().await.remove(id);
        self.inner.unresolved.lock().await.remove(id);
        self.inner.session.forget_document(id).await;
    }

    // ---- Jobs ----

    pub async fn start_translation(
        &self,
        document_id: &str,
        lang_in: &str,
        lang_out: &str,
        provider: &str,
    ) -> Result<TranslationJob> {
        let request = TranslateRequest {
            document_id: document_id.to_string(),
            lang_in: lang_in.to_string(),
            lang_out: lang_out.to_string(),
            provider: provider.to_string(),
        };
        self.inner.jobs.start_translation(&request).await
    }

    pub async fn track_job(&self, job_id: &str) -> Result<TranslationJob> {
        self.inner.jobs.track(job_id).await
    }

    pub async fn pause_job(&self, job_id: &str) -> Result<TranslationJob> {
        self.inner.jobs.pause(job_id).await
    }

    pub async fn resume_job(&self, job_id: &str) -> Result<TranslationJob> {
        self.inner.jobs.resume(job_id).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<TranslationJob> {
        self.inner.jobs.cancel(job_id).await
    }

    pub async fn retry_job(&self, job_id: &str) -> Result<TranslationJob> {
        self.inner.jobs.retry(job_id).await
    }

    pub async fn job(&self, job_id: &str) -> Option<TranslationJob> {
        self.inner.jobs.get(job_id).await
    }

    pub async fn jobs(&self) -> Vec<TranslationJob> {
        self.inner.jobs.list().await
    }

    pub async fn jobs_for_document(&self, document_id: &str) -> Vec<TranslationJob> {
        self.inner.jobs.for_document(document_id).await
    }
}
