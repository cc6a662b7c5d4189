//! Background tracking: subscriptions, confirmation, pull fallback,
//! reconciliation and the parsing watchdog.

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::{Instant, MissedTickBehavior};

use super::SyncEngine;
use crate::api::ProgressEvent;
use crate::error::{Notice, Result, SyncError};
use crate::pipeline::{DocumentPatch, MergeOutcome, ReconcileTrigger, StalledDocument};
use crate::transport::{Subscription, TransportMessage};

impl SyncEngine {
    /// Subscribe to a document's push channel unless already subscribed.
    pub(crate) async fn track(&self, document_id: &str) {
        let subscription = {
            let mut subs = self.inner.subscriptions.lock().await;
            if subs.get(document_id).is_some_and(|h| !h.is_closed()) {
                return;
            }
            let subscription = self
                .inner
                .transport
                .subscribe(document_id, &self.inner.cancel);
            subs.insert(document_id.to_string(), subscription.handle());
            subscription
        };

        tokio::spawn(self.clone().follow(document_id.to_string(), subscription));
    }

    pub(crate) async fn unsubscribe(&self, document_id: &str) {
        if let Some(handle) = self.inner.subscriptions.lock().await.remove(document_id) {
            handle.close();
        }
    }

    pub async fn is_subscribed(&self, document_id: &str) -> bool {
        self.inner
            .subscriptions
            .lock()
            .await
            .get(document_id)
            .is_some_and(|h| !h.is_closed())
    }

    /// Pump one subscription into the registry until the document is Ready,
    /// the channel degrades, or the subscription is closed.
    ///
    /// Boxed: tracking can finalize, which reconciles, which can start tracking.
    fn follow(self, document_id: String, mut subscription: Subscription) -> BoxFuture<'static, ()> {
        async move {
            tracing::info!(document_id = %document_id, "Tracking document");

            while let Some(message) = subscription.recv().await {
                match message {
                    TransportMessage::Event(event) => {
                        if !self.handle_event(&document_id, event).await {
                            break;
                        }
                    }
                    TransportMessage::Degraded {
                        attempts,
                        last_error,
                    } => {
                        tracing::warn!(
                            document_id = %document_id,
                            attempts,
                            error = %last_error,
                            "Push channel degraded, falling back to pulling"
                        );
                        self.notice(Notice::TransportDegraded {
                            document_id: document_id.clone(),
                            attempts,
                            error: last_error,
                        });
                        self.start_degraded(&document_id).await;
                        break;
                    }
                }
            }

            subscription.close();
            {
                // A newer subscription for the same id stays registered.
                let mut subs = self.inner.subscriptions.lock().await;
                if subs.get(&document_id).is_some_and(|h| h.is_closed()) {
                    subs.remove(&document_id);
                }
            }
            tracing::info!(document_id = %document_id, "Stopped tracking document");
        }
        .boxed()
    }

    /// Fold one event into the registry. Returns whether tracking should continue.
    async fn handle_event(&self, document_id: &str, event: ProgressEvent) -> bool {
        tracing::debug!(document_id = %document_id, status = ?event.status, "Progress event");
        match self
            .inner
            .registry
            .apply(document_id, DocumentPatch::Event(event))
            .await
        {
            Ok(applied) => {
                if applied.finalized {
                    self.on_finalized(document_id).await;
                    return false;
                }
                if applied.needs_confirmation {
                    self.spawn_confirmation(document_id);
                }
                applied.document.is_some_and(|d| !d.is_ready())
            }
            Err(SyncError::NotFound { .. }) => {
                tracing::debug!(document_id = %document_id, "Event for untracked document");
                false
            }
            Err(e) => {
                tracing::warn!(document_id = %document_id, error = %e, "Failed to apply event");
                true
            }
        }
    }

    async fn on_finalized(&self, document_id: &str) {
        self.unsubscribe(document_id).await;
        self.inner.unresolved.lock().await.remove(document_id);

        self.spawn_reconcile(ReconcileTrigger::Finalized);
    }

    fn spawn_reconcile(&self, trigger: ReconcileTrigger) {
        let engine = self.clone();
        tokio::spawn(async move {
            // Failures are already reported as notices.
            let _ = engine.reconcile(trigger).await;
        });
    }

    /// Run the two-phase Ready confirmation in the background.
    pub(crate) fn spawn_confirmation(&self, document_id: &str) {
        let engine = self.clone();
        let id = document_id.to_string();
        tokio::spawn(async move {
            engine.confirm_ready(&id).await;
        });
    }

    /// Fetch the document until it reports a page count, within a bound.
    ///
    /// Only one confirmation runs per document. Returns whether it is Ready.
    pub(crate) async fn confirm_ready(&self, document_id: &str) -> bool {
        if !self
            .inner
            .confirming
            .lock()
            .await
            .insert(document_id.to_string())
        {
            return false;
        }
        let ready = self.run_confirmation(document_id).await;
        self.inner.confirming.lock().await.remove(document_id);
        ready
    }

    async fn run_confirmation(&self, document_id: &str) -> bool {
        let timings = &self.inner.options.timings;
        let max_attempts = timings.confirm_max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::select! {
                    biased;
                    _ = self.inner.cancel.cancelled() => return false,
                    _ = tokio::time::sleep(timings.confirm_delay()) => {}
                }
            }
            match self.inner.registry.get(document_id).await {
                None => return false,
                Some(doc) if doc.is_ready() => return true,
                Some(_) => {}
            }

            let detail = match self.inner.api.get_document(document_id).await {
                Ok(detail) => detail,
                Err(e) => {
                    tracing::debug!(document_id = %document_id, attempt, error = %e, "Confirmation fetch failed");
                    continue;
                }
            };
            match self
                .inner
                .registry
                .apply(document_id, DocumentPatch::Confirm(detail.summary))
                .await
            {
                Ok(applied) if applied.finalized => {
                    self.on_finalized(document_id).await;
                    return true;
                }
                Ok(_) => {
                    tracing::debug!(document_id = %document_id, attempt, "Parsed without page count yet");
                }
                Err(_) => return false,
            }
        }

        if self
            .inner
            .unresolved
            .lock()
            .await
            .insert(document_id.to_string())
        {
            tracing::warn!(
                document_id = %document_id,
                attempts = max_attempts,
                "Server reported parsed but no page count arrived"
            );
            self.notice(Notice::ConfirmationUnresolved {
                document_id: document_id.to_string(),
                attempts: max_attempts,
            });
        }
        false
    }

    /// Follow a document by pulling after its push channel gave up.
    async fn start_degraded(&self, document_id: &str) {
        if !self
            .inner
            .degraded
            .lock()
            .await
            .insert(document_id.to_string())
        {
            return;
        }
        let engine = self.clone();
        let id = document_id.to_string();
        tokio::spawn(async move {
            engine.run_degraded(&id).await;
            engine.inner.degraded.lock().await.remove(&id);
        });
    }

    async fn run_degraded(&self, document_id: &str) {
        let timings = &self.inner.options.timings;
        let interval = timings.degraded_poll_interval();

        for _ in 0..timings.degraded_poll_max_iterations {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            match self.inner.registry.get(document_id).await {
                Some(doc) if !doc.is_ready() => {}
                _ => return,
            }

            match self.inner.api.get_progress(document_id).await {
                Ok(event) => {
                    if !self.handle_event(document_id, event).await {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(document_id = %document_id, error = %e, "Progress pull failed, estimating");
                    let _ = self
                        .inner
                        .registry
                        .apply(document_id, DocumentPatch::FallbackTick)
                        .await;
                }
            }
        }
        tracing::warn!(document_id = %document_id, "Stopped pulling progress, keeping last state");
    }

    pub async fn is_degraded(&self, document_id: &str) -> bool {
        self.inner.degraded.lock().await.contains(document_id)
    }

    /// Pull the authoritative list and merge it, subject to the refresh window.
    ///
    /// Returns `None` when skipped (no scope, or inside the window).
    pub(crate) async fn reconcile(&self, trigger: ReconcileTrigger) -> Result<Option<MergeOutcome>> {
        let Some(scope) = self.inner.options.scope.as_deref() else {
            return Ok(None);
        };
        if !self
            .inner
            .gate
            .lock()
            .await
            .try_begin(trigger, Instant::now())
        {
            return Ok(None);
        }

        let snapshot = match self.inner.api.list_documents(scope).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(scope = %scope, error = %e, "Refresh failed, keeping current list");
                self.notice(Notice::RefreshFailed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let outcome = self.inner.registry.merge_snapshot(&snapshot).await;
        for id in &outcome.dropped {
            self.unsubscribe(id).await;
        }
        let added: Vec<String> = outcome.added_in_flight().map(|d| d.id.clone()).collect();
        for id in &added {
            self.track(id).await;
        }
        for id in &outcome.confirm_candidates {
            self.spawn_confirmation(id);
        }
        tracing::debug!(?trigger, documents = snapshot.len(), "Reconciled with server");
        Ok(Some(outcome))
    }

    pub(crate) fn spawn_reconcile_timer(&self) {
        let engine = self.clone();
        let cancel = self.inner.cancel.clone();
        let period = self.inner.options.timings.reconcile_window();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; the initial list is the caller's.
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if engine.inner.registry.any_in_flight().await {
                            let _ = engine.reconcile(ReconcileTrigger::Timer).await;
                        }
                    }
                }
            }
        });
    }

    /// Flag documents stuck in Parsing. Each is reported once.
    pub async fn check_stalls(&self) -> Vec<StalledDocument> {
        let parsing = self.inner.registry.parsing_durations().await;
        let stalled = self.inner.watchdog.lock().await.scan(&parsing);
        for s in &stalled {
            tracing::warn!(
                document_id = %s.document_id,
                elapsed_secs = s.elapsed.as_secs(),
                "Document parsing longer than expected"
            );
            self.notice(Notice::ParsingStalled {
                document_id: s.document_id.clone(),
                elapsed_secs: s.elapsed.as_secs(),
            });
        }
        stalled
    }

    pub(crate) fn spawn_watchdog(&self) {
        let engine = self.clone();
        let cancel = self.inner.cancel.clone();
        let period = self.inner.options.timings.watchdog_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        engine.check_stalls().await;
                    }
                }
            }
        });
    }
}
