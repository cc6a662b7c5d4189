//! The document registry: single owner of canonical document state.
//!
//! Every mutation goes through one of three entry points, each holding the
//! write lock for its whole read-modify-write:
//!
//! - [`DocumentRegistry::apply`] for a single-entry patch
//! - [`DocumentRegistry::rekey`] to move a temporary entry to its server id
//! - [`DocumentRegistry::merge_snapshot`] to fold in the authoritative list
//!
//! An existing entry's document is only replaced through `Entry::set`, which
//! keeps the parse start time in step with the status. Listeners receive a
//! [`RegistryEvent`] per change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

use super::normalizer;
use super::reconcile::{self, LocalEntry, MergeOutcome, Origin};
use crate::api::{DocumentSummary, ProgressEvent};
use crate::error::{Result, SyncError};
use crate::models::{is_temp_id, Document, DocumentStatus};

/// A change to one entry.
#[derive(Debug, Clone)]
pub enum DocumentPatch {
    /// Insert a new entry. No-op if the id already exists.
    Create(Document),
    /// A raw progress event from the push or pull channel.
    Event(ProgressEvent),
    /// Authoritative fetch for a document held at 99.
    Confirm(DocumentSummary),
    /// Advance the time-based estimate.
    FallbackTick,
    DeleteFailed { reason: String },
    ThumbnailFailed,
    Remove,
}

/// Change notification for listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    Upserted { document: Document },
    /// A temporary entry now lives under its server id.
    Rekeyed { from: String, document: Document },
    Removed { id: String },
    /// The entry just became Ready.
    Finalized { document: Document },
}

/// What [`DocumentRegistry::apply`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// State after the patch. `None` after a removal.
    pub document: Option<Document>,
    pub needs_confirmation: bool,
    /// The patch moved the entry to Ready.
    pub finalized: bool,
}

#[derive(Debug, Clone)]
struct Entry {
    doc: Document,
    /// The server knows this id.
    acknowledged: bool,
    /// When the entry first entered Parsing.
    parse_started: Option<Instant>,
}

impl Entry {
    fn new(doc: Document, acknowledged: bool) -> Self {
        let parse_started = (doc.status == DocumentStatus::Parsing).then(Instant::now);
        Self {
            doc,
            acknowledged,
            parse_started,
        }
    }

    fn parse_elapsed(&self, now: Instant) -> Duration {
        self.parse_started
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default()
    }

    /// Replace the document, tracking when Parsing began.
    fn set(&mut self, doc: Document, now: Instant) {
        if doc.status == DocumentStatus::Parsing && self.parse_started.is_none() {
            self.parse_started = Some(now);
        }
        if doc.status == DocumentStatus::Ready {
            self.parse_started = None;
        }
        self.doc = doc;
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<String, Entry>,
    /// Insertion order.
    order: Vec<String>,
}

impl RegistryState {
    fn remove(&mut self, id: &str) -> Option<Entry> {
        let entry = self.entries.remove(id)?;
        self.order.retain(|o| o != id);
        Some(entry)
    }
}

/// Tracks every document the client knows about.
#[derive(Clone)]
pub struct DocumentRegistry {
    state: Arc<RwLock<RegistryState>>,
    fallback_tau: Duration,
    notify_tx: mpsc::Sender<RegistryEvent>,
}

impl DocumentRegistry {
    pub fn new(fallback_tau: Duration) -> (Self, mpsc::Receiver<RegistryEvent>) {
        let (notify_tx, notify_rx) = mpsc::channel(256);
        (
            Self {
                state: Arc::new(RwLock::new(RegistryState::default())),
                fallback_tau,
                notify_tx,
            },
            notify_rx,
        )
    }

    fn notify(&self, event: RegistryEvent) {
        // Listeners may lag or be gone; state is still consistent.
        let _ = self.notify_tx.try_send(event);
    }

    /// Apply a patch to one entry.
    ///
    /// Fails with `NotFound` if the entry does not exist (except for `Create`).
    pub async fn apply(&self, id: &str, patch: DocumentPatch) -> Result<Applied> {
        let mut state = self.state.write().await;
        let now = Instant::now();

        let patch = match patch {
            DocumentPatch::Create(doc) => return Ok(self.create(&mut state, id, doc)),
            DocumentPatch::Remove => return self.remove(&mut state, id),
            other => other,
        };

        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| SyncError::document_not_found(id))?;
        let was_ready = entry.doc.is_ready();
        let mut needs_confirmation = false;

        let next = match patch {
            DocumentPatch::Event(event) => {
                // Parse time is measured from the first parsing signal.
                let elapsed = entry.parse_elapsed(now);
                let out = normalizer::normalize(&entry.doc, &event, elapsed, self.fallback_tau);
                needs_confirmation = out.needs_confirmation;
                out.document
            }
            DocumentPatch::Confirm(summary) => normalizer::confirm(&entry.doc, &summary),
            DocumentPatch::FallbackTick => normalizer::fallback_tick(
                &entry.doc,
                entry.parse_elapsed(now),
                self.fallback_tau,
            ),
            DocumentPatch::DeleteFailed { reason } => {
                let mut doc = entry.doc.clone();
                doc.delete_error = Some(reason);
                doc
            }
            DocumentPatch::ThumbnailFailed => {
                let mut doc = entry.doc.clone();
                doc.thumbnail_failed = true;
                doc
            }
            DocumentPatch::Create(_) | DocumentPatch::Remove => entry.doc.clone(),
        };

        let changed = next != entry.doc;
        entry.set(next, now);
        let document = entry.doc.clone();
        let finalized = !was_ready && document.is_ready();

        if finalized {
            tracing::info!(document_id = %id, num_pages = ?document.num_pages, "Document ready");
            self.notify(RegistryEvent::Finalized {
                document: document.clone(),
            });
        } else if changed {
            self.notify(RegistryEvent::Upserted {
                document: document.clone(),
            });
        }

        Ok(Applied {
            document: Some(document),
            needs_confirmation,
            finalized,
        })
    }

    fn create(&self, state: &mut RegistryState, id: &str, mut doc: Document) -> Applied {
        if let Some(existing) = state.entries.get(id) {
            return Applied {
                document: Some(existing.doc.clone()),
                needs_confirmation: false,
                finalized: false,
            };
        }
        doc.id = id.to_string();
        let acknowledged = !is_temp_id(id);
        state
            .entries
            .insert(id.to_string(), Entry::new(doc.clone(), acknowledged));
        state.order.push(id.to_string());
        self.notify(RegistryEvent::Upserted {
            document: doc.clone(),
        });
        Applied {
            document: Some(doc),
            needs_confirmation: false,
            finalized: false,
        }
    }

    fn remove(&self, state: &mut RegistryState, id: &str) -> Result<Applied> {
        state
            .remove(id)
            .ok_or_else(|| SyncError::document_not_found(id))?;
        self.notify(RegistryEvent::Removed { id: id.to_string() });
        Ok(Applied {
            document: None,
            needs_confirmation: false,
            finalized: false,
        })
    }

    /// Move a temporary entry to its server-assigned id.
    ///
    /// Idempotent: if `temp_id` is gone and `real_id` exists, the rekey already
    /// happened. If both exist (the real id arrived first through a snapshot),
    /// they are folded into one entry at the temporary entry's position.
    pub async fn rekey(&self, temp_id: &str, real_id: &str) -> Result<Document> {
        let mut state = self.state.write().await;

        let Some(temp) = state.entries.get(temp_id).cloned() else {
            return state
                .entries
                .get(real_id)
                .map(|e| e.doc.clone())
                .ok_or_else(|| SyncError::document_not_found(temp_id));
        };

        let mut merged = temp.clone();
        merged.acknowledged = true;
        merged.doc.id = real_id.to_string();

        if let Some(existing) = state.entries.remove(real_id) {
            state.order.retain(|o| o != real_id);
            merged = fold(merged, existing);
        }

        state.entries.remove(temp_id);
        let position = state.order.iter().position(|o| o == temp_id);
        match position {
            Some(i) => state.order[i] = real_id.to_string(),
            None => state.order.push(real_id.to_string()),
        }
        let document = merged.doc.clone();
        state.entries.insert(real_id.to_string(), merged);

        tracing::debug!(temp_id = %temp_id, document_id = %real_id, "Rekeyed document");
        self.notify(RegistryEvent::Rekeyed {
            from: temp_id.to_string(),
            document: document.clone(),
        });
        Ok(document)
    }

    /// Merge the authoritative list into local state.
    pub async fn merge_snapshot(&self, snapshot: &[DocumentSummary]) -> MergeOutcome {
        let mut state = self.state.write().await;
        let now = Instant::now();

        let local: Vec<LocalEntry> = state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id))
            .map(|e| LocalEntry::classify(e.doc.clone(), e.acknowledged))
            .collect();
        let outcome = reconcile::merge(local, snapshot);

        let mut previous = std::mem::take(&mut state.entries);
        let mut order = Vec::with_capacity(outcome.entries.len());
        for merged in &outcome.entries {
            let id = merged.document.id.clone();
            let entry = match (merged.origin, previous.remove(&id)) {
                (Origin::Local, Some(mut entry)) => {
                    if entry.doc != merged.document {
                        let was_ready = entry.doc.is_ready();
                        entry.set(merged.document.clone(), now);
                        let document = entry.doc.clone();
                        self.notify(if !was_ready && document.is_ready() {
                            RegistryEvent::Finalized { document }
                        } else {
                            RegistryEvent::Upserted { document }
                        });
                    }
                    entry
                }
                _ => {
                    self.notify(RegistryEvent::Upserted {
                        document: merged.document.clone(),
                    });
                    Entry::new(merged.document.clone(), true)
                }
            };
            order.push(id.clone());
            state.entries.insert(id, entry);
        }
        state.order = order;

        for id in &outcome.dropped {
            self.notify(RegistryEvent::Removed { id: id.clone() });
        }

        tracing::debug!(
            total = state.order.len(),
            added = outcome.added.len(),
            dropped = outcome.dropped.len(),
            "Merged document snapshot"
        );
        outcome
    }

    pub async fn get(&self, id: &str) -> Option<Document> {
        self.state.read().await.entries.get(id).map(|e| e.doc.clone())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.state.read().await.entries.contains_key(id)
    }

    /// Whether the server has acknowledged this id.
    pub async fn is_acknowledged(&self, id: &str) -> bool {
        self.state
            .read()
            .await
            .entries
            .get(id)
            .is_some_and(|e| e.acknowledged)
    }

    /// All documents. Ids in `preferred` come first in that order, the rest
    /// follow in insertion order.
    pub async fn list(&self, preferred: Option<&[String]>) -> Vec<Document> {
        let state = self.state.read().await;
        let mut out = Vec::with_capacity(state.order.len());

        if let Some(preferred) = preferred {
            for id in preferred {
                if let Some(entry) = state.entries.get(id) {
                    if !out.iter().any(|d: &Document| &d.id == id) {
                        out.push(entry.doc.clone());
                    }
                }
            }
        }
        for id in &state.order {
            if out.iter().any(|d| &d.id == id) {
                continue;
            }
            if let Some(entry) = state.entries.get(id) {
                out.push(entry.doc.clone());
            }
        }
        out
    }

    /// Whether anything is still uploading or parsing.
    pub async fn any_in_flight(&self) -> bool {
        self.state
            .read()
            .await
            .entries
            .values()
            .any(|e| !e.doc.is_ready())
    }

    /// Acknowledged, not yet Ready document ids.
    pub async fn in_flight_ids(&self) -> Vec<String> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter(|id| {
                state
                    .entries
                    .get(*id)
                    .is_some_and(|e| e.acknowledged && !e.doc.is_ready())
            })
            .cloned()
            .collect()
    }

    /// Time spent in Parsing for every document currently parsing.
    pub async fn parsing_durations(&self) -> Vec<(String, Duration)> {
        let state = self.state.read().await;
        let now = Instant::now();
        state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id).map(|e| (id, e)))
            .filter(|(_, e)| e.doc.status == DocumentStatus::Parsing)
            .map(|(id, e)| (id.clone(), e.parse_elapsed(now)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Combine a temporary entry with the real entry that raced ahead of it.
fn fold(temp: Entry, real: Entry) -> Entry {
    let (mut base, other) = if real.doc.status >= temp.doc.status {
        (real, temp.clone())
    } else {
        (temp.clone(), real)
    };
    base.doc.id = temp.doc.id.clone();
    base.doc.progress = base.doc.status.clamp(base.doc.progress.max(other.doc.progress));
    if base.doc.title.is_empty() || base.doc.title == base.doc.id {
        base.doc.title = temp.doc.title.clone();
    }
    base.acknowledged = true;
    base.parse_started = match (base.parse_started, other.parse_started) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{EventStatus, ParseJobInfo};

    fn registry() -> (DocumentRegistry, mpsc::Receiver<RegistryEvent>) {
        DocumentRegistry::new(Duration::from_secs(60))
    }

    fn upload(id: &str) -> Document {
        Document::uploading(id, "paper.pdf", "en", "zh")
    }

    fn counts(done: u64, total: u64) -> ProgressEvent {
        ProgressEvent::parsing_job(ParseJobInfo {
            done: Some(done),
            total: Some(total),
            ..Default::default()
        })
    }

    fn summary(id: &str, status: &str, pages: i64) -> DocumentSummary {
        DocumentSummary {
            id: id.to_string(),
            title: Some("paper.pdf".to_string()),
            num_pages: Some(pages),
            lang_in: "en".to_string(),
            lang_out: "zh".to_string(),
            status: status.to_string(),
        }
    }

    #[tokio::test]
    async fn test_upload_to_ready_lifecycle() {
        let (reg, mut rx) = registry();

        reg.apply("temp-1", DocumentPatch::Create(upload("temp-1")))
            .await
            .unwrap();
        assert!(!reg.is_acknowledged("temp-1").await);

        reg.apply("temp-1", DocumentPatch::Event(ProgressEvent::uploading(0.2)))
            .await
            .unwrap();
        assert_eq!(reg.get("temp-1").await.unwrap().progress, 20.0);

        let doc = reg.rekey("temp-1", "doc-42").await.unwrap();
        assert_eq!(doc.id, "doc-42");
        assert!(reg.get("temp-1").await.is_none());
        assert!(reg.is_acknowledged("doc-42").await);

        let out = reg
            .apply("doc-42", DocumentPatch::Event(counts(3, 10)))
            .await
            .unwrap();
        let doc = out.document.unwrap();
        assert_eq!(doc.status, DocumentStatus::Parsing);
        assert!((doc.progress - 51.0).abs() < 1e-9);

        let out = reg
            .apply("doc-42", DocumentPatch::Event(ProgressEvent::parsed(Some(0))))
            .await
            .unwrap();
        assert!(out.needs_confirmation);
        assert!(!out.finalized);
        let doc = out.document.unwrap();
        assert_eq!(doc.status, DocumentStatus::Parsing);
        assert_eq!(doc.progress, 99.0);

        let out = reg
            .apply("doc-42", DocumentPatch::Confirm(summary("doc-42", "parsed", 12)))
            .await
            .unwrap();
        assert!(out.finalized);
        let doc = out.document.unwrap();
        assert_eq!(doc.status, DocumentStatus::Ready);
        assert_eq!(doc.progress, 100.0);
        assert_eq!(doc.num_pages, Some(12));

        let mut saw_rekey = false;
        let mut saw_final = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                RegistryEvent::Rekeyed { from, .. } => saw_rekey = from == "temp-1",
                RegistryEvent::Finalized { document } => saw_final = document.id == "doc-42",
                _ => {}
            }
        }
        assert!(saw_rekey);
        assert!(saw_final);
    }

    #[tokio::test]
    async fn test_rekey_is_idempotent() {
        let (reg, _rx) = registry();
        reg.apply("temp-1", DocumentPatch::Create(upload("temp-1")))
            .await
            .unwrap();
        reg.rekey("temp-1", "doc-1").await.unwrap();
        let again = reg.rekey("temp-1", "doc-1").await.unwrap();
        assert_eq!(again.id, "doc-1");
        assert_eq!(reg.len().await, 1);

        assert!(reg.rekey("temp-unknown", "doc-unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_rekey_folds_snapshot_entry() {
        let (reg, _rx) = registry();
        reg.apply("temp-0", DocumentPatch::Create(upload("temp-0")))
            .await
            .unwrap();
        reg.apply("temp-1", DocumentPatch::Create(upload("temp-1")))
            .await
            .unwrap();
        reg.apply("temp-1", DocumentPatch::Event(ProgressEvent::uploading(0.25)))
            .await
            .unwrap();

        // The snapshot raced ahead and already knows doc-1.
        reg.merge_snapshot(&[summary("doc-1", "parsing", 0)]).await;
        assert_eq!(reg.len().await, 3);

        let doc = reg.rekey("temp-1", "doc-1").await.unwrap();
        assert_eq!(reg.len().await, 2);
        assert_eq!(doc.status, DocumentStatus::Parsing);
        assert_eq!(doc.progress, 30.0);

        let order: Vec<String> = reg.list(None).await.into_iter().map(|d| d.id).collect();
        assert_eq!(order, vec!["temp-0", "doc-1"]);
    }

    #[tokio::test]
    async fn test_stale_events_do_not_regress() {
        let (reg, _rx) = registry();
        reg.apply("doc-1", DocumentPatch::Create(upload("doc-1")))
            .await
            .unwrap();
        reg.apply("doc-1", DocumentPatch::Event(counts(8, 10)))
            .await
            .unwrap();
        reg.apply("doc-1", DocumentPatch::Event(counts(2, 10)))
            .await
            .unwrap();
        reg.apply("doc-1", DocumentPatch::Event(ProgressEvent::uploading(0.1)))
            .await
            .unwrap();
        let doc = reg.get("doc-1").await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Parsing);
        assert!((doc.progress - 86.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_entry_is_not_found() {
        let (reg, _rx) = registry();
        let err = reg
            .apply("ghost", DocumentPatch::Event(ProgressEvent::new(EventStatus::Parsing)))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
        assert!(reg.apply("ghost", DocumentPatch::Remove).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_failure_and_thumbnail_flags() {
        let (reg, _rx) = registry();
        reg.apply("doc-1", DocumentPatch::Create(upload("doc-1")))
            .await
            .unwrap();
        reg.apply(
            "doc-1",
            DocumentPatch::DeleteFailed {
                reason: "locked".to_string(),
            },
        )
        .await
        .unwrap();
        reg.apply("doc-1", DocumentPatch::ThumbnailFailed)
            .await
            .unwrap();
        let doc = reg.get("doc-1").await.unwrap();
        assert_eq!(doc.delete_error.as_deref(), Some("locked"));
        assert!(doc.thumbnail_failed);
    }

    #[tokio::test]
    async fn test_merge_keeps_in_flight_and_speculative() {
        let (reg, _rx) = registry();
        reg.apply("temp-1", DocumentPatch::Create(upload("temp-1")))
            .await
            .unwrap();
        reg.apply("X", DocumentPatch::Create(upload("X")))
            .await
            .unwrap();
        reg.apply("X", DocumentPatch::Event(counts(5, 20)))
            .await
            .unwrap();
        reg.apply("R", DocumentPatch::Create(upload("R")))
            .await
            .unwrap();
        reg.apply("R", DocumentPatch::Event(ProgressEvent::parsed(Some(4))))
            .await
            .unwrap();

        let outcome = reg.merge_snapshot(&[summary("N", "parsed", 6)]).await;
        assert_eq!(outcome.dropped, vec!["R".to_string()]);

        let ids: Vec<String> = reg.list(None).await.into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["temp-1", "X", "N"]);
        let x = reg.get("X").await.unwrap();
        assert_eq!(x.status, DocumentStatus::Parsing);
        assert!((x.progress - 47.5).abs() < 1e-9);
        assert!(!reg.is_acknowledged("temp-1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_refreshes_settled_and_keeps_parse_clock() {
        let (reg, mut rx) = registry();
        reg.apply("R", DocumentPatch::Create(upload("R")))
            .await
            .unwrap();
        reg.apply("R", DocumentPatch::Event(ProgressEvent::parsed(Some(4))))
            .await
            .unwrap();
        reg.apply("P", DocumentPatch::Create(upload("P")))
            .await
            .unwrap();
        reg.apply("P", DocumentPatch::Event(counts(1, 10)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        while rx.try_recv().is_ok() {}

        let mut renamed = summary("R", "parsed", 5);
        renamed.title = Some("renamed.pdf".to_string());
        reg.merge_snapshot(&[renamed, summary("P", "parsing", 0)])
            .await;

        let r = reg.get("R").await.unwrap();
        assert_eq!(r.title, "renamed.pdf");
        assert_eq!(r.num_pages, Some(5));
        assert!(r.is_ready());
        match rx.try_recv() {
            Ok(RegistryEvent::Upserted { document }) => assert_eq!(document.id, "R"),
            other => panic!("expected upsert for R, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());

        let durations = reg.parsing_durations().await;
        assert_eq!(durations.len(), 1);
        assert_eq!(durations[0].0, "P");
        assert!(durations[0].1 >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_list_honours_preferred_order() {
        let (reg, _rx) = registry();
        for id in ["a", "b", "c"] {
            reg.apply(id, DocumentPatch::Create(upload(id)))
                .await
                .unwrap();
        }
        let preferred = vec!["c".to_string(), "missing".to_string(), "a".to_string()];
        let ids: Vec<String> = reg
            .list(Some(&preferred))
            .await
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parsing_durations_and_fallback_tick() {
        let (reg, _rx) = registry();
        reg.apply("doc-1", DocumentPatch::Create(upload("doc-1")))
            .await
            .unwrap();
        reg.apply(
            "doc-1",
            DocumentPatch::Event(ProgressEvent::new(EventStatus::Parsing)),
        )
        .await
        .unwrap();
        let start = reg.get("doc-1").await.unwrap().progress;

        tokio::time::advance(Duration::from_secs(120)).await;
        let durations = reg.parsing_durations().await;
        assert_eq!(durations.len(), 1);
        assert!(durations[0].1 >= Duration::from_secs(120));

        reg.apply("doc-1", DocumentPatch::FallbackTick).await.unwrap();
        let ticked = reg.get("doc-1").await.unwrap().progress;
        assert!(ticked > start);
        assert!(ticked < 99.0);
    }
}
