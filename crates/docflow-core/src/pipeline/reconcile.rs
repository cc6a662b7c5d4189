//! Merging the authoritative document list into local state.
//!
//! Local entries are classified before merging so each class is handled by
//! exactly one rule:
//!
//! | local entry            | in snapshot        | not in snapshot |
//! |------------------------|--------------------|-----------------|
//! | speculative (temp id)  | -                  | kept            |
//! | in-flight              | kept, maybe confirm| kept            |
//! | settled (Ready)        | fields refreshed   | dropped         |
//!
//! Snapshot entries with no local counterpart are appended.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

use crate::api::DocumentSummary;
use crate::models::{Document, DocumentStatus, PARSE_CEILING, READY_PROGRESS, UPLOAD_CEILING};

/// A local entry, classified for merging.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEntry {
    /// Created locally, not yet acknowledged by the server.
    Speculative(Document),
    /// Acknowledged but not Ready.
    InFlight(Document),
    Settled(Document),
}

impl LocalEntry {
    pub fn classify(document: Document, acknowledged: bool) -> Self {
        if !acknowledged {
            LocalEntry::Speculative(document)
        } else if document.is_ready() {
            LocalEntry::Settled(document)
        } else {
            LocalEntry::InFlight(document)
        }
    }

    pub fn document(&self) -> &Document {
        match self {
            LocalEntry::Speculative(d) | LocalEntry::InFlight(d) | LocalEntry::Settled(d) => d,
        }
    }
}

/// Where a merged entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedEntry {
    pub document: Document,
    pub origin: Origin,
}

/// Result of [`merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Merged list: surviving local entries in their order, then new snapshot entries.
    pub entries: Vec<MergedEntry>,
    /// Snapshot-only ids that were appended.
    pub added: Vec<String>,
    /// Ready ids absent from the snapshot.
    pub dropped: Vec<String>,
    /// In-flight ids the snapshot reports as parsed; they need an authoritative fetch.
    pub confirm_candidates: Vec<String>,
}

impl MergeOutcome {
    /// Appended entries that still need live tracking.
    pub fn added_in_flight(&self) -> impl Iterator<Item = &Document> {
        self.entries
            .iter()
            .filter(|e| e.origin == Origin::Snapshot && !e.document.is_ready())
            .map(|e| &e.document)
    }
}

/// Build a local document from a snapshot row the client has never seen.
pub fn document_from_summary(summary: &DocumentSummary) -> Document {
    let title = summary
        .title
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| summary.id.clone());
    let mut doc = Document::uploading(
        summary.id.clone(),
        title,
        summary.lang_in.clone(),
        summary.lang_out.clone(),
    );
    doc.status = DocumentStatus::Parsing;
    match (summary.is_parsed(), summary.confirmed_pages()) {
        (true, Some(pages)) => {
            doc.status = DocumentStatus::Ready;
            doc.progress = READY_PROGRESS;
            doc.num_pages = Some(pages);
        }
        (true, None) => doc.progress = PARSE_CEILING,
        (false, _) => doc.progress = UPLOAD_CEILING,
    }
    doc
}

/// Refresh a Ready entry from the snapshot. Progress and status stay.
fn refresh_settled(local: &Document, summary: &DocumentSummary) -> Document {
    let mut doc = local.clone();
    if let Some(title) = summary.title.as_ref().filter(|t| !t.is_empty()) {
        doc.title = title.clone();
    }
    if let Some(pages) = summary.confirmed_pages() {
        doc.num_pages = Some(pages);
    }
    if !summary.lang_in.is_empty() {
        doc.lang_in = summary.lang_in.clone();
    }
    if !summary.lang_out.is_empty() {
        doc.lang_out = summary.lang_out.clone();
    }
    doc
}

/// Merge a snapshot into the local list.
///
/// The snapshot never downgrades an in-flight entry and never removes a
/// speculative one.
pub fn merge(local: Vec<LocalEntry>, snapshot: &[DocumentSummary]) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(local.len());

    for entry in local {
        let id = entry.document().id.clone();
        let remote = snapshot.iter().find(|s| s.id == id);
        seen.insert(id.clone());

        let document = match (entry, remote) {
            (LocalEntry::Speculative(doc), _) => doc,
            (LocalEntry::InFlight(doc), remote) => {
                if remote.is_some_and(|s| s.is_parsed()) {
                    outcome.confirm_candidates.push(id.clone());
                }
                doc
            }
            (LocalEntry::Settled(doc), Some(summary)) => refresh_settled(&doc, summary),
            (LocalEntry::Settled(_), None) => {
                outcome.dropped.push(id);
                continue;
            }
        };
        outcome.entries.push(MergedEntry {
            document,
            origin: Origin::Local,
        });
    }

    for summary in snapshot {
        if !seen.insert(summary.id.clone()) {
            continue;
        }
        let document = document_from_summary(summary);
        if summary.is_parsed() && !document.is_ready() {
            outcome.confirm_candidates.push(summary.id.clone());
        }
        outcome.added.push(summary.id.clone());
        outcome.entries.push(MergedEntry {
            document,
            origin: Origin::Snapshot,
        });
    }

    outcome
}

/// What asked for a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTrigger {
    /// The user asked for a refresh.
    Explicit,
    /// A document just finalized.
    Finalized,
    /// Periodic timer while items are in flight.
    Timer,
}

/// Limits automatic reconciliations to one per window.
///
/// Explicit and post-finalize reconciliations always pass and restart the window.
#[derive(Debug)]
pub struct ReconcileGate {
    window: Duration,
    last_run: Option<Instant>,
}

impl ReconcileGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_run: None,
        }
    }

    /// Whether a reconciliation may run now; records the run if so.
    pub fn try_begin(&mut self, trigger: ReconcileTrigger, now: Instant) -> bool {
        let allowed = match trigger {
            ReconcileTrigger::Explicit | ReconcileTrigger::Finalized => true,
            ReconcileTrigger::Timer => self
                .last_run
                .map_or(true, |last| now.saturating_duration_since(last) >= self.window),
        };
        if allowed {
            self.last_run = Some(now);
        }
        allowed
    }
}
