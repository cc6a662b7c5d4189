//! Event-to-progress normalization.
//!
//! [`normalize`] is the only place progress is computed from server signals,
//! and the only place monotonicity is enforced: the output progress is
//! `max(previous, target)` clamped into the phase's range.

use std::time::Duration;

use crate::api::{DocumentSummary, EventStatus, ParseJobInfo, ProgressEvent};
use crate::models::{Document, DocumentStatus, PARSE_CEILING, READY_PROGRESS, UPLOAD_CEILING};

/// Span of the Parsing phase on the 0-100 scale.
const PARSE_SPAN: f64 = 70.0;
/// The time-based estimate stays below this so only a real signal reaches 99.
const FALLBACK_SPAN: f64 = 68.0;

/// Result of normalizing one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub document: Document,
    /// A "parsed" signal arrived without a usable page count.
    pub needs_confirmation: bool,
}

impl Normalized {
    fn unchanged(prev: &Document) -> Self {
        Self {
            document: prev.clone(),
            needs_confirmation: false,
        }
    }
}

/// Accept either a 0-1 ratio or a 0-100 percentage and return a ratio.
///
/// Values up to 1.0 are taken as ratios. Negative or non-finite values are absent.
pub fn to_ratio(value: f64) -> Option<f64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value <= 1.0 {
        Some(value)
    } else {
        Some((value / 100.0).min(1.0))
    }
}

/// Deterministic estimate for a document parsing without any progress signal.
///
/// Rises from 30 towards 98 as `elapsed` grows; never reaches 99.
pub fn fallback_progress(elapsed: Duration, tau: Duration) -> f64 {
    let tau = tau.as_secs_f64().max(1e-3);
    let t = elapsed.as_secs_f64();
    UPLOAD_CEILING + FALLBACK_SPAN * (1.0 - (-t / tau).exp())
}

/// Progress target for a Parsing event, in signal priority order.
fn parse_target(event: &ProgressEvent, parse_elapsed: Duration, tau: Duration) -> f64 {
    let job = event.parse_job.as_ref();

    let from_counts = job.and_then(|j| match (j.done, j.total) {
        (Some(done), Some(total)) if total > 0 => Some((done as f64 / total as f64).min(1.0)),
        _ => None,
    });
    let ratio = from_counts
        .or_else(|| job.and_then(|j| j.progress).and_then(to_ratio))
        .or_else(|| event.parse_progress.and_then(to_ratio));

    match ratio {
        Some(r) => UPLOAD_CEILING + PARSE_SPAN * r,
        None => fallback_progress(parse_elapsed, tau),
    }
}

fn apply_parse_telemetry(doc: &mut Document, job: Option<&ParseJobInfo>) {
    let Some(job) = job else {
        return;
    };
    if job.done.is_some() {
        doc.parse_done = job.done;
    }
    if job.total.is_some() {
        doc.parse_total = job.total;
    }
    if let Some(eta) = job.eta_seconds.filter(|e| e.is_finite() && *e >= 0.0) {
        doc.eta_seconds = Some(eta);
    }
    if job.message.is_some() {
        doc.message = job.message.clone();
    }
    if job.substage.is_some() {
        doc.substage = job.substage.clone();
    }
}

fn finalize(doc: &mut Document, num_pages: u32) {
    doc.status = DocumentStatus::Ready;
    doc.progress = READY_PROGRESS;
    doc.num_pages = Some(num_pages);
    doc.clear_parse_telemetry();
}

/// Fold one raw event into the previous canonical state.
///
/// `parse_elapsed` is the time since the document first entered Parsing
/// (zero if it has not yet). `tau` shapes the time-based fallback.
pub fn normalize(
    prev: &Document,
    event: &ProgressEvent,
    parse_elapsed: Duration,
    tau: Duration,
) -> Normalized {
    if prev.is_ready() {
        return Normalized::unchanged(prev);
    }

    let mut doc = prev.clone();
    let mut needs_confirmation = false;

    match event.status {
        EventStatus::Uploading => {
            if prev.status != DocumentStatus::Uploading {
                // Late delivery from an earlier phase.
                return Normalized::unchanged(prev);
            }
            if let Some(ratio) = event.progress.or(event.parse_progress).and_then(to_ratio) {
                let target = (ratio * 100.0).clamp(0.0, UPLOAD_CEILING);
                doc.progress = prev.progress.max(target);
            }
        }
        EventStatus::Parsing => {
            doc.status = DocumentStatus::Parsing;
            apply_parse_telemetry(&mut doc, event.parse_job.as_ref());
            let target = parse_target(event, parse_elapsed, tau);
            doc.progress = prev.progress.max(target);
        }
        EventStatus::Parsed => {
            apply_parse_telemetry(&mut doc, event.parse_job.as_ref());
            match event.num_pages.filter(|n| *n > 0).and_then(|n| u32::try_from(n).ok()) {
                Some(pages) => finalize(&mut doc, pages),
                None => {
                    doc.status = DocumentStatus::Parsing;
                    doc.progress = prev.progress.max(PARSE_CEILING);
                    needs_confirmation = true;
                }
            }
        }
    }

    doc.progress = doc.status.clamp(doc.progress);
    Normalized {
        document: doc,
        needs_confirmation,
    }
}

/// Advance a parsing document on the time-based curve when no event arrives.
pub fn fallback_tick(prev: &Document, parse_elapsed: Duration, tau: Duration) -> Document {
    let mut doc = prev.clone();
    if prev.status == DocumentStatus::Parsing {
        let target = fallback_progress(parse_elapsed, tau);
        doc.progress = DocumentStatus::Parsing.clamp(prev.progress.max(target));
    }
    doc
}

/// Second phase of the Ready confirmation: an authoritative fetch.
///
/// Only a positive page count finalizes the document; anything else leaves it untouched.
pub fn confirm(prev: &Document, authoritative: &DocumentSummary) -> Document {
    let mut doc = prev.clone();
    if prev.is_ready() {
        return doc;
    }
    if let Some(pages) = authoritative.confirmed_pages() {
        if let Some(title) = authoritative.title.as_ref().filter(|t| !t.is_empty()) {
            doc.title = title.clone();
        }
        finalize(&mut doc, pages);
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAU: Duration = Duration::from_secs(60);

    fn uploading() -> Document {
        Document::uploading("doc-1", "paper.pdf", "en", "zh")
    }

    fn parsing(progress: f64) -> Document {
        let mut doc = uploading();
        doc.status = DocumentStatus::Parsing;
        doc.progress = progress;
        doc
    }

    fn run(prev: &Document, event: ProgressEvent) -> Normalized {
        normalize(prev, &event, Duration::ZERO, TAU)
    }

    fn job(done: Option<u64>, total: Option<u64>, progress: Option<f64>) -> ParseJobInfo {
        ParseJobInfo {
            done,
            total,
            progress,
            ..Default::default()
        }
    }

    #[test]
    fn test_to_ratio_dual_scale() {
        assert_eq!(to_ratio(0.25), Some(0.25));
        assert_eq!(to_ratio(1.0), Some(1.0));
        assert_eq!(to_ratio(25.0), Some(0.25));
        assert_eq!(to_ratio(250.0), Some(1.0));
        assert_eq!(to_ratio(-1.0), None);
        assert_eq!(to_ratio(f64::NAN), None);
    }

    #[test]
    fn test_uploading_is_clamped_to_thirty() {
        let out = run(&uploading(), ProgressEvent::uploading(0.2));
        assert_eq!(out.document.progress, 20.0);
        let out = run(&out.document, ProgressEvent::uploading(80.0));
        assert_eq!(out.document.progress, 30.0);
        assert_eq!(out.document.status, DocumentStatus::Uploading);
    }

    #[test]
    fn test_parse_job_counts_take_priority() {
        let mut event = ProgressEvent::parsing_job(job(Some(3), Some(10), Some(0.9)));
        event.parse_progress = Some(80.0);
        let out = run(&uploading(), event);
        assert_eq!(out.document.status, DocumentStatus::Parsing);
        assert!((out.document.progress - 51.0).abs() < 1e-9);
        assert_eq!(out.document.parse_done, Some(3));
        assert_eq!(out.document.parse_total, Some(10));
    }

    #[test]
    fn test_parse_job_progress_then_top_level() {
        let out = run(
            &uploading(),
            ProgressEvent::parsing_job(job(Some(1), Some(0), Some(50.0))),
        );
        assert!((out.document.progress - 65.0).abs() < 1e-9);

        let mut event = ProgressEvent::new(EventStatus::Parsing);
        event.parse_progress = Some(0.1);
        let out = run(&uploading(), event);
        assert!((out.document.progress - 37.0).abs() < 1e-9);
    }

    #[test]
    fn test_parsing_never_exceeds_ninety_nine() {
        let out = run(
            &parsing(40.0),
            ProgressEvent::parsing_job(job(Some(10), Some(10), None)),
        );
        assert_eq!(out.document.progress, 99.0);
        assert_eq!(out.document.status, DocumentStatus::Parsing);
    }

    #[test]
    fn test_progress_never_regresses() {
        let first = run(
            &uploading(),
            ProgressEvent::parsing_job(job(Some(6), Some(10), None)),
        );
        let late = run(
            &first.document,
            ProgressEvent::parsing_job(job(Some(2), Some(10), None)),
        );
        assert_eq!(late.document.progress, first.document.progress);

        let stale_upload = run(&late.document, ProgressEvent::uploading(0.1));
        assert_eq!(stale_upload.document, late.document);
    }

    #[test]
    fn test_monotonic_over_shuffled_sequence() {
        let events = vec![
            ProgressEvent::uploading(0.5),
            ProgressEvent::uploading(0.1),
            ProgressEvent::parsing_job(job(Some(5), Some(10), None)),
            ProgressEvent::new(EventStatus::Parsing),
            ProgressEvent::parsing_job(job(Some(1), Some(10), None)),
            ProgressEvent::uploading(1.0),
            ProgressEvent::parsed(None),
            ProgressEvent::parsing_job(job(Some(9), Some(10), None)),
            ProgressEvent::parsed(Some(4)),
            ProgressEvent::parsing_job(job(Some(1), Some(10), None)),
        ];
        let mut doc = uploading();
        for (i, event) in events.into_iter().enumerate() {
            let next = normalize(&doc, &event, Duration::from_secs(i as u64 * 5), TAU).document;
            assert!(next.progress >= doc.progress, "regressed at step {}", i);
            assert!(next.status >= doc.status, "status went back at step {}", i);
            let (lo, hi) = next.status.progress_bounds();
            assert!(next.progress >= lo && next.progress <= hi, "out of phase at step {}", i);
            doc = next;
        }
        assert_eq!(doc.status, DocumentStatus::Ready);
        assert_eq!(doc.progress, 100.0);
    }

    #[test]
    fn test_parsed_without_pages_holds_at_ninety_nine() {
        let out = run(&parsing(51.0), ProgressEvent::parsed(Some(0)));
        assert_eq!(out.document.status, DocumentStatus::Parsing);
        assert_eq!(out.document.progress, 99.0);
        assert!(out.needs_confirmation);

        let out = run(&parsing(51.0), ProgressEvent::parsed(None));
        assert!(out.needs_confirmation);
    }

    #[test]
    fn test_parsed_with_pages_is_ready() {
        let out = run(&parsing(51.0), ProgressEvent::parsed(Some(12)));
        assert_eq!(out.document.status, DocumentStatus::Ready);
        assert_eq!(out.document.progress, 100.0);
        assert_eq!(out.document.num_pages, Some(12));
        assert!(!out.needs_confirmation);
    }

    #[test]
    fn test_ready_ignores_everything() {
        let ready = run(&parsing(51.0), ProgressEvent::parsed(Some(12))).document;
        let out = run(&ready, ProgressEvent::parsed(Some(0)));
        assert_eq!(out.document, ready);
        assert!(!out.needs_confirmation);
    }

    #[test]
    fn test_fallback_curve_is_monotonic_and_bounded() {
        let mut last = fallback_progress(Duration::ZERO, TAU);
        assert_eq!(last, 30.0);
        for secs in [1u64, 10, 60, 600, 6_000, 600_000] {
            let p = fallback_progress(Duration::from_secs(secs), TAU);
            assert!(p >= last);
            assert!(p < 99.0);
            last = p;
        }
    }

    #[test]
    fn test_parsing_without_signal_uses_fallback() {
        let event = ProgressEvent::new(EventStatus::Parsing);
        let early = normalize(&uploading(), &event, Duration::from_secs(1), TAU).document;
        let later = normalize(&early, &event, Duration::from_secs(120), TAU).document;
        assert!(later.progress > early.progress);
        assert!(later.progress < 99.0);
    }

    #[test]
    fn test_fallback_tick_only_touches_parsing() {
        let up = uploading();
        assert_eq!(fallback_tick(&up, Duration::from_secs(600), TAU), up);

        let p = parsing(90.0);
        let ticked = fallback_tick(&p, Duration::from_secs(1), TAU);
        assert_eq!(ticked.progress, 90.0);
    }

    #[test]
    fn test_confirm_requires_positive_pages() {
        let held = run(&parsing(51.0), ProgressEvent::parsed(Some(0))).document;
        let mut summary = DocumentSummary {
            id: "doc-1".to_string(),
            title: Some("paper.pdf".to_string()),
            num_pages: Some(0),
            lang_in: "en".to_string(),
            lang_out: "zh".to_string(),
            status: "parsed".to_string(),
        };
        assert_eq!(confirm(&held, &summary), held);

        summary.num_pages = Some(12);
        let ready = confirm(&held, &summary);
        assert_eq!(ready.status, DocumentStatus::Ready);
        assert_eq!(ready.progress, 100.0);
        assert_eq!(ready.num_pages, Some(12));
    }
}
