use super::*;
use docflow_core::models::JobStage;

fn document(status: DocumentStatus, progress: f64) -> Document {
    let mut doc = Document::uploading("tmp-1", "paper.pdf", "en", "zh");
    doc.id = "doc-1".to_string();
    doc.status = status;
    doc.progress = progress;
    doc
}

#[test]
fn test_describe_parsing_with_counts() {
    let mut doc = document(DocumentStatus::Parsing, 51.0);
    doc.parse_done = Some(3);
    doc.parse_total = Some(10);
    assert_eq!(describe(&doc), "doc-1 Parsing 51% [3/10]");
}

#[test]
fn test_describe_ready_with_pages() {
    let mut doc = document(DocumentStatus::Ready, 100.0);
    doc.num_pages = Some(12);
    assert_eq!(describe(&doc), "doc-1 Ready 100% (12 pages)");
}

#[test]
fn test_describe_delete_failure() {
    let mut doc = document(DocumentStatus::Ready, 100.0);
    doc.delete_error = Some("locked".to_string());
    assert!(describe(&doc).ends_with("delete failed: locked"));
}

#[test]
fn test_registry_events_map_to_output() {
    let doc = document(DocumentStatus::Ready, 100.0);
    let out = Output::from(RegistryEvent::Finalized {
        document: doc.clone(),
    });
    assert!(matches!(out, Output::Document(d) if d.id == "doc-1"));

    let out = Output::from(RegistryEvent::Removed {
        id: "doc-2".to_string(),
    });
    let json = serde_json::to_value(&out).unwrap();
    assert_eq!(json["kind"], "removed");
    assert_eq!(json["id"], "doc-2");
}

#[test]
fn test_output_serializes_with_kind_tag() {
    let job = TranslationJob::new("job-1", "doc-1", JobStage::Running);
    let json = serde_json::to_value(Output::Job(job)).unwrap();
    assert_eq!(json["kind"], "job");
    assert_eq!(json["id"], "job-1");

    let notice = Notice::DeleteFailed {
        document_id: "doc-1".to_string(),
        reason: "locked".to_string(),
    };
    let json = serde_json::to_value(Output::Notice(notice)).unwrap();
    assert_eq!(json["kind"], "notice");
    assert_eq!(json["type"], "delete_failed");
}

#[test]
fn test_sync_errors_map_to_command_errors() {
    let err = CommandError::from(SyncError::job_not_found("job-1"));
    assert!(matches!(err, CommandError::JobNotFound { .. }));
    assert_eq!(err.exit_code(), 3);

    let err = CommandError::from(SyncError::document_not_found("doc-1"));
    assert!(matches!(err, CommandError::DocumentNotFound { .. }));

    let err = CommandError::from(SyncError::InvalidTransition {
        job_id: "job-1".to_string(),
        action: "pause",
        stage: JobStage::Succeeded,
    });
    assert_eq!(err.to_string(), "cannot pause job job-1 while succeeded");
    assert_eq!(err.exit_code(), 2);

    let err = CommandError::from(SyncError::PartialBatchFailure {
        failed: 1,
        total: 3,
    });
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["code"], "partial_delete");
    assert_eq!(json["failed"], 1);
    assert_eq!(json["total"], 3);

    let err = CommandError::from(SyncError::Http {
        status: 503,
        message: "unavailable".to_string(),
    });
    assert!(matches!(err, CommandError::ServerError { status: 503, .. }));
}
