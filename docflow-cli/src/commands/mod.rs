//! Command implementations shared by the one-shot CLI and headless mode.
//!
//! Every command prints JSON lines on stdout; logs go to stderr.

use std::collections::HashSet;

use docflow_core::api::{BatchDeleteResult, JobAction};
use docflow_core::{
    Document, DocumentStatus, EngineEvents, Notice, RegistryEvent, SyncEngine, SyncError,
    TranslationJob,
};
use serde::Serialize;

use crate::error::{CommandError, CommandResult};

/// One line of command output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Output {
    Document(Document),
    Removed { id: String },
    Job(TranslationJob),
    Notice(Notice),
    Deleted(BatchDeleteResult),
}

impl Output {
    pub fn print(&self) -> CommandResult<()> {
        println!("{}", serde_json::to_string(self)?);
        Ok(())
    }
}

impl From<RegistryEvent> for Output {
    fn from(event: RegistryEvent) -> Self {
        match event {
            RegistryEvent::Upserted { document }
            | RegistryEvent::Rekeyed { document, .. }
            | RegistryEvent::Finalized { document } => Self::Document(document),
            RegistryEvent::Removed { id } => Self::Removed { id },
        }
    }
}

/// Short human-readable status line for a document.
pub fn describe(doc: &Document) -> String {
    let mut line = format!("{} {:?} {:.0}%", doc.id, doc.status, doc.progress);
    if let Some(pages) = doc.num_pages {
        line.push_str(&format!(" ({} pages)", pages));
    }
    if let (Some(done), Some(total)) = (doc.parse_done, doc.parse_total) {
        if doc.status == DocumentStatus::Parsing {
            line.push_str(&format!(" [{}/{}]", done, total));
        }
    }
    if let Some(ref error) = doc.delete_error {
        line.push_str(&format!(" delete failed: {}", error));
    }
    line
}

/// Pull the project list and print it.
pub async fn list_documents(engine: &SyncEngine) -> CommandResult<Vec<Document>> {
    let docs = engine.refresh().await?;
    for doc in &docs {
        tracing::debug!("{}", describe(doc));
        Output::Document(doc.clone()).print()?;
    }
    Ok(docs)
}

/// Follow documents until every one of them is Ready or the user interrupts.
///
/// With no ids, follows whatever the project list has in flight.
pub async fn watch_documents(
    engine: &SyncEngine,
    events: &mut EngineEvents,
    ids: &[String],
) -> CommandResult<()> {
    let mut pending: HashSet<String> = HashSet::new();
    if ids.is_empty() {
        for doc in engine.refresh().await? {
            if !doc.is_ready() {
                pending.insert(doc.id);
            }
        }
    } else {
        for id in ids {
            let doc = engine.watch_document(id).await?;
            Output::Document(doc.clone()).print()?;
            if !doc.is_ready() {
                pending.insert(doc.id);
            }
        }
    }

    if pending.is_empty() {
        tracing::info!("Nothing in flight");
        return Ok(());
    }
    tracing::info!(count = pending.len(), "Waiting for documents to become ready");

    while !pending.is_empty() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            Some(event) = events.documents.recv() => {
                if let RegistryEvent::Finalized { ref document } = event {
                    pending.remove(&document.id);
                }
                if let RegistryEvent::Removed { ref id } = event {
                    pending.remove(id);
                }
                Output::from(event).print()?;
            }
            Some(notice) = events.notices.recv() => {
                Output::Notice(notice).print()?;
            }
        }
    }
    Ok(())
}

/// Create a translation job, optionally following it to a terminal stage.
pub async fn translate(
    engine: &SyncEngine,
    events: &mut EngineEvents,
    document_id: &str,
    lang_in: &str,
    lang_out: &str,
    provider: &str,
    follow: bool,
) -> CommandResult<TranslationJob> {
    let job = engine
        .start_translation(document_id, lang_in, lang_out, provider)
        .await?;
    Output::Job(job.clone()).print()?;
    if !follow {
        return Ok(job);
    }
    follow_job(engine, events, &job.id).await
}

/// Track an existing job until it reaches a terminal stage.
pub async fn follow_job(
    engine: &SyncEngine,
    events: &mut EngineEvents,
    job_id: &str,
) -> CommandResult<TranslationJob> {
    let mut job = engine.track_job(job_id).await?;
    while !job.stage.is_terminal() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            Some(update) = events.jobs.recv() => {
                if update.id == job_id {
                    Output::Job(update.clone()).print()?;
                    job = update;
                }
            }
            Some(notice) = events.notices.recv() => {
                let exhausted = matches!(&notice, Notice::PollExhausted { job_id: id, .. } if id == job_id);
                Output::Notice(notice).print()?;
                if exhausted {
                    break;
                }
            }
        }
    }
    Ok(job)
}

pub async fn control_job(
    engine: &SyncEngine,
    job_id: &str,
    action: JobAction,
) -> CommandResult<TranslationJob> {
    let job = match action {
        JobAction::Pause => engine.pause_job(job_id).await?,
        JobAction::Resume => engine.resume_job(job_id).await?,
        JobAction::Cancel => engine.cancel_job(job_id).await?,
        JobAction::Retry => engine.retry_job(job_id).await?,
    };
    Output::Job(job.clone()).print()?;
    Ok(job)
}

/// Delete documents. Reports per-id results and fails if any id failed.
pub async fn delete_documents(
    engine: &SyncEngine,
    ids: &[String],
) -> CommandResult<BatchDeleteResult> {
    if ids.is_empty() {
        return Err(CommandError::invalid_argument("no document ids given"));
    }
    let result = engine.batch_delete(ids).await?;
    Output::Deleted(result.clone()).print()?;
    if result.failed_count > 0 {
        return Err(SyncError::PartialBatchFailure {
            failed: result.failed_count,
            total: ids.len(),
        }
        .into());
    }
    Ok(result)
}

#[cfg(test)]
mod tests;
