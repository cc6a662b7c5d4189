//! Local validation of job control actions.

use crate::api::JobAction;
use crate::error::{Result, SyncError};
use crate::models::{JobStage, TranslationJob};

/// Whether `action` is meaningful from `stage`.
pub fn is_allowed(stage: JobStage, action: JobAction) -> bool {
    use JobStage::*;
    match action {
        JobAction::Pause => stage == Running,
        JobAction::Resume => stage == Paused,
        JobAction::Cancel => matches!(stage, Queued | Running | Paused),
        JobAction::Retry => stage == Failed,
    }
}

/// Reject an action before it reaches the server.
pub fn check_transition(job: &TranslationJob, action: JobAction) -> Result<()> {
    if is_allowed(job.stage, action) {
        Ok(())
    } else {
        Err(SyncError::InvalidTransition {
            job_id: job.id.clone(),
            action: action.as_str(),
            stage: job.stage,
        })
    }
}
