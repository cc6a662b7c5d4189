//! Bounded polling loop for one job.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::JobTracker;
use crate::error::Notice;

/// Why a poll loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollExit {
    Terminal,
    /// Another loop took over, or the job is no longer tracked.
    Superseded,
    Cancelled,
    Exhausted { iterations: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_iterations: u32,
}

/// Poll `job_id` until it is terminal, cancelled, superseded or out of iterations.
///
/// A failed fetch still counts as an iteration.
pub(super) async fn run(
    tracker: JobTracker,
    job_id: String,
    generation: u64,
    settings: PollSettings,
    cancel: CancellationToken,
) -> PollExit {
    tracing::debug!(job_id = %job_id, generation, "Job polling started");

    for iteration in 1..=settings.max_iterations {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollExit::Cancelled,
            _ = tokio::time::sleep(settings.interval) => {}
        }

        match tracker.api().get_job(&job_id).await {
            Ok(detail) => match tracker.adopt(detail.to_job(), Some(generation)).await {
                None => return PollExit::Superseded,
                Some(job) if job.stage.is_terminal() => {
                    tracing::info!(job_id = %job_id, stage = %job.stage, "Job finished");
                    tracker.finish_polling(&job_id, generation).await;
                    return PollExit::Terminal;
                }
                Some(_) => {}
            },
            Err(e) => {
                tracing::debug!(job_id = %job_id, iteration, error = %e, "Job poll failed");
            }
        }
    }

    let stage = tracker
        .get(&job_id)
        .await
        .map(|j| j.stage)
        .unwrap_or(crate::models::JobStage::Running);
    tracing::warn!(
        job_id = %job_id,
        iterations = settings.max_iterations,
        stage = %stage,
        "Job polling exhausted, keeping last known state"
    );
    tracker.finish_polling(&job_id, generation).await;
    tracker.notice(Notice::PollExhausted {
        job_id,
        iterations: settings.max_iterations,
        stage,
    });
    PollExit::Exhausted {
        iterations: settings.max_iterations,
    }
}
