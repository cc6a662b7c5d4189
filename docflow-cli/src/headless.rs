use docflow_core::{AppState, EngineEvents};

use crate::commands::Output;
use crate::error::CommandResult;

/// Keep the engine running in the background and stream every change.
///
/// Resumes persisted jobs, refreshes the project list, then prints document,
/// job and notice updates until Ctrl+C.
pub async fn run(state: AppState, mut events: EngineEvents) -> CommandResult<()> {
    tracing::info!("Data directory: {:?}", state.config.data_dir);

    let resumed = state.engine.start().await;
    tracing::info!(resumed, "Resumed persisted jobs");

    if state.settings.project_id.is_some() {
        if let Err(e) = state.engine.refresh().await {
            tracing::warn!(error = %e, "Initial refresh failed, continuing");
        }
        for doc in state.engine.documents().await {
            Output::Document(doc).print()?;
        }
    }

    tracing::info!("Headless client running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = events.documents.recv() => Output::from(event).print()?,
            Some(job) = events.jobs.recv() => Output::Job(job).print()?,
            Some(notice) = events.notices.recv() => Output::Notice(notice).print()?,
        }
    }

    tracing::info!("Shutting down...");
    state.engine.shutdown().await;
    Ok(())
}
