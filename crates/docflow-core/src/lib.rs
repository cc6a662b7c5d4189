//! Docflow Core - State reconciliation for a remote document pipeline
//!
//! This crate keeps a local view of documents and translation jobs
//! consistent with a server that processes them asynchronously:
//! - Progress normalization across upload, parsing and confirmation
//! - Push subscriptions with reconnect and pull fallback
//! - Optimistic list entries reconciled against server snapshots
//! - Translation job polling and control
//! - Session persistence (list order, tracked jobs)

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod models;
pub mod pdf;
pub mod pipeline;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{Config, PushChannel, Settings, SyncTimings};
pub use engine::{EngineEvents, EngineOptions, SyncEngine};
pub use error::{Notice, Result, SyncError};
pub use models::{Document, DocumentStatus, JobStage, TranslationJob};
pub use pipeline::RegistryEvent;
pub use session::SessionStore;

/// Application state shared by the front ends.
pub struct AppState {
    pub config: Config,
    pub settings: Settings,
    pub engine: SyncEngine,
}

impl AppState {
    /// Load settings and the persisted session, and build the engine.
    ///
    /// Background loops are not started; call [`SyncEngine::start`].
    pub fn new(config: Config) -> anyhow::Result<(Self, EngineEvents)> {
        config.ensure_dirs()?;
        let settings = Settings::load(&config.settings_file);
        let session = SessionStore::open(&config.session_file);
        let (engine, events) = SyncEngine::connect(&settings, session);

        tracing::info!(
            server = %settings.server_url,
            project = settings.project_id.as_deref().unwrap_or("-"),
            "Sync engine ready"
        );

        Ok((
            Self {
                config,
                settings,
                engine,
            },
            events,
        ))
    }

    /// Same as [`AppState::new`] with settings overridden by the caller.
    pub fn with_settings(config: Config, settings: Settings) -> anyhow::Result<(Self, EngineEvents)> {
        config.ensure_dirs()?;
        let session = SessionStore::open(&config.session_file);
        let (engine, events) = SyncEngine::connect(&settings, session);
        Ok((
            Self {
                config,
                settings,
                engine,
            },
            events,
        ))
    }
}
