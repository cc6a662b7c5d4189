use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use docflow_core::api::JobAction;
use docflow_core::{AppState, Config, Settings};

use crate::commands;
use crate::error::{CommandError, CommandResult};
use crate::headless;

#[derive(Parser, Debug)]
#[command(name = "docflow")]
#[command(about = "Track document parsing and translation jobs on a docflow server")]
pub struct Args {
    /// Data directory holding settings and session state
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Server base URL, overriding the saved setting
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Project whose documents make up the list, overriding the saved setting
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Save the overrides above to the settings file
    #[arg(long, global = true)]
    pub save: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run in the background, streaming every change (default)
    Headless,
    /// Fetch and print the project's documents
    List,
    /// Follow documents until they are ready (all in-flight ones if none given)
    Watch { ids: Vec<String> },
    /// Start a translation job for a document
    Translate {
        document_id: String,
        #[arg(long, default_value = "en")]
        lang_in: String,
        #[arg(long, default_value = "zh")]
        lang_out: String,
        #[arg(long, default_value = "openai")]
        provider: String,
        /// Keep polling until the job finishes
        #[arg(long)]
        follow: bool,
    },
    /// Follow an existing translation job until it finishes
    Job { job_id: String },
    /// Pause, resume, cancel or retry a translation job
    Control { action: Action, job_id: String },
    /// Delete one or more documents
    Delete { ids: Vec<String> },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Action {
    Pause,
    Resume,
    Cancel,
    Retry,
}

impl From<Action> for JobAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Pause => JobAction::Pause,
            Action::Resume => JobAction::Resume,
            Action::Cancel => JobAction::Cancel,
            Action::Retry => JobAction::Retry,
        }
    }
}

impl Command {
    /// Commands that wait on live updates and need the engine's background
    /// loops (watchdog, reconcile timer, job restore).
    fn is_long_running(&self) -> bool {
        match self {
            Command::Headless | Command::Watch { .. } | Command::Job { .. } => true,
            Command::Translate { follow, .. } => *follow,
            Command::List | Command::Control { .. } | Command::Delete { .. } => false,
        }
    }
}

impl Args {
    fn config(&self) -> Config {
        match self.data_dir {
            Some(ref dir) => Config::in_dir(dir.clone()),
            None => Config::load_or_default(),
        }
    }

    /// Saved settings with command-line overrides applied.
    fn settings(&self, config: &Config) -> CommandResult<Settings> {
        let mut settings = Settings::load(&config.settings_file);
        if let Some(ref server) = self.server {
            settings.server_url = server.clone();
        }
        if let Some(ref project) = self.project {
            settings.project_id = Some(project.clone());
        }
        if self.save {
            config.ensure_dirs()?;
            settings.save(&config.settings_file)?;
            tracing::info!("Saved settings to {:?}", config.settings_file);
        }
        Ok(settings)
    }
}

/// Run one command to completion.
pub async fn run(args: Args) -> CommandResult<()> {
    let config = args.config();
    let settings = args.settings(&config)?;
    let (state, mut events) = AppState::with_settings(config, settings)?;

    let command = args.command.unwrap_or(Command::Headless);
    if let Command::Headless = command {
        return headless::run(state, events).await;
    }

    let engine = state.engine.clone();
    if command.is_long_running() {
        let resumed = engine.start().await;
        tracing::debug!(resumed, "Background loops started");
    }
    let result = match command {
        Command::Headless => Ok(()),
        Command::List => {
            require_project(&state.settings)?;
            commands::list_documents(&engine).await.map(|_| ())
        }
        Command::Watch { ids } => {
            if ids.is_empty() {
                require_project(&state.settings)?;
            }
            commands::watch_documents(&engine, &mut events, &ids).await
        }
        Command::Translate {
            document_id,
            lang_in,
            lang_out,
            provider,
            follow,
        } => commands::translate(
            &engine,
            &mut events,
            &document_id,
            &lang_in,
            &lang_out,
            &provider,
            follow,
        )
        .await
        .map(|_| ()),
        Command::Job { job_id } => commands::follow_job(&engine, &mut events, &job_id)
            .await
            .map(|_| ()),
        Command::Control { action, job_id } => {
            commands::control_job(&engine, &job_id, action.into())
                .await
                .map(|_| ())
        }
        Command::Delete { ids } => commands::delete_documents(&engine, &ids).await.map(|_| ()),
    };

    engine.shutdown().await;
    result
}

fn require_project(settings: &Settings) -> CommandResult<()> {
    if settings.project_id.is_none() {
        return Err(CommandError::invalid_argument(
            "no project configured; pass --project",
        ));
    }
    Ok(())
}
