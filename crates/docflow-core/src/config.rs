use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory (~/.local/share/docflow)
    pub data_dir: PathBuf,
    /// User settings (server, timings)
    pub settings_file: PathBuf,
    /// Persisted session state (list order, tracked jobs)
    pub session_file: PathBuf,
}

impl Config {
    /// Load configuration or use defaults
    pub fn load_or_default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docflow");
        Self::in_dir(data_dir)
    }

    /// Configuration rooted at an explicit directory.
    pub fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            settings_file: data_dir.join("settings.json"),
            session_file: data_dir.join("session.json"),
            data_dir,
        }
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

/// User settings persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the document server
    pub server_url: String,
    /// Project whose documents make up the list
    pub project_id: Option<String>,
    pub push_channel: PushChannel,
    pub timings: SyncTimings,
}

/// How progress events are pushed to the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushChannel {
    /// `GET {server_url}/ws/documents/{id}/progress` upgraded to a websocket
    #[default]
    Websocket,
    /// `GET {server_url}/documents/{id}/events` as server-sent events
    Sse,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000/v1".to_string(),
            project_id: None,
            push_channel: PushChannel::default(),
            timings: SyncTimings::default(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read settings, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to parse settings, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Timers and iteration bounds for every background loop.
///
/// Durations are stored in milliseconds so the JSON stays hand-editable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTimings {
    /// Connection attempts before a subscription degrades to pull-only
    pub reconnect_max_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,

    pub job_poll_interval_ms: u64,
    pub job_poll_max_iterations: u32,

    /// Automatic list refreshes run at most once per window
    pub reconcile_window_ms: u64,

    pub watchdog_interval_ms: u64,
    /// Time in Parsing after which a document is reported as stalled
    pub parse_stall_threshold_ms: u64,

    pub confirm_max_attempts: u32,
    pub confirm_delay_ms: u64,

    /// Time constant of the fallback progress curve while parsing without signals
    pub fallback_tau_ms: u64,

    pub degraded_poll_interval_ms: u64,
    pub degraded_poll_max_iterations: u32,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            reconnect_max_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            job_poll_interval_ms: 1_500,
            job_poll_max_iterations: 400,
            reconcile_window_ms: 30_000,
            watchdog_interval_ms: 10_000,
            parse_stall_threshold_ms: 180_000,
            confirm_max_attempts: 5,
            confirm_delay_ms: 2_000,
            fallback_tau_ms: 60_000,
            degraded_poll_interval_ms: 5_000,
            degraded_poll_max_iterations: 240,
        }
    }
}

impl SyncTimings {
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    pub fn reconcile_window(&self) -> Duration {
        Duration::from_millis(self.reconcile_window_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn parse_stall_threshold(&self) -> Duration {
        Duration::from_millis(self.parse_stall_threshold_ms)
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }

    pub fn fallback_tau(&self) -> Duration {
        Duration::from_millis(self.fallback_tau_ms)
    }

    pub fn degraded_poll_interval(&self) -> Duration {
        Duration::from_millis(self.degraded_poll_interval_ms)
    }
}
