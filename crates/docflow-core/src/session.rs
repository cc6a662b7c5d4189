//! Session persistence: user-facing list order and tracked jobs.
//!
//! Survives restarts so job tracking can resume. Writes are best-effort;
//! a failed write is logged and the in-memory state stays authoritative.
//! Each write holds the write lock from snapshot to rename, so the file
//! always ends up with the newest state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::models::JobStage;

/// A job the client was tracking when the session was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedJob {
    pub job_id: String,
    pub document_id: String,
    pub stage: JobStage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub document_order: Vec<String>,
    pub jobs: Vec<PersistedJob>,
}

/// Shared handle to the session file.
#[derive(Clone)]
pub struct SessionStore {
    path: Option<PathBuf>,
    state: Arc<RwLock<SessionState>>,
    write_lock: Arc<Mutex<()>>,
}

impl SessionStore {
    /// Open a session file. Missing or corrupt files start an empty session.
    pub fn open(path: &Path) -> Self {
        let state = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt session file, starting fresh");
                SessionState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SessionState::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read session file");
                SessionState::default()
            }
        };
        Self {
            path: Some(path.to_path_buf()),
            state: Arc::new(RwLock::new(state)),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// A session that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Arc::new(RwLock::new(SessionState::default())),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn document_order(&self) -> Vec<String> {
        self.state.read().await.document_order.clone()
    }

    pub async fn set_document_order(&self, ids: Vec<String>) {
        self.state.write().await.document_order = ids;
        self.persist().await;
    }

    /// Carry a temporary id's list position over to its server id.
    pub async fn rename_document(&self, from: &str, to: &str) {
        {
            let mut state = self.state.write().await;
            let mut changed = false;
            for id in state.document_order.iter_mut().filter(|id| id.as_str() == from) {
                *id = to.to_string();
                changed = true;
            }
            if !changed {
                return;
            }
            let mut seen = std::collections::HashSet::new();
            state.document_order.retain(|id| seen.insert(id.clone()));
        }
        self.persist().await;
    }

    pub async fn forget_document(&self, id: &str) {
        {
            let mut state = self.state.write().await;
            let before = state.document_order.len();
            state.document_order.retain(|o| o != id);
            if state.document_order.len() == before {
                return;
            }
        }
        self.persist().await;
    }

    pub async fn jobs(&self) -> Vec<PersistedJob> {
        self.state.read().await.jobs.clone()
    }

    /// Insert or update a tracked job. Writes only when something changed.
    pub async fn upsert_job(&self, job: PersistedJob) {
        {
            let mut state = self.state.write().await;
            match state.jobs.iter_mut().find(|j| j.job_id == job.job_id) {
                Some(existing) if *existing == job => return,
                Some(existing) => *existing = job,
                None => state.jobs.push(job),
            }
        }
        self.persist().await;
    }

    pub async fn remove_job(&self, job_id: &str) {
        {
            let mut state = self.state.write().await;
            let before = state.jobs.len();
            state.jobs.retain(|j| j.job_id != job_id);
            if state.jobs.len() == before {
                return;
            }
        }
        self.persist().await;
    }

    async fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let _writing = self.write_lock.lock().await;
        let json = {
            let state = self.state.read().await;
            match serde_json::to_string_pretty(&*state) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize session");
                    return;
                }
            }
        };
        if let Err(e) = write_atomic(path, json.as_bytes()).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write session");
        }
    }
}

/// Write to a sibling temp file, then rename it over `path`.
async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await
}
