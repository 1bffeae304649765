// src/state.rs
//! Durable per-task state: last normalized value and cycle bookkeeping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::PersistenceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_name: String,
    /// `None` until the first successful cycle establishes a baseline.
    #[serde(default)]
    pub last_normalized_value: Option<String>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_notified_at: Option<DateTime<Utc>>,
}

impl TaskState {
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            last_normalized_value: None,
            last_checked_at: None,
            consecutive_failures: 0,
            last_notified_at: None,
        }
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, task_name: &str) -> Result<Option<TaskState>, PersistenceError>;
    async fn save(&self, state: &TaskState) -> Result<(), PersistenceError>;
    /// Returns whether an entry existed.
    async fn remove(&self, task_name: &str) -> Result<bool, PersistenceError>;
    fn name(&self) -> &'static str;
}

/// One JSON file per task under `dir`, named by the SHA-256 of the task name
/// so any task name maps to a safe, stable file name.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, task_name: &str) -> PathBuf {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(task_name.as_bytes());
        let mut name = String::with_capacity(64 + 5);
        for b in digest.iter() {
            use std::fmt::Write as _;
            let _ = write!(&mut name, "{:02x}", b);
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, task_name: &str) -> Result<Option<TaskState>, PersistenceError> {
        let path = self.path_for(task_name);
        let raw = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: TaskState = serde_json::from_str(&raw)?;
        Ok(Some(state))
    }

    async fn save(&self, state: &TaskState) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&state.task_name);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(state)?;
        // Write-then-rename: a crash mid-write never leaves a torn state file.
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        tracing::debug!(task = %state.task_name, path = %path.display(), "state saved");
        Ok(())
    }

    async fn remove(&self, task_name: &str) -> Result<bool, PersistenceError> {
        match fs::remove_file(self.path_for(task_name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Process-local store, for previews and tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<HashMap<String, TaskState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> PersistenceError {
    PersistenceError::Unavailable("memory store mutex poisoned".into())
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, task_name: &str) -> Result<Option<TaskState>, PersistenceError> {
        let map = self.inner.lock().map_err(|_| poisoned())?;
        Ok(map.get(task_name).cloned())
    }

    async fn save(&self, state: &TaskState) -> Result<(), PersistenceError> {
        let mut map = self.inner.lock().map_err(|_| poisoned())?;
        map.insert(state.task_name.clone(), state.clone());
        Ok(())
    }

    async fn remove(&self, task_name: &str) -> Result<bool, PersistenceError> {
        let mut map = self.inner.lock().map_err(|_| poisoned())?;
        Ok(map.remove(task_name).is_some())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
