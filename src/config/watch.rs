// src/config/watch.rs
//! Config hot reload: poll the file's mtime every 2s, re-load on change and
//! hand the new task snapshot to the scheduler. A bad edit keeps the old config.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tokio::task::JoinHandle;

use super::{load_from, ConfigHandle, MonitorConfig};
use crate::scheduler::Scheduler;

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Remembers the last seen mtime of one config file.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Starts from the file's current mtime, so the initial load is not repeated.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_mtime = mtime(&path);
        Self { path, last_mtime }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(Some(cfg))` when the file's mtime moved (either way) and it parsed;
    /// `Ok(None)` when untouched or missing. Blocking; the polling loop runs it
    /// on the blocking pool.
    pub fn check(&mut self) -> Result<Option<MonitorConfig>> {
        let Some(current) = mtime(&self.path) else {
            return Ok(None);
        };
        let changed = match self.last_mtime {
            None => true,
            Some(prev) => current != prev,
        };
        if !changed {
            return Ok(None);
        }
        // Recorded before parsing: a broken edit is reported once, not every poll.
        self.last_mtime = Some(current);
        load_from(&self.path).map(Some)
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Spawn the polling loop. Each good reload replaces `handle` and re-applies
/// the task snapshot to `scheduler`.
pub fn start_hot_reload(
    path: PathBuf,
    handle: ConfigHandle,
    scheduler: Arc<Scheduler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut watcher = match tokio::task::spawn_blocking(move || ConfigWatcher::new(path)).await {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(error = %e, "config watcher failed to start");
                return;
            }
        };
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let polled = tokio::task::spawn_blocking(move || {
                let res = watcher.check();
                (watcher, res)
            })
            .await;
            let (next, res) = match polled {
                Ok(out) => out,
                Err(e) => {
                    tracing::error!(error = %e, "config watcher stopped");
                    return;
                }
            };
            watcher = next;
            match res {
                Ok(Some(cfg)) => {
                    let snapshot = cfg.snapshot();
                    handle.replace(cfg);
                    let diff = scheduler.apply(snapshot);
                    tracing::info!(
                        path = %watcher.path().display(),
                        started = diff.started.len(),
                        stopped = diff.stopped.len(),
                        restarted = diff.restarted.len(),
                        "config reloaded"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        path = %watcher.path().display(),
                        error = %format!("{e:#}"),
                        "config reload rejected; keeping previous config"
                    );
                }
            }
        }
    })
}
