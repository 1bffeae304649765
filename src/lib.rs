// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod change_detector;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod normalize;
pub mod state;

// Execution
pub mod runner;
pub mod scheduler;

// Notifications
pub mod notify;

// Service surface
pub mod api;
pub mod history;
pub mod logging;
pub mod metrics;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tracing::info;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::{ConfigHandle, MonitorConfig, Task};
pub use crate::notify::{NotificationEvent, NotifierMux};
pub use crate::runner::{CycleOutcome, CycleReport, TaskRunner};
pub use crate::scheduler::Scheduler;

use crate::config::watch::start_hot_reload;
use crate::fetch::{ArchiveSnapshotter, HttpFetcher};
use crate::history::History;
use crate::metrics::Metrics;
use crate::state::FileStateStore;

/// Wire the whole service from a loaded config: runner, scheduler (tasks start
/// immediately), optional config watcher, and the HTTP router.
///
/// Must be called inside a tokio runtime.
pub fn build_app(
    cfg: MonitorConfig,
    config_path: Option<PathBuf>,
    metrics: Option<Arc<Metrics>>,
) -> anyhow::Result<Router> {
    let fetcher = Arc::new(HttpFetcher::from_settings(&cfg.fetch)?);
    let store = Arc::new(FileStateStore::new(&cfg.state_dir));
    let snapshotter = Arc::new(ArchiveSnapshotter::new(&cfg.snapshot_dir));
    let history = Arc::new(History::with_capacity(cfg.history_capacity));

    let runner = Arc::new(
        TaskRunner::new(fetcher, store.clone())
            .with_policy(cfg.retry.policy())
            .with_snapshotter(snapshotter.clone())
            .with_history(history.clone()),
    );
    let scheduler = Arc::new(Scheduler::new(runner.clone()));
    let diff = scheduler.apply(cfg.snapshot());
    info!(
        scheduled = diff.started.len(),
        state_dir = %store.dir().display(),
        snapshot_dir = %snapshotter.dir().display(),
        "monitor started"
    );

    let config = ConfigHandle::new(cfg);
    if let Some(path) = config_path {
        start_hot_reload(path, config.clone(), scheduler.clone());
    }

    Ok(api::router(AppState {
        config,
        runner,
        scheduler,
        history,
        metrics,
    }))
}
