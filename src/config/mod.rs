// src/config/mod.rs
//! Monitor configuration: global settings plus the task list.
//!
//! Lookup order for [`load_default`]:
//! 1) `$MONITOR_CONFIG`
//! 2) `config/monitor.toml`
//! 3) `config/monitor.json`
//!
//! No file at all yields an empty task list.

pub mod task;
pub mod watch;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::notify::NotificationConfig;
use crate::runner::RetryPolicy;
pub use task::{Interval, Task};

pub const ENV_CONFIG_PATH: &str = "MONITOR_CONFIG";
pub const DEFAULT_TOML_PATH: &str = "config/monitor.toml";
pub const DEFAULT_JSON_PATH: &str = "config/monitor.json";

const HISTORY_CAP_MAX: usize = 10_000;

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("snapshots")
}
fn default_history_capacity() -> usize {
    500
}
fn default_max_attempts() -> u32 {
    3
}
fn default_delay_secs() -> u64 {
    30
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("pagewatch/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_secs(self.delay_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause after the response before extraction.
    #[serde(default)]
    pub settle_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            settle_ms: 0,
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    /// Used by every task without its own `notification`.
    #[serde(default)]
    pub default_notification: NotificationConfig,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            snapshot_dir: default_snapshot_dir(),
            history_capacity: default_history_capacity(),
            retry: RetrySettings::default(),
            fetch: FetchSettings::default(),
            default_notification: NotificationConfig::default(),
            tasks: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Tasks as the runner sees them: channel fallback resolved, shared.
    pub fn snapshot(&self) -> Vec<Arc<Task>> {
        self.tasks
            .iter()
            .map(|t| {
                let mut t = t.clone();
                if t.notification.is_none() {
                    t.notification = Some(self.default_notification.clone());
                }
                Arc::new(t)
            })
            .collect()
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        let mut seen = HashSet::new();
        for t in &self.tasks {
            let name = t.name.trim();
            if name.is_empty() {
                bail!("task with url `{}` has an empty name", t.url);
            }
            if !seen.insert(name) {
                bail!("duplicate task name `{name}`");
            }
            let url = t.url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("task `{name}`: url `{url}` must be http(s)");
            }
            if t.rules.is_empty() {
                bail!("task `{name}`: at least one rule is required");
            }
            for rule in t.rules.iter().chain(t.template_fields.values()) {
                rule.validate()
                    .with_context(|| format!("task `{name}`"))?;
            }
        }
        Ok(())
    }

    fn resolve_secrets(&mut self) -> Result<()> {
        for ch in self.default_notification.channels.iter_mut() {
            ch.resolve_env().context("default_notification")?;
        }
        for t in self.tasks.iter_mut() {
            if let Some(n) = t.notification.as_mut() {
                for ch in n.channels.iter_mut() {
                    ch.resolve_env()
                        .with_context(|| format!("task `{}` notification", t.name))?;
                }
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Self> {
        self.history_capacity = self.history_capacity.clamp(1, HISTORY_CAP_MAX);
        self.validate()?;
        self.resolve_secrets()?;
        Ok(self)
    }
}

/// Load from an explicit path. TOML or JSON, chosen by extension then content.
pub fn load_from(path: &Path) -> Result<MonitorConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading monitor config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing monitor config {}", path.display()))
}

/// Path [`load_default`] would read, if any.
pub fn default_path() -> Result<Option<PathBuf>> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(Some(pb));
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    for p in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(Some(pb));
        }
    }
    Ok(None)
}

pub fn load_default() -> Result<MonitorConfig> {
    match default_path()? {
        Some(p) => load_from(&p),
        None => {
            tracing::warn!("no monitor config found; starting with no tasks");
            Ok(MonitorConfig::default())
        }
    }
}

pub fn parse_config(s: &str, hint_ext: &str) -> Result<MonitorConfig> {
    let parsed = match hint_ext {
        "toml" => parse_toml(s)?,
        "json" => parse_json(s)?,
        _ => match parse_toml(s) {
            Ok(c) => c,
            Err(toml_err) => parse_json(s).map_err(|json_err| {
                anyhow!("unsupported config format (toml: {toml_err}; json: {json_err})")
            })?,
        },
    };
    parsed.finish()
}

fn parse_toml(s: &str) -> Result<MonitorConfig> {
    Ok(toml::from_str(s)?)
}

fn parse_json(s: &str) -> Result<MonitorConfig> {
    Ok(serde_json::from_str(s)?)
}

/// Shared, swappable view of the current config.
#[derive(Clone, Debug)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<MonitorConfig>>>,
}

impl ConfigHandle {
    pub fn new(cfg: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(cfg))),
        }
    }

    pub fn current(&self) -> Arc<MonitorConfig> {
        match self.inner.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, cfg: MonitorConfig) {
        let mut g = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *g = Arc::new(cfg);
    }
}
