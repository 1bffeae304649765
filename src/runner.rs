// src/runner.rs
//! One monitoring cycle per call: fetch, extract, compare, notify, persist.
//!
//! ```text
//! Idle -> Fetching -> Extracting -> Comparing -> [Notifying] -> Persisting -> Idle
//!            \____________\__ Failed (per attempt, retried up to the policy)
//! ```
//!
//! Cycles of the same task never overlap: every run holds the task's gate.
//! The scheduler takes the gate with `try_begin` and skips busy ticks; manual
//! runs wait for it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::{watch, OwnedMutexGuard};

use crate::change_detector::{detect, Detection};
use crate::config::task::Task;
use crate::error::{AttemptError, PersistenceError};
use crate::extract::{extract_all, extract_from, Document};
use crate::fetch::{FetchedPage, PageFetcher, Snapshotter};
use crate::history::History;
use crate::metrics::ensure_metrics_described;
use crate::normalize::{fingerprint, normalize};
use crate::notify::render::compose;
use crate::notify::{
    ChannelReport, DefaultRenderer, MessageRenderer, NotificationConfig, NotificationEvent,
    NotifierMux,
};
use crate::state::{StateStore, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Fetching,
    Extracting,
    Comparing,
    Notifying,
    Persisting,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    RetryAfter(Duration),
    Exhausted,
}

/// Failure bookkeeping for one cycle. Pure; the runner does the sleeping.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    failures: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_failure(&mut self) -> RetryStep {
        self.failures += 1;
        if self.failures >= self.policy.max_attempts.max(1) {
            RetryStep::Exhausted
        } else {
            RetryStep::RetryAfter(self.policy.delay)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Baseline,
    Unchanged,
    Changed,
    Failed,
    Cancelled,
}

impl CycleOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleOutcome::Baseline => "baseline",
            CycleOutcome::Unchanged => "unchanged",
            CycleOutcome::Changed => "changed",
            CycleOutcome::Failed => "failed",
            CycleOutcome::Cancelled => "cancelled",
        }
    }
}

impl From<Detection> for CycleOutcome {
    fn from(d: Detection) -> Self {
        match d {
            Detection::FirstRun => CycleOutcome::Baseline,
            Detection::Unchanged => CycleOutcome::Unchanged,
            Detection::Changed => CycleOutcome::Changed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub task_name: String,
    pub raw_value: String,
    pub normalized_value: String,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub task_name: String,
    pub outcome: CycleOutcome,
    pub attempts: u32,
    pub phases: Vec<CyclePhase>,
    pub error: Option<String>,
    pub extraction: Option<ExtractionResult>,
    pub notifications: Vec<ChannelReport>,
    /// State came from, or could only be written to, the in-memory mirror.
    pub degraded: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Proof that the holder owns a task's gate. Obtained from [`TaskRunner::try_begin`].
pub struct CycleGuard {
    _guard: OwnedMutexGuard<()>,
}

type Gate = Arc<tokio::sync::Mutex<()>>;

/// In-memory copy of a task's state. `verified` is false when the store could
/// not be read, so the entry may not hold the durable baseline and must never
/// be written over it.
#[derive(Debug, Clone)]
struct Mirrored {
    state: TaskState,
    verified: bool,
}

/// State going into a comparison.
struct Previous {
    state: Option<TaskState>,
    verified: bool,
    degraded: bool,
}

pub struct TaskRunner {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn StateStore>,
    renderer: Arc<dyn MessageRenderer>,
    snapshotter: Option<Arc<dyn Snapshotter>>,
    notifiers: Option<Arc<NotifierMux>>,
    history: Option<Arc<History>>,
    policy: RetryPolicy,
    mirror: Mutex<HashMap<String, Mirrored>>,
    gates: Mutex<HashMap<String, Gate>>,
}

/// Resolves once `*rx` is true. A dropped sender never cancels.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Values for `template_fields`, read from the new page. A field whose rule
/// fails renders as an empty string.
fn template_values(task: &Task, page: &FetchedPage) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if task.template_fields.is_empty() {
        return out;
    }
    let mut doc = Document::new(&page.html);
    for (key, rule) in &task.template_fields {
        let value = match extract_from(&mut doc, rule) {
            Ok(v) => normalize(&v),
            Err(e) => {
                tracing::debug!(task = %task.name, field = %key, error = %e, "template field unavailable");
                String::new()
            }
        };
        out.insert(key.clone(), value);
    }
    out
}

impl TaskRunner {
    pub fn new(fetcher: Arc<dyn PageFetcher>, store: Arc<dyn StateStore>) -> Self {
        ensure_metrics_described();
        Self {
            fetcher,
            store,
            renderer: Arc::new(DefaultRenderer::new()),
            snapshotter: None,
            notifiers: None,
            history: None,
            policy: RetryPolicy::default(),
            mirror: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn MessageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_snapshotter(mut self, snapshotter: Arc<dyn Snapshotter>) -> Self {
        self.snapshotter = Some(snapshotter);
        self
    }

    /// Route every task's notifications through `mux` instead of its configured channels.
    pub fn with_notifiers(mut self, mux: NotifierMux) -> Self {
        self.notifiers = Some(Arc::new(mux));
        self
    }

    pub fn with_history(mut self, history: Arc<History>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn gate(&self, task_name: &str) -> Gate {
        let mut gates = match self.gates.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        gates
            .entry(task_name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Take the task's gate without waiting; `None` while a cycle is in flight.
    pub fn try_begin(&self, task_name: &str) -> Option<CycleGuard> {
        self.gate(task_name)
            .try_lock_owned()
            .ok()
            .map(|g| CycleGuard { _guard: g })
    }

    pub fn is_running(&self, task_name: &str) -> bool {
        let gate = self.gate(task_name);
        let busy = gate.try_lock().is_err();
        busy
    }

    /// RunOnce: waits for any in-flight cycle of the same task, then runs.
    pub async fn run_cycle(&self, task: Arc<Task>) -> CycleReport {
        let (_keep, rx) = watch::channel(false);
        self.run_cycle_with_cancel(task, rx).await
    }

    pub async fn run_cycle_with_cancel(
        &self,
        task: Arc<Task>,
        cancel: watch::Receiver<bool>,
    ) -> CycleReport {
        let guard = CycleGuard {
            _guard: self.gate(&task.name).lock_owned().await,
        };
        self.run_guarded(guard, task, cancel).await
    }

    /// Run with a gate already held (scheduler path).
    pub async fn run_guarded(
        &self,
        guard: CycleGuard,
        task: Arc<Task>,
        cancel: watch::Receiver<bool>,
    ) -> CycleReport {
        let report = self.cycle(&task, cancel).await;
        drop(guard);

        counter!("pagewatch_cycles_total", "outcome" => report.outcome.as_str()).increment(1);
        histogram!("pagewatch_cycle_ms").record(report.duration_ms as f64);
        let value_fp = report
            .extraction
            .as_ref()
            .map(|e| fingerprint(&e.normalized_value))
            .unwrap_or_default();
        tracing::info!(
            task = %report.task_name,
            phase = "idle",
            outcome = report.outcome.as_str(),
            attempts = report.attempts,
            degraded = report.degraded,
            duration_ms = report.duration_ms,
            value = %value_fp,
            "cycle finished"
        );
        if let Some(h) = &self.history {
            h.push(report.clone());
        }
        report
    }

    /// Fetch, extract and normalize once. No comparison, no persistence.
    pub async fn preview(&self, task: &Task) -> Result<ExtractionResult, AttemptError> {
        let (_, result) = self.attempt(task, &mut Vec::new()).await?;
        Ok(result)
    }

    /// GetState: the freshest state this process knows.
    pub async fn state(&self, task_name: &str) -> Option<TaskState> {
        self.load_previous(task_name).await.state
    }

    /// Drop all stored state for `task_name`; the next cycle is a baseline.
    pub async fn forget(&self, task_name: &str) -> Result<bool, PersistenceError> {
        let in_mirror = self.with_mirror(|m| m.remove(task_name).is_some());
        let in_store = self.store.remove(task_name).await?;
        tracing::info!(task = task_name, "state forgotten");
        Ok(in_mirror || in_store)
    }

    fn with_mirror<R>(&self, f: impl FnOnce(&mut HashMap<String, Mirrored>) -> R) -> R {
        let mut m = match self.mirror.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut m)
    }

    /// The state to compare against. A verified mirror entry is never older
    /// than the store; anything else asks the store first.
    async fn load_previous(&self, task_name: &str) -> Previous {
        let cached = match self.with_mirror(|m| m.get(task_name).cloned()) {
            Some(Mirrored {
                state,
                verified: true,
            }) => {
                return Previous {
                    state: Some(state),
                    verified: true,
                    degraded: false,
                }
            }
            other => other.map(|m| m.state),
        };

        match self.store.load(task_name).await {
            Ok(Some(mut stored)) => {
                // Value from the store, failure bookkeeping from this process.
                if let Some(c) = cached {
                    stored.consecutive_failures = c.consecutive_failures;
                    stored.last_checked_at = c.last_checked_at;
                }
                Previous {
                    state: Some(stored),
                    verified: true,
                    degraded: false,
                }
            }
            Ok(None) => Previous {
                state: cached,
                verified: true,
                degraded: false,
            },
            Err(e) => {
                counter!("pagewatch_persistence_errors_total").increment(1);
                tracing::warn!(
                    task = task_name,
                    store = self.store.name(),
                    error = %e,
                    "state store unavailable; continuing without a stored baseline"
                );
                Previous {
                    state: cached,
                    verified: false,
                    degraded: true,
                }
            }
        }
    }

    /// Returns `true` when the state is kept in memory only. Unverified state
    /// is never written to the store.
    async fn persist(&self, state: TaskState, verified: bool) -> bool {
        self.with_mirror(|m| {
            m.insert(
                state.task_name.clone(),
                Mirrored {
                    state: state.clone(),
                    verified,
                },
            )
        });
        if !verified {
            tracing::warn!(
                task = %state.task_name,
                store = self.store.name(),
                "stored baseline unknown; state kept in memory only"
            );
            return true;
        }
        match self.store.save(&state).await {
            Ok(()) => false,
            Err(e) => {
                counter!("pagewatch_persistence_errors_total").increment(1);
                tracing::warn!(
                    task = %state.task_name,
                    store = self.store.name(),
                    error = %e,
                    "state write failed; degraded to in-memory state"
                );
                true
            }
        }
    }

    /// One fetch + extract + normalize attempt.
    async fn attempt(
        &self,
        task: &Task,
        phases: &mut Vec<CyclePhase>,
    ) -> Result<(FetchedPage, ExtractionResult), AttemptError> {
        phases.push(CyclePhase::Fetching);
        counter!("pagewatch_fetch_attempts_total").increment(1);
        let page = self.fetcher.fetch(&task.url).await?;

        phases.push(CyclePhase::Extracting);
        let raw_value = extract_all(&page.html, &task.rules)?;
        let normalized_value = normalize(&raw_value);
        let result = ExtractionResult {
            task_name: task.name.clone(),
            raw_value,
            normalized_value,
            extracted_at: Utc::now(),
        };
        Ok((page, result))
    }

    async fn cycle(&self, task: &Task, mut cancel: watch::Receiver<bool>) -> CycleReport {
        let started_at = Utc::now();
        let t0 = Instant::now();
        let mut report = CycleReport {
            task_name: task.name.clone(),
            outcome: CycleOutcome::Failed,
            attempts: 0,
            phases: vec![CyclePhase::Idle],
            error: None,
            extraction: None,
            notifications: Vec::new(),
            degraded: false,
            started_at,
            duration_ms: 0,
        };

        let mut retry = RetryState::new(self.policy);
        let fetched = loop {
            report.attempts += 1;
            match self.attempt(task, &mut report.phases).await {
                Ok(ok) => break Some(ok),
                Err(e) => {
                    report.phases.push(CyclePhase::Failed);
                    counter!("pagewatch_fetch_failures_total").increment(1);
                    tracing::warn!(
                        task = %task.name,
                        phase = "failed",
                        attempt = report.attempts,
                        error = %e,
                        "attempt failed"
                    );
                    report.error = Some(e.to_string());
                    match retry.record_failure() {
                        RetryStep::RetryAfter(delay) => {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = cancelled(&mut cancel) => {
                                    tracing::info!(task = %task.name, attempt = report.attempts, "cycle cancelled");
                                    report.outcome = CycleOutcome::Cancelled;
                                    report.phases.push(CyclePhase::Idle);
                                    report.duration_ms = t0.elapsed().as_millis() as u64;
                                    return report;
                                }
                            }
                        }
                        RetryStep::Exhausted => break None,
                    }
                }
            }
        };

        let Some((page, extraction)) = fetched else {
            // Exhausted: count the failure, keep the stored value.
            let prev = self.load_previous(&task.name).await;
            let mut state = prev.state.unwrap_or_else(|| TaskState::new(&task.name));
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.last_checked_at = Some(Utc::now());
            report.phases.push(CyclePhase::Persisting);
            let save_degraded = self.persist(state, prev.verified).await;
            report.degraded = prev.degraded || save_degraded;
            report.outcome = CycleOutcome::Failed;
            report.phases.push(CyclePhase::Idle);
            report.duration_ms = t0.elapsed().as_millis() as u64;
            return report;
        };
        report.error = None;

        report.phases.push(CyclePhase::Comparing);
        let prev = self.load_previous(&task.name).await;
        let previous_value = prev
            .state
            .as_ref()
            .and_then(|s| s.last_normalized_value.clone());
        let detection = detect(previous_value.as_deref(), &extraction.normalized_value);
        report.outcome = detection.into();

        let mut notified = false;
        if detection.should_notify() {
            report.phases.push(CyclePhase::Notifying);
            report.notifications = self
                .notify(task, &page, previous_value.as_deref().unwrap_or_default(), &extraction)
                .await;
            notified = report.notifications.iter().any(|r| r.ok);
        }

        report.phases.push(CyclePhase::Persisting);
        let now = Utc::now();
        let state = TaskState {
            task_name: task.name.clone(),
            last_normalized_value: Some(extraction.normalized_value.clone()),
            last_checked_at: Some(now),
            consecutive_failures: 0,
            last_notified_at: if notified {
                Some(now)
            } else {
                prev.state.and_then(|p| p.last_notified_at)
            },
        };
        let save_degraded = self.persist(state, prev.verified).await;
        report.degraded = prev.degraded || save_degraded;

        report.extraction = Some(extraction);
        report.phases.push(CyclePhase::Idle);
        report.duration_ms = t0.elapsed().as_millis() as u64;
        report
    }

    /// Build and dispatch the single message for this change.
    async fn notify(
        &self,
        task: &Task,
        page: &FetchedPage,
        old_value: &str,
        extraction: &ExtractionResult,
    ) -> Vec<ChannelReport> {
        let extra = template_values(task, page);

        let screenshot_ref = match (&self.snapshotter, task.screenshot) {
            (Some(snap), true) => match snap.capture(task, page).await {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(task = %task.name, error = %format!("{e:#}"), "snapshot failed");
                    None
                }
            },
            _ => None,
        };

        let event = NotificationEvent::new(
            &task.name,
            &task.url,
            old_value,
            &extraction.normalized_value,
            screenshot_ref,
        );
        let msg = compose(self.renderer.as_ref(), task, event, &extra);

        let configured;
        let mux: &NotifierMux = match &self.notifiers {
            Some(m) => m,
            None => {
                configured = NotifierMux::from_config(
                    task.notification.as_ref().unwrap_or(&NotificationConfig::default()),
                );
                &configured
            }
        };
        if mux.is_empty() {
            tracing::info!(task = %task.name, "change detected; no notification channels configured");
            return Vec::new();
        }
        mux.dispatch(&msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_state_is_bounded() {
        let mut r = RetryState::new(RetryPolicy::default());
        assert_eq!(r.record_failure(), RetryStep::RetryAfter(Duration::from_secs(30)));
        assert_eq!(r.record_failure(), RetryStep::RetryAfter(Duration::from_secs(30)));
        assert_eq!(r.record_failure(), RetryStep::Exhausted);
        assert_eq!(r.failures(), 3);
    }

    #[test]
    fn single_attempt_policy_exhausts_immediately() {
        for max in [0, 1] {
            let mut r = RetryState::new(RetryPolicy {
                max_attempts: max,
                delay: Duration::from_secs(1),
            });
            assert_eq!(r.record_failure(), RetryStep::Exhausted);
        }
    }

    #[test]
    fn detection_maps_to_outcome() {
        assert_eq!(CycleOutcome::from(Detection::FirstRun), CycleOutcome::Baseline);
        assert_eq!(CycleOutcome::from(Detection::Changed).as_str(), "changed");
    }
}
