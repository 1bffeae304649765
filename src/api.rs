// src/api.rs
//! Read-mostly HTTP surface: task list, state, history, manual runs and previews.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::config::task::{one_or_many, Task};
use crate::config::ConfigHandle;
use crate::extract::Rule;
use crate::history::History;
use crate::metrics::Metrics;
use crate::runner::{CycleReport, TaskRunner};
use crate::scheduler::Scheduler;

const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub config: ConfigHandle,
    pub runner: Arc<TaskRunner>,
    pub scheduler: Arc<Scheduler>,
    pub history: Arc<History>,
    pub metrics: Option<Arc<Metrics>>,
}

pub fn router(state: AppState) -> Router {
    let metrics = state.metrics.clone();
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/tasks", get(list_tasks))
        .route("/tasks/{name}/state", get(task_state))
        .route("/tasks/{name}/run", post(run_task))
        .route("/tasks/{name}/history", get(task_history))
        .route("/history", get(recent_history))
        .route("/preview", post(preview))
        .layer(CorsLayer::very_permissive())
        .with_state(state);
    match metrics {
        Some(m) => app.merge(m.router()),
        None => app,
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: msg.into() })).into_response()
}

fn find_task(state: &AppState, name: &str) -> Option<Arc<Task>> {
    state
        .config
        .current()
        .snapshot()
        .into_iter()
        .find(|t| t.name == name)
}

#[derive(Serialize)]
struct TaskSummary {
    name: String,
    url: String,
    frequency: String,
    enabled: bool,
    scheduled: bool,
    running: bool,
    last_checked_at: Option<DateTime<Utc>>,
    last_notified_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskSummary>> {
    let cfg = state.config.current();
    let mut out = Vec::with_capacity(cfg.tasks.len());
    for t in &cfg.tasks {
        let st = state.runner.state(&t.name).await;
        out.push(TaskSummary {
            name: t.name.clone(),
            url: t.url.clone(),
            frequency: t.frequency.to_string(),
            enabled: t.enabled,
            scheduled: state.scheduler.is_scheduled(&t.name),
            running: state.runner.is_running(&t.name),
            last_checked_at: st.as_ref().and_then(|s| s.last_checked_at),
            last_notified_at: st.as_ref().and_then(|s| s.last_notified_at),
            consecutive_failures: st.map(|s| s.consecutive_failures).unwrap_or(0),
        });
    }
    Json(out)
}

async fn task_state(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.runner.state(&name).await {
        Some(s) => Json(s).into_response(),
        None => error(StatusCode::NOT_FOUND, format!("no state for task `{name}`")),
    }
}

async fn run_task(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(task) = find_task(&state, &name) else {
        return error(StatusCode::NOT_FOUND, format!("unknown task `{name}`"));
    };
    let report = state.runner.run_cycle(task).await;
    Json(report).into_response()
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn task_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Response {
    if state.config.current().task(&name).is_none() {
        return error(StatusCode::NOT_FOUND, format!("unknown task `{name}`"));
    }
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(state.history.for_task(&name, limit)).into_response()
}

/// Most recent cycle reports across all tasks, oldest first.
async fn recent_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Json<Vec<CycleReport>> {
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(state.history.snapshot_last_n(limit))
}

#[derive(Deserialize)]
struct PreviewReq {
    #[serde(default)]
    name: Option<String>,
    url: String,
    #[serde(alias = "rule", deserialize_with = "one_or_many")]
    rules: Vec<Rule>,
}

async fn preview(State(state): State<AppState>, Json(req): Json<PreviewReq>) -> Response {
    if req.rules.is_empty() {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "at least one rule is required");
    }
    for r in &req.rules {
        if let Err(e) = r.validate() {
            return error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string());
        }
    }
    let mut task = Task::new(
        req.name.unwrap_or_else(|| "preview".to_string()),
        req.url,
        req.rules[0].clone(),
    );
    task.rules = req.rules;

    match state.runner.preview(&task).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}
