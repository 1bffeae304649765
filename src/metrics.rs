// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if a recorder is already installed.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// Register descriptions once per process; safe to call from every constructor.
pub fn ensure_metrics_described() {
    static DESCRIBED: OnceCell<()> = OnceCell::new();
    DESCRIBED.get_or_init(|| {
        describe_counter!(
            "pagewatch_cycles_total",
            "Finished monitoring cycles, by outcome"
        );
        describe_counter!(
            "pagewatch_fetch_attempts_total",
            "Fetch + extract attempts, including retries"
        );
        describe_counter!(
            "pagewatch_fetch_failures_total",
            "Attempts that failed to fetch or extract"
        );
        describe_counter!(
            "pagewatch_notifications_total",
            "Notification sends, by channel and status"
        );
        describe_counter!(
            "pagewatch_ticks_skipped_total",
            "Scheduler ticks skipped because the previous cycle was still running"
        );
        describe_counter!(
            "pagewatch_persistence_errors_total",
            "State store reads or writes that failed"
        );
        describe_histogram!(
            "pagewatch_cycle_ms",
            Unit::Milliseconds,
            "Wall time of one cycle, retries included"
        );
        describe_gauge!("pagewatch_scheduled_tasks", "Tasks with a running timer");
    });
}
