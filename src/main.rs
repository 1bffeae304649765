//! pagewatch: binary entrypoint.
//! Loads the monitor config, starts the scheduler and serves the inspection API.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;

use pagewatch::metrics::Metrics;
use pagewatch::{build_app, config, logging, MonitorConfig};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    let metrics = match Metrics::init() {
        Ok(m) => Some(Arc::new(m)),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let path = config::default_path()?;
    let cfg = match &path {
        Some(p) => config::load_from(p)?,
        None => {
            tracing::warn!("no monitor config found; starting with no tasks");
            MonitorConfig::default()
        }
    };

    let router = build_app(cfg, path, metrics)?;
    Ok(router.into())
}
