//! Run one configured task once, or preview its extraction, from the shell.
//!
//! ```text
//! pagewatch-check [--config PATH] [--preview] <task-name>
//! ```
//!
//! A full run persists state and sends notifications exactly like a
//! scheduled cycle. `--preview` only fetches and extracts.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use pagewatch::config::{self, MonitorConfig};
use pagewatch::fetch::{ArchiveSnapshotter, HttpFetcher};
use pagewatch::logging;
use pagewatch::runner::{CycleOutcome, TaskRunner};
use pagewatch::state::FileStateStore;

#[derive(Parser, Debug)]
#[command(
    name = "pagewatch-check",
    version,
    about = "Run one configured task once, or preview its extraction"
)]
struct Args {
    /// Config file (default: MONITOR_CONFIG, then config/monitor.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fetch and extract only; no comparison, state or notifications
    #[arg(short, long)]
    preview: bool,

    /// Name of the task to run
    task: String,
}

fn load(path: Option<&PathBuf>) -> Result<MonitorConfig> {
    match path {
        Some(p) => config::load_from(p),
        None => config::load_default(),
    }
}

async fn run(args: Args) -> Result<bool> {
    let cfg = load(args.config.as_ref())?;
    let task = cfg
        .snapshot()
        .into_iter()
        .find(|t| t.name == args.task)
        .ok_or_else(|| anyhow!("no task named `{}`", args.task))?;

    let runner = TaskRunner::new(
        Arc::new(HttpFetcher::from_settings(&cfg.fetch)?),
        Arc::new(FileStateStore::new(&cfg.state_dir)),
    )
    .with_policy(cfg.retry.policy())
    .with_snapshotter(Arc::new(ArchiveSnapshotter::new(&cfg.snapshot_dir)));

    if args.preview {
        let result = runner.preview(&task).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(true);
    }

    let report = runner.run_cycle(task).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.outcome != CycleOutcome::Failed)
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    let args = Args::parse();
    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
