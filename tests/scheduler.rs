// tests/scheduler.rs
//
// Timer behavior under paused tokio time: no overlap per task, independent
// tasks, config diffs, and cancellation of in-flight cycles.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedFetcher, SlowFetcher};
use pagewatch::config::task::{Interval, Task};
use pagewatch::extract::Rule;
use pagewatch::history::History;
use pagewatch::runner::{CycleOutcome, TaskRunner};
use pagewatch::scheduler::Scheduler;
use pagewatch::state::MemoryStateStore;

const SLOW: &str = "https://slow.test/";
const FAST: &str = "https://fast.test/";
const DOWN: &str = "https://down.test/";

fn task(name: &str, url: &str, every_secs: u64) -> Arc<Task> {
    Arc::new(
        Task::new(name, url, Rule::selector_text("#v"))
            .with_frequency(Interval::from_secs(every_secs)),
    )
}

fn scheduler(fetcher: Arc<SlowFetcher>) -> Scheduler {
    let runner = Arc::new(TaskRunner::new(fetcher, Arc::new(MemoryStateStore::new())));
    Scheduler::new(runner)
}

/// A scheduler whose only page always fails, so every cycle sits in its
/// 30s retry delay after the first attempt.
fn failing_scheduler() -> (Scheduler, Arc<ScriptedFetcher>, Arc<History>) {
    let fetcher = ScriptedFetcher::new();
    fetcher.push_err("connection refused");
    let history = Arc::new(History::with_capacity(20));
    let runner = Arc::new(
        TaskRunner::new(fetcher.clone(), Arc::new(MemoryStateStore::new()))
            .with_history(history.clone()),
    );
    (Scheduler::new(runner), fetcher, history)
}

#[tokio::test(start_paused = true)]
async fn slow_cycles_never_overlap_and_busy_ticks_are_skipped() {
    let fetcher = SlowFetcher::new(&[
        (SLOW, Duration::from_secs(25)),
        (FAST, Duration::from_millis(0)),
    ]);
    let sched = scheduler(fetcher.clone());
    assert!(sched.schedule(task("slow", SLOW, 10)));
    assert!(sched.schedule(task("fast", FAST, 10)));

    tokio::time::sleep(Duration::from_secs(95)).await;

    assert_eq!(fetcher.peak(SLOW), 1);
    let slow = fetcher.starts(SLOW);
    assert!((3..=4).contains(&slow), "slow starts: {slow}");
    // The slow task never holds the fast one back.
    assert!(fetcher.starts(FAST) >= 9, "fast starts: {}", fetcher.starts(FAST));

    sched.shutdown();
    assert!(sched.scheduled().is_empty());
}

#[tokio::test(start_paused = true)]
async fn first_tick_fires_immediately() {
    let fetcher = SlowFetcher::new(&[]);
    let sched = scheduler(fetcher.clone());
    sched.schedule(task("a", FAST, 3600));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fetcher.starts(FAST), 1);
    assert!(sched.runner().state("a").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn unschedule_stops_timer_but_keeps_state() {
    let fetcher = SlowFetcher::new(&[]);
    let sched = scheduler(fetcher.clone());
    sched.schedule(task("a", FAST, 10));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(sched.unschedule("a"));
    assert!(!sched.unschedule("a"));
    assert!(!sched.is_scheduled("a"));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fetcher.starts(FAST), 1);
    let st = sched.runner().state("a").await.unwrap();
    assert_eq!(st.last_normalized_value.as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn disabled_tasks_are_not_scheduled() {
    let fetcher = SlowFetcher::new(&[]);
    let sched = scheduler(fetcher.clone());
    let mut t = Task::new("off", FAST, Rule::selector_text("#v"));
    t.enabled = false;

    assert!(!sched.schedule(Arc::new(t)));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fetcher.starts(FAST), 0);
    assert!(sched.scheduled().is_empty());
}

#[tokio::test(start_paused = true)]
async fn apply_reports_what_changed() {
    let fetcher = SlowFetcher::new(&[]);
    let sched = scheduler(fetcher);

    let diff = sched.apply(vec![task("a", FAST, 60), task("b", FAST, 60)]);
    assert_eq!(diff.started, vec!["a", "b"]);
    assert!(diff.stopped.is_empty());

    let mut off = Task::new("c", FAST, Rule::selector_text("#v"));
    off.enabled = false;
    let diff = sched.apply(vec![
        task("a", FAST, 60),
        task("b", FAST, 120),
        Arc::new(off),
    ]);
    assert_eq!(diff.unchanged, vec!["a"]);
    assert_eq!(diff.restarted, vec!["b"]);
    assert!(diff.started.is_empty());

    let diff = sched.apply(vec![task("b", FAST, 120)]);
    assert_eq!(diff.stopped, vec!["a"]);
    assert_eq!(diff.unchanged, vec!["b"]);
    assert_eq!(sched.scheduled(), vec!["b"]);
}

#[tokio::test(start_paused = true)]
async fn unschedule_cancels_a_cycle_waiting_to_retry() {
    let (sched, fetcher, history) = failing_scheduler();
    sched.schedule(task("down", DOWN, 600));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fetcher.call_count(), 1);
    assert!(sched.runner().is_running("down"));

    assert!(sched.unschedule("down"));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let reports = history.for_task("down", 10);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, CycleOutcome::Cancelled);
    assert_eq!(reports[0].attempts, 1);
    assert!(!sched.runner().is_running("down"));
    assert!(sched.runner().state("down").await.is_none());

    // No retry after cancellation, and no new ticks.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(history.for_task("down", 10).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn restart_on_apply_cancels_the_old_cycle() {
    let (sched, fetcher, history) = failing_scheduler();
    let diff = sched.apply(vec![task("down", DOWN, 600)]);
    assert_eq!(diff.started, vec!["down"]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fetcher.call_count(), 1);

    let diff = sched.apply(vec![task("down", DOWN, 1200)]);
    assert_eq!(diff.restarted, vec!["down"]);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let reports = history.for_task("down", 10);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, CycleOutcome::Cancelled);
    assert_eq!(reports[0].attempts, 1);
    // The cancelled cycle wrote nothing; the restarted job may already be in
    // its own first retry delay, which writes nothing either.
    assert!(sched.runner().state("down").await.is_none());

    sched.shutdown();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(history
        .for_task("down", 10)
        .iter()
        .all(|r| r.outcome == CycleOutcome::Cancelled));
    assert!(sched.runner().state("down").await.is_none());
}
