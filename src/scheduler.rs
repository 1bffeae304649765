// src/scheduler.rs
//! One timer per enabled task. Every tick spawns its cycle as a separate
//! tokio task; a tick that finds the previous cycle still running is skipped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use metrics::{counter, gauge};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::task::Task;
use crate::runner::TaskRunner;

struct Job {
    task: Arc<Task>,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Job {
    /// Ends the timer loop and cancels the in-flight cycle at its next retry delay.
    fn stop(self) {
        let _ = self.stop.send(true);
        drop(self.handle);
    }
}

/// What [`Scheduler::apply`] did, by task name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyDiff {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub restarted: Vec<String>,
    pub unchanged: Vec<String>,
}

pub struct Scheduler {
    runner: Arc<TaskRunner>,
    jobs: Mutex<HashMap<String, Job>>,
}

fn spawn_job(runner: Arc<TaskRunner>, task: Arc<Task>, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        // First tick completes immediately: the baseline is taken at load.
        let mut ticker = interval(task.frequency.as_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => break,
            }
            match runner.try_begin(&task.name) {
                Some(guard) => {
                    let runner = runner.clone();
                    let task = task.clone();
                    let cancel = stop.clone();
                    tokio::spawn(async move {
                        runner.run_guarded(guard, task, cancel).await;
                    });
                }
                None => {
                    counter!("pagewatch_ticks_skipped_total").increment(1);
                    tracing::info!(task = %task.name, "previous cycle still running; tick skipped");
                }
            }
        }
        tracing::debug!(task = %task.name, "timer stopped");
    })
}

impl Scheduler {
    pub fn new(runner: Arc<TaskRunner>) -> Self {
        Self {
            runner,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn runner(&self) -> &Arc<TaskRunner> {
        &self.runner
    }

    fn with_jobs<R>(&self, f: impl FnOnce(&mut HashMap<String, Job>) -> R) -> R {
        let mut jobs = match self.jobs.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let out = f(&mut jobs);
        gauge!("pagewatch_scheduled_tasks").set(jobs.len() as f64);
        out
    }

    fn start(&self, task: Arc<Task>) -> Job {
        let (tx, rx) = watch::channel(false);
        let handle = spawn_job(self.runner.clone(), task.clone(), rx);
        tracing::info!(task = %task.name, every = %task.frequency, "task scheduled");
        Job {
            task,
            stop: tx,
            handle,
        }
    }

    /// Start (or restart) `task`. A disabled task is unscheduled instead; returns
    /// whether a timer is now running.
    pub fn schedule(&self, task: Arc<Task>) -> bool {
        if !task.enabled {
            self.unschedule(&task.name);
            return false;
        }
        let job = self.start(task.clone());
        self.with_jobs(|jobs| {
            if let Some(old) = jobs.insert(task.name.clone(), job) {
                old.stop();
            }
        });
        true
    }

    /// Stop the task's timer. Its stored state is kept.
    pub fn unschedule(&self, name: &str) -> bool {
        let removed = self.with_jobs(|jobs| jobs.remove(name));
        match removed {
            Some(job) => {
                job.stop();
                tracing::info!(task = name, "task unscheduled");
                true
            }
            None => false,
        }
    }

    pub fn scheduled(&self) -> Vec<String> {
        let mut names = self.with_jobs(|jobs| jobs.keys().cloned().collect::<Vec<_>>());
        names.sort();
        names
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.with_jobs(|jobs| jobs.contains_key(name))
    }

    /// Bring the running jobs in line with `snapshot`.
    pub fn apply(&self, snapshot: Vec<Arc<Task>>) -> ApplyDiff {
        let mut diff = ApplyDiff::default();
        let wanted: HashMap<String, Arc<Task>> = snapshot
            .into_iter()
            .filter(|t| t.enabled)
            .map(|t| (t.name.clone(), t))
            .collect();

        let (to_stop, to_start) = self.with_jobs(|jobs| {
            let mut to_stop = Vec::new();
            let mut to_start = Vec::new();

            let names: Vec<String> = jobs.keys().cloned().collect();
            for name in names {
                match wanted.get(&name) {
                    None => {
                        if let Some(job) = jobs.remove(&name) {
                            to_stop.push(job);
                        }
                        diff.stopped.push(name);
                    }
                    Some(t) if **t != *jobs[&name].task => {
                        if let Some(job) = jobs.remove(&name) {
                            to_stop.push(job);
                        }
                        to_start.push(t.clone());
                        diff.restarted.push(name);
                    }
                    Some(_) => diff.unchanged.push(name),
                }
            }
            for (name, t) in &wanted {
                if !jobs.contains_key(name) && !diff.restarted.contains(name) {
                    to_start.push(t.clone());
                    diff.started.push(name.clone());
                }
            }
            (to_stop, to_start)
        });

        for job in to_stop {
            job.stop();
        }
        for task in to_start {
            let job = self.start(task.clone());
            self.with_jobs(|jobs| {
                if let Some(old) = jobs.insert(task.name.clone(), job) {
                    old.stop();
                }
            });
        }

        diff.started.sort();
        diff.stopped.sort();
        diff.restarted.sort();
        diff.unchanged.sort();
        diff
    }

    pub fn shutdown(&self) {
        let jobs: Vec<Job> = self.with_jobs(|jobs| jobs.drain().map(|(_, j)| j).collect());
        let n = jobs.len();
        for job in jobs {
            job.stop();
        }
        tracing::info!(stopped = n, "scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let jobs = match self.jobs.get_mut() {
            Ok(j) => j,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, job) in jobs.drain() {
            job.stop();
        }
    }
}
