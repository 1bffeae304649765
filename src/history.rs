//! Bounded in-memory log of recent cycle reports.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::runner::CycleReport;

const HARD_CAP: usize = 10_000;

#[derive(Debug)]
pub struct History {
    inner: Mutex<VecDeque<CycleReport>>,
    cap: usize,
}

impl History {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, HARD_CAP);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<CycleReport>> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn push(&self, report: CycleReport) {
        let mut v = self.lock();
        if v.len() == self.cap {
            v.pop_front();
        }
        v.push_back(report);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `n` most recent reports, oldest first.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<CycleReport> {
        let v = self.lock();
        let start = v.len().saturating_sub(n);
        v.iter().skip(start).cloned().collect()
    }

    /// Up to `n` most recent reports of one task, oldest first.
    pub fn for_task(&self, task_name: &str, n: usize) -> Vec<CycleReport> {
        let v = self.lock();
        let mut out: Vec<CycleReport> = v
            .iter()
            .rev()
            .filter(|r| r.task_name == task_name)
            .take(n)
            .cloned()
            .collect();
        out.reverse();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CycleOutcome;
    use chrono::Utc;

    fn report(task: &str, attempts: u32) -> CycleReport {
        CycleReport {
            task_name: task.to_string(),
            outcome: CycleOutcome::Unchanged,
            attempts,
            phases: Vec::new(),
            error: None,
            extraction: None,
            notifications: Vec::new(),
            degraded: false,
            started_at: Utc::now(),
            duration_ms: 1,
        }
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let h = History::with_capacity(3);
        for i in 1..=5 {
            h.push(report("a", i));
        }
        assert_eq!(h.len(), 3);
        let attempts: Vec<_> = h.snapshot_last_n(10).iter().map(|r| r.attempts).collect();
        assert_eq!(attempts, vec![3, 4, 5]);
    }

    #[test]
    fn filters_by_task_newest_window() {
        let h = History::with_capacity(10);
        h.push(report("a", 1));
        h.push(report("b", 2));
        h.push(report("a", 3));
        h.push(report("a", 4));
        let a: Vec<_> = h.for_task("a", 2).iter().map(|r| r.attempts).collect();
        assert_eq!(a, vec![3, 4]);
        assert!(h.for_task("zzz", 5).is_empty());
    }

    #[test]
    fn capacity_is_clamped() {
        assert_eq!(History::with_capacity(0).capacity(), 1);
        assert_eq!(History::with_capacity(1_000_000).capacity(), 10_000);
    }
}
