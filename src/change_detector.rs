// src/change_detector.rs
//! Decides whether a freshly extracted value is a baseline, unchanged, or a change.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detection {
    /// No previous value: record a baseline, never notify.
    FirstRun,
    Unchanged,
    Changed,
}

impl Detection {
    pub fn should_notify(self) -> bool {
        matches!(self, Detection::Changed)
    }
}

/// Exact equality on normalized values. Any textual difference is a change.
pub fn detect(previous: Option<&str>, current: &str) -> Detection {
    match previous {
        None => Detection::FirstRun,
        Some(prev) if prev == current => Detection::Unchanged,
        Some(_) => Detection::Changed,
    }
}
