// src/config/task.rs
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::extract::Rule;
use crate::notify::render::FormatterRef;
use crate::notify::NotificationConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    #[error("invalid interval `{0}`: expected <integer><s|m|h|d>, e.g. `30s`, `10m`, `1h`, `2d`")]
    Malformed(String),
    #[error("interval `{0}` must be greater than zero")]
    Zero(String),
    #[error("interval `{0}` is too large")]
    Overflow(String),
}

/// Check interval in whole seconds, written as `<n><s|m|h|d>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    secs: u64,
}

impl Interval {
    pub fn parse(raw: &str) -> Result<Self, IntervalError> {
        static RE: OnceCell<Regex> = OnceCell::new();
        let re = RE.get_or_init(|| Regex::new(r"^(\d+)\s*([smhd])$").expect("interval regex"));

        let norm = raw.trim().to_ascii_lowercase();
        let caps = re
            .captures(&norm)
            .ok_or_else(|| IntervalError::Malformed(raw.to_string()))?;
        let value: u64 = caps[1]
            .parse()
            .map_err(|_| IntervalError::Overflow(raw.to_string()))?;
        let unit = match &caps[2] {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            _ => 86_400,
        };
        let secs = value
            .checked_mul(unit)
            .ok_or_else(|| IntervalError::Overflow(raw.to_string()))?;
        if secs == 0 {
            return Err(IntervalError::Zero(raw.to_string()));
        }
        Ok(Self { secs })
    }

    pub fn from_secs(secs: u64) -> Self {
        Self { secs: secs.max(1) }
    }

    pub fn as_secs(&self) -> u64 {
        self.secs
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.secs)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.secs;
        if s % 86_400 == 0 {
            write!(f, "{}d", s / 86_400)
        } else if s % 3_600 == 0 {
            write!(f, "{}h", s / 3_600)
        } else if s % 60 == 0 {
            write!(f, "{}m", s / 60)
        } else {
            write!(f, "{s}s")
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = IntervalError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Interval::parse(&s)
    }
}

impl From<Interval> for String {
    fn from(i: Interval) -> Self {
        i.to_string()
    }
}

fn default_true() -> bool {
    true
}

/// A single rule or a list of rules.
pub(crate) fn one_or_many<'de, D>(de: D) -> Result<Vec<Rule>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<Rule>),
        One(Rule),
    }
    Ok(match OneOrMany::deserialize(de)? {
        OneOrMany::Many(v) => v,
        OneOrMany::One(r) => vec![r],
    })
}

/// One monitored page. Immutable once loaded; the runner receives an `Arc<Task>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub url: String,
    #[serde(alias = "interval")]
    pub frequency: Interval,
    #[serde(alias = "rule", deserialize_with = "one_or_many")]
    pub rules: Vec<Rule>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Capture a snapshot reference when a change is detected.
    #[serde(default)]
    pub screenshot: bool,
    #[serde(default)]
    pub notification_title: Option<String>,
    /// Replaces the global default channels when present.
    #[serde(default)]
    pub notification: Option<NotificationConfig>,
    #[serde(default)]
    pub formatter: Option<FormatterRef>,
    /// Extra template variables, each extracted from the new page.
    #[serde(default)]
    pub template_fields: BTreeMap<String, Rule>,
}

impl Task {
    /// Minimal enabled task with a single rule, for previews and tests.
    pub fn new(name: impl Into<String>, url: impl Into<String>, rule: Rule) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            frequency: Interval::from_secs(600),
            rules: vec![rule],
            enabled: true,
            screenshot: false,
            notification_title: None,
            notification: None,
            formatter: None,
            template_fields: BTreeMap::new(),
        }
    }

    pub fn with_frequency(mut self, frequency: Interval) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_notification(mut self, notification: NotificationConfig) -> Self {
        self.notification = Some(notification);
        self
    }

    pub fn with_formatter(mut self, formatter: FormatterRef) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn title(&self) -> String {
        self.notification_title
            .clone()
            .unwrap_or_else(|| format!("{} changed", self.name))
    }
}
