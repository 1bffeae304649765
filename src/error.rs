// src/error.rs
//! Error taxonomy for the monitoring pipeline.
//!
//! Fetch and extraction errors are retried by the runner; notification and
//! persistence errors are logged and never abort a cycle.

use thiserror::Error;

/// Page could not be fetched (network, timeout, non-2xx).
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("timeout after {0}s")]
    Timeout(u64),
    #[error("fetch error: {0}")]
    Other(String),
}

/// Rule could not produce a value from the fetched content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no match for rule `{0}`")]
    NoMatch(String),
    #[error("invalid rule `{rule}`: {reason}")]
    InvalidRule { rule: String, reason: String },
    #[error("rule `{0}` produced an empty result")]
    EmptyResult(String),
}

impl ExtractionError {
    pub fn invalid(rule: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidRule {
            rule: rule.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("invalid channel config: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for NotificationError {
    fn from(e: reqwest::Error) -> Self {
        Self::TransportFailure(e.to_string())
    }
}

/// State store I/O failure. The runner falls back to its in-memory mirror.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("state io: {0}")]
    Io(#[from] std::io::Error),
    #[error("state encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("unknown preset `{0}`")]
    UnknownPreset(String),
    #[error("unknown formatter `{0}`")]
    UnknownFormatter(String),
    #[error("formatter `{name}` failed: {reason}")]
    FormatterFailed { name: String, reason: String },
    #[error("template error: {0}")]
    Template(String),
}

/// One failed fetch+extract attempt, as seen by the retry machine.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}
