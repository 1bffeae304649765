// src/fetch.rs
//! Page fetching boundary. The bundled `HttpFetcher` does a plain GET; dynamic
//! rendering lives behind the same trait in an external implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use tokio::fs;

use crate::config::task::Task;
use crate::config::FetchSettings;
use crate::error::FetchError;
use crate::normalize::{fingerprint, normalize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    /// Markup as served.
    pub html: String,
    /// Visible text, normalized.
    pub text: String,
}

impl FetchedPage {
    pub fn from_html(url: impl Into<String>, html: impl Into<String>) -> Self {
        let html = html.into();
        let text = {
            let doc = Html::parse_document(&html);
            let joined = doc.root_element().text().collect::<Vec<_>>().join(" ");
            normalize(&joined)
        };
        Self {
            url: url.into(),
            html,
            text,
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
    fn name(&self) -> &'static str;
}

pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    settle: Duration,
}

impl HttpFetcher {
    pub fn from_settings(settings: &FetchSettings) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(settings.timeout_secs.max(1));
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            timeout,
            settle: Duration::from_millis(settings.settle_ms),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let rsp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout.as_secs())
            } else {
                FetchError::Request(e)
            }
        })?;

        let status = rsp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = rsp.text().await?;

        // Late-loading pages get a grace period before extraction.
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        tracing::debug!(url, bytes = body.len(), "page fetched");
        Ok(FetchedPage::from_html(url, body))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Captures a reference to the page as it looked when a change was detected.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    async fn capture(&self, task: &Task, page: &FetchedPage) -> anyhow::Result<String>;
}

/// Saves the fetched markup under `dir` and returns the file path.
#[derive(Debug, Clone)]
pub struct ArchiveSnapshotter {
    dir: PathBuf,
}

impl ArchiveSnapshotter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Snapshotter for ArchiveSnapshotter {
    async fn capture(&self, task: &Task, page: &FetchedPage) -> anyhow::Result<String> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating snapshot dir {}", self.dir.display()))?;
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%3f");
        let path = self
            .dir
            .join(format!("{}_{stamp}.html", fingerprint(&task.name)));
        fs::write(&path, page.html.as_bytes())
            .await
            .with_context(|| format!("writing snapshot {}", path.display()))?;
        Ok(path.display().to_string())
    }
}
