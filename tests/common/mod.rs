// tests/common/mod.rs
// Shared fakes for integration tests. Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use pagewatch::error::{FetchError, NotificationError, PersistenceError};
use pagewatch::fetch::{FetchedPage, PageFetcher};
use pagewatch::notify::{Notifier, NotifierMux, RenderedMessage};
use pagewatch::state::{MemoryStateStore, StateStore, TaskState};

pub fn loader_page(version: &str) -> String {
    format!(
        r#"<html><body>
  <h1>Downloads</h1>
  <a class="dl" href="/files/Loader_V{version}.apk">Download Loader_V{version}.apk</a>
</body></html>"#
    )
}

/// Serves queued responses in order; the last one repeats forever.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_ok(&self, html: impl Into<String>) -> &Self {
        self.script.lock().unwrap().push_back(Ok(html.into()));
        self
    }

    pub fn push_err(&self, msg: impl Into<String>) -> &Self {
        self.script.lock().unwrap().push_back(Err(msg.into()));
        self
    }

    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.calls.lock().unwrap().push(Instant::now());
        let next = {
            let mut q = self.script.lock().unwrap();
            if q.len() > 1 {
                q.pop_front()
            } else {
                q.front().cloned()
            }
        };
        match next {
            Some(Ok(html)) => Ok(FetchedPage::from_html(url, html)),
            Some(Err(msg)) => Err(FetchError::Other(msg)),
            None => Err(FetchError::Other("nothing scripted".into())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Takes `delay` per fetch; tracks starts and peak concurrency per URL.
pub struct SlowFetcher {
    delays: HashMap<String, Duration>,
    starts: Mutex<HashMap<String, usize>>,
    in_flight: Mutex<HashMap<String, usize>>,
    peak: Mutex<HashMap<String, usize>>,
}

impl SlowFetcher {
    pub fn new(delays: &[(&str, Duration)]) -> Arc<Self> {
        Arc::new(Self {
            delays: delays
                .iter()
                .map(|(u, d)| (u.to_string(), *d))
                .collect(),
            starts: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            peak: Mutex::new(HashMap::new()),
        })
    }

    pub fn starts(&self, url: &str) -> usize {
        self.starts.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn peak(&self, url: &str) -> usize {
        self.peak.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PageFetcher for SlowFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        *self.starts.lock().unwrap().entry(url.to_string()).or_default() += 1;
        {
            let mut f = self.in_flight.lock().unwrap();
            let n = f.entry(url.to_string()).or_default();
            *n += 1;
            let mut p = self.peak.lock().unwrap();
            let peak = p.entry(url.to_string()).or_default();
            *peak = (*peak).max(*n);
        }
        let delay = self.delays.get(url).copied().unwrap_or_default();
        tokio::time::sleep(delay).await;
        *self
            .in_flight
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() -= 1;
        Ok(FetchedPage::from_html(url, "<p id='v'>1</p>"))
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

pub struct RecordingNotifier {
    channel: &'static str,
    fail: bool,
    sent: Mutex<Vec<RenderedMessage>>,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn ok(channel: &'static str) -> Arc<Self> {
        Arc::new(Self {
            channel,
            fail: false,
            sent: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn failing(channel: &'static str) -> Arc<Self> {
        Arc::new(Self {
            channel,
            fail: true,
            sent: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn sent(&self) -> Vec<RenderedMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> &'static str {
        self.channel
    }

    async fn send(&self, msg: &RenderedMessage) -> Result<(), NotificationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NotificationError::TransportFailure("channel down".into()));
        }
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

pub fn mux(notifiers: &[Arc<RecordingNotifier>]) -> NotifierMux {
    NotifierMux::new(
        notifiers
            .iter()
            .map(|n| n.clone() as Arc<dyn Notifier>)
            .collect(),
    )
}

/// A store whose backend is gone.
pub struct UnavailableStore;

#[async_trait]
impl StateStore for UnavailableStore {
    async fn load(&self, _task_name: &str) -> Result<Option<TaskState>, PersistenceError> {
        Err(PersistenceError::Unavailable("disk offline".into()))
    }

    async fn save(&self, _state: &TaskState) -> Result<(), PersistenceError> {
        Err(PersistenceError::Unavailable("disk offline".into()))
    }

    async fn remove(&self, _task_name: &str) -> Result<bool, PersistenceError> {
        Err(PersistenceError::Unavailable("disk offline".into()))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

/// Writes always land; reads fail while `fail_reads(true)` is in effect.
#[derive(Default)]
pub struct ReadFailingStore {
    inner: MemoryStateStore,
    reads_fail: AtomicBool,
}

impl ReadFailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_reads(&self, on: bool) {
        self.reads_fail.store(on, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryStateStore {
        &self.inner
    }
}

#[async_trait]
impl StateStore for ReadFailingStore {
    async fn load(&self, task_name: &str) -> Result<Option<TaskState>, PersistenceError> {
        if self.reads_fail.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("read timed out".into()));
        }
        self.inner.load(task_name).await
    }

    async fn save(&self, state: &TaskState) -> Result<(), PersistenceError> {
        self.inner.save(state).await
    }

    async fn remove(&self, task_name: &str) -> Result<bool, PersistenceError> {
        self.inner.remove(task_name).await
    }

    fn name(&self) -> &'static str {
        "read-failing"
    }
}
