//! Shared fixtures: a scripted in-process engine and a recording event sink.
#![allow(dead_code)]

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mapshot::document::DocumentAssets;
use mapshot::events::{EventSink, RenderEvent};
use mapshot::pool::{EnginePool, Launcher, PoolConfig};
use mapshot::render::{RenderTimings, Renderer};
use mapshot::{
    CaptureOptions, Engine, EngineConfig, EngineInstance, Error, ReadinessProbe, ReadyReason, Result, Viewport,
};

/// Knobs shared by every engine a [`FakeBrowser`] launches
#[derive(Default)]
pub struct FakeBrowser {
    pub launch_fails: AtomicBool,
    pub load_fails: AtomicBool,
    pub probe_fails: AtomicBool,
    pub never_ready: AtomicBool,
    pub ping_fails: AtomicBool,
    pub close_page_fails: AtomicBool,
    /// Upcoming captures that fail
    pub capture_failures: AtomicUsize,
    /// Probes answered "pending" before the page reports ready
    pub pending_probes: AtomicUsize,
    /// Milliseconds each ping and each engine close takes
    pub ping_delay_ms: AtomicU64,
    pub close_delay_ms: AtomicU64,

    pub launched: AtomicUsize,
    pub closed: AtomicUsize,
    pub loads: AtomicUsize,
    pub captures: AtomicUsize,
    pub pages_closed: AtomicUsize,
    pub last_document: Mutex<Option<String>>,
}

impl FakeBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launcher(self: &Arc<Self>) -> Launcher {
        let browser = self.clone();
        Arc::new(move |id: u64, _config: EngineConfig| -> BoxFuture<'static, Result<EngineInstance>> {
            let browser = browser.clone();
            Box::pin(async move {
                if browser.launch_fails.load(Ordering::SeqCst) {
                    return Err(Error::InitializationError("no browser binary".into()));
                }
                EngineInstance::spawn(id, move || FakeEngine::start(browser)).await
            })
        })
    }

    pub fn last_document(&self) -> Option<String> {
        self.last_document.lock().unwrap().clone()
    }
}

pub struct FakeEngine {
    browser: Arc<FakeBrowser>,
    page: Option<Viewport>,
    probes: usize,
}

impl FakeEngine {
    fn start(browser: Arc<FakeBrowser>) -> Result<Self> {
        browser.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            browser,
            page: None,
            probes: 0,
        })
    }
}

impl Engine for FakeEngine {
    fn new(_config: EngineConfig) -> Result<Self> {
        Self::start(FakeBrowser::new())
    }

    fn load_document(&mut self, html: &str, viewport: Viewport) -> Result<()> {
        let b = &self.browser;
        b.loads.fetch_add(1, Ordering::SeqCst);
        *b.last_document.lock().unwrap() = Some(html.to_string());
        if b.load_fails.load(Ordering::SeqCst) {
            return Err(Error::LoadError("navigation failed".into()));
        }
        self.page = Some(viewport);
        self.probes = 0;
        Ok(())
    }

    fn probe_readiness(&mut self) -> Result<ReadinessProbe> {
        let b = &self.browser;
        if self.page.is_none() {
            return Err(Error::ScriptError("no page".into()));
        }
        if b.probe_fails.load(Ordering::SeqCst) {
            return Err(Error::ScriptError("page crashed".into()));
        }
        self.probes += 1;
        if b.never_ready.load(Ordering::SeqCst) || self.probes <= b.pending_probes.load(Ordering::SeqCst) {
            return Ok(ReadinessProbe::pending(4, 1));
        }
        Ok(ReadinessProbe::ready(ReadyReason::Tiles, 4, 4))
    }

    fn capture(&mut self, options: &CaptureOptions) -> Result<Vec<u8>> {
        let b = &self.browser;
        b.captures.fetch_add(1, Ordering::SeqCst);
        let failing = b
            .capture_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::RenderError("tab crashed".into()));
        }
        Ok(format!(
            "{}:{}x{}:{:?}",
            options.format, options.clip.width, options.clip.height, options.quality
        )
        .into_bytes())
    }

    fn close_page(&mut self) -> Result<()> {
        self.page = None;
        self.browser.pages_closed.fetch_add(1, Ordering::SeqCst);
        if self.browser.close_page_fails.load(Ordering::SeqCst) {
            return Err(Error::Other("tab would not close".into()));
        }
        Ok(())
    }

    fn ping(&mut self) -> Result<()> {
        std::thread::sleep(Duration::from_millis(self.browser.ping_delay_ms.load(Ordering::SeqCst)));
        if self.browser.ping_fails.load(Ordering::SeqCst) {
            return Err(Error::Other("browser hung".into()));
        }
        Ok(())
    }

    fn close(self) -> Result<()> {
        std::thread::sleep(Duration::from_millis(self.browser.close_delay_ms.load(Ordering::SeqCst)));
        self.browser.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Keeps every event for later assertions
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RenderEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RenderEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &RenderEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn pool_with(browser: &Arc<FakeBrowser>, capacity: usize, events: Arc<dyn EventSink>) -> EnginePool {
    EnginePool::with_launcher(
        PoolConfig {
            capacity,
            ping_timeout: Duration::from_millis(500),
            close_timeout: Duration::from_millis(500),
            ..PoolConfig::default()
        },
        EngineConfig::default(),
        events,
        browser.launcher(),
    )
}

/// The same ladder as production, shrunk so tests finish quickly
pub fn fast_timings() -> RenderTimings {
    RenderTimings {
        offline_grace: Duration::from_millis(100),
        document_ceiling: Duration::from_millis(300),
        readiness_timeout: Duration::from_millis(400),
        settle_delay: Duration::from_millis(10),
        poll_interval: Duration::from_millis(5),
        load_timeout: Duration::from_secs(2),
        capture_timeout: Duration::from_secs(2),
        page_close_timeout: Duration::from_secs(2),
    }
}

pub fn renderer_with(browser: &Arc<FakeBrowser>, capacity: usize, events: Arc<dyn EventSink>) -> Renderer {
    let pool = pool_with(browser, capacity, events.clone());
    Renderer::new(pool, DocumentAssets::default(), fast_timings(), events)
}
