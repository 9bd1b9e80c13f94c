//! Readiness synchronization and request orchestration.
//!
//! A render walks through
//! `Validated -> EngineAcquired -> DocumentLoaded -> AwaitingReadiness -> Ready -> Captured -> Released`.
//! Whatever happens after the engine is acquired, the lease goes back through
//! [`EnginePool::release`], which decides between reuse and destruction.
//!
//! Readiness is layered. The document flips its own signal when the tile
//! counters settle, after the offline grace delay, or at its hard ceiling;
//! the renderer polls that signal and gives up at its own, longer ceiling.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::document::{render_document, DocumentAssets, DocumentTimers};
use crate::events::{EventSink, RenderEvent};
use crate::pool::EnginePool;
use crate::{CaptureOptions, EngineInstance, ImageFormat, ReadinessProbe, RenderRequest, Result};

/// Every timer involved in a render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTimings {
    /// In-page: ready if no tile fetch started by then
    pub offline_grace: Duration,
    /// In-page: ready no matter what
    pub document_ceiling: Duration,
    /// How long the renderer waits for the page to signal readiness
    pub readiness_timeout: Duration,
    /// Pause between readiness and capture for the last paint
    pub settle_delay: Duration,
    pub poll_interval: Duration,
    pub load_timeout: Duration,
    pub capture_timeout: Duration,
    pub page_close_timeout: Duration,
}

impl Default for RenderTimings {
    fn default() -> Self {
        Self {
            offline_grace: Duration::from_secs(2),
            document_ceiling: Duration::from_secs(15),
            readiness_timeout: Duration::from_secs(20),
            settle_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            load_timeout: Duration::from_secs(20),
            capture_timeout: Duration::from_secs(10),
            page_close_timeout: Duration::from_secs(5),
        }
    }
}

impl RenderTimings {
    /// The in-page part of the ladder
    pub fn document(&self) -> DocumentTimers {
        DocumentTimers {
            offline_grace: self.offline_grace,
            hard_ceiling: self.document_ceiling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStage {
    Validated,
    EngineAcquired,
    DocumentLoaded,
    AwaitingReadiness,
    Ready,
    Captured,
    Released,
}

/// Machine-readable failure classes reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    EngineAcquisitionFailure,
    LoadFailure,
    RenderTimeout,
    CaptureFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::EngineAcquisitionFailure => "EngineAcquisitionFailure",
            FailureKind::LoadFailure => "LoadFailure",
            FailureKind::RenderTimeout => "RenderTimeout",
            FailureKind::CaptureFailure => "CaptureFailure",
        }
    }

    /// Whether the engine that hit this failure can still be trusted.
    /// A page that merely never settled leaves a responsive engine behind.
    pub fn poisons_engine(&self) -> bool {
        matches!(self, FailureKind::LoadFailure | FailureKind::CaptureFailure)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A render that did not produce an image
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct RenderFailure {
    pub kind: FailureKind,
    /// Last stage reached before the failure
    pub stage: RenderStage,
    pub message: String,
}

impl RenderFailure {
    pub fn new(kind: FailureKind, stage: RenderStage, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
        }
    }
}

/// Encoded image bytes and their format
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

impl RenderedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Turns validated requests into images using pooled engines
pub struct Renderer {
    pool: EnginePool,
    assets: DocumentAssets,
    timings: RenderTimings,
    events: Arc<dyn EventSink>,
    next_render: AtomicU64,
}

impl Renderer {
    pub fn new(pool: EnginePool, assets: DocumentAssets, timings: RenderTimings, events: Arc<dyn EventSink>) -> Self {
        Self {
            pool,
            assets,
            timings,
            events,
            next_render: AtomicU64::new(1),
        }
    }

    pub fn pool(&self) -> &EnginePool {
        &self.pool
    }

    /// The document a render of `request` would load
    pub fn preview(&self, request: &RenderRequest) -> String {
        render_document(request, &self.assets, &self.timings.document())
    }

    /// Render `request` to an image. The leased engine is always handed
    /// back to the pool before this returns.
    pub async fn render(&self, request: &RenderRequest) -> std::result::Result<RenderedImage, RenderFailure> {
        let render = self.next_render.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        self.enter(render, RenderStage::Validated);

        let mut lease = match self.pool.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                return Err(self.failed(RenderFailure::new(
                    FailureKind::EngineAcquisitionFailure,
                    RenderStage::Validated,
                    e.to_string(),
                ), render));
            }
        };
        self.enter(render, RenderStage::EngineAcquired);

        let instance = lease.instance().clone();
        let outcome = self.drive(render, &instance, request).await;

        match &outcome {
            Err(failure) if failure.kind.poisons_engine() => lease.mark_unhealthy(),
            _ => {
                if let Err(e) = self.close_page(&instance).await {
                    self.events.record(&RenderEvent::CleanupFailed {
                        engine: instance.id(),
                        error: e.to_string(),
                    });
                    lease.mark_unhealthy();
                }
            }
        }

        self.pool.release(lease).await;
        self.enter(render, RenderStage::Released);

        match outcome {
            Ok(bytes) => {
                self.events.record(&RenderEvent::RenderCompleted {
                    render,
                    bytes: bytes.len(),
                    elapsed: started.elapsed(),
                });
                Ok(RenderedImage {
                    bytes,
                    format: request.format,
                })
            }
            Err(failure) => Err(self.failed(failure, render)),
        }
    }

    async fn drive(
        &self,
        render: u64,
        instance: &EngineInstance,
        request: &RenderRequest,
    ) -> std::result::Result<Vec<u8>, RenderFailure> {
        let html = self.preview(request);
        let t = &self.timings;

        match tokio::time::timeout(t.load_timeout, instance.load_document(&html, request.size)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(RenderFailure::new(FailureKind::LoadFailure, RenderStage::EngineAcquired, e.to_string()))
            }
            Err(_) => {
                return Err(RenderFailure::new(
                    FailureKind::LoadFailure,
                    RenderStage::EngineAcquired,
                    format!("Map document did not load within {}ms", t.load_timeout.as_millis()),
                ))
            }
        }
        self.enter(render, RenderStage::DocumentLoaded);

        self.enter(render, RenderStage::AwaitingReadiness);
        let waiting_since = Instant::now();
        let probe = match tokio::time::timeout(t.readiness_timeout, self.await_readiness(instance)).await {
            Ok(Ok(probe)) => probe,
            Ok(Err(e)) => {
                return Err(RenderFailure::new(FailureKind::LoadFailure, RenderStage::AwaitingReadiness, e.to_string()))
            }
            Err(_) => {
                return Err(RenderFailure::new(
                    FailureKind::RenderTimeout,
                    RenderStage::AwaitingReadiness,
                    format!("Map did not become ready within {}ms", t.readiness_timeout.as_millis()),
                ))
            }
        };
        self.events.record(&RenderEvent::ReadinessObserved {
            render,
            probe,
            waited: waiting_since.elapsed(),
        });
        self.enter(render, RenderStage::Ready);

        tokio::time::sleep(t.settle_delay).await;

        let bytes = match tokio::time::timeout(t.capture_timeout, instance.capture(CaptureOptions::for_request(request))).await {
            Ok(Ok(bytes)) if !bytes.is_empty() => bytes,
            Ok(Ok(_)) => {
                return Err(RenderFailure::new(
                    FailureKind::CaptureFailure,
                    RenderStage::Ready,
                    "Engine returned an empty image",
                ))
            }
            Ok(Err(e)) => {
                return Err(RenderFailure::new(FailureKind::CaptureFailure, RenderStage::Ready, e.to_string()))
            }
            Err(_) => {
                return Err(RenderFailure::new(
                    FailureKind::CaptureFailure,
                    RenderStage::Ready,
                    format!("Capture did not finish within {}ms", t.capture_timeout.as_millis()),
                ))
            }
        };
        self.enter(render, RenderStage::Captured);

        Ok(bytes)
    }

    /// Poll the page until it reports ready. Bounded by the caller.
    async fn await_readiness(&self, instance: &EngineInstance) -> Result<ReadinessProbe> {
        let mut ticker = tokio::time::interval(self.timings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let probe = instance.probe_readiness().await?;
            if probe.ready {
                return Ok(probe);
            }
        }
    }

    async fn close_page(&self, instance: &EngineInstance) -> Result<()> {
        let limit = self.timings.page_close_timeout;
        tokio::time::timeout(limit, instance.close_page())
            .await
            .map_err(|_| crate::Error::timeout(limit))?
    }

    fn enter(&self, render: u64, stage: RenderStage) {
        self.events.record(&RenderEvent::StageEntered { render, stage });
    }

    fn failed(&self, failure: RenderFailure, render: u64) -> RenderFailure {
        self.events.record(&RenderEvent::RenderFailed {
            render,
            kind: failure.kind,
            stage: failure.stage,
            message: failure.message.clone(),
        });
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ladder() {
        let t = RenderTimings::default();
        assert_eq!(t.offline_grace, Duration::from_secs(2));
        assert_eq!(t.document_ceiling, Duration::from_secs(15));
        assert_eq!(t.readiness_timeout, Duration::from_secs(20));
        assert_eq!(t.settle_delay, Duration::from_secs(1));
        assert!(t.offline_grace < t.document_ceiling);
        assert!(t.document_ceiling < t.readiness_timeout);

        let doc = t.document();
        assert_eq!(doc, DocumentTimers::default());
    }

    #[test]
    fn only_untrusted_engines_are_poisoned() {
        assert!(FailureKind::LoadFailure.poisons_engine());
        assert!(FailureKind::CaptureFailure.poisons_engine());
        assert!(!FailureKind::RenderTimeout.poisons_engine());
        assert!(!FailureKind::EngineAcquisitionFailure.poisons_engine());
    }

    #[test]
    fn failure_display_leads_with_kind() {
        let failure = RenderFailure::new(FailureKind::RenderTimeout, RenderStage::AwaitingReadiness, "slow tiles");
        assert_eq!(failure.to_string(), "RenderTimeout: slow tiles");
        assert_eq!(
            serde_json::to_value(RenderStage::AwaitingReadiness).unwrap(),
            "awaiting_readiness"
        );
    }

    #[test]
    fn image_reports_media_type() {
        let image = RenderedImage {
            bytes: vec![1, 2, 3],
            format: ImageFormat::Webp,
        };
        assert_eq!(image.content_type(), "image/webp");
        assert_eq!(image.len(), 3);
        assert!(!image.is_empty());
    }
}
