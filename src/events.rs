//! Structured render events.
//!
//! The pool and the renderer report what they do through an [`EventSink`]
//! instead of logging directly, so the output sink is chosen by whoever
//! builds them:
//!
//! - [`LogSink`] forwards to the `log` facade (the binary routes that into
//!   `tracing-subscriber`)
//! - [`NoopSink`] discards everything
//!
//! Tests typically install a recording sink and assert on the events.

use std::time::Duration;

use crate::render::{FailureKind, RenderStage};
use crate::ReadinessProbe;

/// Something that happened to an engine or a render
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    EngineLaunched { engine: u64 },
    EngineLaunchFailed { error: String },
    EngineReused { engine: u64 },
    EngineReturned { engine: u64, idle: usize },
    EngineDestroyed { engine: u64, reason: String },
    /// Best-effort cleanup failed; never surfaced to callers
    CleanupFailed { engine: u64, error: String },
    StageEntered { render: u64, stage: RenderStage },
    ReadinessObserved { render: u64, probe: ReadinessProbe, waited: Duration },
    RenderCompleted { render: u64, bytes: usize, elapsed: Duration },
    RenderFailed { render: u64, kind: FailureKind, stage: RenderStage, message: String },
    PoolDrained { destroyed: usize },
}

/// Receives render events. Implementations must be cheap and must not block.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &RenderEvent);
}

/// Forwards events to the `log` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: &RenderEvent) {
        match event {
            RenderEvent::EngineLaunched { engine } => {
                log::info!(target: "mapshot::pool", "engine {} launched", engine)
            }
            RenderEvent::EngineLaunchFailed { error } => {
                log::error!(target: "mapshot::pool", "engine launch failed: {}", error)
            }
            RenderEvent::EngineReused { engine } => {
                log::debug!(target: "mapshot::pool", "engine {} reused", engine)
            }
            RenderEvent::EngineReturned { engine, idle } => {
                log::debug!(target: "mapshot::pool", "engine {} returned ({} idle)", engine, idle)
            }
            RenderEvent::EngineDestroyed { engine, reason } => {
                log::info!(target: "mapshot::pool", "engine {} destroyed: {}", engine, reason)
            }
            RenderEvent::CleanupFailed { engine, error } => {
                log::warn!(target: "mapshot::pool", "cleanup of engine {} failed: {}", engine, error)
            }
            RenderEvent::StageEntered { render, stage } => {
                log::trace!(target: "mapshot::render", "render {} -> {:?}", render, stage)
            }
            RenderEvent::ReadinessObserved { render, probe, waited } => log::debug!(
                target: "mapshot::render",
                "render {} ready after {:?} ({:?}, {}/{} tiles)",
                render,
                waited,
                probe.reason,
                probe.completed,
                probe.started
            ),
            RenderEvent::RenderCompleted { render, bytes, elapsed } => log::info!(
                target: "mapshot::render",
                "render {} captured {} bytes in {:?}",
                render,
                bytes,
                elapsed
            ),
            RenderEvent::RenderFailed { render, kind, stage, message } => log::error!(
                target: "mapshot::render",
                "render {} failed in {:?} ({}): {}",
                render,
                stage,
                kind,
                message
            ),
            RenderEvent::PoolDrained { destroyed } => {
                log::info!(target: "mapshot::pool", "pool drained, {} engines destroyed", destroyed)
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    #[inline]
    fn record(&self, _event: &RenderEvent) {}
}
