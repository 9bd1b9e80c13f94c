//! Mapshot
//!
//! Renders web maps (base tiles, optional WMS overlays and a marker) to
//! JPEG/PNG/WebP images by driving a pool of headless browsers.
//!
//! # Layout
//!
//! - [`document`]: builds the self-contained map page with its readiness script
//! - [`async_api`]: async handle over a worker thread that owns one [`Engine`]
//! - [`pool`]: bounded, reusable set of engine instances
//! - [`render`]: waits for tiles to settle, captures, always returns the engine
//! - [`server`]: the HTTP surface (axum)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mapshot::{EngineConfig, LatLng, RenderRequest};
//! use mapshot::document::DocumentAssets;
//! use mapshot::events::LogSink;
//! use mapshot::pool::{EnginePool, PoolConfig};
//! use mapshot::render::{RenderTimings, Renderer};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let events = Arc::new(LogSink);
//! let pool = EnginePool::new::<mapshot::cdp::CdpEngine>(
//!     PoolConfig::default(),
//!     EngineConfig::default(),
//!     events.clone(),
//! );
//! let renderer = Renderer::new(pool.clone(), DocumentAssets::default(), RenderTimings::default(), events);
//!
//! let image = renderer.render(&RenderRequest::new(LatLng::new(41.0082, 28.9784), 15)).await?;
//! println!("{} bytes of {}", image.len(), image.content_type());
//! pool.drain().await;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod error;
pub use error::{Error, Result};

#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly engine handle (worker-thread backed)
pub mod async_api;
pub use async_api::EngineInstance;

pub mod config;
pub mod document;
pub mod events;
pub mod pool;
pub mod render;
pub mod request;
pub mod server;
pub mod validation;

pub use request::{ImageFormat, LatLng, OverlaySpec, PinSpec, RenderRequest};

/// Configuration used when launching an engine
///
/// The defaults target containers: sandboxing is off and the window is large
/// enough for the biggest capture the service accepts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Browser window size; captures are clipped from its top-left corner
    pub window: Viewport,
    /// Timeout applied to individual protocol calls in milliseconds
    pub timeout_ms: u64,
    /// Custom browser binary, otherwise the driver's lookup is used
    pub chrome_path: Option<PathBuf>,
    /// Run the browser with its sandbox (usually unavailable in containers)
    pub sandbox: bool,
    /// Extra command line flags passed to the browser
    pub launch_args: Vec<String>,
    /// How long the browser may sit without protocol traffic before the
    /// driver shuts it down, in seconds
    pub idle_timeout_secs: u64,
}

/// Flags for headless runs in memory- and privilege-constrained environments
pub const DEFAULT_LAUNCH_ARGS: &[&str] = &[
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--disable-gpu",
    "--no-first-run",
    "--no-zygote",
];

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window: Viewport {
                width: request::MAX_DIMENSION,
                height: request::MAX_DIMENSION,
            },
            timeout_ms: 30000,
            chrome_path: None,
            sandbox: false,
            launch_args: DEFAULT_LAUNCH_ARGS.iter().map(|s| s.to_string()).collect(),
            idle_timeout_secs: 24 * 60 * 60,
        }
    }
}

/// Pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// What a capture should produce
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureOptions {
    pub format: ImageFormat,
    /// Encoder quality, only passed for formats that use it
    pub quality: Option<u8>,
    /// Region captured from the top-left corner of the page
    pub clip: Viewport,
}

impl CaptureOptions {
    pub fn for_request(request: &RenderRequest) -> Self {
        Self {
            format: request.format,
            quality: request.effective_quality(),
            clip: request.size,
        }
    }
}

/// Why the page declared itself ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyReason {
    /// Every started tile fetch finished (loaded or errored)
    Tiles,
    /// No tile fetch started within the grace delay
    Offline,
    /// The document's hard ceiling fired
    Ceiling,
}

/// One observation of the page's readiness signal
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadinessProbe {
    pub ready: bool,
    pub reason: Option<ReadyReason>,
    /// Tile fetches started so far
    pub started: u64,
    /// Tile fetches finished so far, successfully or not
    pub completed: u64,
}

impl ReadinessProbe {
    pub fn pending(started: u64, completed: u64) -> Self {
        Self {
            ready: false,
            reason: None,
            started,
            completed,
        }
    }

    pub fn ready(reason: ReadyReason, started: u64, completed: u64) -> Self {
        Self {
            ready: true,
            reason: Some(reason),
            started,
            completed,
        }
    }
}

/// Core trait for engines that can host one map page at a time
///
/// Implementations are synchronous and are driven from a dedicated worker
/// thread (see [`EngineInstance`]), so they need not be `Send`.
pub trait Engine {
    /// Launch a new engine with the given configuration
    fn new(config: EngineConfig) -> Result<Self>
    where
        Self: Sized;

    /// Open a fresh page sized to `viewport` and load `html` into it,
    /// replacing any page left over from a previous lease
    fn load_document(&mut self, html: &str, viewport: Viewport) -> Result<()>;

    /// Read the readiness signal published by the loaded document
    fn probe_readiness(&mut self) -> Result<ReadinessProbe>;

    /// Capture the current page
    fn capture(&mut self, options: &CaptureOptions) -> Result<Vec<u8>>;

    /// Close the current page, keeping the engine alive
    fn close_page(&mut self) -> Result<()>;

    /// Cheap liveness check
    fn ping(&mut self) -> Result<()>;

    /// Close the engine and clean up resources
    fn close(self) -> Result<()>;
}
