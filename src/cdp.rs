//! Chrome DevTools Protocol adapter implementation

use crate::{CaptureOptions, Engine, EngineConfig, Error, ImageFormat, ReadinessProbe, Result, Viewport};
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

/// Reads the globals published by the document's readiness script.
const READINESS_PROBE: &str = r#"
(function() {
    var tiles = window.mapshotTiles || {};
    return JSON.stringify({
        ready: window.mapshotReady === true,
        reason: window.mapshotReadyReason || null,
        started: tiles.started || 0,
        completed: tiles.completed || 0
    });
})()
"#;

/// CDP-based engine implementation (uses the `headless_chrome` crate)
///
/// Owns one Chrome process. Every loaded document gets its own tab; the tab
/// from the previous document is closed first.
pub struct CdpEngine {
    browser: Browser,
    tab: Option<Arc<Tab>>,
    config: EngineConfig,
}

impl CdpEngine {
    fn current_tab(&self) -> Result<&Arc<Tab>> {
        self.tab
            .as_ref()
            .ok_or_else(|| Error::Other("No document is loaded".into()))
    }
}

fn screenshot_format(format: ImageFormat) -> Page::CaptureScreenshotFormatOption {
    match format {
        ImageFormat::Jpeg => Page::CaptureScreenshotFormatOption::Jpeg,
        ImageFormat::Png => Page::CaptureScreenshotFormatOption::Png,
        ImageFormat::Webp => Page::CaptureScreenshotFormatOption::Webp,
    }
}

impl Engine for CdpEngine {
    fn new(config: EngineConfig) -> Result<Self>
    where
        Self: Sized,
    {
        let args: Vec<&OsStr> = config.launch_args.iter().map(OsStr::new).collect();

        // Configure headless Chrome launch options
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(config.sandbox)
            .window_size(Some((config.window.width, config.window.height)))
            .path(config.chrome_path.clone())
            .args(args)
            .idle_browser_timeout(Duration::from_secs(config.idle_timeout_secs))
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        // Launch the browser
        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        Ok(Self {
            browser,
            tab: None,
            config,
        })
    }

    fn load_document(&mut self, html: &str, viewport: Viewport) -> Result<()> {
        if viewport.width > self.config.window.width || viewport.height > self.config.window.height {
            return Err(Error::LoadError(format!(
                "Requested {}x{} exceeds the {}x{} browser window",
                viewport.width, viewport.height, self.config.window.width, self.config.window.height
            )));
        }

        if let Err(e) = self.close_page() {
            warn!("Failed to close previous page: {}", e);
        }

        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::LoadError(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(Duration::from_millis(self.config.timeout_ms));

        // Encode the document into a data URL so no file or server is needed
        let url = format!(
            "data:text/html;charset=utf-8;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(html)
        );

        // Track the tab before navigating so a failed load still gets closed
        self.tab = Some(tab.clone());

        tab.navigate_to(&url)
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;

        debug!("Loaded {} byte document", html.len());
        Ok(())
    }

    fn probe_readiness(&mut self) -> Result<ReadinessProbe> {
        let eval = self
            .current_tab()?
            .evaluate(READINESS_PROBE, false)
            .map_err(|e| Error::ScriptError(format!("Readiness probe failed: {}", e)))?;

        let raw = match eval.value {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => return Err(Error::ScriptError("No value returned from readiness probe".into())),
        };

        serde_json::from_str(&raw)
            .map_err(|e| Error::ScriptError(format!("Malformed readiness payload '{}': {}", raw, e)))
    }

    fn capture(&mut self, options: &CaptureOptions) -> Result<Vec<u8>> {
        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: f64::from(options.clip.width),
            height: f64::from(options.clip.height),
            scale: 1.0,
        };

        let data = self
            .current_tab()?
            .capture_screenshot(
                screenshot_format(options.format),
                options.quality.map(u32::from),
                Some(clip),
                true,
            )
            .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))?;

        Ok(data)
    }

    fn close_page(&mut self) -> Result<()> {
        if let Some(tab) = self.tab.take() {
            tab.close(false)
                .map_err(|e| Error::Other(format!("Failed to close tab: {}", e)))?;
        }
        Ok(())
    }

    fn ping(&mut self) -> Result<()> {
        self.browser
            .get_version()
            .map(|_| ())
            .map_err(|e| Error::CdpError(format!("Browser did not answer: {}", e)))
    }

    fn close(mut self) -> Result<()> {
        if let Err(e) = self.close_page() {
            warn!("Failed to close page during shutdown: {}", e);
        }
        // Dropping the browser terminates the child process
        drop(self.browser);
        Ok(())
    }
}
