//! Error types for the render engine layer

use thiserror::Error;

/// Result type alias for engine and pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by engines, engine workers and the engine pool
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to launch or initialize an engine
    #[error("Engine initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load the map document
    #[error("Failed to load document: {0}")]
    LoadError(String),

    /// Failed to capture pixels
    #[error("Capture failed: {0}")]
    RenderError(String),

    /// Failed to evaluate a script in the page
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The worker thread that owns the engine is gone
    #[error("Engine worker stopped: {0}")]
    EngineGone(String),

    /// The pool has been drained and hands out no more engines
    #[error("Engine pool is shutting down")]
    ShuttingDown,

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a timeout error from a `Duration`
    pub fn timeout(after: std::time::Duration) -> Self {
        Error::Timeout(after.as_millis() as u64)
    }
}
