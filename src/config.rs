//! Process configuration from command line flags and environment variables.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::document::DocumentAssets;
use crate::pool::PoolConfig;
use crate::server::rate_limit::RateLimitConfig;
use crate::{EngineConfig, Error, Result};

#[derive(Parser, Debug, Clone)]
#[command(name = "mapshot")]
#[command(about = "Render web maps to images over HTTP", long_about = None)]
pub struct ServiceConfig {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Idle browser instances kept for reuse
    #[arg(long, env = "POOL_CAPACITY", default_value_t = 3)]
    pub pool_capacity: usize,

    /// Chrome/Chromium binary (auto-detected when unset)
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Base layer tile URL template
    #[arg(long, env = "BASE_TILE_URL")]
    pub base_tile_url: Option<String>,

    /// Attribution shown on the base layer
    #[arg(long, env = "TILE_ATTRIBUTION")]
    pub tile_attribution: Option<String>,

    #[arg(long, env = "LEAFLET_JS_URL")]
    pub leaflet_js_url: Option<String>,

    #[arg(long, env = "LEAFLET_CSS_URL")]
    pub leaflet_css_url: Option<String>,

    /// Requests allowed per client within one window
    #[arg(long, env = "RATE_LIMIT_MAX", default_value_t = 100)]
    pub rate_limit_max: u32,

    /// Rate limit window in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value_t = 900)]
    pub rate_limit_window_secs: u64,

    /// Runtime worker threads (default: number of CPUs)
    #[arg(long, env = "WORKER_THREADS")]
    pub worker_threads: Option<usize>,
}

impl ServiceConfig {
    /// Reject combinations clap cannot express
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_max == 0 {
            return Err(Error::ConfigError("RATE_LIMIT_MAX must be at least 1".into()));
        }
        if self.rate_limit_window_secs == 0 {
            return Err(Error::ConfigError("RATE_LIMIT_WINDOW_SECS must be at least 1".into()));
        }
        if self.worker_threads == Some(0) {
            return Err(Error::ConfigError("WORKER_THREADS must be at least 1".into()));
        }
        self.listen_addr().map(|_| ())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let raw = if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        };
        raw.parse()
            .map_err(|e| Error::ConfigError(format!("invalid listen address '{}': {}", raw, e)))
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(num_cpus::get)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            chrome_path: self.chrome_path.clone(),
            ..EngineConfig::default()
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            capacity: self.pool_capacity,
            ..PoolConfig::default()
        }
    }

    pub fn document_assets(&self) -> DocumentAssets {
        let defaults = DocumentAssets::default();
        DocumentAssets {
            base_tile_url: self.base_tile_url.clone().unwrap_or(defaults.base_tile_url),
            attribution: self.tile_attribution.clone().unwrap_or(defaults.attribution),
            base_max_zoom: defaults.base_max_zoom,
            leaflet_js_url: self.leaflet_js_url.clone().unwrap_or(defaults.leaflet_js_url),
            leaflet_css_url: self.leaflet_css_url.clone().unwrap_or(defaults.leaflet_css_url),
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_max,
            window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }
}
