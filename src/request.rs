//! Render request data model
//!
//! A [`RenderRequest`] is built by the validation layer and never mutated
//! afterwards. Everything downstream (document generation, rendering) reads
//! from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Viewport;

pub const MIN_ZOOM: u8 = 1;
pub const MAX_ZOOM: u8 = 20;
pub const MIN_DIMENSION: u32 = 100;
pub const MAX_DIMENSION: u32 = 2000;
pub const MAX_OVERLAYS: usize = 5;
pub const MAX_LABEL_CHARS: usize = 50;
pub const DEFAULT_QUALITY: u8 = 70;
pub const DEFAULT_PIN_RADIUS: f64 = 20.0;
pub const DEFAULT_PIN_COLOR: &str = "#e53935";

/// A geographic coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lon: f64,
}

impl LatLng {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Output image encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Webp];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }

    /// Media type sent back in `Content-Type`
    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
        }
    }

    /// Whether the encoder honours a quality setting
    pub fn uses_quality(&self) -> bool {
        matches!(self, ImageFormat::Jpeg)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jpeg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(format!("unsupported format '{}'", other)),
        }
    }
}

/// A WMS layer drawn above the base tiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlaySpec {
    pub source_url: String,
    pub layer_names: String,
    pub opacity: f64,
}

impl OverlaySpec {
    pub fn new(source_url: impl Into<String>, layer_names: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            layer_names: layer_names.into(),
            opacity: 1.0,
        }
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }
}

/// A circular marker, optionally labelled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinSpec {
    /// Overrides the request center when set
    pub position: Option<LatLng>,
    pub label: Option<String>,
    pub color: Option<String>,
    pub radius: f64,
}

impl Default for PinSpec {
    fn default() -> Self {
        Self {
            position: None,
            label: None,
            color: None,
            radius: DEFAULT_PIN_RADIUS,
        }
    }
}

/// A validated render request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub center: LatLng,
    pub zoom: u8,
    pub size: Viewport,
    pub format: ImageFormat,
    /// Only meaningful for JPEG
    pub quality: u8,
    /// Stacking order: first entry sits directly above the base layer
    pub overlays: Vec<OverlaySpec>,
    pub marker: Option<PinSpec>,
}

impl RenderRequest {
    /// A request with every optional field at its default
    pub fn new(center: LatLng, zoom: u8) -> Self {
        Self {
            center,
            zoom,
            size: Viewport::default(),
            format: ImageFormat::default(),
            quality: DEFAULT_QUALITY,
            overlays: Vec::new(),
            marker: None,
        }
    }

    /// JPEG quality to hand to the encoder, `None` for lossless formats
    pub fn effective_quality(&self) -> Option<u8> {
        self.format.uses_quality().then_some(self.quality)
    }

    /// Where the marker is drawn, if any
    pub fn marker_position(&self) -> Option<LatLng> {
        self.marker
            .as_ref()
            .map(|pin| pin.position.unwrap_or(self.center))
    }
}
