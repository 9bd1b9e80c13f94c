//! Request validation.
//!
//! Both entry points check every rule and report every violation, not just
//! the first one. A request is only built when the list comes back empty.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::request::{
    ImageFormat, LatLng, OverlaySpec, PinSpec, RenderRequest, DEFAULT_PIN_RADIUS, DEFAULT_QUALITY, MAX_DIMENSION,
    MAX_LABEL_CHARS, MAX_OVERLAYS, MAX_ZOOM, MIN_DIMENSION, MIN_ZOOM,
};
use crate::Viewport;

pub const MAX_PIN_RADIUS: f64 = 500.0;

/// One broken rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Validated<T> = std::result::Result<T, Vec<FieldViolation>>;

/// Uniform access to request fields, whatever their transport
trait Fields {
    /// `Ok(None)` when absent, `Err` with a message when present but not a number
    fn number(&self, key: &str) -> std::result::Result<Option<f64>, String>;
    fn string(&self, key: &str) -> std::result::Result<Option<String>, String>;
}

impl Fields for Map<String, Value> {
    fn number(&self, key: &str) -> std::result::Result<Option<f64>, String> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| format!("{} must be a number", key)),
            Some(_) => Err(format!("{} must be a number", key)),
        }
    }

    fn string(&self, key: &str) -> std::result::Result<Option<String>, String> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(format!("{} must be a string", key)),
        }
    }
}

impl Fields for HashMap<String, String> {
    fn number(&self, key: &str) -> std::result::Result<Option<f64>, String> {
        match self.get(key).map(|s| s.trim()) {
            None | Some("") => Ok(None),
            Some(raw) => match raw.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(Some(n)),
                _ => Err(format!("{} must be a number", key)),
            },
        }
    }

    fn string(&self, key: &str) -> std::result::Result<Option<String>, String> {
        Ok(self.get(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
    }
}

/// Collects violations while fields are read
struct Checker {
    violations: Vec<FieldViolation>,
}

impl Checker {
    fn new() -> Self {
        Self { violations: Vec::new() }
    }

    fn violation(&mut self, field: &str, message: impl Into<String>) {
        self.violations.push(FieldViolation::new(field, message));
    }

    fn number(&mut self, fields: &impl Fields, key: &str, path: &str) -> Option<f64> {
        match fields.number(key) {
            Ok(n) => n,
            Err(_) => {
                self.violation(path, format!("{} must be a number", path));
                None
            }
        }
    }

    fn string(&mut self, fields: &impl Fields, key: &str, path: &str) -> Option<String> {
        match fields.string(key) {
            Ok(s) => s,
            Err(_) => {
                self.violation(path, format!("{} must be a string", path));
                None
            }
        }
    }

    fn required(&mut self, value: Option<f64>, fields: &impl Fields, key: &str, path: &str) -> Option<f64> {
        if value.is_none() && fields.number(key).is_ok() {
            self.violation(path, format!("{} is required", path));
        }
        value
    }

    fn in_range(&mut self, value: Option<f64>, path: &str, min: f64, max: f64) -> Option<f64> {
        let value = value?;
        if value < min || value > max {
            self.violation(path, format!("{} must be between {} and {}", path, min, max));
            return None;
        }
        Some(value)
    }

    fn integer_in_range(&mut self, value: Option<f64>, path: &str, min: u32, max: u32) -> Option<u32> {
        let value = value?;
        if value.fract() != 0.0 {
            self.violation(path, format!("{} must be an integer", path));
            return None;
        }
        self.in_range(Some(value), path, f64::from(min), f64::from(max))
            .map(|v| v as u32)
    }
}

/// Fields shared by the query string and JSON body forms
fn check_common(checker: &mut Checker, fields: &impl Fields) -> Option<RenderRequest> {
    let lat = checker.number(fields, "lat", "lat");
    let lat = checker.required(lat, fields, "lat", "lat");
    let lat = checker.in_range(lat, "lat", -90.0, 90.0);

    let lon = checker.number(fields, "lon", "lon");
    let lon = checker.required(lon, fields, "lon", "lon");
    let lon = checker.in_range(lon, "lon", -180.0, 180.0);

    let zoom = checker.number(fields, "zoom", "zoom");
    let zoom = checker.required(zoom, fields, "zoom", "zoom");
    let zoom = checker.integer_in_range(zoom, "zoom", u32::from(MIN_ZOOM), u32::from(MAX_ZOOM));

    let width = checker.number(fields, "width", "width");
    let width = checker.integer_in_range(width, "width", MIN_DIMENSION, MAX_DIMENSION);
    let height = checker.number(fields, "height", "height");
    let height = checker.integer_in_range(height, "height", MIN_DIMENSION, MAX_DIMENSION);

    let format = match checker.string(fields, "format", "format") {
        None => Some(ImageFormat::default()),
        Some(raw) => match raw.parse::<ImageFormat>() {
            Ok(format) => Some(format),
            Err(_) => {
                checker.violation("format", "format must be one of jpeg, png, webp");
                None
            }
        },
    };

    let quality = checker.number(fields, "quality", "quality");
    let quality = match format {
        Some(f) if f.uses_quality() => checker.integer_in_range(quality, "quality", 1, 100),
        _ => None,
    };

    let (lat, lon, zoom, format) = (lat?, lon?, zoom?, format?);
    let defaults = Viewport::default();
    let mut request = RenderRequest::new(LatLng::new(lat, lon), zoom as u8);
    request.size = Viewport {
        width: width.unwrap_or(defaults.width),
        height: height.unwrap_or(defaults.height),
    };
    request.format = format;
    request.quality = quality.map(|q| q as u8).unwrap_or(DEFAULT_QUALITY);
    Some(request)
}

fn is_web_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    ["http://", "https://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme) && lower.len() > scheme.len())
}

fn check_overlays(checker: &mut Checker, value: Option<&Value>) -> Vec<OverlaySpec> {
    let items = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items,
        Some(_) => {
            checker.violation("overlays", "overlays must be an array");
            return Vec::new();
        }
    };

    if items.len() > MAX_OVERLAYS {
        checker.violation("overlays", format!("overlays must contain at most {} entries", MAX_OVERLAYS));
    }

    let mut overlays = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let prefix = format!("overlays[{}]", index);
        let Some(fields) = item.as_object() else {
            checker.violation(&prefix, format!("{} must be an object", prefix));
            continue;
        };

        let url_path = format!("{}.sourceUrl", prefix);
        let source_url = match checker.string(fields, "sourceUrl", &url_path) {
            Some(url) if url.trim().is_empty() => {
                checker.violation(&url_path, format!("{} must not be empty", url_path));
                None
            }
            Some(url) if !is_web_url(url.trim()) => {
                checker.violation(&url_path, format!("{} must be an http or https URL", url_path));
                None
            }
            Some(url) => Some(url.trim().to_string()),
            None => {
                if fields.string("sourceUrl").is_ok() {
                    checker.violation(&url_path, format!("{} is required", url_path));
                }
                None
            }
        };

        let layers_path = format!("{}.layerNames", prefix);
        let layer_names = match checker.string(fields, "layerNames", &layers_path) {
            Some(layers) if layers.trim().is_empty() => {
                checker.violation(&layers_path, format!("{} must not be empty", layers_path));
                None
            }
            Some(layers) => Some(layers),
            None => {
                if fields.string("layerNames").is_ok() {
                    checker.violation(&layers_path, format!("{} is required", layers_path));
                }
                None
            }
        };

        let opacity_path = format!("{}.opacity", prefix);
        let opacity = checker.number(fields, "opacity", &opacity_path);
        let opacity_ok = opacity.is_none() || checker.in_range(opacity, &opacity_path, 0.0, 1.0).is_some();

        if let (Some(source_url), Some(layer_names), true) = (source_url, layer_names, opacity_ok) {
            overlays.push(OverlaySpec::new(source_url, layer_names).with_opacity(opacity.unwrap_or(1.0)));
        }
    }
    overlays
}

fn check_marker(checker: &mut Checker, value: Option<&Value>) -> Option<PinSpec> {
    let fields = match value {
        None | Some(Value::Null) => return None,
        Some(Value::Object(fields)) => fields,
        Some(_) => {
            checker.violation("marker", "marker must be an object");
            return None;
        }
    };

    let lat = checker.number(fields, "lat", "marker.lat");
    let lat = checker.in_range(lat, "marker.lat", -90.0, 90.0);
    let lon = checker.number(fields, "lon", "marker.lon");
    let lon = checker.in_range(lon, "marker.lon", -180.0, 180.0);
    let position = match (fields.number("lat"), fields.number("lon")) {
        (Ok(Some(_)), Ok(None)) | (Ok(None), Ok(Some(_))) => {
            checker.violation("marker", "marker.lat and marker.lon must be given together");
            None
        }
        _ => lat.zip(lon).map(|(lat, lon)| LatLng::new(lat, lon)),
    };

    let label = checker.string(fields, "label", "marker.label");
    if let Some(label) = &label {
        if label.chars().count() > MAX_LABEL_CHARS {
            checker.violation(
                "marker.label",
                format!("marker.label must be at most {} characters", MAX_LABEL_CHARS),
            );
        }
    }

    let color = checker.string(fields, "color", "marker.color");

    let radius = checker.number(fields, "radius", "marker.radius");
    if let Some(r) = radius {
        if r <= 0.0 || r > MAX_PIN_RADIUS {
            checker.violation(
                "marker.radius",
                format!("marker.radius must be greater than 0 and at most {}", MAX_PIN_RADIUS),
            );
        }
    }

    Some(PinSpec {
        position,
        label,
        color,
        radius: radius.unwrap_or(DEFAULT_PIN_RADIUS),
    })
}

/// Validate a JSON body (`POST /screenshot`, `POST /preview-html`)
pub fn validate_json(body: &Value) -> Validated<RenderRequest> {
    let Some(fields) = body.as_object() else {
        return Err(vec![FieldViolation::new("body", "request body must be a JSON object")]);
    };

    let mut checker = Checker::new();
    let request = check_common(&mut checker, fields);
    let overlays = check_overlays(&mut checker, fields.get("overlays"));
    let marker = check_marker(&mut checker, fields.get("marker"));

    match request {
        Some(mut request) if checker.violations.is_empty() => {
            request.overlays = overlays;
            request.marker = marker;
            Ok(request)
        }
        _ => Err(checker.violations),
    }
}

/// Validate query parameters (`GET /screenshot`). Overlays and markers are
/// not available on this path.
pub fn validate_query(params: &HashMap<String, String>) -> Validated<RenderRequest> {
    let mut checker = Checker::new();
    let request = check_common(&mut checker, params);

    match request {
        Some(request) if checker.violations.is_empty() => Ok(request),
        _ => Err(checker.violations),
    }
}
