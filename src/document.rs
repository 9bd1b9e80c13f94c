//! Map page generation.
//!
//! [`render_document`] turns a [`RenderRequest`] into a self-contained HTML
//! page: a Leaflet map with the base tile layer, the WMS overlays in request
//! order, an optional circle marker, and a readiness script.
//!
//! Request content never reaches markup or script source directly. It is
//! serialized into a JSON data block (`<script type="application/json">`)
//! with every character that could close the block escaped, and the static
//! script reads it back with `JSON.parse`. Marker labels are inserted as DOM
//! text. Operator-supplied asset URLs are attribute-escaped.
//!
//! The readiness script publishes:
//!
//! - `window.mapshotTiles`: `{started, completed}` tile fetch counters
//! - `window.mapshotReady`: flips to `true` exactly once
//! - `window.mapshotReadyReason`: `"tiles"`, `"offline"` or `"ceiling"`

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::request::{DEFAULT_PIN_COLOR, DEFAULT_PIN_RADIUS};
use crate::RenderRequest;

pub const CONFIG_ELEMENT_ID: &str = "mapshot-config";

/// Static assets and base layer used by every document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentAssets {
    /// `{s}`, `{z}`, `{x}`, `{y}` placeholders as understood by Leaflet
    pub base_tile_url: String,
    /// Trusted operator markup shown in the attribution control
    pub attribution: String,
    pub base_max_zoom: u8,
    pub leaflet_js_url: String,
    pub leaflet_css_url: String,
}

impl Default for DocumentAssets {
    fn default() -> Self {
        Self {
            base_tile_url: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            attribution: "&copy; OpenStreetMap contributors".to_string(),
            base_max_zoom: 19,
            leaflet_js_url: "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js".to_string(),
            leaflet_css_url: "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css".to_string(),
        }
    }
}

/// In-page fallback timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentTimers {
    /// Declare ready if no tile fetch has started by then
    pub offline_grace: Duration,
    /// Declare ready no matter what
    pub hard_ceiling: Duration,
}

impl Default for DocumentTimers {
    fn default() -> Self {
        Self {
            offline_grace: Duration::from_secs(2),
            hard_ceiling: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseLayerConfig {
    pub url_template: String,
    pub attribution: String,
    pub max_zoom: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayLayerConfig {
    pub url: String,
    pub layers: String,
    pub opacity: f64,
    /// Base layer sits at 0
    pub z_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerConfig {
    /// `[lat, lon]`
    pub position: [f64; 2],
    pub radius: f64,
    pub color: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    pub offline_grace_ms: u64,
    pub hard_ceiling_ms: u64,
}

/// Everything the in-page script needs, as embedded in the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    /// `[lat, lon]`
    pub center: [f64; 2],
    pub zoom: u8,
    pub base: BaseLayerConfig,
    pub overlays: Vec<OverlayLayerConfig>,
    pub marker: Option<MarkerConfig>,
    pub timers: TimerConfig,
}

impl MapConfig {
    pub fn new(request: &RenderRequest, assets: &DocumentAssets, timers: &DocumentTimers) -> Self {
        let overlays = request
            .overlays
            .iter()
            .enumerate()
            .map(|(index, overlay)| OverlayLayerConfig {
                url: overlay.source_url.clone(),
                layers: overlay.layer_names.clone(),
                opacity: if overlay.opacity.is_finite() {
                    overlay.opacity.clamp(0.0, 1.0)
                } else {
                    1.0
                },
                z_index: index as u32 + 1,
            })
            .collect();

        let marker = request.marker.as_ref().map(|pin| {
            let position = request.marker_position().unwrap_or(request.center);
            MarkerConfig {
                position: [position.lat, position.lon],
                radius: if pin.radius.is_finite() && pin.radius > 0.0 {
                    pin.radius
                } else {
                    DEFAULT_PIN_RADIUS
                },
                color: pin
                    .color
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .unwrap_or(DEFAULT_PIN_COLOR)
                    .to_string(),
                label: pin
                    .label
                    .as_deref()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            }
        });

        Self {
            center: [request.center.lat, request.center.lon],
            zoom: request.zoom,
            base: BaseLayerConfig {
                url_template: assets.base_tile_url.clone(),
                attribution: assets.attribution.clone(),
                max_zoom: assets.base_max_zoom,
            },
            overlays,
            marker,
            timers: TimerConfig {
                offline_grace_ms: timers.offline_grace.as_millis() as u64,
                hard_ceiling_ms: timers.hard_ceiling.as_millis() as u64,
            },
        }
    }
}

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<link rel="stylesheet" href="{{LEAFLET_CSS}}">
<script src="{{LEAFLET_JS}}"></script>
<style>
html, body { margin: 0; padding: 0; background: #ffffff; overflow: hidden; }
#map { width: {{WIDTH}}px; height: {{HEIGHT}}px; }
</style>
</head>
<body>
<div id="map"></div>
<script type="application/json" id="mapshot-config">{{CONFIG}}</script>
<script>
{{READINESS_SCRIPT}}
</script>
</body>
</html>
"#;

const READINESS_SCRIPT: &str = r#"(function () {
  var config = JSON.parse(document.getElementById('mapshot-config').textContent);
  var tiles = { started: 0, completed: 0 };
  window.mapshotTiles = tiles;
  window.mapshotReady = false;
  window.mapshotReadyReason = null;

  function signalReady(reason) {
    if (window.mapshotReady) { return; }
    window.mapshotReady = true;
    window.mapshotReadyReason = reason;
  }

  function checkTiles() {
    if (tiles.started > 0 && tiles.completed >= tiles.started) { signalReady('tiles'); }
  }

  setTimeout(function () {
    if (tiles.started === 0) { signalReady('offline'); }
  }, config.timers.offlineGraceMs);

  setTimeout(function () { signalReady('ceiling'); }, config.timers.hardCeilingMs);

  function watch(layer) {
    layer.on('tileloadstart', function () { tiles.started += 1; });
    layer.on('tileload', function () { tiles.completed += 1; checkTiles(); });
    layer.on('tileerror', function () { tiles.completed += 1; checkTiles(); });
    layer.on('tileabort', function () { tiles.completed += 1; checkTiles(); });
    return layer;
  }

  if (typeof L === 'undefined') {
    window.mapshotError = 'map library unavailable';
    return;
  }

  try {
    var map = L.map('map', {
      center: config.center,
      zoom: config.zoom,
      zoomControl: false,
      fadeAnimation: false,
      zoomAnimation: false,
      markerZoomAnimation: false
    });

    watch(L.tileLayer(config.base.urlTemplate, {
      maxZoom: config.base.maxZoom,
      attribution: config.base.attribution,
      zIndex: 0
    })).addTo(map);

    config.overlays.forEach(function (overlay) {
      watch(L.tileLayer.wms(overlay.url, {
        layers: overlay.layers,
        format: 'image/png',
        transparent: true,
        opacity: overlay.opacity,
        zIndex: overlay.zIndex
      })).addTo(map);
    });

    if (config.marker) {
      var pin = L.circleMarker(config.marker.position, {
        radius: config.marker.radius,
        color: config.marker.color,
        fillColor: config.marker.color,
        fillOpacity: 0.6,
        weight: 2
      }).addTo(map);

      if (config.marker.label) {
        var label = document.createElement('span');
        label.textContent = config.marker.label;
        pin.bindTooltip(label, {
          permanent: true,
          direction: 'top',
          offset: [0, -config.marker.radius]
        });
      }
    }
  } catch (e) {
    window.mapshotError = String(e);
  }
})();"#;

/// Build the page for `request`. Never fails for a validated request.
pub fn render_document(request: &RenderRequest, assets: &DocumentAssets, timers: &DocumentTimers) -> String {
    let config = MapConfig::new(request, assets, timers);
    // Serializing plain structs of strings and finite numbers cannot fail
    let json = serde_json::to_string(&config).unwrap_or_else(|_| "{}".to_string());

    fill_template(PAGE_TEMPLATE, |token| match token {
        "LEAFLET_CSS" => Some(escape_html_attr(&assets.leaflet_css_url)),
        "LEAFLET_JS" => Some(escape_html_attr(&assets.leaflet_js_url)),
        "WIDTH" => Some(request.size.width.to_string()),
        "HEIGHT" => Some(request.size.height.to_string()),
        "CONFIG" => Some(escape_json_for_script(&json)),
        "READINESS_SCRIPT" => Some(READINESS_SCRIPT.to_string()),
        _ => None,
    })
}

/// Replace `{{TOKEN}}` markers in one pass. Substituted text is never
/// rescanned; unknown tokens are left as they are.
fn fill_template(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len() * 2);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let token = &after[..end];
                match lookup(token) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("{{");
                        out.push_str(token);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Make serialized JSON safe inside a `<script>` element. The replaced
/// characters only occur inside JSON strings, where `\uXXXX` is equivalent.
pub fn escape_json_for_script(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}

/// Escape text for a double-quoted HTML attribute
pub fn escape_html_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}
