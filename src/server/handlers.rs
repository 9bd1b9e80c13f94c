use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::error::ApiError;
use super::AppState;
use crate::render::RenderedImage;
use crate::request::{MAX_DIMENSION, MAX_LABEL_CHARS, MAX_OVERLAYS, MAX_ZOOM, MIN_DIMENSION, MIN_ZOOM};
use crate::validation::{validate_json, validate_query, FieldViolation};
use crate::RenderRequest;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptimeSeconds": state.started.elapsed().as_secs(),
        "pool": state.renderer.pool().stats(),
    }))
}

/// `GET /screenshot`: base map only
pub async fn screenshot_query(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let request = validate_query(&params)?;
    render(&state, &request).await
}

/// `POST /screenshot`: overlays and marker included
pub async fn screenshot_json(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let request = parse_body(&body)?;
    render(&state, &request).await
}

/// `POST /preview-html`: the generated page instead of an image
pub async fn preview_html(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Html<String>, ApiError> {
    let request = parse_body(&body)?;
    Ok(Html(state.renderer.preview(&request)))
}

pub async fn api_info() -> Json<Value> {
    let request_fields = json!({
        "lat": "number, -90 to 90 (required)",
        "lon": "number, -180 to 180 (required)",
        "zoom": format!("integer, {} to {} (required)", MIN_ZOOM, MAX_ZOOM),
        "width": format!("integer, {} to {} (default 640)", MIN_DIMENSION, MAX_DIMENSION),
        "height": format!("integer, {} to {} (default 480)", MIN_DIMENSION, MAX_DIMENSION),
        "format": "jpeg | png | webp (default jpeg)",
        "quality": "integer, 1 to 100, jpeg only (default 70)",
    });

    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "endpoints": {
            "GET /health": "Service status, uptime and engine pool counters",
            "GET /screenshot": {
                "description": "Render a base map from query parameters",
                "parameters": request_fields,
            },
            "POST /screenshot": {
                "description": "Render a map from a JSON body, with overlays and a marker",
                "body": {
                    "fields": "everything GET /screenshot accepts",
                    "overlays": format!(
                        "up to {} of {{sourceUrl, layerNames, opacity 0 to 1 (default 1)}}",
                        MAX_OVERLAYS
                    ),
                    "marker": format!(
                        "{{lat, lon (default: map center), label (max {} chars), color, radius (default 20)}}",
                        MAX_LABEL_CHARS
                    ),
                },
            },
            "POST /preview-html": "Return the generated map page for a POST /screenshot body",
            "GET /api-info": "This document",
        },
        "errors": {
            "ValidationError": 400,
            "RateLimited": 429,
            "EngineAcquisitionFailure": 500,
            "LoadFailure": 500,
            "RenderTimeout": 500,
            "CaptureFailure": 500,
        },
    }))
}

fn parse_body(body: &[u8]) -> Result<RenderRequest, ApiError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        ApiError::Validation(vec![FieldViolation::new(
            "body",
            format!("request body must be valid JSON: {}", e),
        )])
    })?;
    Ok(validate_json(&value)?)
}

async fn render(state: &AppState, request: &RenderRequest) -> Result<Response, ApiError> {
    let image = state.renderer.render(request).await?;
    Ok(image_response(image))
}

fn image_response(image: RenderedImage) -> Response {
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static(image.content_type())),
        (header::CONTENT_LENGTH, HeaderValue::from(image.len())),
    ];
    (headers, image.bytes).into_response()
}
