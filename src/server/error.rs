//! JSON error responses

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;

use crate::render::{FailureKind, RenderFailure};
use crate::validation::FieldViolation;

/// Everything a handler can answer with instead of a result
#[derive(Debug)]
pub enum ApiError {
    Validation(Vec<FieldViolation>),
    Render(RenderFailure),
    RateLimited { retry_after: Duration },
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a [FieldViolation]>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "ValidationError",
            ApiError::Render(failure) => failure.kind.as_str(),
            ApiError::RateLimited { .. } => "RateLimited",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Validation(violations) => {
                format!("Request validation failed with {} error(s)", violations.len())
            }
            // Engine errors can mention binaries and paths on the host; the
            // detail is logged with the failed render instead
            ApiError::Render(failure) => match failure.kind {
                FailureKind::EngineAcquisitionFailure => "Could not start a rendering engine".to_string(),
                FailureKind::LoadFailure => "The map page could not be loaded".to_string(),
                FailureKind::CaptureFailure => "The map image could not be captured".to_string(),
                FailureKind::RenderTimeout => failure.message.clone(),
            },
            ApiError::RateLimited { .. } => "Too many requests, please try again later".to_string(),
        }
    }
}

impl From<RenderFailure> for ApiError {
    fn from(failure: RenderFailure) -> Self {
        ApiError::Render(failure)
    }
}

impl From<Vec<FieldViolation>> for ApiError {
    fn from(violations: Vec<FieldViolation>) -> Self {
        ApiError::Validation(violations)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind(),
            message: self.message(),
            details: match &self {
                ApiError::Validation(violations) => Some(violations.as_slice()),
                _ => None,
            },
        };
        let mut response = (self.status(), Json(body)).into_response();

        if let ApiError::RateLimited { retry_after } = &self {
            // Round up so clients never retry early
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderStage;

    #[test]
    fn statuses_and_kinds() {
        let validation = ApiError::Validation(vec![FieldViolation::new("lat", "bad")]);
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(validation.kind(), "ValidationError");

        let render = ApiError::from(RenderFailure::new(
            FailureKind::CaptureFailure,
            RenderStage::Ready,
            "tab crashed",
        ));
        assert_eq!(render.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(render.kind(), "CaptureFailure");
        assert_eq!(render.message(), "The map image could not be captured");

        let limited = ApiError::RateLimited {
            retry_after: Duration::from_millis(1500),
        };
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        let response = limited.into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn launch_details_stay_private() {
        let err = ApiError::from(RenderFailure::new(
            FailureKind::EngineAcquisitionFailure,
            RenderStage::Validated,
            "Failed to launch browser: /usr/bin/chromium: permission denied",
        ));
        assert!(!err.message().contains("/usr/bin"));
    }

    #[test]
    fn engine_errors_are_not_echoed() {
        let load = ApiError::from(RenderFailure::new(
            FailureKind::LoadFailure,
            RenderStage::EngineAcquired,
            "Navigation failed: /tmp/profile-1234/lock",
        ));
        assert_eq!(load.message(), "The map page could not be loaded");

        let capture = ApiError::from(RenderFailure::new(
            FailureKind::CaptureFailure,
            RenderStage::Ready,
            "Screenshot failed: websocket closed",
        ));
        assert!(!capture.message().contains("websocket"));

        let timeout = ApiError::from(RenderFailure::new(
            FailureKind::RenderTimeout,
            RenderStage::AwaitingReadiness,
            "Map did not become ready within 20000ms",
        ));
        assert_eq!(timeout.message(), "Map did not become ready within 20000ms");
    }
}
