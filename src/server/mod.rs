//! HTTP surface
//!
//! | Route               | Rate limited |
//! |---------------------|--------------|
//! | `GET /health`       | no           |
//! | `GET /screenshot`   | yes          |
//! | `POST /screenshot`  | yes          |
//! | `POST /preview-html`| yes          |
//! | `GET /api-info`     | yes          |

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::info;

pub mod error;
pub mod handlers;
pub mod rate_limit;

pub use error::ApiError;
use rate_limit::{RateLimitConfig, RateLimiter};

use crate::render::Renderer;

/// Shared by every handler
pub struct AppState {
    pub renderer: Arc<Renderer>,
    pub limiter: RateLimiter,
    pub started: Instant,
}

impl AppState {
    pub fn new(renderer: Arc<Renderer>, rate_limit: RateLimitConfig) -> Self {
        Self {
            renderer,
            limiter: RateLimiter::new(rate_limit),
            started: Instant::now(),
        }
    }
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled"
    );
    response
}

pub fn router(state: Arc<AppState>) -> Router {
    let limited = Router::new()
        .route("/screenshot", get(handlers::screenshot_query).post(handlers::screenshot_json))
        .route("/preview-html", post(handlers::preview_html))
        .route("/api-info", get(handlers::api_info))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit::enforce));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(limited)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Serve until `shutdown` resolves and in-flight requests finish
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
}
