//! End-to-end checks against a real Chrome. Run with `cargo test -- --ignored`.
#![cfg(feature = "cdp")]

use mapshot::cdp::CdpEngine;
use mapshot::document::{render_document, DocumentAssets, DocumentTimers};
use mapshot::events::NoopSink;
use mapshot::pool::{EnginePool, PoolConfig};
use mapshot::render::{RenderTimings, Renderer};
use mapshot::{EngineConfig, EngineInstance, ImageFormat, LatLng, ReadinessProbe, ReadyReason, RenderRequest};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use tiny_http::{Response, Server};

const TILE_SERVER: &str = "127.0.0.1:18181";

const ONE_PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49,
    0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00,
    0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

static INIT: Once = Once::new();

/// `/tiles/...` answers with a PNG, `/stuck/...` never answers in time,
/// everything else is a 404.
fn start_tile_server() -> String {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let server = Server::http(TILE_SERVER).unwrap();
            for request in server.incoming_requests() {
                if request.url().starts_with("/tiles/") {
                    let resp = Response::from_data(ONE_PIXEL_PNG.to_vec())
                        .with_header("Content-Type: image/png".parse::<tiny_http::Header>().unwrap());
                    let _ = request.respond(resp);
                } else if request.url().starts_with("/stuck/") {
                    std::thread::spawn(move || {
                        std::thread::sleep(Duration::from_secs(40));
                        let _ = request.respond(Response::empty(504));
                    });
                } else {
                    let _ = request.respond(Response::empty(404));
                }
            }
        });
        std::thread::sleep(Duration::from_millis(100));
    });

    format!("http://{}", TILE_SERVER)
}

async fn wait_ready(instance: &EngineInstance, limit: Duration) -> (ReadinessProbe, Duration) {
    let started = Instant::now();
    loop {
        let probe = instance.probe_readiness().await.expect("probe");
        if probe.ready || started.elapsed() > limit {
            return (probe, started.elapsed());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn load(html: &str, request: &RenderRequest) -> EngineInstance {
    let instance = EngineInstance::launch::<CdpEngine>(1, EngineConfig::default())
        .await
        .expect("launch chrome");
    instance.load_document(html, request.size).await.expect("load");
    instance
}

#[tokio::test]
#[ignore]
async fn offline_document_signals_after_grace_delay() {
    let base = start_tile_server();
    // Map library unavailable: no layer ever starts a fetch
    let assets = DocumentAssets {
        leaflet_js_url: format!("{}/missing/leaflet.js", base),
        leaflet_css_url: format!("{}/missing/leaflet.css", base),
        ..Default::default()
    };
    let request = RenderRequest::new(LatLng::new(0.0, 0.0), 3);
    let html = render_document(&request, &assets, &DocumentTimers::default());

    let instance = load(&html, &request).await;
    let (probe, waited) = wait_ready(&instance, Duration::from_secs(20)).await;
    instance.close().await.ok();

    assert_eq!(probe.reason, Some(ReadyReason::Offline));
    assert_eq!(probe.started, 0);
    assert!(waited >= Duration::from_millis(1500), "ready too early: {:?}", waited);
    assert!(waited <= Duration::from_secs(3), "ready too late: {:?}", waited);
}

#[tokio::test]
#[ignore]
async fn tiles_settle_before_ceiling() {
    let base = start_tile_server();
    let assets = DocumentAssets {
        base_tile_url: format!("{}/tiles/{{z}}/{{x}}/{{y}}.png", base),
        ..Default::default()
    };
    let request = RenderRequest::new(LatLng::new(41.0082, 28.9784), 15);
    let html = render_document(&request, &assets, &DocumentTimers::default());

    let instance = load(&html, &request).await;
    let (probe, waited) = wait_ready(&instance, Duration::from_secs(20)).await;
    instance.close().await.ok();

    assert_eq!(probe.reason, Some(ReadyReason::Tiles));
    assert!(probe.started > 0);
    assert!(probe.completed >= probe.started);
    assert!(waited < Duration::from_secs(15));
}

#[tokio::test]
#[ignore]
async fn stuck_tiles_hit_document_ceiling() {
    let base = start_tile_server();
    let assets = DocumentAssets {
        base_tile_url: format!("{}/stuck/{{z}}/{{x}}/{{y}}.png", base),
        ..Default::default()
    };
    let request = RenderRequest::new(LatLng::new(10.0, 10.0), 5);
    let html = render_document(&request, &assets, &DocumentTimers::default());

    let instance = load(&html, &request).await;
    let (probe, waited) = wait_ready(&instance, Duration::from_secs(20)).await;
    instance.close().await.ok();

    assert_eq!(probe.reason, Some(ReadyReason::Ceiling));
    assert!(waited >= Duration::from_secs(14), "ceiling fired early: {:?}", waited);
    assert!(waited < RenderTimings::default().readiness_timeout);
}

#[tokio::test]
#[ignore]
async fn renderer_produces_png() {
    let base = start_tile_server();
    let assets = DocumentAssets {
        base_tile_url: format!("{}/tiles/{{z}}/{{x}}/{{y}}.png", base),
        ..Default::default()
    };
    let pool = EnginePool::new::<CdpEngine>(PoolConfig::default(), EngineConfig::default(), Arc::new(NoopSink));
    let renderer = Renderer::new(pool.clone(), assets, RenderTimings::default(), Arc::new(NoopSink));

    let mut request = RenderRequest::new(LatLng::new(41.0082, 28.9784), 15);
    request.format = ImageFormat::Png;
    let image = renderer.render(&request).await.expect("render");
    assert_eq!(image.content_type(), "image/png");
    assert!(image.bytes.starts_with(&[0x89, b'P', b'N', b'G']));

    // The engine went back to the pool and is reused
    let image = renderer.render(&request).await.expect("second render");
    assert!(!image.is_empty());
    assert_eq!(pool.stats().created, 1);

    pool.drain().await;
}
