use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use mapshot::cdp::CdpEngine;
use mapshot::config::ServiceConfig;
use mapshot::events::{EventSink, LogSink};
use mapshot::pool::EnginePool;
use mapshot::render::{RenderTimings, Renderer};
use mapshot::server::{self, AppState};

fn init_logging() {
    // `log` records from the engine and pool are bridged in by `init`
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).compact())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

async fn async_main(config: ServiceConfig) -> anyhow::Result<()> {
    let events: Arc<dyn EventSink> = Arc::new(LogSink);
    let pool = EnginePool::new::<CdpEngine>(config.pool_config(), config.engine_config(), events.clone());
    let renderer = Arc::new(Renderer::new(
        pool.clone(),
        config.document_assets(),
        RenderTimings::default(),
        events,
    ));
    let state = Arc::new(AppState::new(renderer, config.rate_limit_config()));

    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(
        "listening on {} (pool capacity {}, {} requests per {}s per client)",
        addr, config.pool_capacity, config.rate_limit_max, config.rate_limit_window_secs
    );

    let served = server::serve(listener, state, shutdown_signal()).await;

    info!("draining engine pool");
    pool.drain().await;
    info!("shutdown complete");

    served.map_err(Into::into)
}

fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::parse();
    init_logging();

    if let Err(e) = config.validate() {
        error!("{}", e);
        return Err(e.into());
    }

    let thread_count = config.worker_threads();
    info!("starting server with {} threads", thread_count);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(thread_count)
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}
