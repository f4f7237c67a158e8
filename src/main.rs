use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod error;
mod gateway;
mod store;
mod vertex;

use config::{Config, LogFormat, ServerConfig};

const DEFAULT_LOG_FILTER: &str = "vertex_gateway=info,tower_http=warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Docker HEALTHCHECK: probe /healthz and exit without starting a server.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    let config_path = std::env::var("VGW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/vertex-gateway/config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    init_tracing(&config.server);

    info!(
        port = config.server.port,
        store = %config.store.backend,
        location = %config.vertex.location,
        "vertex-gateway starting"
    );

    let store = store::from_config(&config.store)?;
    let state = Arc::new(gateway::GatewayState::new(Arc::new(config), store));
    if state.api_key.is_none() {
        info!("no shared secret in environment; falling back to the stored internalApiKey");
    }

    let addr: SocketAddr = format!("0.0.0.0:{}", state.config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    let app = api::router(Arc::clone(&state)).layer(
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down");
    Ok(())
}

fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(server.log_level.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
    });

    match server.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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

/// `vertex-gateway --healthcheck`: exit 0 if `/healthz` answers 200, 1 otherwise.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("VGW_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(8080);

    let url = format!("http://127.0.0.1:{port}/healthz");
    let healthy = matches!(reqwest::get(&url).await, Ok(resp) if resp.status().is_success());
    std::process::exit(if healthy { 0 } else { 1 });
}
