//! Try-on API server.

use std::net::SocketAddr;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clozet_api::{create_router, metrics, ApiConfig, AppState};

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("clozet=info".parse()?)
        .add_directive("tower_http=info".parse()?);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()?;
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()?;
    }
    Ok(())
}

fn metrics_enabled() -> bool {
    std::env::var("METRICS_ENABLED").is_ok_and(|v| v == "true" || v == "1")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;
    init_tracing()?;

    let config = ApiConfig::from_env();
    let addr = config.bind_addr().context("Invalid HOST/PORT")?;
    info!(%addr, environment = %config.environment, "Starting clozet-api");

    let state = AppState::from_env(config)
        .await
        .context("Failed to connect to backing services")?;

    let metrics_handle = if metrics_enabled() {
        Some(metrics::init_metrics().context("Failed to install metrics recorder")?)
    } else {
        None
    };

    let app = create_router(state, metrics_handle);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => {
            // Without a signal handler, run until killed
            warn!(error = %e, "Failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    }
}
