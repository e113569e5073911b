use std::sync::Arc;

use anyhow::Context;
use assistant_gateway::{config::GatewayConfig, routes, state::AppState};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    let bind_addr = config.bind_addr;
    info!(
        endpoints = ?config.upstream_endpoints,
        path = %config.upstream_path,
        timeout_ms = config.request_timeout.as_millis() as u64,
        max_retries = config.max_retries,
        query_mode = ?config.query_mode,
        public_access = config.public_access,
        "configuration loaded"
    );

    let state = Arc::new(AppState::new(config)?);
    let cors = CorsLayer::very_permissive();
    let app = routes::create_router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    info!("assistant gateway running at http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
