//! LLM Guardrail gateway server

use anyhow::Context;
use llm_guardrail_gateway::router::create_router;
use llm_guardrail_gateway::{telemetry, AppState, Settings};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = Settings::path_from_env();
    let settings = Settings::load(config_path.as_deref()).context("Failed to load settings")?;

    telemetry::init_tracing(&settings.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let mut state = AppState::from_settings(&settings)
        .await
        .context("Failed to build application state")?;
    if settings.metrics.enabled {
        let handle = telemetry::install_metrics().context("Failed to install metrics recorder")?;
        state = state.with_metrics(handle);
    }

    let app = create_router(state);

    let addr = settings.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Guardrail gateway listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Proxy endpoint: http://{}/v1/gateway/chat/completions", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, starting graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown..."),
    }
}
