use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ticker_backend::app;
use ticker_backend::common::scratch::ScratchDir;
use ticker_backend::config::settings::AppConfig;
use ticker_backend::infrastructure::engine::{FfmpegEngine, TranscodeEngine};
use ticker_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    info!("Starting server...");

    let config = AppConfig::new().context("invalid configuration")?;

    let scratch = ScratchDir::ensure(&config.upload_dir)
        .await
        .with_context(|| format!("failed to create scratch directory {}", config.upload_dir.display()))?;

    let engine = FfmpegEngine::new(config.ffmpeg_path.clone());
    match engine.resolve() {
        Some(path) => info!("FFmpeg path: {}", path.display()),
        None => warn!(
            "FFmpeg not found at {:?}; /convert will fail until it is installed",
            engine.program()
        ),
    }

    let address = config.bind_address();
    let state = AppState::new(config, Arc::new(engine), scratch);
    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!("Server running on http://{}", address);
    info!("Health-check: http://{}/health", address);
    info!("Convert endpoint: POST http://{}/convert", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}
