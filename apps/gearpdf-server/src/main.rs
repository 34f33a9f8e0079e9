//! GearPDF Server
//!
//! Accepts PDF uploads over HTTP and returns them compressed by Ghostscript,
//! with an in-process lopdf pass behind it.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gearpdf_server::compress::{Compressor, GhostscriptCompressor, NativeCompressor, GS_CANDIDATES};
use gearpdf_server::config::Config;
use gearpdf_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the filter reads RUST_LOG
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "gearpdf_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting GearPDF Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Workspace root: {}", config.compression.temp_dir.display());
    tracing::info!(
        "Limits: {} MB upload, {} concurrent jobs, {}s timeout",
        config.compression.max_upload_bytes / (1024 * 1024),
        config.compression.max_concurrent_jobs,
        config.compression.timeout_secs
    );

    std::fs::create_dir_all(&config.compression.temp_dir).with_context(|| {
        format!("Failed to create {}", config.compression.temp_dir.display())
    })?;

    let compressor = match GhostscriptCompressor::detect(config.compression.gs_binary.as_deref()).await {
        Some(gs) => {
            tracing::info!("Using Ghostscript binary: {}", gs.binary());
            gs
        }
        None => {
            let fallback = config
                .compression
                .gs_binary
                .clone()
                .unwrap_or_else(|| GS_CANDIDATES[0].to_string());
            if config.compression.native_pass {
                tracing::warn!(
                    "Ghostscript not found; only the in-process pass will run until {} is installed",
                    fallback
                );
            } else {
                tracing::warn!(
                    "Ghostscript not found; requests will fail until {} is installed",
                    fallback
                );
            }
            GhostscriptCompressor::new(fallback)
        }
    };
    let compressor: Arc<dyn Compressor> = Arc::new(compressor);

    let second_stage: Option<Arc<dyn Compressor>> = if config.compression.native_pass {
        Some(Arc::new(NativeCompressor::new()))
    } else {
        None
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let app_state = AppState::with_second_stage(config, compressor, second_stage);
    let app = gearpdf_server::app(app_state);

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("GearPDF Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
