//! Event Log Sync Server - Binary Entry Point
//!
//! # Environment Variables
//!
//! - `SYNC_BIND_ADDR`: listen address (default `127.0.0.1:8787`)
//! - `SYNC_DATA_DIR`: directory for `eventlog.db` and `local.db`
//! - `SYNC_ADMIN_SECRET`: enables admin requests when set
//! - `RUST_LOG`: log filter (default `eventlog_sync=info,tower_http=info`)

use std::sync::Arc;

use eventlog_sync::api::{http::create_router, websocket::AppState};
use eventlog_sync::SyncConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventlog_sync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncConfig::from_env()?;
    let addr = config.bind_addr;

    tracing::info!(
        data_dir = %config.data_dir.display(),
        admin_enabled = config.admin_secret.is_some(),
        pull_chunk_size = config.pull_chunk_size,
        reset_purges_log = config.reset_purges_log,
        version = eventlog_sync::VERSION,
        "Starting sync server"
    );

    let state = Arc::new(AppState::open(config)?);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}/websocket", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        },
    }
}
