//! SPC Sync Server
//!
//! Version tracking and conflict resolution for offline-capable dashboard
//! clients.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spc_sync::config::{Config, StoreBackend};
use spc_sync::db;
use spc_sync::routes;
use spc_sync::state::AppState;
use spc_sync::sync::{MemorySyncStore, SqliteSyncStore, SyncCoordinator, SyncStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spc_sync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing::info!("Starting SPC Sync Server v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn SyncStore> = match config.sync.store {
        StoreBackend::Sqlite => {
            let pool = db::create_pool(&config.database.url)
                .await
                .context("failed to initialize database")?;
            tracing::info!("Database initialized at {}", config.database.url);
            Arc::new(SqliteSyncStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory sync store; state is lost on restart");
            Arc::new(MemorySyncStore::new())
        }
    };

    let coordinator =
        SyncCoordinator::new(store).with_pull_page_size(config.sync.pull_page_size);
    let app_state = AppState::new(config.clone(), coordinator);
    let app = routes::app(app_state);

    // Start server with graceful shutdown
    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("invalid SERVER_HOST {}", config.server.host))?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("SPC Sync Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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
