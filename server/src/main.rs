//! Bookshelf Server
//!
//! Serves the bookshelf session over HTTP and WebSocket:
//! - Google sign-in, persisted in an embedded Sled store
//! - Live per-user book collections from the hosted document store
//! - Offline book list when no backend is configured

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, warn};

use bookshelf_server::config::BackendSetting;
use bookshelf_server::{router, AppConfig, AppState, SessionContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookshelf_server=info,tower_http=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("Failed to read configuration")?;
    match &config.backend {
        BackendSetting::NotConfigured => {
            warn!("Document store not configured - books will be kept on this device only")
        }
        BackendSetting::Invalid(reason) => warn!("Document store config unusable: {}", reason),
        BackendSetting::Configured(backend) => {
            info!("Document store configured for project {}", backend.project_id)
        }
    }

    info!("Initializing storage at: {}", config.storage.path);
    let port = config.port;
    let session = SessionContext::bootstrap(config)
        .await
        .context("Failed to open storage")?;

    let mode = session.mode();
    let state = Arc::new(AppState::new(session));
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Bookshelf server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Mode: {} (user {})", mode.name(), mode.user_id());
    info!("   Listening on: http://{}", addr);
    info!("   Live books: ws://{}/ws/books", addr);
    info!("   Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
