//! Course Sync Server
//!
//! Authors edit a course tree locally; this server mirrors every change to
//! the remote learning platform.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use course_sync_server::config::Config;
use course_sync_server::db::{self, SqliteNodeStore};
use course_sync_server::remote::{HttpRemoteClient, StaticTokens};
use course_sync_server::state::AppState;
use course_sync_server::store::NodeStore;
use course_sync_server::sync::SyncEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "course_sync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Course Sync Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Remote platform: {}", config.remote.base_url);

    // Initialize database
    let pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);
    let store: Arc<dyn NodeStore> = Arc::new(SqliteNodeStore::new(pool));

    // Initialize remote client
    let tokens = StaticTokens::parse(&config.remote.tokens);
    if tokens.is_empty() {
        tracing::warn!("No remote tokens configured, every sync call will be refused");
    } else {
        tracing::info!("Loaded remote tokens for {} users", tokens.len());
    }
    let remote = HttpRemoteClient::new(&config.remote, Arc::new(tokens))
        .context("Failed to initialize remote client")?;

    let engine = SyncEngine::new(store, Arc::new(remote), config.sync.max_concurrency);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let app = course_sync_server::app(AppState::new(config, engine));

    // Start server with graceful shutdown
    tracing::info!("Course Sync Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

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
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
