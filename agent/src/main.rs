//! Fieldsync Agent - device-side sync runtime.
//!
//! Opens the local store, starts the sync engine and serves the loopback
//! status surface until interrupted.

use std::sync::Arc;

use fieldsync_agent::{app, AppState, Config, HttpRemote, LocalStore, SyncEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync_agent=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        api = %config.api_base_url,
        database = %config.database_url,
        "Starting Fieldsync Agent"
    );

    // Failing to open the store is the one error that stops the agent
    let store = LocalStore::open(&config.database_url, config.storage_limit_bytes).await?;

    let remote = HttpRemote::new(
        &config.api_base_url,
        config.api_token.clone(),
        config.request_timeout,
    )?;

    let engine = SyncEngine::new(store, Arc::new(remote), config.sync_options());
    engine.start();

    let app = app(AppState {
        engine: Arc::clone(&engine),
    });

    // Start status surface
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Status surface listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
