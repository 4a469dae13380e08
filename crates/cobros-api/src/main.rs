//! Cobros API Server
//!
//! REST API server for the Cobros authentication core.

use anyhow::Context;
use cobros_api::{create_router, state::AppState};
use cobros_core::{AppConfig, LoggingConfig, PgStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "cobros_api={level},cobros_core={level},audit=info,tower_http=info",
            level = logging.level
        ))
    });

    if logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration comes first so the log format can follow it
    let config = AppConfig::load().context("Invalid configuration")?;
    init_tracing(&config.logging);

    let store = PgStore::connect(&config.database.postgres_url, config.database.pool_size)
        .await
        .context("Failed to connect to PostgreSQL")?;
    store.migrate().await.context("Failed to apply schema")?;

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create application state
    let state = Arc::new(AppState::with_postgres(config, store));

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Cobros API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
