//! Rosterd Server - Main entry point

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Json, Router};
use rosterd_common::logging::{init_logging, LogConfig};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

use rosterd_server::{
    config::{Config, StoreBackend},
    import::{self, registry::spawn_sweeper, routes::ImportState},
    middleware,
    store::{GroupDirectory, MemoryStore, PostgresStore, StudentStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("rosterd-server".to_string())
        .filter_directives("rosterd_server=debug,tower_http=debug,sqlx=info".to_string())
        .build();

    // Environment variables take precedence
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    info!("Starting Rosterd Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    // Data-store collaborators
    let (store, directory): (Arc<dyn StudentStore>, Arc<dyn GroupDirectory>) =
        match config.database.backend {
            StoreBackend::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.database.max_connections)
                    .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
                    .connect(&config.database.url)
                    .await?;
                info!("Database connection pool established");

                sqlx::migrate!("../../migrations")
                    .run(&pool)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
                info!("Database migrations completed");

                let pg = Arc::new(PostgresStore::new(pool));
                let store: Arc<dyn StudentStore> = pg.clone();
                let directory: Arc<dyn GroupDirectory> = pg;
                (store, directory)
            },
            StoreBackend::Memory => {
                info!("Using in-memory store (ROSTERD_STORE=memory)");
                let mem = Arc::new(MemoryStore::default());
                let store: Arc<dyn StudentStore> = mem.clone();
                let directory: Arc<dyn GroupDirectory> = mem;
                (store, directory)
            },
        };

    // Import pipeline state
    let registry = Arc::new(import::JobRegistry::new(
        Duration::from_secs(config.import.retention_secs),
        config.import.recent_outcomes,
    ));
    let publisher = Arc::new(import::ProgressPublisher::new(config.import.channel_capacity));

    let _sweeper = spawn_sweeper(
        registry.clone(),
        publisher.clone(),
        Duration::from_secs(config.import.sweep_interval_secs),
    );

    let state = ImportState {
        registry,
        publisher,
        store,
        directory,
        config: config.import.clone(),
    };

    let app = create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Create the application router with all routes and middleware
fn create_router(state: ImportState, config: &Config) -> Router {
    let api_v1 = import::routes::import_routes(config.import.max_upload_bytes).with_state(state);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1)
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Rosterd Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give in-flight requests and running imports a moment to settle
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
