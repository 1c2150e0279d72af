//! Fanout webhook delivery service.
//!
//! Main entry point. Initializes tracing, the database pool and schema, the
//! delivery engine (outbox dispatcher + worker pool), and the HTTP server,
//! and coordinates graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use fanout_api::{AppState, Config};
use fanout_core::{Clock, DeliveryMetrics, RealClock, Storage};
use fanout_delivery::{DeliveryEngine, PostgresDeliveryStore};
use prometheus_client::registry::Registry;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config.rust_log);

    info!(
        database_url = %config.database_url_masked(),
        workers = config.worker_pool_size,
        dispatch_interval_ms = config.outbox_dispatch_interval_ms,
        "starting fanout webhook service"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    run_migrations(&db_pool).await?;
    info!("database schema ready");

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let storage = Storage::new(db_pool.clone());

    let mut registry = Registry::default();
    let metrics = DeliveryMetrics::register(&mut registry);

    // Delivery engine: outbox dispatcher plus worker pool.
    let store = Arc::new(PostgresDeliveryStore::new(storage.clone()));
    let mut engine =
        DeliveryEngine::new(store, config.to_engine_config(), metrics, clock.clone());
    engine.start().await.context("failed to start delivery engine")?;

    // HTTP adapter.
    let state = AppState::new(storage, clock, Arc::new(registry), config.api_key.clone());
    let addr = config.parse_server_addr()?;
    let server_handle = tokio::spawn(fanout_api::start_server(state, addr, shutdown_signal()));

    info!(addr = %addr, "fanout is ready to ingest events");

    match server_handle.await {
        Ok(Ok(())) => info!("HTTP server stopped"),
        Ok(Err(err)) => error!(error = %err, "HTTP server failed"),
        Err(err) => error!(error = %err, "HTTP server task panicked"),
    }

    info!("shutting down delivery engine");
    if let Err(err) = engine.shutdown().await {
        error!(error = %err, "delivery engine shutdown incomplete");
    }

    db_pool.close().await;
    info!("fanout shutdown complete");

    Ok(())
}

/// Initializes tracing with environment-based filtering.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(err) => {
                return Err(err)
                    .context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Ensures the schema exists.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    fanout_core::storage::schema::ensure_schema(pool)
        .await
        .context("failed to create database schema")?;

    Ok(())
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received CTRL+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
