//! waitline outbox dispatcher worker
//!
//! Long-running worker: bootstraps the schema, connects to the broker,
//! and drains the outbox until terminated.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waitline::config::Config;
use waitline::outbox::{OutboxDispatcher, PostgresOutboxStore, RabbitMqPublisher};
use waitline::schema;

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waitline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;

    tracing::info!("starting waitline outbox dispatcher");
    tracing::info!("connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    schema::verify_connection(&pool).await?;
    schema::ensure_schema(&pool).await?;

    tracing::info!(
        exchange = %config.broker_exchange,
        host = %config.broker_host,
        "connecting to broker..."
    );
    let publisher =
        RabbitMqPublisher::connect(&config.amqp_uri(), config.broker_exchange.clone()).await?;

    let dispatcher = OutboxDispatcher::new(
        Arc::new(PostgresOutboxStore::new(pool.clone())),
        Arc::new(publisher),
        config.dispatcher(),
    );
    let handle = dispatcher.start();

    shutdown_signal().await;

    tracing::info!("shutting down...");
    handle.stop().await;
    pool.close().await;
    tracing::info!("outbox dispatcher stopped. goodbye");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating graceful shutdown...");
        },
    }
}
