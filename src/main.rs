use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use support_chat::{
    api::{create_router, AppState},
    broker::{Broker, LocalBroker, RedisBroker},
    config::Config,
    db,
    error::AppError,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,support_chat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting support chat server v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    tracing::info!("Configuration loaded");

    // Pool + migrations
    let pool = db::connect(&config).await?;
    tracing::info!("Database ready: {}", config.database_url);

    let broker: Arc<dyn Broker> = match &config.redis_url {
        Some(url) => {
            let broker = RedisBroker::connect(url, config.broker_capacity).await?;
            tracing::info!(capacity = config.broker_capacity, "Redis broker connected");
            Arc::new(broker)
        }
        None => {
            tracing::info!(capacity = config.broker_capacity, "In-process broker started");
            Arc::new(LocalBroker::new(config.broker_capacity))
        }
    };

    let state = AppState::new(pool, config.clone(), broker.clone());
    let app = create_router(state);

    // Bind and serve
    let addr = config.server_address();
    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check: http://{}/api/health", addr);
    tracing::info!("Chat socket: ws://{}/ws/chat/<room_id>/?token=<jwt>", addr);
    tracing::info!("Notification socket: ws://{}/ws/notifications/?token=<jwt>", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(broker))
        .await
        .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Waits for ctrl-c, then closes every broadcast group so open sockets drain.
async fn shutdown_signal(broker: Arc<dyn Broker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
    broker.shutdown().await;
}
