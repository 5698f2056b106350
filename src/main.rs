//! Quiz Duel Server - real-time two-player quiz duels
//!
//! The server pairs authenticated players through a shared Redis queue,
//! moves each pair into a dedicated game room over WebSockets, arbitrates
//! the four betting turns and persists the final gnu balances.

mod app;
mod config;
mod game;
mod http;
mod matchmaking;
mod store;
mod ws;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::matchmaking::RedisMatchmakeStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting Quiz Duel Server");

    // Connect the external stores
    let pool = store::db::connect_pool(&config).await?;
    info!("connected to PostgreSQL");

    let matchmake_store = RedisMatchmakeStore::connect(&config.redis_connection_url()).await?;
    info!("connected to Redis");

    // Create application state
    let state = AppState::new(config.clone(), pool, matchmake_store);

    // Spawn the pairing driver
    let hub = state.hub.clone();
    let hub_cancel = state.shutdown.child_token();
    tokio::spawn(async move {
        hub.run(hub_cancel).await;
    });

    // Build router
    let router = build_router(state.clone());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Matchmaking endpoint: ws://{}/ws/matchmake", addr);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
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
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
