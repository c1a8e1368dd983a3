//! # backchannel-server
//!
//! Realtime connection hub for Backchannel.
//!
//! This binary provides:
//! - **WebSocket relay** with room-based fan-out (one personal room per
//!   user, one room per open conversation)
//! - **Presence tracking** with edge-triggered online/offline broadcasts
//! - **Heartbeat** ping/pong so ungraceful disconnects are detected within
//!   one timeout window
//! - **REST API** (axum) for health checks and instance info
//!
//! The hub never touches the message store: clients persist first, then ask
//! the hub to relay.

mod api;
mod config;
mod hub;
mod presence;
mod rooms;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::hub::ConnectionHub;
use crate::presence::PresenceRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,backchannel_server=debug")),
        )
        .init();

    info!("Starting Backchannel hub v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Presence lives for exactly as long as the hub; a restart starts from
    // an empty registry and clients re-join.
    let hub = Arc::new(ConnectionHub::new(PresenceRegistry::new()));

    let app_state = AppState {
        hub: hub.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic occupancy log (every 5 minutes).
    let stats_hub = hub.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            info!(
                connections = stats_hub.connection_count(),
                online_users = stats_hub.online_count(),
                "hub occupancy"
            );
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the server or a shutdown signal
    // arrives, we exit cleanly.
    let http_addr = config.http_addr;
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Hub server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
