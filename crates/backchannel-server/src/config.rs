//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::time::Duration;

use backchannel_shared::constants::{
    APP_NAME, DEFAULT_HTTP_PORT, HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Backchannel Hub"`
    pub instance_name: String,

    /// Seconds between server-initiated heartbeat pings.
    /// Env: `HEARTBEAT_INTERVAL_SECS`
    pub heartbeat_interval_secs: u64,

    /// Seconds of silence after which a connection is treated as gone.
    /// Env: `HEARTBEAT_TIMEOUT_SECS`
    pub heartbeat_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            instance_name: format!("{APP_NAME} Hub"),
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
            heartbeat_timeout_secs: HEARTBEAT_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            if !name.is_empty() {
                config.instance_name = name;
            }
        }

        if let Ok(val) = std::env::var("HEARTBEAT_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.heartbeat_interval_secs = n,
                _ => {
                    tracing::warn!(
                        value = %val,
                        "Invalid HEARTBEAT_INTERVAL_SECS, using default"
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("HEARTBEAT_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.heartbeat_timeout_secs = n,
                _ => {
                    tracing::warn!(
                        value = %val,
                        "Invalid HEARTBEAT_TIMEOUT_SECS, using default"
                    );
                }
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Heartbeat ping interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Heartbeat silence window as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}
