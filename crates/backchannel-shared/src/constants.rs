/// Application name
pub const APP_NAME: &str = "Backchannel";

/// Maximum wire frame size in bytes (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;

/// Interval between server-initiated heartbeat pings, in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 25;

/// A connection that has not answered a ping within this window is treated
/// as disconnected
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 60;

/// Idle keystroke gap after which the client emits "stopped typing"
pub const TYPING_IDLE_MS: u64 = 2_000;

/// A received typing indicator expires after this long without a stop event
pub const TYPING_EXPIRY_MS: u64 = 5_000;

/// Default HTTP/WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Bound of the command / notification channels around a connection task
pub const CHANNEL_CAPACITY: usize = 256;
