//! WebSocket connection task with tokio mpsc command/notification pattern.
//!
//! The socket lives in a dedicated tokio task.  External code communicates
//! with it through typed command and notification channels, keeping the
//! transport layer fully asynchronous and decoupled from session state.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use backchannel_shared::constants::CHANNEL_CAPACITY;
use backchannel_shared::protocol::{ClientEvent, ServerEvent};

use crate::error::ClientError;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the connection task.
#[derive(Debug)]
pub enum ConnectionCommand {
    /// Send an event frame to the hub.
    Send(ClientEvent),
    /// Gracefully close the connection.
    Shutdown,
}

/// Notifications sent *from* the connection task to the application.
#[derive(Debug, Clone)]
pub enum ConnectionNotification {
    /// A hub event arrived.
    Event(ServerEvent),
    /// The socket closed (server shutdown, network loss).
    Closed,
}

/// Open a WebSocket to the hub and spawn the connection task.
///
/// Returns channels for sending commands and receiving notifications.
///
/// # Arguments
///
/// * `url` - Hub WebSocket endpoint, e.g. `ws://localhost:8080/ws`
pub async fn spawn_connection(
    url: &str,
) -> Result<
    (
        mpsc::Sender<ConnectionCommand>,
        mpsc::Receiver<ConnectionNotification>,
    ),
    ClientError,
> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
    let (mut ws_write, mut ws_read) = ws_stream.split();

    info!(url = %url, "Connected to hub");

    // Create channels
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ConnectionCommand>(CHANNEL_CAPACITY);
    let (notif_tx, notif_rx) = mpsc::channel::<ConnectionNotification>(CHANNEL_CAPACITY);

    // Spawn the connection loop
    tokio::spawn(async move {
        loop {
            tokio::select! {
                // --- Outbound commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ConnectionCommand::Send(event)) => {
                            match event.to_json() {
                                Ok(json) => {
                                    debug!(event = event.kind(), "sending event");
                                    if let Err(e) = ws_write.send(Message::Text(json)).await {
                                        error!(error = %e, "WebSocket send failed");
                                        let _ = notif_tx.send(ConnectionNotification::Closed).await;
                                        break;
                                    }
                                }
                                Err(e) => {
                                    error!(error = %e, "Failed to serialize event");
                                }
                            }
                        }
                        Some(ConnectionCommand::Shutdown) => {
                            info!("Connection shutdown requested");
                            let _ = ws_write.send(Message::Close(None)).await;
                            break;
                        }
                        None => {
                            // All senders dropped
                            info!("Command channel closed, shutting down connection");
                            let _ = ws_write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }

                // --- Inbound frames ---
                frame = ws_read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match ServerEvent::from_json(&text) {
                                Ok(event) => {
                                    debug!(event = event.kind(), "event received");
                                    let _ = notif_tx
                                        .send(ConnectionNotification::Event(event))
                                        .await;
                                }
                                Err(e) => {
                                    warn!(error = %e, "dropping malformed event payload");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(_))) => {
                            // tungstenite queues the pong automatically.
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Hub closed the connection");
                            let _ = notif_tx.send(ConnectionNotification::Closed).await;
                            break;
                        }
                        Some(Ok(_)) => {
                            // Binary frames are not part of the protocol.
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket read error");
                            let _ = notif_tx.send(ConnectionNotification::Closed).await;
                            break;
                        }
                    }
                }
            }
        }

        info!("Connection task terminated");
    });

    Ok((cmd_tx, notif_rx))
}
