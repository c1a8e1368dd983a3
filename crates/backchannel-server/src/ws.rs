//! WebSocket upgrade handler and per-connection message loops.
//!
//! Each connection gets a write loop (relay events + heartbeat pings out)
//! and a read loop (client events in, pong deadline enforcement).  A
//! connection that goes silent past the heartbeat timeout takes the same
//! path as an explicit close frame: `ConnectionHub::disconnect`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::StreamExt;
use futures::SinkExt;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use backchannel_shared::constants::MAX_FRAME_SIZE;
use backchannel_shared::protocol::ClientEvent;
use backchannel_shared::types::ConnectionId;

use crate::api::AppState;
use crate::hub::ConnectionHub;

/// Axum handler for `GET /ws`: upgrade and hand off to the message loops.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive a single WebSocket connection until it closes or times out.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection, mut outbound_rx) = state.hub.connect();
    let (mut ws_write, mut ws_read) = socket.split();

    // Write loop: forward relay events as JSON text frames, interleaved
    // with heartbeat pings.
    let heartbeat_interval = state.config.heartbeat_interval();
    let write_handle = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat_interval);
        loop {
            tokio::select! {
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };
                    match event.to_json() {
                        Ok(json) => {
                            if ws_write.send(Message::Text(json)).await.is_err() {
                                debug!(connection = %connection, "WebSocket write failed, closing");
                                break;
                            }
                        }
                        Err(e) => {
                            error!(connection = %connection, error = %e, "failed to serialize event");
                        }
                    }
                }
                _ = ping.tick() => {
                    if ws_write.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read loop: any inbound frame counts as liveness.
    let heartbeat_timeout = state.config.heartbeat_timeout();
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = ws_read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    handle_text_frame(&state.hub, connection, &text);
                }
                Some(Ok(Message::Pong(_))) => {
                    last_seen = Instant::now();
                }
                Some(Ok(Message::Ping(_))) => {
                    // axum answers pings automatically.
                    last_seen = Instant::now();
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %connection, "client sent close frame");
                    break;
                }
                Some(Ok(_)) => {
                    // Binary frames are not part of the protocol.
                }
                Some(Err(e)) => {
                    debug!(connection = %connection, error = %e, "WebSocket read error");
                    break;
                }
                None => break,
            },
            _ = tokio::time::sleep_until(last_seen + heartbeat_timeout) => {
                warn!(connection = %connection, "heartbeat timeout, dropping connection");
                break;
            }
        }
    }

    // Cleanup: ungraceful and graceful disconnects converge here.
    write_handle.abort();
    state.hub.disconnect(connection);
}

/// Decode and dispatch one text frame.
///
/// Malformed payloads are logged and dropped; they never tear down the
/// connection or the hub.
fn handle_text_frame(hub: &ConnectionHub, connection: ConnectionId, text: &str) {
    if text.len() > MAX_FRAME_SIZE {
        warn!(connection = %connection, len = text.len(), "dropping oversized frame");
        return;
    }

    match ClientEvent::from_json(text) {
        Ok(event) => {
            debug!(connection = %connection, event = event.kind(), "event received");
            hub.handle_event(connection, event);
        }
        Err(e) => {
            warn!(connection = %connection, error = %e, "dropping malformed event payload");
        }
    }
}
