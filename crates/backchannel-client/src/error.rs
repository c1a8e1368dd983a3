use thiserror::Error;

/// Errors surfaced to the user of the client library.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The durable write failed; the optimistic entry has been rolled back.
    #[error("Store error: {0}")]
    Store(#[from] backchannel_store::StoreError),

    /// WebSocket transport error while connecting.
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connection task has shut down.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation requires an open conversation view.
    #[error("No conversation is open")]
    NoOpenConversation,

    /// A message must carry content or an image.
    #[error("Message has neither content nor image")]
    EmptyMessage,
}
