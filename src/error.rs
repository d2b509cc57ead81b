//! Error types for the Versus client.

use thiserror::Error;

/// Errors that can occur when using the Versus client.
#[derive(Debug, Error)]
pub enum VersusError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an open connection.
    #[error("not connected to server")]
    NotConnected,

    /// Neither an invite nor a stored session key could be resolved for the lobby.
    #[error("no invite or session key available for lobby {lobby_id}")]
    MissingCredential {
        /// Lobby the join was attempted for.
        lobby_id: String,
    },

    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A board update frame was missing required fields or carried invalid values.
    #[error("malformed match update: {0}")]
    MalformedUpdate(String),

    /// The server refused the socket handshake with an HTTP status.
    #[error("handshake rejected with HTTP status {status}")]
    HandshakeRejected {
        /// HTTP status code of the rejected upgrade.
        status: u16,
    },

    /// The durable session-key store could not be read or written.
    #[error("session storage error: {0}")]
    Storage(String),

    /// A URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The socket endpoint URL cannot carry a match id path segment.
    #[error("invalid socket endpoint: {0}")]
    InvalidEndpoint(String),

    /// The credential source failed to produce a fresh token.
    #[error("credential refresh failed: {0}")]
    CredentialRefresh(String),

    /// A rematch response was attempted without a pending offer from the peer.
    #[error("no rematch offer to respond to")]
    NoRematchOffer,

    /// A move targeted a cell outside the board.
    #[error("cell {0} is outside the board")]
    InvalidMove(u8),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Versus client operations.
pub type Result<T> = std::result::Result<T, VersusError>;
