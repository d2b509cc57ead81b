//! Transport abstraction for the match socket.
//!
//! A [`Transport`] is one physical, already-connected, bidirectional text
//! channel. A [`Connector`] opens new ones from a URL; the connection manager
//! calls it once per attempt, so every reconnect gets a fresh transport.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use versus_client::error::VersusError;
//! use versus_client::transport::{Inbound, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), VersusError> {
//!         // Send one JSON text frame
//!         # let _ = message;
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Result<Inbound, VersusError> {
//!         // Wait for the next frame, or report the close status
//!         # Err(VersusError::TransportClosed)
//!     }
//!
//!     async fn close(&mut self) -> Result<(), VersusError> {
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use url::Url;

use crate::close_code::CloseStatus;
use crate::error::VersusError;

/// One item read from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete JSON text frame.
    Text(String),
    /// The connection ended. Transports report a drop without a close frame
    /// as [`CloseCode::ABNORMAL`](crate::close_code::CloseCode::ABNORMAL).
    Closed(CloseStatus),
}

/// A bidirectional text frame transport.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: it is raced against the
/// outbound queue inside `tokio::select!`.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::TransportSend`] or [`VersusError::TransportClosed`].
    async fn send(&mut self, message: String) -> Result<(), VersusError>;

    /// Receive the next frame or the close status.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::TransportReceive`] on a broken connection. The
    /// caller treats that as an abnormal close.
    async fn recv(&mut self) -> Result<Inbound, VersusError>;

    /// Close the connection gracefully. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails; resources are released
    /// regardless.
    async fn close(&mut self) -> Result<(), VersusError>;
}

/// Opens physical connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Complete the handshake with `url`. Returning `Ok` is the handshake
    /// acknowledgment that moves the attempt to open.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::HandshakeRejected`] when the server refused the
    /// upgrade with an HTTP status, or a transport/I/O error otherwise.
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, VersusError>;
}
