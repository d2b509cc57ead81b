//! Transport implementations for the match socket.
//!
//! | Feature                | Connector / Transport                          |
//! |------------------------|------------------------------------------------|
//! | `transport-websocket`  | [`WebSocketConnector`] / [`WebSocketTransport`] |
//!
//! # Example
//!
//! ```rust,ignore
//! use versus_client::{Collaborators, MatchClient, MatchConfig, NavParams, WebSocketConnector};
//!
//! let config = MatchConfig::new("wss://play.example.com/ws/game")?;
//! let (client, events) = MatchClient::start(
//!     WebSocketConnector::new(),
//!     collaborators,
//!     NavParams::new("42").with_invite("inv-abc"),
//!     config,
//! );
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
