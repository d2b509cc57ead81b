//! # Versus Client
//!
//! Transport-agnostic Rust client for realtime two-player matches.
//!
//! One [`MatchClient`] drives one match view: it picks the credential a join
//! presents, keeps a single logical connection alive across drops, routes
//! server frames into typed [`MatchEvent`]s and runs the rematch handshake.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Connector`] and [`Transport`] for any backend
//! - **Race-safe reconnects**: late callbacks from replaced sockets are ignored
//! - **Invite promotion**: a single-use invite becomes a durable session key
//! - **WebSocket built-in**: default `transport-websocket` feature provides [`WebSocketConnector`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use versus_client::{
//!     Collaborators, Credential, MatchClient, MatchConfig, MatchEvent, NavParams,
//!     StaticTokenProvider, WebSocketConnector,
//! };
//!
//! let tokens = StaticTokenProvider::new(Credential::expiring_in("token", ttl));
//! let (client, mut events) = MatchClient::start(
//!     WebSocketConnector::new(),
//!     Collaborators::new(tokens),
//!     NavParams::new("42").with_invite("inv-abc"),
//!     MatchConfig::new("wss://play.example.com/ws/game")?,
//! );
//!
//! while let Some(event) = events.recv().await {
//!     if let MatchEvent::Board(update) = event {
//!         println!("{:?}", update.cell_values());
//!     }
//! }
//! ```

pub mod board;
pub mod client;
pub mod close_code;
pub mod collaborators;
pub mod credential;
pub mod error;
pub mod event;
mod manager;
pub mod protocol;
pub mod reconnect;
pub mod rematch;
pub mod router;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use board::{BoardUpdate, Mark};
pub use client::{MatchClient, MatchConfig};
pub use close_code::{CloseCode, CloseStatus, InviteRejection};
pub use collaborators::{Collaborators, Navigator, Notifier, NotifyLevel};
pub use credential::{Credential, SharedTokenProvider, StaticTokenProvider, TokenProvider, TokenSource};
pub use error::VersusError;
pub use event::{ConnectionState, MatchEvent, SocketId, Termination};
pub use protocol::{ClientMessage, MatchId, ServerMessage};
pub use reconnect::ReconnectPolicy;
pub use rematch::RematchView;
pub use session::{FileSessionStore, MemorySessionStore, NavParams, SessionStore};
pub use transport::{Connector, Inbound, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
