//! # Custom Transport Example
//!
//! Shows how to implement [`Connector`] and [`Transport`] with in-process
//! loopback channels and play a short match against a fake server. This is
//! useful for:
//!
//! - **Testing**: exercise your game UI without a real server
//! - **Custom backends**: adapt any I/O layer (TCP, QUIC, WebRTC data channels)
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;
use versus_client::{
    Collaborators, Connector, Credential, Inbound, MatchClient, MatchConfig, MatchEvent,
    NavParams, StaticTokenProvider, Transport, VersusError,
};

// ─────────────────────────────────────────────────────────────────────
// Step 1: A loopback transport and the connector that hands them out
// ─────────────────────────────────────────────────────────────────────

/// Client half of one loopback connection.
pub struct LoopbackTransport {
    /// Frames the client sends go here (the server reads the other end).
    tx: mpsc::UnboundedSender<String>,
    /// Frames and closes from the server arrive here.
    rx: mpsc::UnboundedReceiver<Inbound>,
}

/// Server half of one loopback connection.
pub struct LoopbackServer {
    pub url: Url,
    pub rx: mpsc::UnboundedReceiver<String>,
    pub tx: mpsc::UnboundedSender<Inbound>,
}

impl LoopbackServer {
    fn push(&self, frame: serde_json::Value) -> Result<(), Box<dyn std::error::Error>> {
        self.tx.send(Inbound::Text(frame.to_string()))?;
        Ok(())
    }
}

/// Every `connect` creates a fresh pair and hands the server half to `accept`.
struct LoopbackConnector {
    accept: mpsc::UnboundedSender<LoopbackServer>,
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, VersusError> {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        self.accept
            .send(LoopbackServer {
                url: url.clone(),
                rx: server_rx,
                tx: server_tx,
            })
            .map_err(|_| VersusError::HandshakeRejected { status: 503 })?;
        Ok(Box::new(LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the Transport trait
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), VersusError> {
        self.tx
            .send(message)
            .map_err(|e| VersusError::TransportSend(e.to_string()))
    }

    /// Cancel-safe because `mpsc::UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Result<Inbound, VersusError> {
        match self.rx.recv().await {
            Some(inbound) => Ok(inbound),
            None => Err(VersusError::TransportClosed),
        }
    }

    /// Dropping the channels is all a loopback needs.
    async fn close(&mut self) -> Result<(), VersusError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire together the client and the fake server
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (accept_tx, mut accept_rx) = mpsc::unbounded_channel();
    let tokens = StaticTokenProvider::new(Credential::expiring_in(
        "demo-token",
        Duration::from_secs(3600),
    ));
    let config = MatchConfig::new("loop://server/game")?.with_participant_id("X");
    let (mut client, mut events) = MatchClient::start(
        LoopbackConnector { accept: accept_tx },
        Collaborators::new(tokens),
        NavParams::new("7").with_invite("inv-demo"),
        config,
    );

    // ── Fake server: accept, hand out a session key, send the board ──
    let Some(mut server) = accept_rx.recv().await else {
        return Err("connector dropped before connecting".into());
    };
    tracing::info!("Server accepted {}", server.url.path());

    server.push(serde_json::json!({ "type": "connection_ack", "participant_id": "X" }))?;
    server.push(serde_json::json!({
        "type": "session_established",
        "lobby_id": "7",
        "session_key": "demo-session"
    }))?;
    server.push(serde_json::json!({
        "type": "match_snapshot",
        "match_id": 7,
        "board": "_________",
        "current_turn": "X"
    }))?;

    // ── Client side: play the centre once the board arrives ─────────
    while let Some(event) = events.recv().await {
        match event {
            MatchEvent::Board(update) => {
                tracing::info!("Board {:?}, {} turns left", update.cell_values(), update.turns_left);
                if update.turns_left == 9 {
                    client.make_move(4)?;
                    if let Some(frame) = server.rx.recv().await {
                        tracing::info!("Server received: {frame}");
                    }
                    server.push(serde_json::json!({
                        "type": "match_update",
                        "board": "____X____",
                        "current_turn": "O"
                    }))?;
                } else {
                    break;
                }
            }
            MatchEvent::SessionPromoted { lobby_id, persisted } => {
                tracing::info!("Session key for lobby {lobby_id} stored (persisted={persisted})");
            }
            MatchEvent::Terminated(reason) => {
                tracing::warn!("{}", reason.user_message());
                break;
            }
            other => tracing::debug!("Event: {other:?}"),
        }
    }

    client.shutdown().await;
    tracing::info!("Done. Custom transport works!");
    Ok(())
}
