//! # Play Match Example
//!
//! Demonstrates a complete match view lifecycle:
//!
//! 1. Join a match over WebSocket with an invite or a stored session key
//! 2. Keep the session key the server grants for the next visit
//! 3. Render board updates and play the first free cell on our turn
//! 4. Offer (or accept) a rematch when the game ends
//! 5. Shut down gracefully on Ctrl+C or when the view gives up
//!
//! ## Running
//!
//! ```sh
//! # First visit, with the invite from the match link:
//! VERSUS_MATCH=7 VERSUS_INVITE=inv-abc VERSUS_TOKEN=... cargo run --example play_match
//!
//! # Later visits reuse the stored session key:
//! VERSUS_MATCH=7 VERSUS_TOKEN=... cargo run --example play_match
//!
//! # Override the server URL:
//! VERSUS_URL=wss://play.example.com/ws/game cargo run --example play_match
//! ```

use std::time::Duration;

use versus_client::{
    Collaborators, Credential, FileSessionStore, MatchClient, MatchConfig, MatchEvent, NavParams,
    StaticTokenProvider, WebSocketConnector,
};

/// Default server URL when `VERSUS_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:8080/ws/game";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("VERSUS_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let match_id = std::env::var("VERSUS_MATCH").unwrap_or_else(|_| "1".to_string());
    let token = std::env::var("VERSUS_TOKEN").unwrap_or_else(|_| "dev-token".to_string());
    let sessions =
        std::env::var("VERSUS_SESSIONS").unwrap_or_else(|_| "versus-sessions.json".to_string());

    let mut nav = NavParams::new(match_id);
    if let Ok(invite) = std::env::var("VERSUS_INVITE") {
        nav = nav.with_invite(invite);
    }

    let tokens = StaticTokenProvider::new(Credential::expiring_in(
        token,
        Duration::from_secs(24 * 3600),
    ));
    let collaborators =
        Collaborators::new(tokens).with_session_store(FileSessionStore::new(sessions));
    let config = MatchConfig::new(&url)?;
    tracing::info!("Joining match {} at {url}", nav.match_id);

    let (mut client, mut event_rx) =
        MatchClient::start(WebSocketConnector::new(), collaborators, nav, config);
    let mut my_mark = None;

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };

                match event {
                    MatchEvent::StateChanged { state, socket_id } => {
                        tracing::info!("Connection {socket_id}: {state:?}");
                    }

                    MatchEvent::Acknowledged(ack) => {
                        tracing::info!("Playing as {:?}", ack.participant_id);
                        my_mark = ack.participant_id;
                    }

                    MatchEvent::SessionPromoted { lobby_id, persisted } => {
                        tracing::info!("Session for lobby {lobby_id} saved (persisted={persisted})");
                    }

                    MatchEvent::Board(update) => {
                        let cells = update.cell_values();
                        for row in cells.chunks(3) {
                            tracing::info!("{}", row.join("|"));
                        }

                        if update.is_game_over {
                            tracing::info!("Game over, winner: {:?}", update.winner);
                            client.request_rematch(Some("Again?".into()))?;
                        } else if my_mark.as_deref() == Some(update.current_turn.as_str()) {
                            if let Some(free) = update.cells.iter().position(Option::is_none) {
                                client.make_move(u8::try_from(free)?)?;
                            }
                        }
                    }

                    MatchEvent::Rematch(view) => {
                        if view.is_offered {
                            tracing::info!("Opponent wants a rematch, accepting");
                            client.accept_rematch()?;
                        } else if let Some(left) = view.countdown {
                            tracing::info!("Waiting for opponent ({left}s)");
                        }
                    }

                    MatchEvent::RematchStarted { match_id } => {
                        tracing::info!("Rematch started in match {match_id}");
                    }

                    MatchEvent::ServerError { message, code } => {
                        tracing::error!("Server error [{code:?}]: {message}");
                    }

                    MatchEvent::Terminated(reason) => {
                        tracing::error!("{}", reason.user_message());
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    client.shutdown().await;
    tracing::info!("Client shut down. Goodbye!");
    Ok(())
}
