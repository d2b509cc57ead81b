//! Wire types for the match socket protocol.
//!
//! Every frame is a JSON object with a `type` discriminator; the remaining
//! fields depend on the type. Inbound types the client does not know decode
//! as [`ServerMessage::Unknown`] so newer servers do not break older clients.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// ── Identifiers ─────────────────────────────────────────────────────

/// Identifier of a match.
///
/// Servers send these either as strings or as bare integers
/// (`"new_game_id": 42`); both decode to the same value. Always serialized
/// as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MatchId(String);

impl MatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MatchId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MatchId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for MatchId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for MatchId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Unsigned(n) => Self(n.to_string()),
            Raw::Signed(n) => Self(n.to_string()),
        })
    }
}

// ── Payload structs ─────────────────────────────────────────────────

/// Payload of `connection_ack`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionAckPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<MatchId>,
    /// Stable role identifier of the local participant (e.g. `"X"`).
    #[serde(default, alias = "role", skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Payload of `match_snapshot` and `match_update`.
///
/// `board` and `current_turn` are required by the router; they are optional
/// here so a frame missing them is reported as a malformed update rather
/// than an undecodable frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchUpdatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<MatchId>,
    /// Nine-character board, row-major; `X`/`O` for marks, anything else is empty.
    #[serde(default)]
    pub board: Option<String>,
    #[serde(default, alias = "turn")]
    pub current_turn: Option<String>,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default, alias = "completed")]
    pub is_completed: bool,
    #[serde(default)]
    pub winning_combination: Option<Vec<usize>>,
}

/// Payload of `rematch_offer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RematchOfferPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<MatchId>,
    /// Role identifier of the participant that asked for the rematch.
    pub requester_id: String,
    pub receiver_id: String,
    /// Display name of the requester. Informational only; names can coincide.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_name: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Payload of `rematch_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RematchStartPayload {
    /// The match the next connection must join.
    #[serde(alias = "new_match_id")]
    pub new_game_id: MatchId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_id: Option<String>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Frames sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Explicit join for deployments that do not join on handshake.
    Join { match_id: MatchId, lobby_id: String },
    /// Place the local mark on a board cell (0–8, row-major).
    Move { index: u8 },
    /// Ask the peer for a rematch.
    RematchRequest {
        match_id: MatchId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Accept the peer's rematch offer.
    RematchAccept { match_id: MatchId },
    /// Decline the peer's rematch offer.
    RematchDecline { match_id: MatchId },
    /// Keep-alive.
    Ping,
}

/// Frames sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake acknowledged; informational.
    ConnectionAck(ConnectionAckPayload),
    /// Full board state, usually right after joining.
    MatchSnapshot(MatchUpdatePayload),
    /// Board state after a move.
    MatchUpdate(MatchUpdatePayload),
    /// The invite was exchanged for a durable session key.
    SessionEstablished { lobby_id: String, session_key: String },
    /// A participant asked for a rematch.
    RematchOffer(RematchOfferPayload),
    /// The rematch was declined.
    RematchDeclined {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_id: Option<MatchId>,
    },
    /// The server gave up waiting for the peer.
    RematchExpired {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_id: Option<MatchId>,
    },
    /// Both sides agreed; the next match has been created.
    RematchStart(RematchStartPayload),
    /// Human-readable server error. Does not close the connection by itself.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// Any discriminator this client does not recognize.
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn match_id_accepts_integers_and_strings() {
        let a: MatchId = serde_json::from_str("42").unwrap();
        let b: MatchId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"42\"");
    }

    #[test]
    fn client_messages_use_flat_type_tag() {
        let json = serde_json::to_value(ClientMessage::Move { index: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "move", "index": 4 }));

        let json = serde_json::to_value(ClientMessage::Ping).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "ping" }));
    }

    #[test]
    fn unknown_server_type_decodes_as_unknown() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"spectator_count","count":3}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
    }

    #[test]
    fn bare_connection_ack_decodes() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"connection_ack"}"#).unwrap();
        assert_eq!(msg, ServerMessage::ConnectionAck(ConnectionAckPayload::default()));
    }

    #[test]
    fn rematch_start_accepts_numeric_id() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"rematch_start","new_game_id":42}"#).unwrap();
        let ServerMessage::RematchStart(payload) = msg else {
            panic!("expected rematch_start");
        };
        assert_eq!(payload.new_game_id, MatchId::from("42"));
        assert!(payload.session_key.is_none());
    }

    #[test]
    fn turn_alias_is_accepted() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"match_update","board":"X________","turn":"O"}"#)
                .unwrap();
        let ServerMessage::MatchUpdate(payload) = msg else {
            panic!("expected match_update");
        };
        assert_eq!(payload.current_turn.as_deref(), Some("O"));
    }
}
