//! Inbound frame routing.
//!
//! [`route`] decodes one text frame and says what it means; the connection
//! manager applies the effect. Malformed frames come back as
//! [`Routed::Dropped`] and are never partially applied.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::board::{BoardUpdate, UpdateKind};
use crate::error::VersusError;
use crate::protocol::{ConnectionAckPayload, RematchStartPayload, ServerMessage};
use crate::rematch::RematchOffer;

/// Rematch traffic forwarded to the rematch coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum RematchSignal {
    Offer(RematchOffer),
    Declined,
    Expired,
    Start(RematchStartPayload),
}

/// The effect of one inbound frame.
#[derive(Debug)]
pub enum Routed {
    Ack(ConnectionAckPayload),
    Board(BoardUpdate),
    Promote { lobby_id: String, session_key: String },
    Rematch(RematchSignal),
    ServerError { message: String, code: Option<String> },
    /// Well-formed frame with a discriminator this client does not handle.
    Ignored { kind: String },
    /// The frame was dropped; the error says why.
    Dropped(VersusError),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Decode a text frame into its effect.
pub fn route(frame: &str) -> Routed {
    let msg = match serde_json::from_str::<ServerMessage>(frame) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("dropping undecodable frame: {e}");
            return Routed::Dropped(VersusError::MalformedFrame(e.to_string()));
        }
    };

    match msg {
        ServerMessage::ConnectionAck(ack) => Routed::Ack(ack),
        ServerMessage::MatchSnapshot(payload) => board(UpdateKind::Snapshot, payload),
        ServerMessage::MatchUpdate(payload) => board(UpdateKind::Update, payload),
        ServerMessage::SessionEstablished {
            lobby_id,
            session_key,
        } => Routed::Promote {
            lobby_id,
            session_key,
        },
        ServerMessage::RematchOffer(payload) => {
            Routed::Rematch(RematchSignal::Offer(RematchOffer::from(payload)))
        }
        ServerMessage::RematchDeclined { .. } => Routed::Rematch(RematchSignal::Declined),
        ServerMessage::RematchExpired { .. } => Routed::Rematch(RematchSignal::Expired),
        ServerMessage::RematchStart(payload) => Routed::Rematch(RematchSignal::Start(payload)),
        ServerMessage::Error { message, code } => Routed::ServerError { message, code },
        ServerMessage::Unknown => {
            let kind = serde_json::from_str::<Envelope>(frame)
                .map(|e| e.kind)
                .unwrap_or_default();
            debug!(kind = %kind, "ignoring unrecognized frame type");
            Routed::Ignored { kind }
        }
    }
}

fn board(kind: UpdateKind, payload: crate::protocol::MatchUpdatePayload) -> Routed {
    match BoardUpdate::from_payload(kind, payload) {
        Ok(update) => Routed::Board(update),
        Err(e) => {
            warn!("dropping board update: {e}");
            Routed::Dropped(e)
        }
    }
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
    use crate::board::Mark;
    use crate::protocol::MatchId;
    use crate::rematch::RematchStatus;

    #[test]
    fn match_update_is_normalized() {
        let routed = route(
            r#"{"type":"match_update","board":"XOX_____","current_turn":"O","winner":null}"#,
        );
        let Routed::Board(update) = routed else {
            panic!("expected board, got {routed:?}");
        };
        assert_eq!(update.kind, UpdateKind::Update);
        assert_eq!(update.cell_values(), ["X", "O", "X", "", "", "", "", "", ""]);
        assert_eq!(update.turns_left, 6);
        assert!(!update.is_game_over);
        assert_eq!(update.current_turn, Mark::O);
    }

    #[test]
    fn snapshot_without_turn_is_dropped() {
        let routed = route(r#"{"type":"match_snapshot","board":"_________"}"#);
        assert!(matches!(routed, Routed::Dropped(VersusError::MalformedUpdate(_))));
    }

    #[test]
    fn update_without_board_is_dropped() {
        let routed = route(r#"{"type":"match_update","current_turn":"X"}"#);
        assert!(matches!(routed, Routed::Dropped(VersusError::MalformedUpdate(_))));
    }

    #[test]
    fn garbage_is_dropped_as_malformed_frame() {
        for frame in ["not json", "{}", r#"{"kind":"match_update"}"#] {
            assert!(
                matches!(route(frame), Routed::Dropped(VersusError::MalformedFrame(_))),
                "{frame}"
            );
        }
    }

    #[test]
    fn unknown_type_is_ignored_with_its_name() {
        let routed = route(r#"{"type":"chat","text":"gg"}"#);
        let Routed::Ignored { kind } = routed else {
            panic!("expected ignored");
        };
        assert_eq!(kind, "chat");
    }

    #[test]
    fn session_established_routes_to_promotion() {
        let routed = route(r#"{"type":"session_established","lobby_id":"7","session_key":"sk"}"#);
        let Routed::Promote {
            lobby_id,
            session_key,
        } = routed
        else {
            panic!("expected promote");
        };
        assert_eq!(lobby_id, "7");
        assert_eq!(session_key, "sk");
    }

    #[test]
    fn rematch_frames_route_to_coordinator() {
        let routed = route(
            r#"{"type":"rematch_offer","match_id":9,"requester_id":"X","receiver_id":"O","message":"again?"}"#,
        );
        let Routed::Rematch(RematchSignal::Offer(offer)) = routed else {
            panic!("expected offer");
        };
        assert_eq!(offer.requester_id, "X");
        assert_eq!(offer.match_id, Some(MatchId::from("9")));
        assert_eq!(offer.status, RematchStatus::Offered);

        assert!(matches!(
            route(r#"{"type":"rematch_declined"}"#),
            Routed::Rematch(RematchSignal::Declined)
        ));
        assert!(matches!(
            route(r#"{"type":"rematch_expired","match_id":"9"}"#),
            Routed::Rematch(RematchSignal::Expired)
        ));
        let Routed::Rematch(RematchSignal::Start(start)) =
            route(r#"{"type":"rematch_start","new_game_id":42}"#)
        else {
            panic!("expected start");
        };
        assert_eq!(start.new_game_id, MatchId::from("42"));
    }

    #[test]
    fn server_error_keeps_message_and_code() {
        let Routed::ServerError { message, code } =
            route(r#"{"type":"error","message":"Not your turn","code":"NOT_YOUR_TURN"}"#)
        else {
            panic!("expected server error");
        };
        assert_eq!(message, "Not your turn");
        assert_eq!(code.as_deref(), Some("NOT_YOUR_TURN"));
    }
}
