#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire format tests for the Versus client.
//!
//! JSON fixtures mirror what match servers actually send, including the
//! loose spots: numeric ids, the `turn` alias and missing optional fields.

use serde_json::json;
use versus_client::board::UpdateKind;
use versus_client::protocol::{ClientMessage, MatchId, ServerMessage};
use versus_client::rematch::RematchStatus;
use versus_client::router::{route, RematchSignal, Routed};
use versus_client::{Mark, VersusError};

// ════════════════════════════════════════════════════════════════════
// ClientMessage encoding
// ════════════════════════════════════════════════════════════════════

#[test]
fn join_frame_matches_server_expectation() {
    let msg = ClientMessage::Join {
        match_id: MatchId::from(7u64),
        lobby_id: "7".into(),
    };
    assert_eq!(
        serde_json::to_value(&msg).unwrap(),
        json!({ "type": "join", "match_id": "7", "lobby_id": "7" })
    );
}

#[test]
fn rematch_frames() {
    let request = ClientMessage::RematchRequest {
        match_id: MatchId::from("7"),
        message: None,
    };
    assert_eq!(
        serde_json::to_value(&request).unwrap(),
        json!({ "type": "rematch_request", "match_id": "7" })
    );

    let request = ClientMessage::RematchRequest {
        match_id: MatchId::from("7"),
        message: Some("best of three?".into()),
    };
    assert_eq!(
        serde_json::to_value(&request).unwrap()["message"],
        "best of three?"
    );

    assert_eq!(
        serde_json::to_value(ClientMessage::RematchAccept {
            match_id: MatchId::from("7")
        })
        .unwrap(),
        json!({ "type": "rematch_accept", "match_id": "7" })
    );
    assert_eq!(
        serde_json::to_value(ClientMessage::RematchDecline {
            match_id: MatchId::from("7")
        })
        .unwrap(),
        json!({ "type": "rematch_decline", "match_id": "7" })
    );
}

// ════════════════════════════════════════════════════════════════════
// ServerMessage decoding
// ════════════════════════════════════════════════════════════════════

#[test]
fn connection_ack_with_role_alias() {
    let msg: ServerMessage = serde_json::from_value(json!({
        "type": "connection_ack",
        "match_id": 7,
        "role": "O",
        "message": "welcome"
    }))
    .unwrap();
    let ServerMessage::ConnectionAck(ack) = msg else {
        panic!("expected connection_ack");
    };
    assert_eq!(ack.match_id, Some(MatchId::from("7")));
    assert_eq!(ack.participant_id.as_deref(), Some("O"));
}

#[test]
fn session_established_fixture() {
    let msg: ServerMessage = serde_json::from_str(
        r#"{"type":"session_established","lobby_id":"7","session_key":"c2Vzc2lvbg"}"#,
    )
    .unwrap();
    assert_eq!(
        msg,
        ServerMessage::SessionEstablished {
            lobby_id: "7".into(),
            session_key: "c2Vzc2lvbg".into()
        }
    );
}

#[test]
fn rematch_offer_fixture() {
    let msg: ServerMessage = serde_json::from_value(json!({
        "type": "rematch_offer",
        "match_id": "7",
        "requester_id": "X",
        "receiver_id": "O",
        "requester_name": "Sam",
        "message": "again?",
        "created_at": "2026-03-01T12:00:00Z"
    }))
    .unwrap();
    let ServerMessage::RematchOffer(offer) = msg else {
        panic!("expected rematch_offer");
    };
    assert_eq!(offer.requester_id, "X");
    assert_eq!(offer.receiver_id, "O");
    assert_eq!(offer.created_at.as_deref(), Some("2026-03-01T12:00:00Z"));
}

#[test]
fn rematch_start_with_credentials() {
    let msg: ServerMessage = serde_json::from_value(json!({
        "type": "rematch_start",
        "new_match_id": "43",
        "session_key": "sk-43"
    }))
    .unwrap();
    let ServerMessage::RematchStart(start) = msg else {
        panic!("expected rematch_start");
    };
    assert_eq!(start.new_game_id.as_str(), "43");
    assert_eq!(start.session_key.as_deref(), Some("sk-43"));
    assert_eq!(start.invite_id, None);
}

#[test]
fn error_without_code() {
    let msg: ServerMessage =
        serde_json::from_str(r#"{"type":"error","message":"Match is full"}"#).unwrap();
    assert_eq!(
        msg,
        ServerMessage::Error {
            message: "Match is full".into(),
            code: None
        }
    );
}

// ════════════════════════════════════════════════════════════════════
// Routing
// ════════════════════════════════════════════════════════════════════

#[test]
fn completed_match_routes_to_board() {
    let frame = json!({
        "type": "match_update",
        "match_id": 7,
        "board": "XXXOO____",
        "current_turn": "O",
        "winner": "X",
        "is_completed": true,
        "winning_combination": [0, 1, 2]
    })
    .to_string();

    let Routed::Board(update) = route(&frame) else {
        panic!("expected a board update");
    };
    assert_eq!(update.kind, UpdateKind::Update);
    assert_eq!(update.cells[3], Some(Mark::O));
    assert_eq!(update.cells[8], None);
    assert_eq!(update.winner.as_deref(), Some("X"));
    assert!(update.is_game_over);
    assert_eq!(update.winning_combination, vec![0, 1, 2]);
    assert_eq!(update.turns_left, 4);
}

#[test]
fn snapshot_routes_as_snapshot() {
    let frame = r#"{"type":"match_snapshot","board":"_________","turn":"X"}"#;
    let Routed::Board(update) = route(frame) else {
        panic!("expected a board update");
    };
    assert_eq!(update.kind, UpdateKind::Snapshot);
    assert_eq!(update.turns_left, 9);
    assert_eq!(update.current_turn, Mark::X);
}

#[test]
fn update_without_turn_is_dropped() {
    let frame = r#"{"type":"match_update","board":"X________"}"#;
    assert!(matches!(
        route(frame),
        Routed::Dropped(VersusError::MalformedUpdate(_))
    ));
}

#[test]
fn garbage_is_dropped_as_malformed_frame() {
    for frame in ["", "null", "{\"board\":\"X\"}", "{\"type\":42}"] {
        assert!(
            matches!(route(frame), Routed::Dropped(VersusError::MalformedFrame(_))),
            "{frame} should be dropped"
        );
    }
}

#[test]
fn unknown_type_is_ignored_with_its_name() {
    let Routed::Ignored { kind } = route(r#"{"type":"spectator_joined","name":"Kim"}"#) else {
        panic!("expected ignored");
    };
    assert_eq!(kind, "spectator_joined");
}

#[test]
fn rematch_traffic_routes_to_signals() {
    let Routed::Rematch(RematchSignal::Offer(offer)) = route(
        &json!({
            "type": "rematch_offer",
            "requester_id": "O",
            "receiver_id": "X"
        })
        .to_string(),
    ) else {
        panic!("expected an offer");
    };
    assert_eq!(offer.status, RematchStatus::Offered);
    assert_eq!(offer.message, "");

    assert!(matches!(
        route(r#"{"type":"rematch_declined"}"#),
        Routed::Rematch(RematchSignal::Declined)
    ));
    assert!(matches!(
        route(r#"{"type":"rematch_expired","match_id":7}"#),
        Routed::Rematch(RematchSignal::Expired)
    ));
    assert!(matches!(
        route(r#"{"type":"rematch_start","new_game_id":42}"#),
        Routed::Rematch(RematchSignal::Start(ref start)) if start.new_game_id == MatchId::from("42")
    ));
}

#[test]
fn session_established_routes_to_promotion() {
    let routed = route(r#"{"type":"session_established","lobby_id":"7","session_key":"sk"}"#);
    assert!(matches!(
        routed,
        Routed::Promote { ref lobby_id, ref session_key } if lobby_id == "7" && session_key == "sk"
    ));
}
