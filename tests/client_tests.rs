#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for [`MatchClient`] driven through a scripted connector.
//!
//! Every test runs on paused time, so backoff delays and rematch countdowns
//! elapse instantly while keeping their ordering.

mod common;

use std::time::Duration;

use common::*;
use tokio::sync::mpsc;
use versus_client::{
    ConnectionState, InviteRejection, Mark, MatchClient, MatchConfig, MatchEvent, MatchId,
    NavParams, NotifyLevel, RematchView, SocketId, Termination,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn config() -> MatchConfig {
    MatchConfig::new("ws://play.test/ws/game").unwrap()
}

fn start(
    world: &World,
    nav: NavParams,
    config: MatchConfig,
) -> (MatchClient, mpsc::Receiver<MatchEvent>, MockConnector, Remotes) {
    let (connector, remotes) = MockConnector::new();
    let (client, events) = MatchClient::start(connector.clone(), world.collaborators(), nav, config);
    (client, events, connector, remotes)
}

async fn wait_open(events: &mut mpsc::Receiver<MatchEvent>) -> SocketId {
    match wait_for(events, |e| {
        matches!(
            e,
            MatchEvent::StateChanged {
                state: ConnectionState::Open,
                ..
            }
        )
    })
    .await
    {
        MatchEvent::StateChanged { socket_id, .. } => socket_id,
        _ => unreachable!(),
    }
}

async fn wait_terminated(events: &mut mpsc::Receiver<MatchEvent>) -> Termination {
    match wait_for(events, |e| matches!(e, MatchEvent::Terminated(_))).await {
        MatchEvent::Terminated(t) => t,
        _ => unreachable!(),
    }
}

async fn wait_rematch(
    events: &mut mpsc::Receiver<MatchEvent>,
    pred: impl Fn(&RematchView) -> bool,
) -> RematchView {
    match wait_for(events, |e| matches!(e, MatchEvent::Rematch(v) if pred(v))).await {
        MatchEvent::Rematch(v) => v,
        _ => unreachable!(),
    }
}

// ── Session negotiation ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn invite_is_promoted_and_reconnect_uses_session_key() {
    let world = World::new();
    let (mut client, mut events, _connector, mut remotes) =
        start(&world, NavParams::new("7").with_invite("inv-1"), config());

    let first = remotes.next().await;
    assert_eq!(first.url.path(), "/ws/game/7");
    let query = first.query();
    assert_eq!(query["invite"], "inv-1");
    assert_eq!(query["lobby"], "7");
    assert_eq!(query["token"], "tok-1");
    assert!(!query.contains_key("sessionKey"));
    wait_open(&mut events).await;

    first.push(session_established("7", "sk-7"));
    let promoted = wait_for(&mut events, |e| matches!(e, MatchEvent::SessionPromoted { .. })).await;
    assert_eq!(
        promoted,
        MatchEvent::SessionPromoted {
            lobby_id: "7".into(),
            persisted: true
        }
    );
    assert_eq!(world.sessions.load("7").unwrap().as_deref(), Some("sk-7"));

    // A repeated grant changes nothing.
    first.push(session_established("7", "sk-7"));

    first.close(1001, "restarting");
    let second = remotes.next().await;
    let query = second.query();
    assert_eq!(query["sessionKey"], "sk-7");
    assert_eq!(query["lobby"], "7");
    assert!(!query.contains_key("invite"));

    let promotions = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, MatchEvent::SessionPromoted { .. }))
        .count();
    assert_eq!(promotions, 0);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stored_session_key_ignores_stale_lobby() {
    let world = World::new();
    world.remember("7", "sk-7");
    let (mut client, _events, _connector, mut remotes) = start(
        &world,
        NavParams::new("7").with_lobby("some-old-lobby"),
        config(),
    );

    let remote = remotes.next().await;
    assert_eq!(remote.query()["lobby"], "7");
    assert_eq!(remote.query()["sessionKey"], "sk-7");

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn missing_credential_never_opens_a_socket() {
    let world = World::new();
    let (mut client, mut events, connector, mut remotes) =
        start(&world, NavParams::new("7"), config());

    let termination = wait_terminated(&mut events).await;
    assert_eq!(
        termination,
        Termination::MissingCredential {
            lobby_id: "7".into()
        }
    );
    remotes.assert_none_within(Duration::from_secs(30)).await;
    assert_eq!(connector.connect_count(), 0);
    assert_eq!(world.tokens.calls(), 0);
    assert_eq!(world.navigator.paths(), vec!["/".to_string()]);
    assert_eq!(world.notifier.count(NotifyLevel::Error), 1);

    client.shutdown().await;
}

// ── Connection lifecycle ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn late_close_from_replaced_socket_is_ignored() {
    let world = World::new();
    world.remember("7", "sk-7").remember("8", "sk-8");
    let (mut client, mut events, connector, mut remotes) =
        start(&world, NavParams::new("7"), config());

    let old = remotes.next().await;
    assert_eq!(wait_open(&mut events).await, 1);

    client.switch_match(NavParams::new("8")).unwrap();
    let new = remotes.next().await;
    assert_eq!(new.match_segment(), "8");
    assert_eq!(wait_open(&mut events).await, 2);

    // The old socket reports its close after the new one is already open.
    old.close(1006, "");
    remotes.assert_none_within(Duration::from_secs(60)).await;

    assert!(old.is_closed());
    assert!(client.is_open());
    assert_eq!(client.socket_id(), 2);
    assert_eq!(client.current_match_id(), MatchId::from("8"));
    assert_eq!(connector.connect_count(), 2);
    assert!(drain(&mut events).iter().all(|e| !matches!(
        e,
        MatchEvent::StateChanged {
            state: ConnectionState::Closed,
            ..
        }
    )));

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn auth_close_retries_once_with_forced_refresh() {
    let world = World::new();
    world.remember("7", "sk-7");
    let (mut client, mut events, connector, mut remotes) =
        start(&world, NavParams::new("7"), config());

    let first = remotes.next().await;
    wait_open(&mut events).await;

    // The auth retry is rejected too; from then on it is plain backoff.
    connector.plan(Plan::Reject(401));
    first.close(4401, "token expired");

    let third = remotes.next().await;
    assert_eq!(world.tokens.forced(), 1);
    assert_eq!(connector.connect_count(), 3);

    let times = connector.times();
    let auth_delay = times[1] - times[0];
    let backoff = times[2] - times[1];
    assert!(auth_delay >= Duration::from_millis(500) && auth_delay < Duration::from_millis(600));
    assert!(backoff >= Duration::from_secs(1) && backoff < Duration::from_millis(1100));

    // Opening again resets the budget: the next auth close retries again.
    wait_open(&mut events).await;
    third.close(4401, "token expired");
    let _fourth = remotes.next().await;
    assert_eq!(world.tokens.forced(), 2);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unavailable_credential_counts_as_auth_close() {
    let world = World::with_tokens(CountingTokens::empty_until_forced());
    world.remember("7", "sk-7");
    let (mut client, mut events, connector, mut remotes) =
        start(&world, NavParams::new("7"), config());

    let remote = remotes.next().await;
    wait_open(&mut events).await;
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(world.tokens.forced(), 1);
    assert_eq!(remote.query()["token"], "tok-2");

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_eight_retries() {
    let world = World::new();
    world.remember("7", "sk-7");
    let (mut client, mut events, connector, _remotes) =
        start(&world, NavParams::new("7"), config());
    connector.reject_all(500);

    let termination = wait_terminated(&mut events).await;
    assert_eq!(termination, Termination::ReconnectExhausted { attempts: 8 });
    assert_eq!(connector.connect_count(), 9);

    // 1 + 2 + 4 + 8 + 15 + 15 + 15 + 15
    let times = connector.times();
    let total = times[8] - times[0];
    assert!(total >= Duration::from_secs(75) && total < Duration::from_secs(76));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.connect_count(), 9);
    assert_eq!(world.navigator.paths(), vec!["/".to_string()]);
    assert_eq!(world.notifier.count(NotifyLevel::Error), 1);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn invite_rejection_is_terminal() {
    let world = World::new();
    let (mut client, mut events, connector, mut remotes) = start(
        &world,
        NavParams::new("7").with_invite("inv-used"),
        config().with_exit_path("/lobby"),
    );
    connector.plan(Plan::Reject(410));

    let termination = wait_terminated(&mut events).await;
    assert_eq!(
        termination,
        Termination::InviteRejected(InviteRejection::Expired)
    );
    remotes.assert_none_within(Duration::from_secs(60)).await;
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(world.navigator.paths(), vec!["/lobby".to_string()]);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn invite_close_code_after_open_is_terminal() {
    let world = World::new();
    let (mut client, mut events, _connector, mut remotes) =
        start(&world, NavParams::new("7").with_invite("inv"), config());

    let remote = remotes.next().await;
    wait_open(&mut events).await;
    remote.close(4403, "not yours");

    assert_eq!(
        wait_terminated(&mut events).await,
        Termination::InviteRejected(InviteRejection::Forbidden)
    );
    remotes.assert_none_within(Duration::from_secs(60)).await;

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_stops_retrying() {
    let world = World::new();
    world.remember("7", "sk-7");
    let (mut client, mut events, connector, mut remotes) =
        start(&world, NavParams::new("7"), config());

    let remote = remotes.next().await;
    wait_open(&mut events).await;

    client.disconnect().unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            MatchEvent::StateChanged {
                state: ConnectionState::Idle,
                ..
            }
        )
    })
    .await;
    remote.close(1006, "");
    remotes.assert_none_within(Duration::from_secs(60)).await;

    assert!(remote.is_closed());
    assert!(!client.is_open());
    assert_eq!(connector.connect_count(), 1);

    // An explicit connect starts over.
    client.connect().unwrap();
    let again = remotes.next().await;
    assert_eq!(again.query()["sessionKey"], "sk-7");

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connected_is_announced_once() {
    let world = World::new();
    world.remember("7", "sk-7");
    let (mut client, mut events, _connector, mut remotes) =
        start(&world, NavParams::new("7"), config());

    let first = remotes.next().await;
    wait_open(&mut events).await;
    first.close(1000, "bye");
    let _second = remotes.next().await;
    wait_open(&mut events).await;

    assert_eq!(world.notifier.count(NotifyLevel::Success), 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn explicit_join_is_sent_on_open() {
    let world = World::new();
    world.remember("7", "sk-7");
    let (mut client, mut events, _connector, mut remotes) =
        start(&world, NavParams::new("7"), config().with_explicit_join(true));

    let remote = remotes.next().await;
    wait_open(&mut events).await;
    let join = remote.wait_for_sent("join").await;
    assert_eq!(join["match_id"], "7");
    assert_eq!(join["lobby_id"], "7");

    client.make_move(4).unwrap();
    let mv = remote.wait_for_sent("move").await;
    assert_eq!(mv["index"], 4);

    client.shutdown().await;
    assert!(remote.is_closed());
}

// ── Routing ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn malformed_update_is_dropped_without_effect() {
    let world = World::new();
    world.remember("7", "sk-7");
    let (mut client, mut events, _connector, mut remotes) =
        start(&world, NavParams::new("7"), config());

    let remote = remotes.next().await;
    wait_open(&mut events).await;

    remote.push(snapshot("7", "XOX______", "Z"));
    remote.push_raw("{not json");
    remote.push(serde_json::json!({ "type": "match_update", "match_id": "7" }));
    remote.push(snapshot("7", "XOX______", "O"));

    let board = match wait_for(&mut events, |e| matches!(e, MatchEvent::Board(_))).await {
        MatchEvent::Board(b) => b,
        _ => unreachable!(),
    };
    assert_eq!(board.current_turn, Mark::O);
    assert_eq!(board.turns_left, 6);
    assert_eq!(board.cells[0], Some(Mark::X));
    assert_eq!(world.notifier.count(NotifyLevel::Warning), 3);
    assert!(client.is_open());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn server_error_is_reported_and_connection_stays() {
    let world = World::new();
    world.remember("7", "sk-7");
    let (mut client, mut events, _connector, mut remotes) =
        start(&world, NavParams::new("7"), config());

    let remote = remotes.next().await;
    wait_open(&mut events).await;
    remote.push(serde_json::json!({ "type": "error", "message": "Not your turn", "code": "turn" }));

    let event = wait_for(&mut events, |e| matches!(e, MatchEvent::ServerError { .. })).await;
    assert_eq!(
        event,
        MatchEvent::ServerError {
            message: "Not your turn".into(),
            code: Some("turn".into())
        }
    );
    assert!(world
        .notifier
        .messages()
        .contains(&(NotifyLevel::Error, "Not your turn".to_string())));
    assert!(client.is_open());

    client.shutdown().await;
}

// ── Rematch ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rematch_handshake_moves_both_players_to_the_new_match() {
    let world_x = World::new();
    world_x.remember("7", "sk-x");
    let world_o = World::new();
    world_o.remember("7", "sk-o");

    let (mut x, mut x_events, _x_conn, mut x_remotes) =
        start(&world_x, NavParams::new("7"), config());
    let (mut o, mut o_events, _o_conn, mut o_remotes) =
        start(&world_o, NavParams::new("7"), config());

    let x_remote = x_remotes.next().await;
    let o_remote = o_remotes.next().await;
    wait_open(&mut x_events).await;
    wait_open(&mut o_events).await;
    x_remote.push(ack("X"));
    o_remote.push(ack("O"));
    wait_for(&mut x_events, |e| matches!(e, MatchEvent::Acknowledged(_))).await;
    wait_for(&mut o_events, |e| matches!(e, MatchEvent::Acknowledged(_))).await;

    x.request_rematch(Some("again?".into())).unwrap();
    let request = x_remote.wait_for_sent("rematch_request").await;
    assert_eq!(request["match_id"], "7");

    x_remote.push(rematch_offer("7", "X", "O"));
    o_remote.push(rematch_offer("7", "X", "O"));

    let x_view = wait_rematch(&mut x_events, |v| v.offer.is_some()).await;
    assert!(x_view.rematch_pending);
    assert!(!x_view.is_offered);
    assert_eq!(x_view.countdown, Some(10));

    let o_view = wait_rematch(&mut o_events, |v| v.offer.is_some()).await;
    assert!(o_view.is_offered);
    assert!(!o_view.rematch_pending);
    assert_eq!(o_view.countdown, None);

    o.accept_rematch().unwrap();
    o_remote.wait_for_sent("rematch_accept").await;

    x_remote.push(rematch_start(42));
    o_remote.push(rematch_start(42));

    for (events, remotes, key, world) in [
        (&mut x_events, &mut x_remotes, "sk-x", &world_x),
        (&mut o_events, &mut o_remotes, "sk-o", &world_o),
    ] {
        wait_rematch(events, |v| *v == RematchView::default()).await;
        let started = wait_for(events, |e| matches!(e, MatchEvent::RematchStarted { .. })).await;
        assert_eq!(
            started,
            MatchEvent::RematchStarted {
                match_id: MatchId::from("42")
            }
        );

        let next = remotes.next().await;
        assert_eq!(next.match_segment(), "42");
        assert_eq!(next.query()["lobby"], "42");
        assert_eq!(next.query()["sessionKey"], key);
        assert_eq!(world.navigator.paths(), vec!["/game/42".to_string()]);
    }
    assert_eq!(x.current_match_id(), MatchId::from("42"));

    x.shutdown().await;
    o.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rematch_after_invite_join_uses_promoted_key() {
    let world = World::new();
    let (mut client, mut events, connector, mut remotes) =
        start(&world, NavParams::new("7").with_invite("inv-1"), config());

    let first = remotes.next().await;
    assert_eq!(first.query()["invite"], "inv-1");
    wait_open(&mut events).await;
    first.push(session_established("7", "sk-7"));
    wait_for(&mut events, |e| matches!(e, MatchEvent::SessionPromoted { .. })).await;

    first.push(rematch_start(42));
    let next = remotes.next().await;
    assert_eq!(next.match_segment(), "42");
    let query = next.query();
    assert_eq!(query["lobby"], "42");
    assert_eq!(query["sessionKey"], "sk-7");
    assert!(!query.contains_key("invite"));
    wait_open(&mut events).await;

    assert_eq!(connector.connect_count(), 2);
    assert_eq!(world.navigator.paths(), vec!["/game/42".to_string()]);
    assert!(drain(&mut events)
        .iter()
        .all(|e| !matches!(e, MatchEvent::Terminated(_))));

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rematch_request_expires_after_countdown() {
    let world = World::new();
    world.remember("7", "sk-7");
    let (mut client, mut events, _connector, mut remotes) = start(
        &world,
        NavParams::new("7"),
        config().with_participant_id("X").with_rematch_countdown(3),
    );

    let remote = remotes.next().await;
    wait_open(&mut events).await;

    let asked = tokio::time::Instant::now();
    client.request_rematch(None).unwrap();
    remote.wait_for_sent("rematch_request").await;
    let view = wait_rematch(&mut events, |v| v.rematch_pending).await;
    assert_eq!(view.countdown, Some(3));
    assert_eq!(wait_rematch(&mut events, |v| v.countdown == Some(2)).await.countdown, Some(2));

    wait_rematch(&mut events, |v| *v == RematchView::default()).await;
    assert!(asked.elapsed() >= Duration::from_secs(3));
    assert_eq!(world.notifier.count(NotifyLevel::Info), 1);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn declined_rematch_clears_state() {
    let world = World::new();
    world.remember("7", "sk-7");
    let (mut client, mut events, _connector, mut remotes) = start(
        &world,
        NavParams::new("7"),
        config().with_participant_id("X"),
    );

    let remote = remotes.next().await;
    wait_open(&mut events).await;
    client.request_rematch(None).unwrap();
    wait_rematch(&mut events, |v| v.rematch_pending).await;

    remote.push(serde_json::json!({ "type": "rematch_declined", "match_id": "7" }));
    wait_rematch(&mut events, |v| *v == RematchView::default()).await;

    // No countdown keeps running after the decline.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut events)
        .iter()
        .all(|e| !matches!(e, MatchEvent::Rematch(_))));

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rematch_without_follow_only_navigates() {
    let world = World::new();
    world.remember("7", "sk-7");
    let (mut client, mut events, connector, mut remotes) = start(
        &world,
        NavParams::new("7"),
        config().with_follow_rematch(false),
    );

    let remote = remotes.next().await;
    wait_open(&mut events).await;
    remote.push(serde_json::json!({
        "type": "rematch_start",
        "new_game_id": "43",
        "session_key": "sk-43"
    }));

    wait_for(&mut events, |e| matches!(e, MatchEvent::RematchStarted { .. })).await;
    remotes.assert_none_within(Duration::from_secs(10)).await;
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(world.navigator.paths(), vec!["/game/43".to_string()]);
    assert_eq!(world.sessions.load("43").unwrap().as_deref(), Some("sk-43"));

    client.shutdown().await;
}

async fn countdown_running(world: &World) -> (MatchClient, mpsc::Receiver<MatchEvent>, Remotes) {
    let (client, mut events, _connector, mut remotes) = start(
        world,
        NavParams::new("7"),
        config().with_participant_id("X"),
    );
    remotes.next().await;
    wait_open(&mut events).await;
    client.request_rematch(None).unwrap();
    wait_rematch(&mut events, |v| v.countdown == Some(9)).await;
    (client, events, remotes)
}

#[tokio::test(start_paused = true)]
async fn disconnect_stops_rematch_countdown() {
    let world = World::new();
    world.remember("7", "sk-7");
    let (mut client, mut events, _remotes) = countdown_running(&world).await;

    client.disconnect().unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            MatchEvent::StateChanged {
                state: ConnectionState::Idle,
                ..
            }
        )
    })
    .await;
    drain(&mut events);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut events)
        .iter()
        .all(|e| !matches!(e, MatchEvent::Rematch(_))));
    assert_eq!(world.notifier.count(NotifyLevel::Info), 0);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn switching_match_stops_rematch_countdown() {
    let world = World::new();
    world.remember("7", "sk-7").remember("8", "sk-8");
    let (mut client, mut events, mut remotes) = countdown_running(&world).await;

    client.switch_match(NavParams::new("8")).unwrap();
    let next = remotes.next().await;
    assert_eq!(next.match_segment(), "8");
    wait_open(&mut events).await;
    drain(&mut events);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut events)
        .iter()
        .all(|e| !matches!(e, MatchEvent::Rematch(_))));
    assert_eq!(world.notifier.count(NotifyLevel::Info), 0);

    client.shutdown().await;
}
