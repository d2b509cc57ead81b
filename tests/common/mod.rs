#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Versus client integration tests.
//!
//! Provides a scriptable [`MockConnector`] whose connections are driven from
//! the test through [`RemoteEnd`], recording collaborators, and helpers for
//! building server frames.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;
use versus_client::{
    CloseCode, CloseStatus, Collaborators, Connector, Credential, Inbound, MatchEvent, Navigator,
    Notifier, NotifyLevel, SessionStore, TokenProvider, Transport, VersusError,
};

/// How long helpers wait before declaring that something never happened.
/// Tests run on paused time, so this costs nothing in wall-clock terms.
pub const PATIENCE: Duration = Duration::from_secs(120);

// ── MockConnector ───────────────────────────────────────────────────

/// What the next connection attempt does.
#[derive(Debug, Clone, Copy)]
pub enum Plan {
    Accept,
    /// Fail the handshake with this HTTP status.
    Reject(u16),
}

#[derive(Default)]
struct ConnectorLog {
    plan: VecDeque<Plan>,
    reject_all: Option<u16>,
    urls: Vec<Url>,
    times: Vec<Instant>,
}

/// A connector whose accepted connections show up as [`RemoteEnd`]s.
#[derive(Clone)]
pub struct MockConnector {
    log: Arc<StdMutex<ConnectorLog>>,
    remotes: mpsc::UnboundedSender<RemoteEnd>,
}

/// Receives the server side of every accepted connection, in order.
pub struct Remotes(mpsc::UnboundedReceiver<RemoteEnd>);

impl MockConnector {
    pub fn new() -> (Self, Remotes) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            log: Arc::new(StdMutex::new(ConnectorLog::default())),
            remotes: tx,
        };
        (connector, Remotes(rx))
    }

    pub fn plan(&self, plan: Plan) {
        self.log.lock().unwrap().plan.push_back(plan);
    }

    /// Reject every attempt that has no explicit plan.
    pub fn reject_all(&self, status: u16) {
        self.log.lock().unwrap().reject_all = Some(status);
    }

    pub fn connect_count(&self) -> usize {
        self.log.lock().unwrap().urls.len()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.log.lock().unwrap().urls.clone()
    }

    pub fn times(&self) -> Vec<Instant> {
        self.log.lock().unwrap().times.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, VersusError> {
        let plan = {
            let mut log = self.log.lock().unwrap();
            log.urls.push(url.clone());
            log.times.push(Instant::now());
            log.plan
                .pop_front()
                .or(log.reject_all.map(Plan::Reject))
                .unwrap_or(Plan::Accept)
        };

        match plan {
            Plan::Reject(status) => Err(VersusError::HandshakeRejected { status }),
            Plan::Accept => {
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let sent = Arc::new(StdMutex::new(Vec::new()));
                let closed = Arc::new(AtomicBool::new(false));
                let _ = self.remotes.send(RemoteEnd {
                    url: url.clone(),
                    inbound: inbound_tx,
                    sent: Arc::clone(&sent),
                    closed: Arc::clone(&closed),
                });
                Ok(Box::new(MockTransport {
                    inbound: inbound_rx,
                    sent,
                    closed,
                }))
            }
        }
    }
}

impl Remotes {
    /// Wait for the next accepted connection.
    pub async fn next(&mut self) -> RemoteEnd {
        tokio::time::timeout(PATIENCE, self.0.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Assert that no connection is accepted within `window`.
    pub async fn assert_none_within(&mut self, window: Duration) {
        if let Ok(Some(remote)) = tokio::time::timeout(window, self.0.recv()).await {
            panic!("unexpected connection to {}", remote.url);
        }
    }
}

// ── MockTransport / RemoteEnd ───────────────────────────────────────

struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), VersusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(VersusError::TransportClosed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Inbound, VersusError> {
        match self.inbound.recv().await {
            Some(item) => Ok(item),
            // The test dropped its end; keep the socket up until closed.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), VersusError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// The server side of one accepted connection.
pub struct RemoteEnd {
    pub url: Url,
    inbound: mpsc::UnboundedSender<Inbound>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl RemoteEnd {
    /// Deliver a JSON frame to the client.
    pub fn push(&self, frame: serde_json::Value) {
        let _ = self.inbound.send(Inbound::Text(frame.to_string()));
    }

    pub fn push_raw(&self, frame: &str) {
        let _ = self.inbound.send(Inbound::Text(frame.to_string()));
    }

    /// Close the connection from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self
            .inbound
            .send(Inbound::Closed(CloseStatus::new(CloseCode(code), reason)));
    }

    /// Frames the client has sent so far, decoded.
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    /// Wait until the client has sent a frame of type `kind`.
    pub async fn wait_for_sent(&self, kind: &str) -> serde_json::Value {
        let deadline = Instant::now() + PATIENCE;
        loop {
            if let Some(frame) = self.sent().into_iter().find(|f| f["type"] == kind) {
                return frame;
            }
            assert!(Instant::now() < deadline, "client never sent {kind}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The query parameters of the connection URL.
    pub fn query(&self) -> HashMap<String, String> {
        self.url.query_pairs().into_owned().collect()
    }

    /// The last path segment, i.e. the match id.
    pub fn match_segment(&self) -> String {
        self.url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or_default()
            .to_string()
    }
}

// ── Collaborators ───────────────────────────────────────────────────

/// Navigator that records every path it was sent to.
#[derive(Clone, Default)]
pub struct RecordingNavigator(Arc<StdMutex<Vec<String>>>);

impl RecordingNavigator {
    pub fn paths(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn go_to(&self, path: &str) {
        self.0.lock().unwrap().push(path.to_string());
    }
}

/// Notifier that records every message.
#[derive(Clone, Default)]
pub struct RecordingNotifier(Arc<StdMutex<Vec<(NotifyLevel, String)>>>);

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(NotifyLevel, String)> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, level: NotifyLevel) -> usize {
        self.messages().iter().filter(|(l, _)| *l == level).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        self.0.lock().unwrap().push((level, message.to_string()));
    }
}

/// Token provider that counts requests. It can be told to come up empty
/// until a forced refresh is requested.
#[derive(Clone, Default)]
pub struct CountingTokens {
    calls: Arc<AtomicUsize>,
    forced: Arc<AtomicUsize>,
    empty_until_forced: Arc<AtomicBool>,
}

impl CountingTokens {
    pub fn empty_until_forced() -> Self {
        let tokens = Self::default();
        tokens.empty_until_forced.store(true, Ordering::Release);
        tokens
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    pub fn forced(&self) -> usize {
        self.forced.load(Ordering::Acquire)
    }
}

#[async_trait]
impl TokenProvider for CountingTokens {
    async fn get_valid_credential(
        &self,
        _min_ttl: Duration,
        force_refresh: bool,
    ) -> Option<Credential> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        if force_refresh {
            self.forced.fetch_add(1, Ordering::AcqRel);
            self.empty_until_forced.store(false, Ordering::Release);
        }
        if self.empty_until_forced.load(Ordering::Acquire) {
            return None;
        }
        let n = self.calls();
        Some(Credential::expiring_in(format!("tok-{n}"), Duration::from_secs(3600)))
    }
}

/// Everything a test wants to inspect after the fact.
#[derive(Clone)]
pub struct World {
    pub tokens: CountingTokens,
    pub sessions: Arc<dyn SessionStore>,
    pub navigator: RecordingNavigator,
    pub notifier: RecordingNotifier,
}

impl World {
    pub fn new() -> Self {
        Self::with_tokens(CountingTokens::default())
    }

    pub fn with_tokens(tokens: CountingTokens) -> Self {
        Self {
            tokens,
            sessions: Arc::new(versus_client::MemorySessionStore::new()),
            navigator: RecordingNavigator::default(),
            notifier: RecordingNotifier::default(),
        }
    }

    /// Pretend an earlier visit already promoted an invite for `lobby_id`.
    pub fn remember(&self, lobby_id: &str, session_key: &str) -> &Self {
        self.sessions.store(lobby_id, session_key).unwrap();
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(self.tokens.clone())
            .with_shared_session_store(Arc::clone(&self.sessions))
            .with_navigator(self.navigator.clone())
            .with_notifier(self.notifier.clone())
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// Receive events until one matches `pred`, discarding the rest.
pub async fn wait_for<F>(events: &mut mpsc::Receiver<MatchEvent>, mut pred: F) -> MatchEvent
where
    F: FnMut(&MatchEvent) -> bool,
{
    let deadline = Instant::now() + PATIENCE;
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Drain whatever is queued without waiting.
pub fn drain(events: &mut mpsc::Receiver<MatchEvent>) -> Vec<MatchEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ── Frame helpers ───────────────────────────────────────────────────

pub fn ack(participant_id: &str) -> serde_json::Value {
    json!({ "type": "connection_ack", "participant_id": participant_id })
}

pub fn snapshot(match_id: &str, board: &str, turn: &str) -> serde_json::Value {
    json!({
        "type": "match_snapshot",
        "match_id": match_id,
        "board": board,
        "current_turn": turn,
        "is_completed": false
    })
}

pub fn session_established(lobby_id: &str, session_key: &str) -> serde_json::Value {
    json!({ "type": "session_established", "lobby_id": lobby_id, "session_key": session_key })
}

pub fn rematch_offer(match_id: &str, requester: &str, receiver: &str) -> serde_json::Value {
    json!({
        "type": "rematch_offer",
        "match_id": match_id,
        "requester_id": requester,
        "receiver_id": receiver,
        "requester_name": "Sam",
        "message": "again?"
    })
}

pub fn rematch_start(new_game_id: u64) -> serde_json::Value {
    json!({ "type": "rematch_start", "new_game_id": new_game_id })
}
