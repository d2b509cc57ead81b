//! Connection lifecycle for one match view.
//!
//! The manager runs as a single task and owns everything mutable: the
//! current attempt, retry counters, timers and rematch state. Each physical
//! attempt runs in its own task and reports back through the manager's
//! inbox, tagged with the [`SocketId`] it was created with. Anything tagged
//! with an id other than the active one is dropped unseen, which keeps late
//! callbacks from a superseded socket away from the state of its successor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::client::MatchConfig;
use crate::close_code::{CloseCode, CloseDisposition, CloseStatus};
use crate::collaborators::{Collaborators, NotifyLevel};
use crate::credential::TokenProvider;
use crate::error::VersusError;
use crate::event::{ConnectionState, MatchEvent, SocketId, Termination};
use crate::protocol::{ClientMessage, MatchId, RematchStartPayload};
use crate::reconnect::ReconnectState;
use crate::rematch::{RematchCoordinator, RematchStatus};
use crate::router::{route, RematchSignal, Routed};
use crate::session::{NavParams, Promotion, SessionIdentity, SessionNegotiator};
use crate::transport::{Connector, Inbound};

// ── Messages ────────────────────────────────────────────────────────

/// Requests from the [`MatchClient`](crate::MatchClient) handle.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    SwitchMatch(NavParams),
    Send(ClientMessage),
    RequestRematch { message: Option<String> },
    AcceptRematch,
    DeclineRematch,
}

/// Callbacks from attempt tasks and timers.
#[derive(Debug)]
enum Internal {
    Attempt {
        socket_id: SocketId,
        event: AttemptEvent,
    },
    RetryDue {
        socket_id: SocketId,
        force_refresh: bool,
    },
    RematchTick {
        generation: u64,
    },
}

#[derive(Debug)]
enum AttemptEvent {
    Opened,
    Frame(String),
    Closed(CloseStatus),
}

// ── Shared state ────────────────────────────────────────────────────

/// State readable from the client handle without a round trip.
pub(crate) struct SharedState {
    pub(crate) open: AtomicBool,
    pub(crate) socket_id: AtomicU64,
    pub(crate) match_id: Mutex<MatchId>,
}

impl SharedState {
    pub(crate) fn new(match_id: MatchId) -> Self {
        Self {
            open: AtomicBool::new(false),
            socket_id: AtomicU64::new(0),
            match_id: Mutex::new(match_id),
        }
    }

    fn set_match_id(&self, id: &MatchId) {
        match self.match_id.lock() {
            Ok(mut guard) => *guard = id.clone(),
            Err(poisoned) => *poisoned.into_inner() = id.clone(),
        }
    }
}

// ── Manager ─────────────────────────────────────────────────────────

struct ActiveAttempt {
    socket_id: SocketId,
    identity: SessionIdentity,
    open: bool,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

pub(crate) struct ConnectionManager {
    view: Uuid,
    config: MatchConfig,
    collaborators: Collaborators,
    connector: Arc<dyn Connector>,
    negotiator: SessionNegotiator,
    nav: NavParams,
    state: ConnectionState,
    /// Last issued attempt id; the active identity.
    socket_id: SocketId,
    active: Option<ActiveAttempt>,
    intentionally_closed: Option<SocketId>,
    reconnect: ReconnectState,
    announced: bool,
    retry_timer: Option<JoinHandle<()>>,
    rematch: RematchCoordinator,
    rematch_timer: Option<(u64, JoinHandle<()>)>,
    inbox: mpsc::UnboundedSender<Internal>,
    events: mpsc::Sender<MatchEvent>,
    shared: Arc<SharedState>,
}

pub(crate) struct Inbox(mpsc::UnboundedReceiver<Internal>);

impl ConnectionManager {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        collaborators: Collaborators,
        nav: NavParams,
        config: MatchConfig,
        events: mpsc::Sender<MatchEvent>,
        shared: Arc<SharedState>,
    ) -> (Self, Inbox) {
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let mut rematch = RematchCoordinator::new(config.rematch_countdown);
        rematch.set_local_participant(config.participant_id.clone());
        let manager = Self {
            view: Uuid::new_v4(),
            negotiator: SessionNegotiator::new(Arc::clone(&collaborators.sessions)),
            config,
            collaborators,
            connector,
            nav,
            state: ConnectionState::Idle,
            socket_id: 0,
            active: None,
            intentionally_closed: None,
            reconnect: ReconnectState::default(),
            announced: false,
            retry_timer: None,
            rematch,
            rematch_timer: None,
            inbox,
            events,
            shared,
        };
        (manager, Inbox(inbox_rx))
    }

    /// Drive the manager until shutdown or until the handle goes away.
    pub(crate) async fn run(
        mut self,
        Inbox(mut inbox_rx): Inbox,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!(view = %self.view, match_id = %self.nav.match_id, "connection manager started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            debug!(view = %self.view, "command channel closed");
                            self.close_gracefully().await;
                            break;
                        }
                    }
                }

                _ = &mut shutdown_rx => {
                    debug!(view = %self.view, "shutdown signal received");
                    self.close_gracefully().await;
                    break;
                }

                Some(internal) = inbox_rx.recv() => self.handle_internal(internal),
            }
        }

        debug!(view = %self.view, "connection manager exited");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => self.connect(),
            Command::Disconnect => {
                self.teardown();
            }
            Command::SwitchMatch(nav) => self.switch_match(nav),
            Command::Send(msg) => self.send_frame(&msg),
            Command::RequestRematch { message } => {
                if !self.is_open() {
                    warn!(view = %self.view, "not connected, rematch request dropped");
                    return;
                }
                let frame = self.rematch.request(self.nav.match_id.clone(), message);
                self.send_frame(&frame);
                self.rematch_changed();
            }
            Command::AcceptRematch => match self.rematch.accept(self.nav.match_id.clone()) {
                Ok(frame) => {
                    self.send_frame(&frame);
                    self.rematch_changed();
                }
                Err(e) => warn!(view = %self.view, "cannot accept rematch: {e}"),
            },
            Command::DeclineRematch => match self.rematch.decline(self.nav.match_id.clone()) {
                Ok(frame) => {
                    self.send_frame(&frame);
                    self.rematch_changed();
                }
                Err(e) => warn!(view = %self.view, "cannot decline rematch: {e}"),
            },
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Attempt { socket_id, event } => self.handle_attempt(socket_id, event),
            Internal::RetryDue {
                socket_id,
                force_refresh,
            } => self.handle_retry_due(socket_id, force_refresh),
            Internal::RematchTick { generation } => self.handle_rematch_tick(generation),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    fn connect(&mut self) {
        if !matches!(self.state, ConnectionState::Idle | ConnectionState::Terminal) {
            debug!(view = %self.view, state = ?self.state, "connect ignored");
            return;
        }
        self.reconnect.reset();
        self.open_attempt(false);
    }

    fn open_attempt(&mut self, force_refresh: bool) {
        let identity = match self.negotiator.resolve(&self.nav) {
            Ok(identity) => identity,
            Err(e) => {
                let lobby_id = match e {
                    VersusError::MissingCredential { lobby_id } => lobby_id,
                    _ => self.nav.match_id.to_string(),
                };
                self.terminate(Termination::MissingCredential { lobby_id });
                return;
            }
        };

        self.socket_id += 1;
        let socket_id = self.socket_id;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let ctx = AttemptContext {
            socket_id,
            identity: identity.clone(),
            base_url: self.config.base_url.clone(),
            min_ttl: self.config.min_credential_ttl,
            force_refresh,
            tokens: Arc::clone(&self.collaborators.tokens),
            connector: Arc::clone(&self.connector),
            inbox: self.inbox.clone(),
        };
        let task = tokio::spawn(run_attempt(ctx, outbound_rx));
        debug!(
            view = %self.view,
            socket_id,
            match_id = %identity.match_id,
            force_refresh,
            "connection attempt started"
        );

        self.active = Some(ActiveAttempt {
            socket_id,
            identity,
            open: false,
            outbound,
            task,
        });
        self.shared.socket_id.store(socket_id, Ordering::Release);
        self.set_state(ConnectionState::Connecting);
    }

    /// Detach the current attempt and return to idle.
    ///
    /// The attempt is marked intentionally closed before its transport is
    /// asked to close, so its close report is recognized and ignored. Returns
    /// the attempt task when a graceful close is in progress.
    fn teardown(&mut self) -> Option<JoinHandle<()>> {
        self.intentionally_closed = Some(self.socket_id);
        self.cancel_retry();
        self.cancel_rematch_timer();
        self.rematch.clear();
        self.reconnect.reset();
        self.shared.open.store(false, Ordering::Release);

        let task = self.active.take().and_then(|attempt| {
            if attempt.open {
                // Dropping the sender makes the attempt close its transport.
                drop(attempt.outbound);
                Some(attempt.task)
            } else {
                attempt.task.abort();
                None
            }
        });
        self.set_state(ConnectionState::Idle);
        task
    }

    async fn close_gracefully(&mut self) {
        if let Some(task) = self.teardown() {
            if let Err(e) = task.await {
                debug!(view = %self.view, "attempt task ended with join error: {e}");
            }
        }
    }

    fn switch_match(&mut self, nav: NavParams) {
        info!(
            view = %self.view,
            from = %self.nav.match_id,
            to = %nav.match_id,
            "switching match"
        );
        self.teardown();
        self.shared.set_match_id(&nav.match_id);
        self.nav = nav;
        self.connect();
    }

    fn terminate(&mut self, termination: Termination) {
        self.cancel_retry();
        self.cancel_rematch_timer();
        self.rematch.clear();
        self.shared.open.store(false, Ordering::Release);
        if let Some(attempt) = self.active.take() {
            self.intentionally_closed = Some(attempt.socket_id);
            attempt.task.abort();
        }
        self.set_state(ConnectionState::Terminal);

        error!(view = %self.view, reason = ?termination, "giving up on match connection");
        self.collaborators
            .notifier
            .notify(NotifyLevel::Error, &termination.user_message());
        self.collaborators.navigator.go_to(&self.config.exit_path);
        self.emit(MatchEvent::Terminated(termination));
    }

    // ── Attempt callbacks ───────────────────────────────────────────

    fn is_current(&self, socket_id: SocketId) -> bool {
        self.intentionally_closed != Some(socket_id)
            && self
                .active
                .as_ref()
                .is_some_and(|a| a.socket_id == socket_id)
    }

    fn handle_attempt(&mut self, socket_id: SocketId, event: AttemptEvent) {
        if !self.is_current(socket_id) {
            trace!(
                view = %self.view,
                socket_id,
                current = self.socket_id,
                "dropping callback from superseded attempt"
            );
            return;
        }
        match event {
            AttemptEvent::Opened => self.on_open(),
            AttemptEvent::Frame(text) => self.on_frame(&text),
            AttemptEvent::Closed(status) => self.on_close(socket_id, status),
        }
    }

    fn on_open(&mut self) {
        let Some(attempt) = self.active.as_mut() else {
            return;
        };
        attempt.open = true;
        let join = self.config.explicit_join.then(|| ClientMessage::Join {
            match_id: attempt.identity.match_id.clone(),
            lobby_id: attempt.identity.lobby_id.clone(),
        });
        info!(
            view = %self.view,
            socket_id = attempt.socket_id,
            match_id = %attempt.identity.match_id,
            "connected"
        );

        self.reconnect.reset();
        self.shared.open.store(true, Ordering::Release);
        self.set_state(ConnectionState::Open);

        if !self.announced {
            self.announced = true;
            self.collaborators
                .notifier
                .notify(NotifyLevel::Success, "Connected to match");
        }
        if let Some(join) = join {
            self.send_frame(&join);
        }
    }

    fn on_frame(&mut self, text: &str) {
        match route(text) {
            Routed::Ack(ack) => {
                if let Some(id) = ack.participant_id.clone() {
                    self.rematch.set_local_participant(Some(id));
                }
                self.emit(MatchEvent::Acknowledged(ack));
            }
            Routed::Board(update) => self.emit(MatchEvent::Board(update)),
            Routed::Promote {
                lobby_id,
                session_key,
            } => self.promote(lobby_id, &session_key),
            Routed::Rematch(signal) => self.on_rematch_signal(signal),
            Routed::ServerError { message, code } => {
                warn!(view = %self.view, code = ?code, "server error: {message}");
                self.collaborators
                    .notifier
                    .notify(NotifyLevel::Error, &message);
                self.emit(MatchEvent::ServerError { message, code });
            }
            Routed::Ignored { .. } => {}
            Routed::Dropped(e) => {
                self.collaborators
                    .notifier
                    .notify(NotifyLevel::Warning, &e.to_string());
            }
        }
    }

    fn on_close(&mut self, socket_id: SocketId, status: CloseStatus) {
        self.active = None;
        self.shared.open.store(false, Ordering::Release);
        self.set_state(ConnectionState::Closed);

        match status.code.disposition() {
            CloseDisposition::Terminal(rejection) => {
                warn!(view = %self.view, socket_id, %status, "invite rejected");
                self.terminate(Termination::InviteRejected(rejection));
            }
            CloseDisposition::AuthRetry if !self.reconnect.auth_retry_used => {
                self.reconnect.auth_retry_used = true;
                info!(
                    view = %self.view,
                    socket_id,
                    %status,
                    "auth-like close, retrying once with a refreshed credential"
                );
                self.schedule_retry(socket_id, self.config.reconnect.auth_retry_delay, true);
            }
            CloseDisposition::AuthRetry | CloseDisposition::Retry => {
                self.reconnect.attempt_count += 1;
                let attempt = self.reconnect.attempt_count;
                if self.config.reconnect.exhausted(attempt) {
                    self.terminate(Termination::ReconnectExhausted {
                        attempts: self.config.reconnect.max_attempts,
                    });
                    return;
                }
                let delay = self.config.reconnect.backoff_delay(attempt);
                warn!(
                    view = %self.view,
                    socket_id,
                    %status,
                    attempt,
                    ?delay,
                    "connection closed, backing off"
                );
                self.schedule_retry(socket_id, delay, false);
            }
        }
    }

    fn schedule_retry(&mut self, socket_id: SocketId, delay: Duration, force_refresh: bool) {
        self.cancel_retry();
        let inbox = self.inbox.clone();
        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(Internal::RetryDue {
                socket_id,
                force_refresh,
            });
        }));
    }

    fn handle_retry_due(&mut self, socket_id: SocketId, force_refresh: bool) {
        if socket_id != self.socket_id
            || self.active.is_some()
            || self.state != ConnectionState::Closed
        {
            trace!(view = %self.view, socket_id, "dropping stale retry");
            return;
        }
        self.retry_timer = None;
        self.open_attempt(force_refresh);
    }

    // ── Effects ─────────────────────────────────────────────────────

    fn promote(&mut self, lobby_id: String, session_key: &str) {
        let outcome = self.negotiator.promote(&lobby_id, session_key);
        let joined_lobby = self
            .active
            .as_ref()
            .map(|a| a.identity.lobby_id.as_str());
        if joined_lobby == Some(lobby_id.as_str()) && self.nav.invite_id.take().is_some() {
            debug!(view = %self.view, lobby_id, "invite consumed, reconnects use the session key");
        }
        if outcome != Promotion::Unchanged {
            self.emit(MatchEvent::SessionPromoted {
                lobby_id,
                persisted: outcome == Promotion::Persisted,
            });
        }
    }

    fn on_rematch_signal(&mut self, signal: RematchSignal) {
        match signal {
            RematchSignal::Offer(offer) => self.rematch.on_offer(offer),
            RematchSignal::Declined => {
                self.rematch.on_declined();
                self.collaborators
                    .notifier
                    .notify(NotifyLevel::Info, "Rematch declined");
            }
            RematchSignal::Expired => {
                self.rematch.on_expired();
                self.collaborators
                    .notifier
                    .notify(NotifyLevel::Info, "Rematch request expired");
            }
            RematchSignal::Start(payload) => {
                self.start_rematch(payload);
                return;
            }
        }
        self.rematch_changed();
    }

    fn start_rematch(&mut self, payload: RematchStartPayload) {
        let RematchStartPayload {
            new_game_id,
            session_key,
            invite_id,
        } = payload;

        self.rematch.clear();
        self.cancel_rematch_timer();
        self.emit(MatchEvent::Rematch(self.rematch.view()));

        // The next lobby is the new match. Carry a session key over unless
        // the server handed out its own credential.
        let lobby_id = new_game_id.to_string();
        let carried = match (session_key, &invite_id) {
            (Some(key), _) => Some(key),
            (None, None) => self.current_session_key(),
            (None, Some(_)) => None,
        };
        if let Some(key) = carried {
            self.negotiator.promote(&lobby_id, &key);
        }

        info!(view = %self.view, match_id = %new_game_id, "rematch starting");
        self.emit(MatchEvent::RematchStarted {
            match_id: new_game_id.clone(),
        });
        self.collaborators
            .navigator
            .go_to(&self.config.match_path(&new_game_id));

        if self.config.follow_rematch {
            let mut nav = NavParams::new(new_game_id);
            nav.invite_id = invite_id;
            self.switch_match(nav);
        }
    }

    /// Key for the lobby this view is in. After an invite join the attempt
    /// still holds the invite, so fall back to what was promoted.
    fn current_session_key(&self) -> Option<String> {
        let identity = self.active.as_ref().map(|a| &a.identity);
        if let Some(key) = identity.and_then(SessionIdentity::session_key) {
            return Some(key.to_string());
        }
        let lobby_id = identity.map_or_else(|| self.nav.match_id.to_string(), |i| i.lobby_id.clone());
        self.negotiator.key_for(&lobby_id)
    }

    fn rematch_changed(&mut self) {
        self.sync_rematch_timer();
        self.emit(MatchEvent::Rematch(self.rematch.view()));
    }

    fn sync_rematch_timer(&mut self) {
        if !self.rematch.countdown_active() {
            self.cancel_rematch_timer();
            return;
        }
        let generation = self.rematch.generation();
        if matches!(self.rematch_timer, Some((running, _)) if running == generation) {
            return;
        }
        self.cancel_rematch_timer();

        let inbox = self.inbox.clone();
        let tick = self.config.rematch_tick.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            loop {
                interval.tick().await;
                if inbox.send(Internal::RematchTick { generation }).is_err() {
                    break;
                }
            }
        });
        self.rematch_timer = Some((generation, task));
    }

    fn handle_rematch_tick(&mut self, generation: u64) {
        if generation != self.rematch.generation() {
            trace!(view = %self.view, generation, "dropping stale rematch tick");
            return;
        }
        if self.rematch.tick(generation) == Some(RematchStatus::Expired) {
            self.cancel_rematch_timer();
            self.collaborators
                .notifier
                .notify(NotifyLevel::Info, "No answer to the rematch request");
        }
        self.emit(MatchEvent::Rematch(self.rematch.view()));
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn is_open(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.open)
    }

    fn send_frame(&self, msg: &ClientMessage) {
        let Some(attempt) = self.active.as_ref().filter(|a| a.open) else {
            warn!(view = %self.view, "not connected, dropping outbound frame");
            return;
        };
        match serde_json::to_string(msg) {
            Ok(json) => {
                if attempt.outbound.send(json).is_err() {
                    debug!(view = %self.view, socket_id = attempt.socket_id, "attempt already gone");
                }
            }
            Err(e) => error!(view = %self.view, "failed to serialize ClientMessage: {e}"),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(view = %self.view, from = ?self.state, to = ?state, socket_id = self.socket_id, "state change");
        self.state = state;
        self.emit(MatchEvent::StateChanged {
            state,
            socket_id: self.socket_id,
        });
    }

    /// Emit an event. If the channel is full, log and drop it rather than
    /// stall the manager.
    fn emit(&self, event: MatchEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("event channel closed, receiver dropped");
            }
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    fn cancel_rematch_timer(&mut self) {
        if let Some((_, timer)) = self.rematch_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel_retry();
        self.cancel_rematch_timer();
        if let Some(attempt) = self.active.take() {
            if !attempt.open {
                attempt.task.abort();
            }
        }
    }
}

// ── Attempt task ────────────────────────────────────────────────────

struct AttemptContext {
    socket_id: SocketId,
    identity: SessionIdentity,
    base_url: Url,
    min_ttl: Duration,
    force_refresh: bool,
    tokens: Arc<dyn TokenProvider>,
    connector: Arc<dyn Connector>,
    inbox: mpsc::UnboundedSender<Internal>,
}

impl AttemptContext {
    fn report(&self, event: AttemptEvent) {
        let _ = self.inbox.send(Internal::Attempt {
            socket_id: self.socket_id,
            event,
        });
    }
}

/// One physical connection: credential, handshake, then frames both ways
/// until either side closes. Dropping `outbound`'s sender closes it.
async fn run_attempt(ctx: AttemptContext, mut outbound: mpsc::UnboundedReceiver<String>) {
    let socket_id = ctx.socket_id;

    let Some(credential) = ctx
        .tokens
        .get_valid_credential(ctx.min_ttl, ctx.force_refresh)
        .await
    else {
        warn!(socket_id, "no valid credential available");
        ctx.report(AttemptEvent::Closed(CloseStatus::new(
            CloseCode::UNAUTHORIZED,
            "credential unavailable",
        )));
        return;
    };

    let url = ctx.identity.connect_url(&ctx.base_url, &credential.token);
    let mut transport = match ctx.connector.connect(&url).await {
        Ok(transport) => transport,
        Err(e) => {
            warn!(socket_id, "connect failed: {e}");
            ctx.report(AttemptEvent::Closed(CloseStatus::from_connect_error(&e)));
            return;
        }
    };
    ctx.report(AttemptEvent::Opened);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = transport.send(text).await {
                            warn!(socket_id, "send failed: {e}");
                        }
                    }
                    None => {
                        debug!(socket_id, "closing detached connection");
                        if let Err(e) = transport.close().await {
                            debug!(socket_id, "close handshake failed: {e}");
                        }
                        ctx.report(AttemptEvent::Closed(CloseStatus::new(
                            CloseCode::NORMAL,
                            "client teardown",
                        )));
                        return;
                    }
                }
            }

            inbound = transport.recv() => {
                match inbound {
                    Ok(Inbound::Text(text)) => ctx.report(AttemptEvent::Frame(text)),
                    Ok(Inbound::Closed(status)) => {
                        debug!(socket_id, %status, "transport closed");
                        ctx.report(AttemptEvent::Closed(status));
                        return;
                    }
                    Err(e) => {
                        ctx.report(AttemptEvent::Closed(CloseStatus::abnormal(e.to_string())));
                        return;
                    }
                }
            }
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
    use crate::credential::{Credential, StaticTokenProvider};
    use crate::session::{MemorySessionStore, SessionStore};
    use crate::transport::Transport;
    use async_trait::async_trait;

    /// Connector whose handshake never completes; tests feed attempt
    /// callbacks by hand.
    struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
        async fn connect(&self, _url: &Url) -> crate::error::Result<Box<dyn Transport>> {
            std::future::pending().await
        }
    }

    fn manager() -> (ConnectionManager, mpsc::Receiver<MatchEvent>) {
        let store = MemorySessionStore::new();
        store.store("7", "sk-7").unwrap();
        let collaborators = Collaborators::new(StaticTokenProvider::new(Credential::expiring_in(
            "tok",
            Duration::from_secs(3600),
        )))
        .with_session_store(store);
        let (events_tx, events_rx) = mpsc::channel(256);
        let (manager, _inbox) = ConnectionManager::new(
            Arc::new(StalledConnector),
            collaborators,
            NavParams::new("7"),
            MatchConfig::new("ws://localhost/ws").unwrap(),
            events_tx,
            Arc::new(SharedState::new(MatchId::from("7"))),
        );
        (manager, events_rx)
    }

    fn closed(reason: &str) -> AttemptEvent {
        AttemptEvent::Closed(CloseStatus::new(CloseCode::NORMAL, reason))
    }

    #[tokio::test]
    async fn callbacks_from_other_sockets_are_ignored() {
        let (mut m, _events) = manager();
        m.handle_command(Command::Connect);
        assert_eq!(m.socket_id, 1);
        assert_eq!(m.state, ConnectionState::Connecting);

        m.handle_attempt(0, AttemptEvent::Opened);
        m.handle_attempt(2, closed("from the future"));
        assert_eq!(m.state, ConnectionState::Connecting);

        m.handle_attempt(1, AttemptEvent::Opened);
        assert_eq!(m.state, ConnectionState::Open);
        assert!(m.shared.open.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn close_after_teardown_is_ignored() {
        let (mut m, _events) = manager();
        m.handle_command(Command::Connect);
        m.handle_attempt(1, AttemptEvent::Opened);

        m.handle_command(Command::Disconnect);
        assert_eq!(m.intentionally_closed, Some(1));
        m.handle_attempt(1, closed("client teardown"));

        assert_eq!(m.state, ConnectionState::Idle);
        assert!(m.retry_timer.is_none());
        assert_eq!(m.reconnect.attempt_count, 0);
    }

    #[tokio::test]
    async fn stale_retry_does_not_open_a_socket() {
        let (mut m, _events) = manager();
        m.handle_command(Command::Connect);
        m.handle_attempt(1, AttemptEvent::Opened);
        m.handle_attempt(1, closed("server restart"));
        assert_eq!(m.state, ConnectionState::Closed);
        assert!(m.retry_timer.is_some());
        assert_eq!(m.reconnect.attempt_count, 1);

        m.handle_internal(Internal::RetryDue {
            socket_id: 0,
            force_refresh: false,
        });
        assert_eq!(m.state, ConnectionState::Closed);
        assert!(m.active.is_none());

        m.handle_internal(Internal::RetryDue {
            socket_id: 1,
            force_refresh: false,
        });
        assert_eq!(m.state, ConnectionState::Connecting);
        assert_eq!(m.socket_id, 2);
    }

    #[tokio::test]
    async fn stale_rematch_tick_is_ignored() {
        let (mut m, _events) = manager();
        m.handle_command(Command::Connect);
        m.handle_attempt(1, AttemptEvent::Opened);

        m.handle_command(Command::RequestRematch { message: None });
        let generation = m.rematch.generation();
        assert_eq!(m.rematch.view().countdown, Some(10));

        m.handle_internal(Internal::RematchTick {
            generation: generation - 1,
        });
        assert_eq!(m.rematch.view().countdown, Some(10));

        m.handle_internal(Internal::RematchTick { generation });
        assert_eq!(m.rematch.view().countdown, Some(9));
    }

    #[tokio::test]
    async fn rematch_request_while_connecting_starts_no_countdown() {
        let (mut m, _events) = manager();
        m.handle_command(Command::Connect);
        assert_eq!(m.state, ConnectionState::Connecting);

        m.handle_command(Command::RequestRematch { message: None });
        assert_eq!(m.rematch.view().countdown, None);
        assert!(m.rematch_timer.is_none());
    }

    #[tokio::test]
    async fn open_emits_state_with_socket_id() {
        let (mut m, mut events) = manager();
        m.handle_command(Command::Connect);
        m.handle_attempt(1, AttemptEvent::Opened);

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let MatchEvent::StateChanged { state, socket_id } = event {
                states.push((state, socket_id));
            }
        }
        assert_eq!(
            states,
            vec![
                (ConnectionState::Connecting, 1),
                (ConnectionState::Open, 1)
            ]
        );
    }
}
