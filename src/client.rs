//! Async client handle for one match view.
//!
//! [`MatchClient`] is a thin handle that talks to a background connection
//! manager over an unbounded MPSC channel. Events are emitted on a bounded
//! channel ([`tokio::sync::mpsc::Receiver<MatchEvent>`]) returned from
//! [`MatchClient::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let config = MatchConfig::new("wss://play.example.com/ws/game")?;
//! let collaborators = Collaborators::new(tokens);
//! let (client, mut events) = MatchClient::start(
//!     WebSocketConnector::new(),
//!     collaborators,
//!     NavParams::new("42").with_invite("inv-abc"),
//!     config,
//! );
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         MatchEvent::Board(update) => render(&update),
//!         MatchEvent::Terminated(_) => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use url::Url;

use crate::board::BOARD_CELLS;
use crate::collaborators::Collaborators;
use crate::error::{Result, VersusError};
use crate::event::{MatchEvent, SocketId};
use crate::manager::{Command, ConnectionManager, SharedState};
use crate::protocol::{ClientMessage, MatchId};
use crate::reconnect::ReconnectPolicy;
use crate::session::NavParams;
use crate::transport::Connector;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Credentials with less validity left than this are refreshed before use.
const DEFAULT_MIN_CREDENTIAL_TTL: Duration = Duration::from_secs(60);

const DEFAULT_REMATCH_COUNTDOWN: u32 = 10;
const DEFAULT_REMATCH_TICK: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`MatchClient`].
///
/// The only required field is the socket base URL; the match id is appended
/// as the last path segment of every connection.
///
/// # Example
///
/// ```
/// use versus_client::MatchConfig;
/// use std::time::Duration;
///
/// let config = MatchConfig::new("wss://play.example.com/ws/game")
///     .unwrap()
///     .with_max_reconnect_attempts(4)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.reconnect.max_attempts, 4);
/// assert!(config.follow_rematch);
/// ```
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Socket endpoint without the match id.
    pub base_url: Url,
    pub reconnect: ReconnectPolicy,
    /// Minimum validity a credential must have left when a connection opens.
    pub min_credential_ttl: Duration,
    /// Send a `join` frame after every open. Servers that derive the match
    /// from the URL do not need it.
    pub explicit_join: bool,
    /// Move to the new match automatically when a rematch starts.
    pub follow_rematch: bool,
    /// The local participant id, when known before the server acknowledges.
    pub participant_id: Option<String>,
    /// Ticks a rematch request waits for an answer.
    pub rematch_countdown: u32,
    pub rematch_tick: Duration,
    /// Where the navigator is sent when the view gives up.
    pub exit_path: String,
    /// Prefix of match routes; a rematch navigates to `{prefix}/{match_id}`.
    pub match_path_prefix: String,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) rather than stall the manager.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time [`MatchClient::shutdown`] waits for the socket to close before
    /// aborting the manager.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl MatchConfig {
    /// Parse `base_url` and build a configuration with default values.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::InvalidUrl`] if the URL does not parse, or
    /// [`VersusError::InvalidEndpoint`] if it cannot carry a path.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::from_url(Url::parse(base_url)?)
    }

    /// # Errors
    ///
    /// Returns [`VersusError::InvalidEndpoint`] if `base_url` cannot carry a path.
    pub fn from_url(base_url: Url) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(VersusError::InvalidEndpoint(base_url.to_string()));
        }
        Ok(Self {
            base_url,
            reconnect: ReconnectPolicy::default(),
            min_credential_ttl: DEFAULT_MIN_CREDENTIAL_TTL,
            explicit_join: false,
            follow_rematch: true,
            participant_id: None,
            rematch_countdown: DEFAULT_REMATCH_COUNTDOWN,
            rematch_tick: DEFAULT_REMATCH_TICK,
            exit_path: "/".to_string(),
            match_path_prefix: "/game".to_string(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, max_attempts: u32) -> Self {
        self.reconnect.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_min_credential_ttl(mut self, ttl: Duration) -> Self {
        self.min_credential_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_explicit_join(mut self, explicit_join: bool) -> Self {
        self.explicit_join = explicit_join;
        self
    }

    #[must_use]
    pub fn with_follow_rematch(mut self, follow: bool) -> Self {
        self.follow_rematch = follow;
        self
    }

    #[must_use]
    pub fn with_participant_id(mut self, id: impl Into<String>) -> Self {
        self.participant_id = Some(id.into());
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_rematch_countdown(mut self, ticks: u32) -> Self {
        self.rematch_countdown = ticks.max(1);
        self
    }

    #[must_use]
    pub fn with_rematch_tick(mut self, tick: Duration) -> Self {
        self.rematch_tick = tick;
        self
    }

    #[must_use]
    pub fn with_exit_path(mut self, path: impl Into<String>) -> Self {
        self.exit_path = path.into();
        self
    }

    #[must_use]
    pub fn with_match_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.match_path_prefix = prefix.into();
        self
    }

    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// A zero timeout aborts the manager without waiting for the socket.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Route of a match view, e.g. `/game/42`.
    pub fn match_path(&self, match_id: &MatchId) -> String {
        format!(
            "{}/{}",
            self.match_path_prefix.trim_end_matches('/'),
            match_id
        )
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Async handle for one match view.
///
/// Created via [`MatchClient::start`], which spawns the connection manager
/// and starts connecting right away. Methods queue a command and return
/// immediately; results arrive as [`MatchEvent`]s.
pub struct MatchClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<SharedState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl MatchClient {
    /// Spawn the connection manager for `nav` and return a handle plus the
    /// event receiver.
    ///
    /// The receiver yields events until the client shuts down.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        connector: impl Connector,
        collaborators: Collaborators,
        nav: NavParams,
        config: MatchConfig,
    ) -> (Self, mpsc::Receiver<MatchEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (event_tx, event_rx) = mpsc::channel::<MatchEvent>(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let shared = Arc::new(SharedState::new(nav.match_id.clone()));
        let shutdown_timeout = config.shutdown_timeout;

        let (manager, inbox) = ConnectionManager::new(
            Arc::new(connector),
            collaborators,
            nav,
            config,
            event_tx,
            Arc::clone(&shared),
        );
        // Queued before the manager runs, so it is the first thing handled.
        let _ = cmd_tx.send(Command::Connect);
        let task = tokio::spawn(manager.run(inbox, cmd_rx, shutdown_rx));

        let client = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };
        (client, event_rx)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Connect again after a disconnect or a terminal failure. A no-op while
    /// connecting or open.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::NotConnected`] if the manager has stopped.
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Close the current connection and stop retrying. Late callbacks from
    /// the closed socket are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::NotConnected`] if the manager has stopped.
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Tear down the current connection and join another match.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::NotConnected`] if the manager has stopped.
    pub fn switch_match(&self, nav: NavParams) -> Result<()> {
        self.command(Command::SwitchMatch(nav))
    }

    // ── Frames ──────────────────────────────────────────────────────

    /// Queue an arbitrary frame on the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::NotConnected`] unless the connection is open.
    pub fn send_frame(&self, msg: ClientMessage) -> Result<()> {
        self.ensure_open()?;
        self.command(Command::Send(msg))
    }

    /// Place a mark on cell `index` (0-8, row-major).
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::InvalidMove`] for an index off the board, or
    /// [`VersusError::NotConnected`] unless the connection is open.
    pub fn make_move(&self, index: u8) -> Result<()> {
        if usize::from(index) >= BOARD_CELLS {
            return Err(VersusError::InvalidMove(index));
        }
        self.send_frame(ClientMessage::Move { index })
    }

    /// # Errors
    ///
    /// Returns [`VersusError::NotConnected`] unless the connection is open.
    pub fn ping(&self) -> Result<()> {
        self.send_frame(ClientMessage::Ping)
    }

    // ── Rematch ─────────────────────────────────────────────────────

    /// Ask the opponent for a rematch and start the local countdown.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::NotConnected`] unless the connection is open.
    pub fn request_rematch(&self, message: Option<String>) -> Result<()> {
        self.ensure_open()?;
        self.command(Command::RequestRematch { message })
    }

    /// Accept the opponent's offer. Without a pending offer the command is
    /// logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::NotConnected`] unless the connection is open.
    pub fn accept_rematch(&self) -> Result<()> {
        self.ensure_open()?;
        self.command(Command::AcceptRematch)
    }

    /// Decline the opponent's offer or withdraw our own request.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::NotConnected`] unless the connection is open.
    pub fn decline_rematch(&self) -> Result<()> {
        self.ensure_open()?;
        self.command(Command::DeclineRematch)
    }

    /// Close the connection and stop the manager.
    ///
    /// After this returns, the event receiver yields `None` once drained.
    pub async fn shutdown(&mut self) {
        debug!("MatchClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection manager terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection manager did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection manager aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.open.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while the current socket is open.
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Id of the latest connection attempt; `0` before the first one.
    pub fn socket_id(&self) -> SocketId {
        self.shared.socket_id.load(Ordering::Acquire)
    }

    pub fn current_match_id(&self) -> MatchId {
        match self.shared.match_id.lock() {
            Ok(id) => id.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(VersusError::NotConnected)
        }
    }

    fn command(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| VersusError::NotConnected)
    }
}

impl std::fmt::Debug for MatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchClient")
            .field("match_id", &self.current_match_id())
            .field("open", &self.is_open())
            .field("socket_id", &self.socket_id())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for MatchClient {
    fn drop(&mut self) {
        // No executor is available to await a graceful close here; aborting
        // drops the manager, which cancels its timers and attempts.
        if let Some(task) = self.task.take() {
            task.abort();
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
    use crate::transport::Transport;
    use async_trait::async_trait;

    /// Connector whose handshake never completes.
    struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
        async fn connect(&self, _url: &Url) -> Result<Box<dyn Transport>> {
            std::future::pending().await
        }
    }

    fn collaborators() -> Collaborators {
        Collaborators::new(StaticTokenProvider::new(Credential::expiring_in(
            "tok",
            Duration::from_secs(3600),
        )))
    }

    #[test]
    fn config_defaults() {
        let config = MatchConfig::new("wss://play.example.com/ws/game").unwrap();
        assert_eq!(config.reconnect.max_attempts, 8);
        assert_eq!(config.min_credential_ttl, Duration::from_secs(60));
        assert_eq!(config.rematch_countdown, 10);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.exit_path, "/");
        assert!(!config.explicit_join);
        assert!(config.follow_rematch);
    }

    #[test]
    fn config_rejects_pathless_endpoint() {
        assert!(matches!(
            MatchConfig::new("mailto:someone@example.com"),
            Err(VersusError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            MatchConfig::new("not a url"),
            Err(VersusError::InvalidUrl(_))
        ));
    }

    #[test]
    fn config_clamps() {
        let config = MatchConfig::new("ws://localhost/ws")
            .unwrap()
            .with_event_channel_capacity(0)
            .with_rematch_countdown(0);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.rematch_countdown, 1);
    }

    #[test]
    fn match_path_joins_prefix() {
        let config = MatchConfig::new("ws://localhost/ws")
            .unwrap()
            .with_match_path_prefix("/play/");
        assert_eq!(config.match_path(&MatchId::from(42u64)), "/play/42");
    }

    #[tokio::test]
    async fn frames_require_an_open_socket() {
        let config = MatchConfig::new("ws://localhost/ws").unwrap();
        let (mut client, _events) = MatchClient::start(
            StalledConnector,
            collaborators(),
            NavParams::new("7").with_invite("inv"),
            config,
        );

        assert!(!client.is_open());
        assert!(matches!(client.ping(), Err(VersusError::NotConnected)));
        assert!(matches!(
            client.request_rematch(None),
            Err(VersusError::NotConnected)
        ));
        assert!(matches!(client.make_move(9), Err(VersusError::InvalidMove(9))));
        assert_eq!(client.current_match_id(), MatchId::from("7"));

        client.shutdown().await;
        assert!(matches!(client.connect(), Err(VersusError::NotConnected)));
    }

    #[tokio::test]
    async fn debug_shows_match() {
        let config = MatchConfig::new("ws://localhost/ws").unwrap();
        let (client, _events) = MatchClient::start(
            StalledConnector,
            collaborators(),
            NavParams::new("7").with_invite("inv"),
            config,
        );
        let debug = format!("{client:?}");
        assert!(debug.contains("MatchClient"));
        assert!(debug.contains("open: false"));
    }
}
