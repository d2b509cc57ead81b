//! Outside services the connection manager reports to.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::credential::TokenProvider;
use crate::session::{MemorySessionStore, SessionStore};

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Moves the player to another screen.
pub trait Navigator: Send + Sync + 'static {
    fn go_to(&self, path: &str);
}

/// Shows a short message to the player (toast, status line, log).
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, level: NotifyLevel, message: &str);
}

/// Navigator that only records the request in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn go_to(&self, path: &str) {
        info!(path, "navigate");
    }
}

/// Notifier that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        match level {
            NotifyLevel::Info | NotifyLevel::Success => info!(target: "versus::notify", "{message}"),
            NotifyLevel::Warning => warn!(target: "versus::notify", "{message}"),
            NotifyLevel::Error => error!(target: "versus::notify", "{message}"),
        }
    }
}

/// Everything a match view needs from its surroundings.
#[derive(Clone)]
pub struct Collaborators {
    pub tokens: Arc<dyn TokenProvider>,
    pub sessions: Arc<dyn SessionStore>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Use `tokens` with an in-memory session store and log-only navigation
    /// and notifications.
    pub fn new(tokens: impl TokenProvider) -> Self {
        Self {
            tokens: Arc::new(tokens),
            sessions: Arc::new(MemorySessionStore::new()),
            navigator: Arc::new(LogNavigator),
            notifier: Arc::new(TracingNotifier),
        }
    }

    #[must_use]
    pub fn with_session_store(mut self, store: impl SessionStore) -> Self {
        self.sessions = Arc::new(store);
        self
    }

    /// Share one store between several views.
    #[must_use]
    pub fn with_shared_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = store;
        self
    }

    #[must_use]
    pub fn with_navigator(mut self, navigator: impl Navigator) -> Self {
        self.navigator = Arc::new(navigator);
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: impl Notifier) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
