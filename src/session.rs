//! Session negotiation: which credential a join uses, and invite promotion.
//!
//! An invite is good for exactly one join. When the server answers with
//! `session_established`, the returned session key is stored per lobby so
//! the player can reconnect (or reload) without a new invite.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, VersusError};
use crate::protocol::MatchId;

// ── Navigation parameters ───────────────────────────────────────────

/// What the player navigated to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavParams {
    pub match_id: MatchId,
    /// Explicit lobby context. Only honored together with an invite.
    pub lobby_id: Option<String>,
    pub invite_id: Option<String>,
}

impl NavParams {
    pub fn new(match_id: impl Into<MatchId>) -> Self {
        Self {
            match_id: match_id.into(),
            lobby_id: None,
            invite_id: None,
        }
    }

    #[must_use]
    pub fn with_invite(mut self, invite_id: impl Into<String>) -> Self {
        self.invite_id = Some(invite_id.into());
        self
    }

    #[must_use]
    pub fn with_lobby(mut self, lobby_id: impl Into<String>) -> Self {
        self.lobby_id = Some(lobby_id.into());
        self
    }
}

// ── Identity ────────────────────────────────────────────────────────

/// The credential a join presents besides the access token.
#[derive(Clone, PartialEq, Eq)]
pub enum JoinCredential {
    /// Single-use invite.
    Invite(String),
    /// Durable key handed out after an invite was used.
    SessionKey(String),
}

impl std::fmt::Debug for JoinCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invite(id) => f.debug_tuple("Invite").field(id).finish(),
            Self::SessionKey(_) => f.debug_tuple("SessionKey").field(&"<redacted>").finish(),
        }
    }
}

/// Fully resolved identity for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub match_id: MatchId,
    pub lobby_id: String,
    pub credential: JoinCredential,
}

impl SessionIdentity {
    pub fn invite_id(&self) -> Option<&str> {
        match &self.credential {
            JoinCredential::Invite(id) => Some(id),
            JoinCredential::SessionKey(_) => None,
        }
    }

    pub fn session_key(&self) -> Option<&str> {
        match &self.credential {
            JoinCredential::SessionKey(key) => Some(key),
            JoinCredential::Invite(_) => None,
        }
    }

    /// Socket URL for this identity: `base/<match_id>?token=…&invite|sessionKey=…&lobby=…`.
    ///
    /// `base` must be able to carry path segments; [`MatchConfig`](crate::MatchConfig)
    /// checks this up front.
    pub fn connect_url(&self, base: &Url, token: &str) -> Url {
        let mut url = base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(self.match_id.as_str());
        }
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("token", token);
            match &self.credential {
                JoinCredential::Invite(id) => query.append_pair("invite", id),
                JoinCredential::SessionKey(key) => query.append_pair("sessionKey", key),
            };
            query.append_pair("lobby", &self.lobby_id);
        }
        url
    }
}

// ── Durable storage ─────────────────────────────────────────────────

/// Durable per-origin key-value storage for promoted session keys.
pub trait SessionStore: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`VersusError::Storage`] when the store cannot be read.
    fn load(&self, lobby_id: &str) -> Result<Option<String>>;

    /// # Errors
    ///
    /// Returns [`VersusError::Storage`] when the store cannot be written.
    fn store(&self, lobby_id: &str, session_key: &str) -> Result<()>;
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    keys: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, lobby_id: &str) -> Result<Option<String>> {
        let keys = self
            .keys
            .lock()
            .map_err(|_| VersusError::Storage("session store lock poisoned".into()))?;
        Ok(keys.get(lobby_id).cloned())
    }

    fn store(&self, lobby_id: &str, session_key: &str) -> Result<()> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| VersusError::Storage("session store lock poisoned".into()))?;
        keys.insert(lobby_id.to_string(), session_key.to_string());
        Ok(())
    }
}

/// JSON file holding `{ lobby_id: session_key }`.
///
/// The file is read once, in [`FileSessionStore::new`]; lookups are served
/// from memory. Inside a tokio runtime writes run on the blocking pool and
/// replace the file atomically, so promotions never block the connection
/// task. [`FileSessionStore::flush`] waits for the latest contents to land.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    /// `None` when the file exists but could not be read.
    keys: Mutex<Option<HashMap<String, String>>>,
    version: AtomicU64,
    /// Version most recently written to disk.
    written: Arc<Mutex<u64>>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let keys = match read_keys(&path) {
            Ok(keys) => Some(keys),
            Err(e) => {
                warn!("session file unreadable, storage disabled: {e}");
                None
            }
        };
        Self {
            path,
            keys: Mutex::new(keys),
            version: AtomicU64::new(0),
            written: Arc::new(Mutex::new(0)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current contents and wait for them to reach the disk.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::Storage`] when the file cannot be written.
    pub async fn flush(&self) -> Result<()> {
        let (version, keys) = self.snapshot()?;
        let path = self.path.clone();
        let written = Arc::clone(&self.written);
        tokio::task::spawn_blocking(move || write_keys(&path, &written, version, &keys))
            .await
            .map_err(|e| VersusError::Storage(format!("session write task failed: {e}")))?
    }

    fn snapshot(&self) -> Result<(u64, HashMap<String, String>)> {
        let keys = self
            .keys
            .lock()
            .map_err(|_| VersusError::Storage("session file lock poisoned".into()))?;
        let keys = keys.as_ref().ok_or_else(|| self.unreadable())?;
        Ok((self.version.load(Ordering::Acquire), keys.clone()))
    }

    fn unreadable(&self) -> VersusError {
        VersusError::Storage(format!("{}: unreadable", self.path.display()))
    }
}

fn read_keys(path: &Path) -> Result<HashMap<String, String>> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| VersusError::Storage(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(VersusError::Storage(format!("{}: {e}", path.display()))),
    }
}

/// Replace the file with `keys` unless a newer version was already written.
fn write_keys(
    path: &Path,
    written: &Mutex<u64>,
    version: u64,
    keys: &HashMap<String, String>,
) -> Result<()> {
    let mut last = written
        .lock()
        .map_err(|_| VersusError::Storage("session file lock poisoned".into()))?;
    if *last >= version {
        return Ok(());
    }
    let storage_err = |e: std::io::Error| VersusError::Storage(format!("{}: {e}", path.display()));
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(keys)?).map_err(storage_err)?;
    std::fs::rename(&tmp, path).map_err(storage_err)?;
    *last = version;
    Ok(())
}

impl SessionStore for FileSessionStore {
    fn load(&self, lobby_id: &str) -> Result<Option<String>> {
        let keys = self
            .keys
            .lock()
            .map_err(|_| VersusError::Storage("session file lock poisoned".into()))?;
        let keys = keys.as_ref().ok_or_else(|| self.unreadable())?;
        Ok(keys.get(lobby_id).cloned())
    }

    fn store(&self, lobby_id: &str, session_key: &str) -> Result<()> {
        let (version, snapshot) = {
            let mut keys = self
                .keys
                .lock()
                .map_err(|_| VersusError::Storage("session file lock poisoned".into()))?;
            let keys = keys.as_mut().ok_or_else(|| self.unreadable())?;
            keys.insert(lobby_id.to_string(), session_key.to_string());
            (self.version.fetch_add(1, Ordering::AcqRel) + 1, keys.clone())
        };

        let path = self.path.clone();
        let written = Arc::clone(&self.written);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    if let Err(e) = write_keys(&path, &written, version, &snapshot) {
                        warn!("could not write session file: {e}");
                    }
                });
                Ok(())
            }
            Err(_) => write_keys(&path, &written, version, &snapshot),
        }
    }
}

// ── Negotiator ──────────────────────────────────────────────────────

/// Outcome of [`SessionNegotiator::promote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// Written to durable storage.
    Persisted,
    /// Storage is unavailable; kept for this view only.
    MemoryOnly,
    /// This exact key was already promoted.
    Unchanged,
}

/// Resolves join identities and records invite promotions for one view.
pub struct SessionNegotiator {
    store: Arc<dyn SessionStore>,
    promoted: HashMap<String, String>,
    storage_available: bool,
}

impl SessionNegotiator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            promoted: HashMap::new(),
            storage_available: true,
        }
    }

    pub fn storage_available(&self) -> bool {
        self.storage_available
    }

    /// Decide the credential for a join.
    ///
    /// An invite wins; its lobby is the explicit lobby if one was given,
    /// otherwise the match id. Without an invite the lobby is always the
    /// match id and a previously promoted session key is required.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::MissingCredential`] when neither an invite nor a
    /// session key exists. No connection may be opened in that case.
    pub fn resolve(&self, nav: &NavParams) -> Result<SessionIdentity> {
        if let Some(invite) = nav.invite_id.as_ref().filter(|i| !i.is_empty()) {
            let lobby_id = nav
                .lobby_id
                .clone()
                .unwrap_or_else(|| nav.match_id.to_string());
            return Ok(SessionIdentity {
                match_id: nav.match_id.clone(),
                lobby_id,
                credential: JoinCredential::Invite(invite.clone()),
            });
        }

        // A lobby this view promoted itself is the same context, not a stale one.
        let lobby_id = match nav.lobby_id.as_deref() {
            Some(lobby) if self.promoted.contains_key(lobby) => lobby.to_string(),
            Some(lobby) if lobby != nav.match_id.as_str() => {
                debug!(
                    match_id = %nav.match_id,
                    "ignoring explicit lobby outside an invite flow"
                );
                nav.match_id.to_string()
            }
            _ => nav.match_id.to_string(),
        };

        match self.lookup(&lobby_id) {
            Some(key) => Ok(SessionIdentity {
                match_id: nav.match_id.clone(),
                lobby_id,
                credential: JoinCredential::SessionKey(key),
            }),
            None => Err(VersusError::MissingCredential { lobby_id }),
        }
    }

    /// Record a session key granted by the server. Idempotent.
    pub fn promote(&mut self, lobby_id: &str, session_key: &str) -> Promotion {
        if self.promoted.get(lobby_id).map(String::as_str) == Some(session_key) {
            return Promotion::Unchanged;
        }
        self.promoted
            .insert(lobby_id.to_string(), session_key.to_string());

        if !self.storage_available {
            return Promotion::MemoryOnly;
        }
        let already_stored = matches!(
            self.store.load(lobby_id),
            Ok(Some(ref stored)) if stored == session_key
        );
        if already_stored {
            return Promotion::Unchanged;
        }
        match self.store.store(lobby_id, session_key) {
            Ok(()) => {
                info!(lobby_id, "session key promoted");
                Promotion::Persisted
            }
            Err(e) => {
                warn!("session storage unavailable, keeping key in memory: {e}");
                self.storage_available = false;
                Promotion::MemoryOnly
            }
        }
    }

    /// Session key known for `lobby_id`, promoted in this view or stored.
    pub fn key_for(&self, lobby_id: &str) -> Option<String> {
        self.lookup(lobby_id)
    }

    fn lookup(&self, lobby_id: &str) -> Option<String> {
        if let Some(key) = self.promoted.get(lobby_id) {
            return Some(key.clone());
        }
        if !self.storage_available {
            return None;
        }
        match self.store.load(lobby_id) {
            Ok(key) => key.filter(|k| !k.is_empty()),
            Err(e) => {
                warn!("could not read session storage: {e}");
                None
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
    use std::sync::atomic::AtomicUsize;

    /// Store that counts writes.
    #[derive(Default)]
    struct CountingStore {
        inner: MemorySessionStore,
        writes: AtomicUsize,
    }

    impl SessionStore for CountingStore {
        fn load(&self, lobby_id: &str) -> Result<Option<String>> {
            self.inner.load(lobby_id)
        }

        fn store(&self, lobby_id: &str, session_key: &str) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.store(lobby_id, session_key)
        }
    }

    /// Store standing in for private-browsing storage.
    struct BrokenStore;

    impl SessionStore for BrokenStore {
        fn load(&self, _lobby_id: &str) -> Result<Option<String>> {
            Err(VersusError::Storage("denied".into()))
        }

        fn store(&self, _lobby_id: &str, _session_key: &str) -> Result<()> {
            Err(VersusError::Storage("denied".into()))
        }
    }

    #[test]
    fn invite_wins_and_lobby_defaults_to_match() {
        let store = Arc::new(MemorySessionStore::new());
        store.store("7", "old-key").unwrap();
        let negotiator = SessionNegotiator::new(store);

        let identity = negotiator
            .resolve(&NavParams::new("7").with_invite("inv-1"))
            .unwrap();
        assert_eq!(identity.lobby_id, "7");
        assert_eq!(identity.invite_id(), Some("inv-1"));
        assert_eq!(identity.session_key(), None);
    }

    #[test]
    fn explicit_lobby_is_kept_for_invites() {
        let negotiator = SessionNegotiator::new(Arc::new(MemorySessionStore::new()));
        let identity = negotiator
            .resolve(&NavParams::new("7").with_invite("inv").with_lobby("lobby-3"))
            .unwrap();
        assert_eq!(identity.lobby_id, "lobby-3");
    }

    #[test]
    fn stored_key_is_used_without_invite() {
        let store = Arc::new(MemorySessionStore::new());
        store.store("7", "sk-7").unwrap();
        let negotiator = SessionNegotiator::new(store);

        let identity = negotiator
            .resolve(&NavParams::new("7").with_lobby("stale-lobby"))
            .unwrap();
        assert_eq!(identity.lobby_id, "7");
        assert_eq!(identity.session_key(), Some("sk-7"));
    }

    #[test]
    fn lobby_promoted_in_this_view_survives_invite_consumption() {
        let mut negotiator = SessionNegotiator::new(Arc::new(MemorySessionStore::new()));
        negotiator.promote("lobby-3", "sk-3");

        let identity = negotiator
            .resolve(&NavParams::new("7").with_lobby("lobby-3"))
            .unwrap();
        assert_eq!(identity.lobby_id, "lobby-3");
        assert_eq!(identity.session_key(), Some("sk-3"));
    }

    #[test]
    fn nothing_to_join_with_fails_closed() {
        let negotiator = SessionNegotiator::new(Arc::new(MemorySessionStore::new()));
        let err = negotiator.resolve(&NavParams::new("7")).unwrap_err();
        assert!(matches!(err, VersusError::MissingCredential { ref lobby_id } if lobby_id == "7"));
    }

    #[test]
    fn promotion_is_idempotent() {
        let store = Arc::new(CountingStore::default());
        let mut negotiator = SessionNegotiator::new(Arc::clone(&store) as Arc<dyn SessionStore>);

        assert_eq!(negotiator.promote("7", "sk"), Promotion::Persisted);
        for _ in 0..5 {
            assert_eq!(negotiator.promote("7", "sk"), Promotion::Unchanged);
        }
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(store.load("7").unwrap().as_deref(), Some("sk"));
    }

    #[test]
    fn promotion_skips_write_when_already_stored() {
        let store = Arc::new(CountingStore::default());
        store.inner.store("7", "sk").unwrap();
        let mut negotiator = SessionNegotiator::new(Arc::clone(&store) as Arc<dyn SessionStore>);
        assert_eq!(negotiator.promote("7", "sk"), Promotion::Unchanged);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn broken_storage_degrades_to_memory() {
        let mut negotiator = SessionNegotiator::new(Arc::new(BrokenStore));
        assert_eq!(negotiator.promote("7", "sk"), Promotion::MemoryOnly);
        assert!(!negotiator.storage_available());

        let identity = negotiator.resolve(&NavParams::new("7")).unwrap();
        assert_eq!(identity.session_key(), Some("sk"));
        assert_eq!(negotiator.promote("7", "sk"), Promotion::Unchanged);
    }

    #[test]
    fn connect_url_carries_credentials() {
        let base = Url::parse("wss://play.example.com/ws/game/").unwrap();
        let identity = SessionIdentity {
            match_id: MatchId::from("42"),
            lobby_id: "42".into(),
            credential: JoinCredential::SessionKey("sk 1".into()),
        };
        let url = identity.connect_url(&base, "tok");
        assert_eq!(url.path(), "/ws/game/42");
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["token"], "tok");
        assert_eq!(pairs["sessionKey"], "sk 1");
        assert_eq!(pairs["lobby"], "42");
        assert!(!pairs.contains_key("invite"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("versus-session-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sessions.json");

        let store = FileSessionStore::new(&path);
        tokio_test::assert_ok!(store.store("7", "sk-7"));
        tokio_test::assert_ok!(store.store("8", "sk-8"));

        let reopened = FileSessionStore::new(&path);
        assert_eq!(reopened.load("7").unwrap().as_deref(), Some("sk-7"));
        assert_eq!(reopened.load("8").unwrap().as_deref(), Some("sk-8"));
        assert_eq!(reopened.load("9").unwrap(), None);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn file_store_writes_off_the_runtime_thread() {
        let dir = std::env::temp_dir().join(format!("versus-session-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sessions.json");

        let store = FileSessionStore::new(&path);
        store.store("7", "sk-7").unwrap();
        store.store("7", "sk-7b").unwrap();
        assert_eq!(store.load("7").unwrap().as_deref(), Some("sk-7b"));

        store.flush().await.unwrap();
        let reopened = FileSessionStore::new(&path);
        assert_eq!(reopened.load("7").unwrap().as_deref(), Some("sk-7b"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unreadable_file_disables_storage() {
        let dir = std::env::temp_dir().join(format!("versus-session-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sessions.json");
        std::fs::write(&path, b"not json").unwrap();

        let store = FileSessionStore::new(&path);
        assert!(matches!(store.load("7"), Err(VersusError::Storage(_))));
        assert!(matches!(store.store("7", "sk"), Err(VersusError::Storage(_))));
        assert_eq!(std::fs::read(&path).unwrap(), b"not json");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn key_for_sees_promoted_and_stored_keys() {
        let store = Arc::new(MemorySessionStore::new());
        store.store("8", "sk-8").unwrap();
        let mut negotiator = SessionNegotiator::new(store);
        negotiator.promote("7", "sk-7");

        assert_eq!(negotiator.key_for("7").as_deref(), Some("sk-7"));
        assert_eq!(negotiator.key_for("8").as_deref(), Some("sk-8"));
        assert_eq!(negotiator.key_for("9"), None);
    }

    #[test]
    fn invite_debug_hides_session_key() {
        let cred = JoinCredential::SessionKey("secret".into());
        assert!(!format!("{cred:?}").contains("secret"));
    }
}
