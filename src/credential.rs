//! Access credentials and the token provider seam.
//!
//! The connection manager never refreshes tokens itself. It asks a
//! [`TokenProvider`] for a credential with a minimum remaining lifetime and,
//! after an auth-like close, asks again with `force_refresh`. Providers must
//! keep at most one refresh in flight; [`SharedTokenProvider`] does this for
//! any [`TokenSource`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

/// A bearer token and its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: SystemTime,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: SystemTime) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// A credential expiring `ttl` from now.
    pub fn expiring_in(token: impl Into<String>, ttl: Duration) -> Self {
        Self::new(token, SystemTime::now() + ttl)
    }

    /// Lifetime left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_valid_for(&self, min_ttl: Duration) -> bool {
        self.remaining() >= min_ttl
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies credentials to the connection manager.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Return a credential valid for at least `min_ttl`, refreshing first when
    /// the cached one is too short-lived or `force_refresh` is set.
    ///
    /// Returns `None` when no usable credential can be obtained.
    async fn get_valid_credential(
        &self,
        min_ttl: Duration,
        force_refresh: bool,
    ) -> Option<Credential>;
}

/// Fetches a brand-new credential, e.g. from an auth endpoint.
#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`VersusError::CredentialRefresh`](crate::VersusError::CredentialRefresh)
    /// or a transport error when no token could be issued.
    async fn refresh(&self) -> Result<Credential>;
}

/// Caching provider that keeps a single refresh in flight.
///
/// Callers queue on one lock. A caller that waited behind someone else's
/// refresh takes that result instead of starting another one, even when the
/// refresh failed.
pub struct SharedTokenProvider<S> {
    source: S,
    current: Mutex<Option<Credential>>,
    refreshes: AtomicU64,
}

impl<S: TokenSource> SharedTokenProvider<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            current: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Seed the cache, e.g. with a token restored at startup.
    pub fn with_credential(source: S, credential: Credential) -> Self {
        Self {
            source,
            current: Mutex::new(Some(credential)),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Number of refreshes attempted so far, failed ones included.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl<S: TokenSource> TokenProvider for SharedTokenProvider<S> {
    async fn get_valid_credential(
        &self,
        min_ttl: Duration,
        force_refresh: bool,
    ) -> Option<Credential> {
        let seen = self.refreshes.load(Ordering::Acquire);
        let mut current = self.current.lock().await;
        let refreshed_while_waiting = self.refreshes.load(Ordering::Acquire) != seen;

        if let Some(cached) = current.as_ref().filter(|c| c.is_valid_for(min_ttl)) {
            if !force_refresh || refreshed_while_waiting {
                return Some(cached.clone());
            }
        }
        if refreshed_while_waiting {
            // The refresh we queued behind failed or came back too short.
            debug!("sharing outcome of the refresh that just finished");
            return None;
        }

        debug!(force_refresh, "refreshing credential");
        let outcome = self.source.refresh().await;
        self.refreshes.fetch_add(1, Ordering::AcqRel);
        match outcome {
            Ok(fresh) => {
                *current = Some(fresh.clone());
                if fresh.is_valid_for(min_ttl) {
                    Some(fresh)
                } else {
                    warn!(
                        remaining_secs = fresh.remaining().as_secs(),
                        "refreshed credential is shorter-lived than required"
                    );
                    None
                }
            }
            Err(e) => {
                warn!("credential refresh failed: {e}");
                None
            }
        }
    }
}

/// A provider that always hands out the same credential. Useful for demos and
/// servers that issue long-lived tokens.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    credential: Credential,
}

impl StaticTokenProvider {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_valid_credential(
        &self,
        min_ttl: Duration,
        _force_refresh: bool,
    ) -> Option<Credential> {
        self.credential
            .is_valid_for(min_ttl)
            .then(|| self.credential.clone())
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
    use crate::error::VersusError;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    const HOUR: Duration = Duration::from_secs(3600);
    const MIN_TTL: Duration = Duration::from_secs(60);

    /// Counts refreshes and takes a while to answer.
    struct SlowSource {
        calls: Arc<AtomicU32>,
        ttl: Duration,
    }

    #[async_trait]
    impl TokenSource for SlowSource {
        async fn refresh(&self) -> Result<Credential> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Credential::expiring_in(format!("token-{n}"), self.ttl))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl TokenSource for FailingSource {
        async fn refresh(&self) -> Result<Credential> {
            Err(VersusError::CredentialRefresh("auth server down".into()))
        }
    }

    /// Counts refreshes, takes a while, then fails.
    struct SlowFailingSource {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TokenSource for SlowFailingSource {
        async fn refresh(&self) -> Result<Credential> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(VersusError::CredentialRefresh("auth server down".into()))
        }
    }

    fn slow(ttl: Duration) -> (SharedTokenProvider<SlowSource>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let provider = SharedTokenProvider::new(SlowSource {
            calls: Arc::clone(&calls),
            ttl,
        });
        (provider, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn cached_credential_is_reused() {
        let (provider, calls) = slow(HOUR);
        let a = provider.get_valid_credential(MIN_TTL, false).await.unwrap();
        let b = provider.get_valid_credential(MIN_TTL, false).await.unwrap();
        assert_eq!(a.token, b.token);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_forced_refreshes_share_one_request() {
        let (provider, calls) = slow(HOUR);
        provider.get_valid_credential(MIN_TTL, false).await.unwrap();

        let provider = Arc::new(provider);
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let p = Arc::clone(&provider);
                tokio::spawn(async move { p.get_valid_credential(MIN_TTL, true).await })
            })
            .collect();

        let mut tokens = Vec::new();
        for t in tasks {
            tokens.push(t.await.unwrap().unwrap().token);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(tokens.iter().all(|t| t == "token-2"));
        assert_eq!(provider.refresh_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_a_failed_refresh() {
        let calls = Arc::new(AtomicU32::new(0));
        let provider = Arc::new(SharedTokenProvider::new(SlowFailingSource {
            calls: Arc::clone(&calls),
        }));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let p = Arc::clone(&provider);
                tokio::spawn(async move { p.get_valid_credential(MIN_TTL, true).await })
            })
            .collect();
        for t in tasks {
            assert!(t.await.unwrap().is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.refresh_count(), 1);

        // A later caller tries again.
        assert!(provider.get_valid_credential(MIN_TTL, true).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn short_lived_refresh_is_rejected() {
        let (provider, _calls) = slow(Duration::from_secs(10));
        assert!(provider.get_valid_credential(MIN_TTL, false).await.is_none());
    }

    #[tokio::test]
    async fn failed_refresh_yields_none() {
        let provider = SharedTokenProvider::new(FailingSource);
        assert!(provider.get_valid_credential(MIN_TTL, true).await.is_none());
    }

    #[tokio::test]
    async fn static_provider_checks_lifetime() {
        let provider = StaticTokenProvider::new(Credential::expiring_in("t", HOUR));
        assert!(provider.get_valid_credential(MIN_TTL, true).await.is_some());
        assert!(provider
            .get_valid_credential(Duration::from_secs(7200), false)
            .await
            .is_none());
    }

    #[test]
    fn debug_redacts_token() {
        let c = Credential::expiring_in("secret", HOUR);
        assert!(!format!("{c:?}").contains("secret"));
    }
}
