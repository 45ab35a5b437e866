//! Identity provider abstraction.
//!
//! The interactive identity-provider SDK is an external collaborator; the
//! bridge only consumes a status observable and a `login()` capability.
//! [`SessionPollingProvider`] is the bundled implementation: it watches the
//! local credential cache in a background task and reports `Authenticated`
//! once the platform session layer has cached a credential.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bridge::credentials::{try_fast_path, CredentialCache};
use crate::bridge::error::BridgeError;

/// Authentication status reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// The provider has not finished initializing.
    NotReady,
    /// Ready, no session and no login in progress.
    Idle,
    /// An interactive login round-trip is in progress.
    Authenticating,
    /// A provider session exists.
    Authenticated,
    /// The last login attempt failed.
    Error(String),
}

/// External identity provider surface consumed by the bridge.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Latest known status snapshot.
    fn auth_status(&self) -> AuthStatus;

    /// Subscribe to status changes. The current value counts as seen; only
    /// subsequent transitions wake the subscriber.
    fn subscribe(&self) -> watch::Receiver<AuthStatus>;

    /// Start an interactive login. Must be cheap to call; progress and
    /// completion are reported through the status observable.
    async fn login(&self) -> Result<(), BridgeError>;
}

// ---------------------------------------------------------------------------
// Session-polling provider
// ---------------------------------------------------------------------------

/// Default interval between credential cache polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(750);

/// Identity provider backed by the platform's own session.
///
/// Polls the credential cache in a background task: a cached credential
/// means the user has a live platform session. `login()` points the user at
/// the platform sign-in page and the poll loop picks up the session once
/// the credential lands in the cache.
pub struct SessionPollingProvider {
    status_tx: watch::Sender<AuthStatus>,
    cache: Arc<dyn CredentialCache>,
    login_url: String,
}

impl SessionPollingProvider {
    /// Create the provider and start its poll loop.
    ///
    /// The loop runs until `shutdown` is cancelled.
    pub fn spawn(
        cache: Arc<dyn CredentialCache>,
        login_url: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Self::spawn_with_interval(cache, login_url, DEFAULT_POLL_INTERVAL, shutdown)
    }

    pub fn spawn_with_interval(
        cache: Arc<dyn CredentialCache>,
        login_url: impl Into<String>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(AuthStatus::NotReady);
        let provider = Arc::new(Self {
            status_tx,
            cache,
            login_url: login_url.into(),
        });

        let poller = provider.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("Session poll loop stopped");
                        break;
                    }
                    _ = ticker.tick() => poller.poll_once(),
                }
            }
        });

        provider
    }

    fn poll_once(&self) {
        let authenticated = try_fast_path(self.cache.as_ref()).is_some();
        self.status_tx.send_if_modified(|status| {
            let next = if authenticated {
                AuthStatus::Authenticated
            } else {
                match &*status {
                    // First completed poll moves the provider out of NotReady.
                    AuthStatus::NotReady => AuthStatus::Idle,
                    // A session that disappeared mid-login stays in its
                    // current phase until login resolves it.
                    other => other.clone(),
                }
            };
            if *status == next {
                false
            } else {
                debug!(?next, "Session status changed");
                *status = next;
                true
            }
        });
    }
}

#[async_trait]
impl IdentityProvider for SessionPollingProvider {
    fn auth_status(&self) -> AuthStatus {
        self.status_tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status_tx.subscribe()
    }

    async fn login(&self) -> Result<(), BridgeError> {
        info!(url = %self.login_url, "Waiting for sign-in at the platform login page");
        self.status_tx.send_if_modified(|status| {
            if *status == AuthStatus::Authenticated {
                false
            } else {
                *status = AuthStatus::Authenticating;
                true
            }
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Externally-driven provider
// ---------------------------------------------------------------------------

/// Identity provider whose status is pushed in by the embedding host.
///
/// For hosts that already track provider state themselves (and for tests):
/// `set_status` feeds the observable, `login()` only records that a login
/// round-trip was requested.
#[derive(Debug)]
pub struct ExternalStatusProvider {
    status_tx: watch::Sender<AuthStatus>,
    logins: std::sync::atomic::AtomicU32,
}

impl ExternalStatusProvider {
    pub fn new(initial: AuthStatus) -> Arc<Self> {
        let (status_tx, _) = watch::channel(initial);
        Arc::new(Self {
            status_tx,
            logins: std::sync::atomic::AtomicU32::new(0),
        })
    }

    /// Push a status transition to all subscribers.
    pub fn set_status(&self, status: AuthStatus) {
        self.status_tx.send_replace(status);
    }

    /// How many login round-trips have been requested.
    pub fn login_count(&self) -> u32 {
        self.logins.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for ExternalStatusProvider {
    fn auth_status(&self) -> AuthStatus {
        self.status_tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status_tx.subscribe()
    }

    async fn login(&self) -> Result<(), BridgeError> {
        self.logins
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::credentials::{MemoryCredentialCache, UserProfile};

    fn profile() -> UserProfile {
        UserProfile {
            user_id: 1,
            email: "u@example.com".to_string(),
            display_name: None,
            tier: "free".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_idle_then_authenticated() {
        let cache = MemoryCredentialCache::new();
        let shutdown = CancellationToken::new();
        let provider = SessionPollingProvider::spawn_with_interval(
            Arc::new(cache.clone()),
            "https://gatewayz.ai/login",
            Duration::from_millis(100),
            shutdown.clone(),
        );
        let mut rx = provider.subscribe();

        // First poll completes immediately (interval fires at once).
        rx.changed().await.expect("status change");
        assert_eq!(provider.auth_status(), AuthStatus::Idle);

        cache.set_api_key("sk-1");
        cache.set_profile(profile());
        rx.changed().await.expect("status change");
        assert_eq!(provider.auth_status(), AuthStatus::Authenticated);

        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_marks_authenticating() {
        let cache = MemoryCredentialCache::new();
        let shutdown = CancellationToken::new();
        let provider = SessionPollingProvider::spawn_with_interval(
            Arc::new(cache),
            "https://gatewayz.ai/login",
            Duration::from_millis(100),
            shutdown.clone(),
        );
        let mut rx = provider.subscribe();
        rx.changed().await.expect("initial poll");

        provider.login().await.expect("login");
        assert_eq!(provider.auth_status(), AuthStatus::Authenticating);

        shutdown.cancel();
    }
}
