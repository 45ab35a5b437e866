//! Bridge flow orchestration.
//!
//! One [`BridgeFlow`] per inbound partner request. The flow reaches exactly
//! one terminal outcome — a redirect back to the validated callback, a
//! user-visible error, or a clean cancellation — while doing the minimum
//! necessary work: the cached-credential fast path never touches the
//! identity provider, logins and token exchanges are bounded by retry
//! counters, and a single wall-clock timer caps the whole attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::bridge::callback::{resolve_callback, BridgeParams, CallbackAllowList};
use crate::bridge::credentials::{api_key_with_retry, try_fast_path, Credential, CredentialCache};
use crate::bridge::error::BridgeError;
use crate::bridge::exchange::TokenExchangeClient;
use crate::bridge::provider::{AuthStatus, IdentityProvider};
use crate::bridge::redirect::{attach_token, RedirectSink};

/// Wall-clock budget for one flow, measured from flow start.
pub const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(30);

/// Login retries allowed after the initial identity-provider attempt.
const AUTH_RETRY_LIMIT: u32 = 2;

/// Token-exchange retries allowed after the initial attempt.
const TOKEN_RETRY_LIMIT: u32 = 2;

/// API-key poll attempts to absorb store-propagation lag after login.
const CREDENTIAL_RETRY_ATTEMPTS: u32 = 5;

// ---------------------------------------------------------------------------
// States and outcomes
// ---------------------------------------------------------------------------

/// UI-facing status of a flow; published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeState {
    /// Waiting for the identity provider to become ready.
    Loading,
    /// An interactive login is in progress.
    Authenticating,
    /// Token exchange started; redirect imminent.
    Redirecting,
    /// Terminal failure with a human-readable message.
    Error(String),
}

/// Terminal result of driving a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// The redirect was emitted; the caller should navigate to this URL.
    Redirected(Url),
    /// Terminal error; the message is safe to show the user.
    Failed(String),
    /// The flow was torn down before completing. Not an error.
    Cancelled,
}

// ---------------------------------------------------------------------------
// Cross-flow marker
// ---------------------------------------------------------------------------

/// Shared marker telling sibling session UI to suppress its own default
/// post-login redirect while a partner handoff is active.
///
/// The bridge is the exclusive writer while a flow is authenticating; it
/// sets the marker before triggering login and clears it on success and on
/// teardown.
#[derive(Debug, Clone, Default)]
pub struct HandoffMarker {
    active: Arc<AtomicBool>,
}

impl HandoffMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.active.store(true, Ordering::SeqCst);
        debug!("Partner handoff marker set");
    }

    pub fn clear(&self) {
        self.active.store(false, Ordering::SeqCst);
        debug!("Partner handoff marker cleared");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// AuthBridge
// ---------------------------------------------------------------------------

/// Per-process bridge services; spawns one [`BridgeFlow`] per request.
#[derive(Clone)]
pub struct AuthBridge {
    allowlist: Arc<CallbackAllowList>,
    cache: Arc<dyn CredentialCache>,
    provider: Arc<dyn IdentityProvider>,
    exchange: TokenExchangeClient,
    sink: Arc<dyn RedirectSink>,
    marker: HandoffMarker,
    flow_timeout: Duration,
}

impl AuthBridge {
    pub fn new(
        allowlist: CallbackAllowList,
        cache: Arc<dyn CredentialCache>,
        provider: Arc<dyn IdentityProvider>,
        exchange: TokenExchangeClient,
        sink: Arc<dyn RedirectSink>,
    ) -> Self {
        Self {
            allowlist: Arc::new(allowlist),
            cache,
            provider,
            exchange,
            sink,
            marker: HandoffMarker::new(),
            flow_timeout: DEFAULT_FLOW_TIMEOUT,
        }
    }

    /// Override the wall-clock budget for flows started from this bridge.
    pub fn with_flow_timeout(mut self, timeout: Duration) -> Self {
        self.flow_timeout = timeout;
        self
    }

    /// Handle to the cross-flow marker, for sibling orchestrations.
    pub fn marker(&self) -> HandoffMarker {
        self.marker.clone()
    }

    /// Start a new flow for one inbound request.
    ///
    /// The callback is validated eagerly; the stored result is consulted as
    /// the first entry condition of every re-evaluation.
    pub fn begin(&self, params: BridgeParams) -> BridgeFlow {
        let callback = resolve_callback(&params, &self.allowlist);
        let (state_tx, _) = watch::channel(BridgeState::Loading);
        BridgeFlow {
            flow_id: Uuid::new_v4(),
            callback,
            state_tx,
            cache: self.cache.clone(),
            provider: self.provider.clone(),
            exchange: self.exchange.clone(),
            sink: self.sink.clone(),
            marker: self.marker.clone(),
            marker_armed: false,
            started: Instant::now(),
            timeout: self.flow_timeout,
            login_triggered: false,
            exchange_running: false,
            auth_retries: 0,
            token_retries: 0,
            teardown: CancellationToken::new(),
            exchange_cancel: None,
            outcome: None,
        }
    }
}

// ---------------------------------------------------------------------------
// BridgeFlow
// ---------------------------------------------------------------------------

/// State machine for a single bridge request.
///
/// Created per inbound navigation and destroyed when the flow terminates.
/// All mutable flow state (retry counters, trigger flags, the in-flight
/// exchange token) lives here rather than in ambient globals.
pub struct BridgeFlow {
    flow_id: Uuid,
    callback: Result<Url, BridgeError>,
    state_tx: watch::Sender<BridgeState>,
    cache: Arc<dyn CredentialCache>,
    provider: Arc<dyn IdentityProvider>,
    exchange: TokenExchangeClient,
    sink: Arc<dyn RedirectSink>,
    marker: HandoffMarker,
    marker_armed: bool,
    started: Instant,
    timeout: Duration,
    login_triggered: bool,
    exchange_running: bool,
    auth_retries: u32,
    token_retries: u32,
    teardown: CancellationToken,
    exchange_cancel: Option<CancellationToken>,
    outcome: Option<FlowOutcome>,
}

impl BridgeFlow {
    /// Current UI-facing state.
    pub fn state(&self) -> BridgeState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<BridgeState> {
        self.state_tx.subscribe()
    }

    /// Token cancelled on teardown; cancelling it tears the flow down.
    pub fn teardown_token(&self) -> CancellationToken {
        self.teardown.clone()
    }

    /// Drive the flow to its terminal outcome.
    ///
    /// Arms the wall-clock timer once, performs the mount evaluation, then
    /// re-evaluates on every provider status change until a redirect is
    /// emitted, a terminal error is reached, or the flow is torn down.
    #[instrument(skip(self), fields(flow = %self.flow_id))]
    pub async fn run(&mut self) -> FlowOutcome {
        let mut status_rx = self.provider.subscribe();
        let mut status_open = true;
        let timer = tokio::time::sleep_until(self.started + self.timeout);
        tokio::pin!(timer);
        let mut timer_fired = false;

        self.evaluate().await;

        while self.outcome.is_none() {
            tokio::select! {
                () = self.teardown.cancelled() => {
                    debug!("Bridge flow torn down");
                    self.outcome = Some(FlowOutcome::Cancelled);
                }
                () = &mut timer, if !timer_fired => {
                    timer_fired = true;
                    self.on_timer();
                }
                changed = status_rx.changed(), if status_open => {
                    if changed.is_err() {
                        warn!("Identity provider status channel closed");
                        status_open = false;
                    }
                    self.evaluate().await;
                }
            }

            // With the timer spent and the status channel closed nothing
            // can wake the flow again; resolve rather than hang.
            if self.outcome.is_none() && timer_fired && !status_open {
                self.fail(BridgeError::ProviderTimeout.to_string());
            }
        }

        let outcome = self.outcome.clone().unwrap_or(FlowOutcome::Cancelled);
        if outcome == FlowOutcome::Cancelled {
            self.release_marker();
        }
        outcome
    }

    /// One state re-evaluation: runs the entry conditions in strict order.
    ///
    /// Triggered by mount, a provider status change, or the timer. Always
    /// reads the latest provider status and elapsed time; checks the
    /// teardown token before mutating anything so a stale evaluation after
    /// cancellation is a no-op.
    async fn evaluate(&mut self) {
        if self.outcome.is_some() || self.teardown.is_cancelled() {
            return;
        }

        // 1. Callback validation is terminal either way.
        let callback = match &self.callback {
            Ok(url) => url.clone(),
            Err(err) => {
                let message = err.to_string();
                self.fail(message);
                return;
            }
        };

        // 2. Fast path: cached credentials bypass the provider entirely.
        if try_fast_path(self.cache.as_ref()).is_some() {
            self.run_token_exchange(&callback).await;
            return;
        }

        match self.provider.auth_status() {
            // 3. Provider still initializing.
            AuthStatus::NotReady => {
                self.set_state(BridgeState::Loading);
                return;
            }
            // 4. Provider session already established.
            AuthStatus::Authenticated => {
                self.run_token_exchange(&callback).await;
                return;
            }
            // 5. Provider error: prefer credentials that appeared from a
            // sibling session over burning a retry, then bound the retries.
            AuthStatus::Error(reason) => {
                warn!(%reason, "Identity provider reported an error");
                if try_fast_path(self.cache.as_ref()).is_some() {
                    self.run_token_exchange(&callback).await;
                    return;
                }
                if self.auth_retries >= AUTH_RETRY_LIMIT {
                    self.fail(BridgeError::AuthExhausted.to_string());
                    return;
                }
                self.auth_retries += 1;
                self.login_triggered = false;
                debug!(attempt = self.auth_retries, "Re-triggering provider login");
            }
            // 6. Mid-flight and already triggered: just reflect progress.
            AuthStatus::Idle | AuthStatus::Authenticating => {
                if self.login_triggered {
                    self.set_state(BridgeState::Authenticating);
                    return;
                }
            }
        }

        // 7. The wall-clock check precedes any new login trigger, so a
        // provider that becomes ready only after the deadline never starts
        // a fresh attempt.
        if self.started.elapsed() >= self.timeout {
            self.fail(BridgeError::ProviderTimeout.to_string());
            return;
        }

        // 8. Trigger login, once per attempt.
        if !self.login_triggered {
            self.login_triggered = true;
            self.set_state(BridgeState::Authenticating);
            self.marker.set();
            self.marker_armed = true;
            if let Err(err) = self.provider.login().await {
                // Failures surface through the provider's status observable.
                warn!(error = %err, "Login trigger failed");
            }
        }
    }

    /// Standalone timer: fires once at the deadline and forces the timeout
    /// error if the flow is still waiting on authentication.
    fn on_timer(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let state = self.state();
        if matches!(state, BridgeState::Loading | BridgeState::Authenticating) {
            self.fail(BridgeError::ProviderTimeout.to_string());
        }
    }

    /// Token-exchange sub-flow. Guarded so it runs at most once
    /// concurrently per flow.
    async fn run_token_exchange(&mut self, callback: &Url) {
        if self.exchange_running {
            debug!("Token exchange already in flight");
            return;
        }
        self.exchange_running = true;
        self.set_state(BridgeState::Redirecting);

        let result = self.token_exchange(callback).await;
        self.exchange_running = false;

        match result {
            Ok(url) => {
                info!(host = ?url.host_str(), "Bridge flow complete");
                self.outcome = Some(FlowOutcome::Redirected(url));
            }
            Err(BridgeError::Aborted) => {
                debug!("Token exchange aborted; dropped without state change");
            }
            Err(err) if err.is_retryable_exchange() => {
                self.token_retries += 1;
                if self.token_retries > TOKEN_RETRY_LIMIT {
                    self.fail(err.to_string());
                } else {
                    warn!(
                        error = %err,
                        attempt = self.token_retries,
                        "Token exchange failed; awaiting re-entry"
                    );
                }
            }
            Err(err) => {
                let message = err.to_string();
                self.fail(message);
            }
        }
    }

    async fn token_exchange(&mut self, callback: &Url) -> Result<Url, BridgeError> {
        let api_key = api_key_with_retry(self.cache.as_ref(), CREDENTIAL_RETRY_ATTEMPTS)
            .await
            .ok_or(BridgeError::NoCredential)?;
        let profile = self
            .cache
            .profile()
            .filter(|p| !p.email.trim().is_empty())
            .ok_or(BridgeError::NoEmail)?;
        let credential = Credential::new(api_key, profile);

        // At most one live exchange per flow.
        if let Some(previous) = self.exchange_cancel.take() {
            previous.cancel();
        }
        let cancel = self.teardown.child_token();
        self.exchange_cancel = Some(cancel.clone());

        let host = callback.host_str().unwrap_or_default().to_string();
        let token = self.exchange.exchange(&credential, &host, &cancel).await?;

        self.release_marker();
        let url = attach_token(callback, token.as_str());
        self.sink.emit(&url).await?;
        Ok(url)
    }

    fn set_state(&mut self, next: BridgeState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                debug!(?next, "Bridge state transition");
                *state = next.clone();
                true
            }
        });
    }

    fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(%message, "Bridge flow failed");
        self.set_state(BridgeState::Error(message.clone()));
        self.outcome = Some(FlowOutcome::Failed(message));
    }

    fn release_marker(&mut self) {
        if self.marker_armed {
            self.marker.clear();
            self.marker_armed = false;
        }
    }
}

impl Drop for BridgeFlow {
    fn drop(&mut self) {
        // Teardown may happen mid-flight; the marker and any in-flight
        // exchange must not outlive the flow.
        self.release_marker();
        self.teardown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::credentials::MemoryCredentialCache;
    use crate::bridge::provider::ExternalStatusProvider;
    use crate::bridge::redirect::NavigationSink;

    fn bridge_with(cache: MemoryCredentialCache, provider: Arc<ExternalStatusProvider>) -> AuthBridge {
        AuthBridge::new(
            CallbackAllowList::default(),
            Arc::new(cache),
            provider,
            TokenExchangeClient::with_client(reqwest::Client::new(), "http://127.0.0.1:9/token"),
            Arc::new(NavigationSink),
        )
    }

    #[tokio::test]
    async fn test_missing_callback_is_terminal() {
        let provider = ExternalStatusProvider::new(AuthStatus::NotReady);
        let bridge = bridge_with(MemoryCredentialCache::new(), provider.clone());
        let mut flow = bridge.begin(BridgeParams::default());

        let outcome = flow.run().await;
        match outcome {
            FlowOutcome::Failed(message) => assert!(message.contains("Missing callback URL")),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(provider.login_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_callback_is_terminal() {
        let provider = ExternalStatusProvider::new(AuthStatus::Authenticated);
        let bridge = bridge_with(MemoryCredentialCache::new(), provider);
        let mut flow = bridge.begin(BridgeParams::from_callback("https://evil.example.com/cb"));

        let outcome = flow.run().await;
        match outcome {
            FlowOutcome::Failed(message) => assert!(message.contains("Invalid callback URL")),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(matches!(flow.state(), BridgeState::Error(_)));
    }

    #[tokio::test]
    async fn test_marker_set_on_login_and_cleared_on_drop() {
        let provider = ExternalStatusProvider::new(AuthStatus::Idle);
        let bridge = bridge_with(MemoryCredentialCache::new(), provider.clone());
        let marker = bridge.marker();

        let mut flow = bridge.begin(BridgeParams::from_callback("https://app.terragon.ai/cb"));
        let teardown = flow.teardown_token();
        let handle = tokio::spawn(async move { flow.run().await });

        // Wait for the mount evaluation to trigger login.
        while provider.login_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(marker.is_active());

        teardown.cancel();
        let outcome = handle.await.expect("join");
        assert_eq!(outcome, FlowOutcome::Cancelled);
        assert!(!marker.is_active());
    }

    #[test]
    fn test_marker_roundtrip() {
        let marker = HandoffMarker::new();
        assert!(!marker.is_active());
        marker.set();
        assert!(marker.is_active());
        marker.clear();
        assert!(!marker.is_active());
    }
}
