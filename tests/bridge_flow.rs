//! End-to-end scenarios for the bridge state machine.
//!
//! Uses a mock identity provider and credential cache, a wiremock token
//! backend, and a recording redirect sink so every terminal outcome and
//! retry bound can be asserted without a browser in the loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gwbridge::bridge::{
    AuthBridge, AuthStatus, BridgeError, BridgeParams, BridgeState, CallbackAllowList,
    ExternalStatusProvider, FlowOutcome, MemoryCredentialCache, RedirectSink,
    TokenExchangeClient, UserProfile,
};

// ---------------------------------------------------------------------------
// Test doubles and helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingSink {
    emitted: Mutex<Vec<Url>>,
}

#[async_trait::async_trait]
impl RedirectSink for RecordingSink {
    async fn emit(&self, url: &Url) -> Result<(), BridgeError> {
        self.emitted.lock().expect("lock").push(url.clone());
        Ok(())
    }
}

impl RecordingSink {
    fn urls(&self) -> Vec<Url> {
        self.emitted.lock().expect("lock").clone()
    }
}

fn profile() -> UserProfile {
    UserProfile {
        user_id: 42,
        email: "a@b.com".to_string(),
        display_name: Some(String::new()),
        tier: "pro".to_string(),
    }
}

fn bridge(
    cache: &MemoryCredentialCache,
    provider: &Arc<ExternalStatusProvider>,
    sink: &Arc<RecordingSink>,
    endpoint: String,
) -> AuthBridge {
    AuthBridge::new(
        CallbackAllowList::default(),
        Arc::new(cache.clone()),
        provider.clone(),
        TokenExchangeClient::with_client(reqwest::Client::new(), endpoint),
        sink.clone(),
    )
}

async fn wait_for_requests(server: &MockServer, n: usize) {
    for _ in 0..500 {
        let seen = server
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0);
        if seen >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {n} requests");
}

async fn wait_for_logins(provider: &ExternalStatusProvider, n: u32) {
    for _ in 0..500 {
        if provider.login_count() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {n} logins");
}

// ---------------------------------------------------------------------------
// Fast path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fast_path_literal_scenario() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/bridge-token"))
        .and(body_json(serde_json::json!({
            "userId": 42,
            "email": "a@b.com",
            "username": "a",
            "tier": "pro"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "abc.def" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = MemoryCredentialCache::with_credential("sk-1", profile());
    let provider = ExternalStatusProvider::new(AuthStatus::NotReady);
    let sink = Arc::new(RecordingSink::default());
    let bridge = bridge(
        &cache,
        &provider,
        &sink,
        format!("{}/v1/auth/bridge-token", server.uri()),
    );

    let params = BridgeParams {
        callback: None,
        redirect_uri: Some("https://app.terragon.ai/cb?returnUrl=%2Fdashboard".to_string()),
    };
    let mut flow = bridge.begin(params);
    let outcome = flow.run().await;

    let expected = "https://app.terragon.ai/cb?returnUrl=%2Fdashboard&gwauth=abc.def";
    match outcome {
        FlowOutcome::Redirected(url) => assert_eq!(url.as_str(), expected),
        other => panic!("expected Redirected, got {other:?}"),
    }
    assert_eq!(sink.urls().len(), 1);
    assert_eq!(sink.urls()[0].as_str(), expected);
    // The fast path bypasses the identity provider entirely.
    assert_eq!(provider.login_count(), 0);
    assert_eq!(flow.state(), BridgeState::Redirecting);
}

// ---------------------------------------------------------------------------
// Token-exchange retry bounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_token_retry_succeeds_on_third_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "abc.def" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = MemoryCredentialCache::with_credential("sk-1", profile());
    let provider = ExternalStatusProvider::new(AuthStatus::NotReady);
    let sink = Arc::new(RecordingSink::default());
    let bridge = bridge(&cache, &provider, &sink, server.uri());

    let mut flow = bridge.begin(BridgeParams::from_callback("https://app.terragon.ai/cb"));
    let handle = tokio::spawn(async move { flow.run().await });

    // Each failed attempt re-enters the sub-flow on the next status change.
    wait_for_requests(&server, 1).await;
    provider.set_status(AuthStatus::NotReady);
    wait_for_requests(&server, 2).await;
    provider.set_status(AuthStatus::NotReady);

    let outcome = handle.await.expect("join");
    assert!(matches!(outcome, FlowOutcome::Redirected(_)));
    assert_eq!(
        server.received_requests().await.map(|r| r.len()),
        Some(3),
        "exactly three exchange attempts"
    );
    assert_eq!(sink.urls().len(), 1, "at most one redirect per flow");
}

#[tokio::test]
async fn test_token_retry_exhausted_without_fourth_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let cache = MemoryCredentialCache::with_credential("sk-1", profile());
    let provider = ExternalStatusProvider::new(AuthStatus::NotReady);
    let sink = Arc::new(RecordingSink::default());
    let bridge = bridge(&cache, &provider, &sink, server.uri());

    let mut flow = bridge.begin(BridgeParams::from_callback("https://app.terragon.ai/cb"));
    let handle = tokio::spawn(async move { flow.run().await });

    wait_for_requests(&server, 1).await;
    provider.set_status(AuthStatus::NotReady);
    wait_for_requests(&server, 2).await;
    provider.set_status(AuthStatus::NotReady);

    let outcome = handle.await.expect("join");
    match outcome {
        FlowOutcome::Failed(message) => {
            assert_eq!(message, "Failed to generate auth token: 500");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    // Terminal after the third failure; a further status change reaches a
    // finished flow and cannot produce a fourth attempt.
    provider.set_status(AuthStatus::NotReady);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(3));
    assert!(sink.urls().is_empty());
}

// ---------------------------------------------------------------------------
// Auth retry bounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_auth_retry_bound_exhausts_after_two_retries() {
    let cache = MemoryCredentialCache::new();
    let provider = ExternalStatusProvider::new(AuthStatus::Idle);
    let sink = Arc::new(RecordingSink::default());
    let bridge = bridge(&cache, &provider, &sink, "http://127.0.0.1:9/token".to_string());

    let mut flow = bridge.begin(BridgeParams::from_callback("https://app.terragon.ai/cb"));
    let handle = tokio::spawn(async move { flow.run().await });

    // Initial login on mount, then two retries beyond it.
    wait_for_logins(&provider, 1).await;
    provider.set_status(AuthStatus::Error("provider down".to_string()));
    wait_for_logins(&provider, 2).await;
    provider.set_status(AuthStatus::Error("provider down".to_string()));
    wait_for_logins(&provider, 3).await;
    provider.set_status(AuthStatus::Error("provider down".to_string()));

    let outcome = handle.await.expect("join");
    match outcome {
        FlowOutcome::Failed(message) => {
            assert_eq!(message, "Unable to authenticate after multiple attempts.");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(provider.login_count(), 3);
    assert!(sink.urls().is_empty());
}

#[tokio::test]
async fn test_auth_error_with_cached_credential_skips_retry_accounting() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "abc.def" })),
        )
        .mount(&server)
        .await;

    let cache = MemoryCredentialCache::new();
    let provider = ExternalStatusProvider::new(AuthStatus::Idle);
    let sink = Arc::new(RecordingSink::default());
    let bridge = bridge(&cache, &provider, &sink, server.uri());

    let mut flow = bridge.begin(BridgeParams::from_callback("https://app.terragon.ai/cb"));
    let handle = tokio::spawn(async move { flow.run().await });

    wait_for_logins(&provider, 1).await;

    // Credentials arrive from a sibling session just as the provider errors:
    // the flow prefers them and never burns a login retry.
    cache.set_api_key("sk-1");
    cache.set_profile(profile());
    provider.set_status(AuthStatus::Error("provider down".to_string()));

    let outcome = handle.await.expect("join");
    assert!(matches!(outcome, FlowOutcome::Redirected(_)));
    assert_eq!(provider.login_count(), 1);
    assert_eq!(sink.urls().len(), 1);
}

// ---------------------------------------------------------------------------
// Timeout
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_at_thirty_seconds() {
    let cache = MemoryCredentialCache::new();
    let provider = ExternalStatusProvider::new(AuthStatus::NotReady);
    let sink = Arc::new(RecordingSink::default());
    let bridge = bridge(&cache, &provider, &sink, "http://127.0.0.1:9/token".to_string());

    let mut flow = bridge.begin(BridgeParams::from_callback("https://app.terragon.ai/cb"));
    let mut states = flow.subscribe_state();
    let handle = tokio::spawn(async move { flow.run().await });

    // Just short of the deadline the flow is still waiting.
    tokio::time::advance(Duration::from_millis(29_900)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(*states.borrow(), BridgeState::Loading);

    // Crossing the deadline forces the timeout error.
    tokio::time::advance(Duration::from_millis(200)).await;
    let outcome = handle.await.expect("join");
    match outcome {
        FlowOutcome::Failed(message) => {
            assert_eq!(message, "Authentication is taking too long. Please try again.");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(matches!(&*states.borrow(), BridgeState::Error(_)));
    assert_eq!(provider.login_count(), 0);
    assert!(sink.urls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_provider_ready_after_deadline_never_triggers_login() {
    let cache = MemoryCredentialCache::new();
    let provider = ExternalStatusProvider::new(AuthStatus::NotReady);
    let sink = Arc::new(RecordingSink::default());
    let bridge = bridge(&cache, &provider, &sink, "http://127.0.0.1:9/token".to_string());

    let mut flow = bridge.begin(BridgeParams::from_callback("https://app.terragon.ai/cb"));
    let handle = tokio::spawn(async move { flow.run().await });

    tokio::time::advance(Duration::from_secs(31)).await;
    // Provider readiness arriving after the deadline reaches a flow that
    // has already timed out.
    provider.set_status(AuthStatus::Idle);

    let outcome = handle.await.expect("join");
    assert!(matches!(outcome, FlowOutcome::Failed(_)));
    assert_eq!(provider.login_count(), 0);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_teardown_mid_exchange_mutates_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "token": "late" }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let cache = MemoryCredentialCache::with_credential("sk-1", profile());
    let provider = ExternalStatusProvider::new(AuthStatus::NotReady);
    let sink = Arc::new(RecordingSink::default());
    let bridge = bridge(&cache, &provider, &sink, server.uri());
    let marker = bridge.marker();

    let mut flow = bridge.begin(BridgeParams::from_callback("https://app.terragon.ai/cb"));
    let mut states = flow.subscribe_state();
    let teardown = flow.teardown_token();
    let handle = tokio::spawn(async move { flow.run().await });

    wait_for_requests(&server, 1).await;
    assert_eq!(*states.borrow_and_update(), BridgeState::Redirecting);

    teardown.cancel();
    let outcome = handle.await.expect("join");
    assert_eq!(outcome, FlowOutcome::Cancelled);

    // No redirect, no marker residue, no state transition after teardown.
    assert!(sink.urls().is_empty());
    assert!(!marker.is_active());
    assert_eq!(*states.borrow(), BridgeState::Redirecting);
}
