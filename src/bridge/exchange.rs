//! Token exchange client.
//!
//! Exchanges a cached platform credential for a short-lived signed bridge
//! token by calling the token-issuing backend. The call is cancellable
//! mid-flight; a cancelled exchange resolves to [`BridgeError::Aborted`],
//! which the orchestrator treats as a no-op rather than a failure.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bridge::credentials::Credential;
use crate::bridge::error::BridgeError;

/// Request timeout for a single exchange call.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Bridge token
// ---------------------------------------------------------------------------

/// Opaque signed token minted for a partner redirect handoff.
///
/// Treated as a black box; only non-emptiness after trimming is validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeToken(String);

impl BridgeToken {
    /// Validate and wrap a raw token value.
    pub fn new(raw: impl Into<String>) -> Result<Self, BridgeError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(BridgeError::EmptyToken);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    user_id: i64,
    email: &'a str,
    username: &'a str,
    tier: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for the token-issuing backend endpoint.
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    http: reqwest::Client,
    endpoint: String,
}

impl TokenExchangeClient {
    /// Create a client for the given token endpoint.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .user_agent(concat!("gwbridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, endpoint))
    }

    /// Create a client reusing an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Exchange `credential` for a bridge token.
    ///
    /// `callback_host` is the already-validated partner host, recorded for
    /// audit logging. Cancelling `cancel` mid-flight resolves the call into
    /// [`BridgeError::Aborted`].
    pub async fn exchange(
        &self,
        credential: &Credential,
        callback_host: &str,
        cancel: &CancellationToken,
    ) -> Result<BridgeToken, BridgeError> {
        let body = TokenRequest {
            user_id: credential.user_id,
            email: &credential.email,
            username: credential.username(),
            tier: &credential.tier,
        };

        debug!(
            user_id = credential.user_id,
            callback_host, "Requesting bridge token"
        );

        let request = async {
            let response = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&credential.api_key)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .json::<ErrorBody>()
                    .await
                    .ok()
                    .and_then(|b| b.error)
                    .unwrap_or_else(|| {
                        format!("Failed to generate auth token: {}", status.as_u16())
                    });
                warn!(status = status.as_u16(), %message, "Token exchange failed");
                return Err(BridgeError::TokenExchangeFailed {
                    status: status.as_u16(),
                    message,
                });
            }

            let token = response
                .json::<TokenResponse>()
                .await?
                .token
                .unwrap_or_default();
            BridgeToken::new(token)
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(callback_host, "Token exchange cancelled");
                Err(BridgeError::Aborted)
            }
            result = request => result,
        }
    }
}
