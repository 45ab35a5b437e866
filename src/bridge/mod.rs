//! Partner authentication bridge.
//!
//! Validates an inbound callback, resolves a platform credential (cached
//! fast path or provider-driven login), exchanges it for a short-lived
//! signed bridge token, and redirects the caller back with the token
//! attached.

pub mod callback;
pub mod credentials;
pub mod error;
pub mod exchange;
pub mod flow;
pub mod provider;
pub mod redirect;
pub mod retry;

// Re-exports
pub use callback::{resolve_callback, BridgeParams, CallbackAllowList};
pub use credentials::{
    api_key_with_retry, try_fast_path, Credential, CredentialCache, FileCredentialCache,
    MemoryCredentialCache, UserProfile,
};
pub use error::BridgeError;
pub use exchange::{BridgeToken, TokenExchangeClient};
pub use flow::{AuthBridge, BridgeFlow, BridgeState, FlowOutcome, HandoffMarker};
pub use provider::{AuthStatus, ExternalStatusProvider, IdentityProvider, SessionPollingProvider};
pub use redirect::{attach_token, NavigationSink, RedirectSink, TOKEN_PARAM};
