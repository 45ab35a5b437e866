//! Redirect emission.
//!
//! Attaches the issued bridge token to the validated callback URL and
//! performs the navigation handoff. Kept behind a trait so tests can
//! capture the final URL without navigating anywhere.

use async_trait::async_trait;
use tracing::info;
use url::Url;

use crate::bridge::error::BridgeError;

/// Query parameter carrying the bridge token on the final redirect.
pub const TOKEN_PARAM: &str = "gwauth";

/// Set (or overwrite) the token parameter on the callback URL.
///
/// Parameter-level manipulation, so pre-existing query parameters on the
/// callback survive and a stale token value never stacks.
pub fn attach_token(callback: &Url, token: &str) -> Url {
    let mut url = callback.clone();
    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| name != TOKEN_PARAM)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    let mut pairs = url.query_pairs_mut();
    pairs.clear();
    for (name, value) in &others {
        pairs.append_pair(name, value);
    }
    pairs.append_pair(TOKEN_PARAM, token);
    drop(pairs);
    url
}

/// Destination of the final navigation.
#[async_trait]
pub trait RedirectSink: Send + Sync {
    /// Hand the user off to `url`.
    async fn emit(&self, url: &Url) -> Result<(), BridgeError>;
}

/// Production sink: records the handoff; the HTTP layer issues the actual
/// 302 from the flow outcome.
#[derive(Debug, Clone, Default)]
pub struct NavigationSink;

#[async_trait]
impl RedirectSink for NavigationSink {
    async fn emit(&self, url: &Url) -> Result<(), BridgeError> {
        info!(host = ?url.host_str(), "Redirecting partner flow back to callback");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_token_plain_url() {
        let callback = Url::parse("https://app.terragon.ai/cb").unwrap();
        let url = attach_token(&callback, "abc.def");
        assert_eq!(url.as_str(), "https://app.terragon.ai/cb?gwauth=abc.def");
    }

    #[test]
    fn test_attach_token_preserves_existing_query() {
        let callback = Url::parse("https://app.terragon.ai/cb?returnUrl=%2Fdashboard").unwrap();
        let url = attach_token(&callback, "abc.def");
        assert_eq!(
            url.as_str(),
            "https://app.terragon.ai/cb?returnUrl=%2Fdashboard&gwauth=abc.def"
        );
    }

    #[test]
    fn test_attach_token_overwrites_stale_token() {
        let callback = Url::parse("https://app.terragon.ai/cb?gwauth=old&keep=1").unwrap();
        let url = attach_token(&callback, "new");
        assert_eq!(url.as_str(), "https://app.terragon.ai/cb?keep=1&gwauth=new");
    }

    #[test]
    fn test_attach_token_escapes_value() {
        let callback = Url::parse("https://app.terragon.ai/cb").unwrap();
        let url = attach_token(&callback, "a b&c");
        assert_eq!(url.as_str(), "https://app.terragon.ai/cb?gwauth=a+b%26c");
    }
}
