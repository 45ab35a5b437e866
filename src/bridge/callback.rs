//! Callback validation.
//!
//! Parses the caller-supplied redirect target out of the inbound query
//! parameters and authorizes it against the callback allow-list. A request
//! that fails here is terminal for the whole flow: no redirect is ever
//! attempted to an unvalidated URL.

use serde::Deserialize;
use url::Url;

use crate::bridge::error::BridgeError;

/// Hosts that are always allowed to receive a bridge redirect.
const BUILTIN_ALLOWED_HOSTS: &[&str] = &["terragon.ai", "gatewayz.ai", "localhost", "127.0.0.1"];

/// Domain suffixes whose subdomains are always allowed.
const WILDCARD_SUFFIXES: &[&str] = &[".terragon.ai", ".gatewayz.ai"];

/// Query parameters recognized on the inbound bridge request.
///
/// `callback` takes precedence over `redirect_uri`; an empty value is
/// treated the same as an absent one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeParams {
    pub callback: Option<String>,
    pub redirect_uri: Option<String>,
}

impl BridgeParams {
    /// Build params holding a single `callback` value.
    pub fn from_callback(callback: impl Into<String>) -> Self {
        Self {
            callback: Some(callback.into()),
            redirect_uri: None,
        }
    }

    /// The winning callback candidate, honoring parameter precedence.
    pub fn candidate(&self) -> Option<&str> {
        self.callback
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.redirect_uri.as_deref().filter(|s| !s.is_empty()))
    }
}

// ---------------------------------------------------------------------------
// Allow-list
// ---------------------------------------------------------------------------

/// Callback allow-list: the union of the built-in host set and
/// runtime-configured entries.
///
/// Configured entries may be full URLs (hostname extracted) or bare
/// hostnames; all comparisons are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct CallbackAllowList {
    extra_hosts: Vec<String>,
}

impl CallbackAllowList {
    /// Build an allow-list from configured entries.
    ///
    /// Entries that are neither a parseable URL with a host nor a plausible
    /// bare hostname are dropped.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extra_hosts = entries
            .into_iter()
            .filter_map(|entry| normalize_entry(entry.as_ref()))
            .collect();
        Self { extra_hosts }
    }

    /// Whether `url` may receive a bridge redirect.
    ///
    /// The scheme must be `https`, or `http` with a loopback host
    /// (development exception). The hostname must be a built-in entry, a
    /// subdomain of a wildcard suffix, or a configured entry.
    pub fn is_allowed(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();

        let scheme_ok = match url.scheme() {
            "https" => true,
            "http" => host == "localhost" || host == "127.0.0.1",
            _ => false,
        };
        if !scheme_ok {
            return false;
        }

        BUILTIN_ALLOWED_HOSTS.contains(&host.as_str())
            || WILDCARD_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
            || self.extra_hosts.iter().any(|allowed| allowed == &host)
    }
}

/// Normalize a configured allow-list entry to a lowercase hostname.
fn normalize_entry(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(entry) {
        if let Some(host) = url.host_str() {
            return Some(host.to_ascii_lowercase());
        }
    }
    // Bare hostname; reject anything with URL structure left in it.
    if entry.contains('/') || entry.contains(':') || entry.contains('?') {
        tracing::warn!(entry, "Ignoring malformed callback allow-list entry");
        return None;
    }
    Some(entry.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve and authorize the callback URL for a bridge request.
///
/// Returns `MissingCallback` when neither parameter carries a value and
/// `InvalidCallback` when the candidate fails to parse as an absolute URL
/// or is not authorized by the allow-list.
pub fn resolve_callback(
    params: &BridgeParams,
    allowlist: &CallbackAllowList,
) -> Result<Url, BridgeError> {
    let candidate = params.candidate().ok_or(BridgeError::MissingCallback)?;

    let url = Url::parse(candidate).map_err(|err| {
        tracing::warn!(error = %err, "Callback candidate failed to parse");
        BridgeError::InvalidCallback
    })?;

    if !allowlist.is_allowed(&url) {
        tracing::warn!(host = ?url.host_str(), "Callback host not allow-listed");
        return Err(BridgeError::InvalidCallback);
    }

    Ok(url)
}
