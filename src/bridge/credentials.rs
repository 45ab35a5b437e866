//! Credential cache access.
//!
//! The bridge never writes credentials; it reads what the platform session
//! layer has already cached. The cache is split into an API-key part and a
//! profile part because the two propagate independently after a fresh login,
//! which is why the API key gets a bounded-retry reader.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bridge::retry::retry_some;

/// Delay between API-key poll attempts after a just-completed login.
pub const CREDENTIAL_RETRY_DELAY: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The identity portion of the cached credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub tier: String,
}

/// A complete cached credential: API key plus identity.
///
/// Owned by the credential store; the bridge only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub api_key: String,
    pub user_id: i64,
    pub email: String,
    pub display_name: Option<String>,
    pub tier: String,
}

impl Credential {
    pub fn new(api_key: impl Into<String>, profile: UserProfile) -> Self {
        Self {
            api_key: api_key.into(),
            user_id: profile.user_id,
            email: profile.email,
            display_name: profile.display_name,
            tier: profile.tier,
        }
    }

    /// Effective username: the display name, or the local-part of the email
    /// when the display name is absent or blank.
    pub fn username(&self) -> &str {
        match &self.display_name {
            Some(name) if !name.trim().is_empty() => name,
            _ => self.email.split('@').next().unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache trait
// ---------------------------------------------------------------------------

/// Read-only view of the local credential cache.
///
/// Implementations must be thread-safe; reads are idempotent and safe to
/// issue repeatedly and concurrently.
pub trait CredentialCache: Send + Sync {
    /// The cached API key, if any.
    fn api_key(&self) -> Option<String>;

    /// The cached user profile, if any.
    fn profile(&self) -> Option<UserProfile>;
}

// Blanket implementation for Arc<T>
impl<T: CredentialCache + ?Sized> CredentialCache for Arc<T> {
    fn api_key(&self) -> Option<String> {
        (**self).api_key()
    }
    fn profile(&self) -> Option<UserProfile> {
        (**self).profile()
    }
}

/// Single synchronous read of the cache.
///
/// Succeeds only when both the API key and a profile with a non-empty email
/// are present. Never triggers a login.
pub fn try_fast_path(cache: &dyn CredentialCache) -> Option<Credential> {
    let api_key = cache.api_key().filter(|k| !k.trim().is_empty())?;
    let profile = cache.profile().filter(|p| !p.email.trim().is_empty())?;
    debug!(user_id = profile.user_id, "Credential fast path hit");
    Some(Credential::new(api_key, profile))
}

/// Poll the API-key portion of the cache up to `attempts` times.
///
/// Used after a just-completed login, where store propagation may lag the
/// provider's status change.
pub async fn api_key_with_retry(cache: &dyn CredentialCache, attempts: u32) -> Option<String> {
    retry_some(attempts, CREDENTIAL_RETRY_DELAY, move || async move {
        cache.api_key().filter(|k| !k.trim().is_empty())
    })
    .await
}

// ---------------------------------------------------------------------------
// Memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CachedEntry {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    profile: Option<UserProfile>,
}

/// In-memory credential cache.
///
/// Uses `Arc<RwLock<..>>` for thread-safe access. Useful for testing and
/// ephemeral sessions; the handle is `Clone` and shared.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialCache {
    inner: Arc<RwLock<CachedEntry>>,
}

impl MemoryCredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache pre-populated with both credential parts.
    pub fn with_credential(api_key: impl Into<String>, profile: UserProfile) -> Self {
        let cache = Self::new();
        cache.set_api_key(api_key);
        cache.set_profile(profile);
        cache
    }

    pub fn set_api_key(&self, api_key: impl Into<String>) {
        self.inner.write().expect("lock poisoned").api_key = Some(api_key.into());
    }

    pub fn set_profile(&self, profile: UserProfile) {
        self.inner.write().expect("lock poisoned").profile = Some(profile);
    }

    pub fn clear(&self) {
        *self.inner.write().expect("lock poisoned") = CachedEntry::default();
    }
}

impl CredentialCache for MemoryCredentialCache {
    fn api_key(&self) -> Option<String> {
        self.inner.read().expect("lock poisoned").api_key.clone()
    }

    fn profile(&self) -> Option<UserProfile> {
        self.inner.read().expect("lock poisoned").profile.clone()
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// File-backed credential cache.
///
/// Reads a single JSON document (`{"api_key": .., "profile": ..}`) written
/// by the platform session layer. The file is re-read on every access so
/// writes from another process are observed without restarting.
#[derive(Debug, Clone)]
pub struct FileCredentialCache {
    path: PathBuf,
}

impl FileCredentialCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Option<CachedEntry> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Malformed credential cache file");
                None
            }
        }
    }
}

impl CredentialCache for FileCredentialCache {
    fn api_key(&self) -> Option<String> {
        self.read().and_then(|e| e.api_key)
    }

    fn profile(&self) -> Option<UserProfile> {
        self.read().and_then(|e| e.profile)
    }
}
