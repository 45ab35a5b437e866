//! Configuration loading.
//!
//! Settings come from a TOML file (default `gwbridge.toml`), with `GWBRIDGE_*`
//! environment variables taking precedence over file values. A missing file
//! is not an error; defaults apply.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bridge::CallbackAllowList;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Allowed CORS origins; empty means allow-all (development).
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8788,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Token-issuing backend endpoint.
    pub token_endpoint: String,
    /// Additional allowed callback domains (full URLs or bare hostnames).
    pub allowed_callback_domains: Vec<String>,
    /// Path of the credential cache file written by the platform session layer.
    pub credential_file: String,
    /// Platform sign-in page users are pointed at during the slow path.
    pub login_url: String,
    /// Home link offered on the error screen.
    pub home_url: String,
    /// Wall-clock budget per flow, in seconds.
    pub flow_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            token_endpoint: "https://api.gatewayz.ai/v1/auth/bridge-token".to_string(),
            allowed_callback_domains: Vec::new(),
            credential_file: ".gwbridge/credentials.json".to_string(),
            login_url: "https://gatewayz.ai/login".to_string(),
            home_url: "https://gatewayz.ai".to_string(),
            flow_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level for the crate (trace/debug/info/warn/error).
    pub level: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub bridge: BridgeConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `GWBRIDGE_*` environment overrides on top of file values.
    fn apply_env_overrides(&mut self) {
        macro_rules! env_str {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                }
            };
        }

        env_str!("GWBRIDGE_HOST", self.server.host);
        env_str!("GWBRIDGE_TOKEN_ENDPOINT", self.bridge.token_endpoint);
        env_str!("GWBRIDGE_CREDENTIAL_FILE", self.bridge.credential_file);
        env_str!("GWBRIDGE_LOGIN_URL", self.bridge.login_url);
        env_str!("GWBRIDGE_HOME_URL", self.bridge.home_url);
        env_str!("GWBRIDGE_LOG_LEVEL", self.logging.level);

        if let Ok(val) = std::env::var("GWBRIDGE_PORT") {
            match val.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %val, "Ignoring invalid GWBRIDGE_PORT"),
            }
        }

        // Single-value override adding one more allowed callback domain
        // (full URL or bare hostname).
        if let Ok(domain) = std::env::var("GWBRIDGE_EXTRA_CALLBACK_DOMAIN") {
            if !domain.trim().is_empty() {
                self.bridge.allowed_callback_domains.push(domain);
            }
        }
    }

    /// Build the callback allow-list from the configured domains.
    pub fn allowlist(&self) -> CallbackAllowList {
        CallbackAllowList::from_entries(&self.bridge.allowed_callback_domains)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn flow_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.bridge.flow_timeout_secs)
    }
}
