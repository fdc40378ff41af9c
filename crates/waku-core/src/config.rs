//! Configuration loading, environment overrides, and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pairing::{PairingTimeouts, DEFAULT_CAPACITY};

/// Top-level Waku configuration, loaded from `waku.json5`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<SessionsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            auth: None,
        }
    }
}

fn default_port() -> u16 {
    8080
}

/// Bearer-token auth for the protected routes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl AuthConfig {
    pub fn resolve_token(&self) -> Option<String> {
        resolve_secret_field(&self.token, &self.token_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Root directory with one credential-store directory per device.
    #[serde(default = "default_session_dir")]
    pub dir: String,

    #[serde(default = "default_pairing_wait")]
    pub pairing_wait_secs: u64,

    #[serde(default = "default_pairing_extended_wait")]
    pub pairing_extended_wait_secs: u64,

    #[serde(default = "default_pairing_capacity")]
    pub pairing_queue_capacity: usize,

    /// Expiry hint returned alongside each pairing code.
    #[serde(default = "default_pairing_ttl")]
    pub pairing_code_ttl_secs: u64,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: default_session_dir(),
            pairing_wait_secs: default_pairing_wait(),
            pairing_extended_wait_secs: default_pairing_extended_wait(),
            pairing_queue_capacity: default_pairing_capacity(),
            pairing_code_ttl_secs: default_pairing_ttl(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_session_dir() -> String {
    "./sessions".into()
}

fn default_pairing_wait() -> u64 {
    5
}

fn default_pairing_extended_wait() -> u64 {
    10
}

fn default_pairing_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_pairing_ttl() -> u64 {
    60
}

fn default_shutdown_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_env: Option<String>,

    /// Total delivery attempts per notification.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Per-attempt HTTP timeout.
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,

    /// Delay before the second attempt; doubles after every failure.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Cap on concurrently running deliveries.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            url_env: None,
            retry_count: default_retry_count(),
            timeout_secs: default_webhook_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl WebhookConfig {
    pub fn resolve_url(&self) -> Option<String> {
        resolve_secret_field(&self.url, &self.url_env)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

fn default_retry_count() -> u32 {
    3
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_in_flight() -> usize {
    64
}

/// Connection to the external multi-device protocol bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_url")]
    pub api_url: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Per-request timeout for bridge calls, including disconnect.
    #[serde(default = "default_bridge_timeout")]
    pub request_timeout_secs: u64,
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_url: default_bridge_url(),
            poll_interval_ms: default_poll_interval(),
            request_timeout_secs: default_bridge_timeout(),
        }
    }
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:3300".into()
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_bridge_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "waku_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::WakuError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned())
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw)?;

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::WakuError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location: `./waku.json5`.
    pub fn default_path() -> PathBuf {
        PathBuf::from("waku.json5")
    }

    /// Apply the plain environment variables the service has always honoured
    /// (`PORT`, `API_TOKEN`, `SESSION_DIR`, `WEBHOOK_*`, `LOG_LEVEL`, `BRIDGE_URL`).
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = env_nonempty("PORT").and_then(|p| p.parse().ok()) {
            self.server.get_or_insert_with(Default::default).port = port;
        }
        if let Some(token) = env_nonempty("API_TOKEN") {
            self.server
                .get_or_insert_with(Default::default)
                .auth
                .get_or_insert_with(Default::default)
                .token = Some(token);
        }
        if let Some(dir) = env_nonempty("SESSION_DIR") {
            self.sessions.get_or_insert_with(Default::default).dir = dir;
        }
        if let Some(enabled) = env_nonempty("WEBHOOK_ENABLED") {
            self.webhook.get_or_insert_with(Default::default).enabled =
                matches!(enabled.to_ascii_lowercase().as_str(), "1" | "true" | "t" | "yes");
        }
        if let Some(url) = env_nonempty("WEBHOOK_URL") {
            self.webhook.get_or_insert_with(Default::default).url = Some(url);
        }
        if let Some(retry) = env_nonempty("WEBHOOK_RETRY").and_then(|r| r.parse::<u32>().ok()) {
            if retry > 0 {
                self.webhook.get_or_insert_with(Default::default).retry_count = retry;
            }
        }
        if let Some(level) = env_nonempty("LOG_LEVEL") {
            self.logging.get_or_insert_with(Default::default).level = Some(level);
        }
        if let Some(url) = env_nonempty("BRIDGE_URL") {
            self.bridge.get_or_insert_with(Default::default).api_url = url;
        }
    }

    pub fn server_port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or(8080)
    }

    pub fn bind_addr(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    /// Bearer token protecting the REST surface, if configured.
    pub fn api_token(&self) -> Option<String> {
        self.server
            .as_ref()
            .and_then(|s| s.auth.as_ref())
            .and_then(|a| a.resolve_token())
    }

    pub fn sessions(&self) -> SessionsConfig {
        self.sessions.clone().unwrap_or_default()
    }

    pub fn session_dir(&self) -> PathBuf {
        PathBuf::from(self.sessions().dir)
    }

    pub fn pairing_timeouts(&self) -> PairingTimeouts {
        let sessions = self.sessions();
        PairingTimeouts {
            initial: Duration::from_secs(sessions.pairing_wait_secs),
            extended: Duration::from_secs(sessions.pairing_extended_wait_secs),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.sessions().shutdown_timeout_secs)
    }

    pub fn webhook(&self) -> WebhookConfig {
        self.webhook.clone().unwrap_or_default()
    }

    pub fn bridge(&self) -> BridgeConfig {
        self.bridge.clone().unwrap_or_default()
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(server) = &self.server {
            if server.port == 0 {
                errors.push("Server port cannot be 0".to_string());
            }
        }

        if self.api_token().is_none() {
            warnings.push("No API token configured; protected routes are open".to_string());
        }

        let webhook = self.webhook();
        if webhook.enabled && webhook.resolve_url().is_none() {
            warnings.push("Webhook is enabled but no URL is configured".to_string());
        }
        if webhook.retry_count == 0 {
            errors.push("Webhook retry_count must be at least 1".to_string());
        }
        if webhook.max_in_flight == 0 {
            errors.push("Webhook max_in_flight must be at least 1".to_string());
        }

        if self.sessions().pairing_queue_capacity == 0 {
            errors.push("Pairing queue capacity must be at least 1".to_string());
        }

        (warnings, errors)
    }
}
