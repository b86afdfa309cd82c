use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::types::Platform;

/// Top-level configuration loaded from `~/.cms-sync/config.toml`.
///
/// **Security**: This struct NEVER stores API keys, tokens, or secrets.
/// Platform entries only name the environment variables that hold them;
/// see [`CredentialProvider`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub platforms: Vec<PlatformConfig>,
}

impl Config {
    /// Load config from `$CMS_SYNC_CONFIG` or `~/.cms-sync/config.toml`,
    /// falling back to defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CMS_SYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        self.retry.validate()?;
        let mut seen = std::collections::BTreeSet::new();
        for p in &self.platforms {
            if !seen.insert(p.platform) {
                return Err(ConfigError::Validation(format!(
                    "platform '{}' is configured more than once",
                    p.platform
                )));
            }
            p.validate()?;
        }
        Ok(())
    }

    pub fn platform(&self, platform: Platform) -> Option<&PlatformConfig> {
        self.platforms.iter().find(|p| p.platform == platform)
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cms-sync")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_service_name() -> String {
    "cms-sync".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_host")]
    pub host: String,
    #[serde(default = "default_daemon_port")]
    pub port: u16,
    /// Env var holding the operator API key. Unset var = open admin API.
    #[serde(default = "default_admin_key_env")]
    pub admin_api_key_env: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_daemon_host(),
            port: default_daemon_port(),
            admin_api_key_env: default_admin_key_env(),
        }
    }
}

fn default_daemon_host() -> String {
    "127.0.0.1".into()
}
fn default_daemon_port() -> u16 {
    8787
}
fn default_admin_key_env() -> String {
    "CMS_SYNC_ADMIN_KEY".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    /// The database path with a leading `~/` expanded to the home directory.
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest),
            None => PathBuf::from(&self.path),
        }
    }
}

fn default_store_path() -> String {
    "~/.cms-sync/sync.db".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Seconds between scheduled queue runs.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Entities per batch during bulk sync.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between bulk-sync batches, throttling the external API.
    #[serde(default = "default_batch_delay")]
    pub batch_delay_ms: u64,
    /// Wall-clock budget of a single `process_queue` run.
    #[serde(default = "default_time_budget")]
    pub time_budget_ms: u64,
    /// Claims older than this are considered abandoned by a dead worker.
    #[serde(default = "default_claim_lease")]
    pub claim_lease_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay(),
            time_budget_ms: default_time_budget(),
            claim_lease_secs: default_claim_lease(),
        }
    }
}

impl QueueConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "queue.batch_size must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "queue.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_poll_interval() -> u64 {
    5
}
fn default_batch_size() -> usize {
    50
}
fn default_batch_delay() -> u64 {
    500
}
fn default_time_budget() -> u64 {
    25_000
}
fn default_claim_lease() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff unit: the wait after attempt `n` is `base_delay_ms * n`.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Validation(
                "retry.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1000
}

/// Loop-prevention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// How long an inbound or outbound write suppresses its echo. 0 disables
    /// the window; origin tags still apply.
    #[serde(default = "default_echo_window")]
    pub echo_window_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            echo_window_ms: default_echo_window(),
        }
    }
}

fn default_echo_window() -> u64 {
    2000
}

// ---------------------------------------------------------------------------
// Platforms
// ---------------------------------------------------------------------------

/// Which directions are enabled for a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Disabled,
    ToExternal,
    FromExternal,
    #[default]
    Bidirectional,
}

impl SyncMode {
    pub fn should_sync_to(&self) -> bool {
        matches!(self, SyncMode::ToExternal | SyncMode::Bidirectional)
    }

    pub fn should_sync_from(&self) -> bool {
        matches!(self, SyncMode::FromExternal | SyncMode::Bidirectional)
    }
}

/// How the platform API client authenticates. Only env var *names* live here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AuthConfig {
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer { token_env: String },
    /// `Authorization: Basic base64(user:password)`, e.g. WordPress application passwords.
    Basic { username: String, password_env: String },
    /// A custom header carrying the token, e.g. `X-Shopify-Access-Token`.
    Header { header: String, token_env: String },
    /// OAuth2 client-credentials grant, token cached and refreshed on 401.
    ClientCredentials {
        token_url: String,
        client_id_env: String,
        client_secret_env: String,
        #[serde(default)]
        scope: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub platform: Platform,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default)]
    pub base_url: String,
    /// CMS entity types synced with this platform. Empty = all the
    /// platform profile supports.
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Env var holding the shared webhook secret.
    #[serde(default)]
    pub webhook_secret_env: Option<String>,
    #[serde(default = "default_true")]
    pub require_signature: bool,
    /// Reject webhooks outright when no secret is configured instead of
    /// letting them through with a warning.
    #[serde(default)]
    pub strict_signature: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Platform-specific knobs (API version, Drupal bundle, Wix collection).
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl PlatformConfig {
    pub fn new(platform: Platform, base_url: impl Into<String>) -> Self {
        Self {
            platform,
            mode: SyncMode::default(),
            base_url: base_url.into(),
            entity_types: Vec::new(),
            auth: AuthConfig::None,
            webhook_secret_env: None,
            require_signature: true,
            strict_signature: false,
            request_timeout_secs: default_request_timeout(),
            options: BTreeMap::new(),
        }
    }

    pub fn should_sync_to(&self) -> bool {
        self.mode.should_sync_to()
    }

    pub fn should_sync_from(&self) -> bool {
        self.mode.should_sync_from()
    }

    /// `true` if `entity_type` is enabled. An empty list enables everything.
    pub fn entity_type_enabled(&self, entity_type: &str) -> bool {
        self.entity_types.is_empty() || self.entity_types.iter().any(|t| t == entity_type)
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Resolve the webhook secret, if one is configured and present.
    pub fn webhook_secret(&self) -> Option<String> {
        self.webhook_secret_env
            .as_deref()
            .and_then(CredentialProvider::from_env)
            .filter(|s| !s.is_empty())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mode != SyncMode::Disabled && self.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "platforms.{}.base_url must not be empty",
                self.platform
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "platforms.{}.request_timeout_secs must be at least 1",
                self.platform
            )));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_request_timeout() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Credential provider
// ---------------------------------------------------------------------------

/// Reads credentials from environment variables at runtime.
///
/// Config stores env var *names*, this provider resolves them to values on
/// demand so secrets never sit in the parsed config.
pub struct CredentialProvider;

impl CredentialProvider {
    /// Read a credential from a named env var. Empty values count as unset.
    pub fn from_env(var_name: &str) -> Option<String> {
        std::env::var(var_name).ok().filter(|v| !v.is_empty())
    }

    /// Read the operator API key named by the daemon config.
    pub fn admin_api_key(daemon: &DaemonConfig) -> Option<String> {
        Self::from_env(&daemon.admin_api_key_env)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.queue.poll_interval_secs, 5);
        assert_eq!(cfg.queue.batch_size, 50);
        assert_eq!(cfg.queue.batch_delay_ms, 500);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.base_delay_ms, 1000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn sync_mode_directions() {
        assert!(SyncMode::Bidirectional.should_sync_to());
        assert!(SyncMode::Bidirectional.should_sync_from());
        assert!(SyncMode::ToExternal.should_sync_to());
        assert!(!SyncMode::ToExternal.should_sync_from());
        assert!(!SyncMode::Disabled.should_sync_to());
        assert!(!SyncMode::Disabled.should_sync_from());
    }

    #[test]
    fn empty_entity_list_enables_all() {
        let mut p = PlatformConfig::new(Platform::Shopify, "https://shop.example");
        assert!(p.entity_type_enabled("product"));
        p.entity_types = vec!["order".into()];
        assert!(!p.entity_type_enabled("product"));
        assert!(p.entity_type_enabled("order"));
    }

    #[test]
    fn duplicate_platforms_rejected() {
        let mut cfg = Config::default();
        cfg.platforms.push(PlatformConfig::new(Platform::Wix, "https://www.wixapis.com"));
        cfg.platforms.push(PlatformConfig::new(Platform::Wix, "https://www.wixapis.com"));
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }
}
