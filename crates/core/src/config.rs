//! Process configuration, read once from a JSON file at startup (§6).

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub sigv4: SigV4Config,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Env var holding the bearer token protecting verify endpoints. If
    /// unset, the gateway logs a warning and runs unauthenticated.
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors: CorsConfig::default(),
            api_token_env: d_api_token_env(),
        }
    }
}

fn d_port() -> u16 {
    8080
}
fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_api_token_env() -> String {
    "IDG_API_TOKEN".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store (component A)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "d_redis_url")]
    pub url: String,
    #[serde(default = "d_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "d_reconnect_min_ms")]
    pub reconnect_backoff_min_ms: u64,
    #[serde(default = "d_reconnect_max_ms")]
    pub reconnect_backoff_max_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: d_redis_url(),
            connect_timeout_ms: d_connect_timeout_ms(),
            reconnect_backoff_min_ms: d_reconnect_min_ms(),
            reconnect_backoff_max_ms: d_reconnect_max_ms(),
        }
    }
}

fn d_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}
fn d_connect_timeout_ms() -> u64 {
    2_000
}
fn d_reconnect_min_ms() -> u64 {
    1_000
}
fn d_reconnect_max_ms() -> u64 {
    60_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directory (components B, C, D)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "d_ldap_url")]
    pub url: String,
    #[serde(default = "d_bind_dn")]
    pub bind_dn: String,
    /// Env var holding the bind password (never stored in the config file).
    #[serde(default = "d_bind_password_env")]
    pub bind_password_env: String,
    /// The changelog container to search (§6: "Search cn=changelog with
    /// sub-scope and the filter above").
    #[serde(default = "d_search_base")]
    pub search_base: String,
    #[serde(default = "d_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "d_page_size")]
    pub page_size: u32,
    /// Search timeout; defaults to `poll_interval_ms / 2` when absent.
    #[serde(default)]
    pub search_timeout_ms: Option<u64>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: d_ldap_url(),
            bind_dn: d_bind_dn(),
            bind_password_env: d_bind_password_env(),
            search_base: d_search_base(),
            poll_interval_ms: d_poll_interval_ms(),
            page_size: d_page_size(),
            search_timeout_ms: None,
        }
    }
}

impl DirectoryConfig {
    pub fn search_timeout_ms(&self) -> u64 {
        self.search_timeout_ms
            .unwrap_or(self.poll_interval_ms / 2)
    }
}

fn d_ldap_url() -> String {
    "ldaps://127.0.0.1:636".into()
}
fn d_bind_dn() -> String {
    "cn=root".into()
}
fn d_bind_password_env() -> String {
    "IDG_DIRECTORY_PASSWORD".into()
}
fn d_search_base() -> String {
    "cn=changelog".into()
}
fn d_poll_interval_ms() -> u64 {
    1_000
}
fn d_page_size() -> u32 {
    1_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SigV4 (components E, F, G)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigV4Config {
    #[serde(default = "d_skew_seconds")]
    pub max_skew_seconds: i64,
    /// Env var holding a JSON map of `keyId -> secret` used to validate
    /// session tokens (§6 "Session token"). The secrets themselves never
    /// live in the config file.
    #[serde(default = "d_session_keys_env")]
    pub session_token_keys_env: String,
}

impl Default for SigV4Config {
    fn default() -> Self {
        Self {
            max_skew_seconds: d_skew_seconds(),
            session_token_keys_env: d_session_keys_env(),
        }
    }
}

fn d_skew_seconds() -> i64 {
    15 * 60
}
fn d_session_keys_env() -> String {
    "IDG_SESSION_TOKEN_KEYS".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Read and parse the JSON config file at `path` (§6 "Config is read
    /// once from a JSON file at startup").
    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.directory.page_size == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "directory.page_size".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.directory.poll_interval_ms == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "directory.poll_interval_ms".into(),
                message: "must be greater than zero".into(),
            });
        }
        if std::env::var(&self.directory.bind_password_env).is_err() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "directory.bind_password_env".into(),
                message: format!(
                    "{} is not set; directory bind will fail",
                    self.directory.bind_password_env
                ),
            });
        }
        if std::env::var(&self.server.api_token_env).is_err() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.api_token_env".into(),
                message: format!(
                    "{} is not set; verify endpoints run unauthenticated",
                    self.server.api_token_env
                ),
            });
        }
        if self.sigv4.max_skew_seconds <= 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "sigv4.max_skew_seconds".into(),
                message: "must be positive".into(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses_from_empty_json() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.directory.page_size, 1000);
        assert_eq!(cfg.sigv4.max_skew_seconds, 900);
    }

    #[test]
    fn search_timeout_defaults_to_half_poll_interval() {
        let cfg = DirectoryConfig::default();
        assert_eq!(cfg.search_timeout_ms(), cfg.poll_interval_ms / 2);
    }

    #[test]
    fn zero_page_size_is_an_error() {
        let mut cfg = Config::default();
        cfg.directory.page_size = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "directory.page_size"));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.server.port, cfg.server.port);
    }
}
