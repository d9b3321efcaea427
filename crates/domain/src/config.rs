//! Gateway configuration: TOML file plus environment overrides.
//!
//! Secrets (vault master key, JWT signing secret, redis password) are read
//! from the environment only, never from the config file:
//!
//! | variable | meaning |
//! |---|---|
//! | `HOPGATE_VAULT_MASTER_KEY` | 32+ bytes, hex / base64 / raw |
//! | `HOPGATE_JWT_SECRET`       | HS256 signing secret, >= 32 bytes |
//! | `HOPGATE_REDIS_ADDR`       | host:port of the cache server |
//! | `HOPGATE_REDIS_PASSWORD`   | optional AUTH password |
//! | `HOPGATE_REDIS_TLS`        | `1`/`true` wraps the connection in TLS |
//! | `HOPGATE_PORT`             | listen port override |
//! | `HOPGATE_RECORDING_ROOT`   | recording blob root override |

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Origins allowed for CORS and websocket upgrades, in addition to
    /// same-host and loopback which are always allowed.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            allowed_origins: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret. Loaded from `HOPGATE_JWT_SECRET`; never stored
    /// in the config file.
    #[serde(skip)]
    pub jwt_secret: Vec<u8>,
    #[serde(default = "d_issuer")]
    pub issuer: String,
    /// Access-token lifetime in seconds.
    #[serde(default = "d_access_ttl")]
    pub access_ttl_secs: u64,
    /// Refresh-session lifetime in seconds.
    #[serde(default = "d_refresh_ttl")]
    pub refresh_ttl_secs: u64,
    /// Byte length of generated refresh tokens.
    #[serde(default = "d_refresh_bytes")]
    pub refresh_token_bytes: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: Vec::new(),
            issuer: d_issuer(),
            access_ttl_secs: d_access_ttl(),
            refresh_ttl_secs: d_refresh_ttl(),
            refresh_token_bytes: d_refresh_bytes(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vault
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VaultConfig {
    /// Master key bytes. Loaded from `HOPGATE_VAULT_MASTER_KEY`.
    #[serde(skip)]
    pub master_key: Vec<u8>,
    /// Optional explicit salt (base64). When absent the working-key salt is
    /// derived from the master key so restarts reproduce the same key.
    #[serde(default)]
    pub salt_b64: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "d_redis_addr")]
    pub addr: String,
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: u32,
    #[serde(default)]
    pub tls: CacheTlsConfig,
    /// Namespace token prepended once to every key.
    #[serde(default = "d_key_prefix")]
    pub key_prefix: String,
    /// Fallback per-command timeout in milliseconds when the caller supplies
    /// no deadline.
    #[serde(default = "d_cache_timeout")]
    pub command_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            addr: d_redis_addr(),
            password: None,
            db: 0,
            tls: CacheTlsConfig::default(),
            key_prefix: d_key_prefix(),
            command_timeout_ms: d_cache_timeout(),
        }
    }
}

/// TLS settings for the cache connection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheTlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// SNI name presented to the server. Falls back to the host part of
    /// `addr`.
    #[serde(default)]
    pub server_name: Option<String>,
    /// Extra PEM root certificate, for caches behind a private CA.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recording
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Root directory for recording blobs. Rows store paths relative to it.
    #[serde(default = "d_recording_root")]
    pub root: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root: d_recording_root(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Maintenance
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// 5-field cron specs. `@hourly`, `@daily` and `@weekly` shorthands are
    /// accepted and expanded at load time.
    #[serde(default = "d_sessions_spec")]
    pub sessions_spec: String,
    #[serde(default = "d_audit_spec")]
    pub audit_spec: String,
    #[serde(default = "d_tokens_spec")]
    pub tokens_spec: String,
    #[serde(default = "d_vault_spec")]
    pub vault_spec: String,
    #[serde(default = "d_recordings_spec")]
    pub recordings_spec: String,
    #[serde(default = "d_audit_retention")]
    pub audit_retention_days: u32,
    /// Timezone the cron specs are evaluated in.
    #[serde(default = "d_timezone")]
    pub timezone: String,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sessions_spec: d_sessions_spec(),
            audit_spec: d_audit_spec(),
            tokens_spec: d_tokens_spec(),
            vault_spec: d_vault_spec(),
            recordings_spec: d_recordings_spec(),
            audit_retention_days: d_audit_retention(),
            timezone: d_timezone(),
        }
    }
}

/// Expand `@hourly` / `@daily` / `@weekly` to plain 5-field specs.
/// Anything else is returned untouched.
pub fn expand_cron_shorthand(spec: &str) -> String {
    match spec.trim() {
        "@hourly" => "0 * * * *".to_string(),
        "@daily" => "0 3 * * *".to_string(),
        "@weekly" => "0 4 * * 0".to_string(),
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Secret decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Minimum acceptable master-key / JWT-secret length in bytes.
pub const MIN_SECRET_BYTES: usize = 32;

/// Decode a secret from the environment. Accepts hex, standard base64, or
/// raw bytes; surrounding whitespace is trimmed. Decoded forms win only when
/// they still carry enough entropy, otherwise the raw form is used.
pub fn decode_secret(raw: &str) -> Option<Vec<u8>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.len() % 2 == 0 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(trimmed) {
            if bytes.len() >= MIN_SECRET_BYTES {
                return Some(bytes);
            }
        }
    }

    if let Ok(bytes) = BASE64.decode(trimmed) {
        if bytes.len() >= MIN_SECRET_BYTES {
            return Some(bytes);
        }
    }

    let bytes = trimmed.as_bytes().to_vec();
    (bytes.len() >= MIN_SECRET_BYTES).then_some(bytes)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading & validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
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

fn issue(severity: ConfigSeverity, field: &str, message: impl Into<String>) -> ConfigIssue {
    ConfigIssue {
        severity,
        field: field.into(),
        message: message.into(),
    }
}

impl Config {
    /// Apply environment overrides. `env` is injectable so tests don't touch
    /// the process environment.
    pub fn apply_env(&mut self, env: &HashMap<String, String>) {
        if let Some(raw) = env.get("HOPGATE_VAULT_MASTER_KEY") {
            if let Some(key) = decode_secret(raw) {
                self.vault.master_key = key;
            }
        }
        if let Some(raw) = env.get("HOPGATE_JWT_SECRET") {
            if let Some(secret) = decode_secret(raw) {
                self.auth.jwt_secret = secret;
            }
        }
        if let Some(addr) = env.get("HOPGATE_REDIS_ADDR") {
            if !addr.trim().is_empty() {
                self.cache.addr = addr.trim().to_string();
            }
        }
        if let Some(password) = env.get("HOPGATE_REDIS_PASSWORD") {
            if !password.is_empty() {
                self.cache.password = Some(password.clone());
            }
        }
        if let Some(raw) = env.get("HOPGATE_REDIS_TLS") {
            self.cache.tls.enabled = matches!(raw.trim(), "1" | "true" | "yes");
        }
        if let Some(port) = env.get("HOPGATE_PORT").and_then(|p| p.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(root) = env.get("HOPGATE_RECORDING_ROOT") {
            if !root.trim().is_empty() {
                self.recording.root = PathBuf::from(root.trim());
            }
        }

        self.maintenance.sessions_spec = expand_cron_shorthand(&self.maintenance.sessions_spec);
        self.maintenance.audit_spec = expand_cron_shorthand(&self.maintenance.audit_spec);
        self.maintenance.tokens_spec = expand_cron_shorthand(&self.maintenance.tokens_spec);
        self.maintenance.vault_spec = expand_cron_shorthand(&self.maintenance.vault_spec);
        self.maintenance.recordings_spec =
            expand_cron_shorthand(&self.maintenance.recordings_spec);
    }

    /// Load from an optional TOML file, then overlay the real process
    /// environment.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, String> {
        let mut config: Config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| format!("reading {}: {e}", p.display()))?;
                toml::from_str(&raw).map_err(|e| format!("parsing {}: {e}", p.display()))?
            }
            None => Config::default(),
        };
        let env: HashMap<String, String> = std::env::vars().collect();
        config.apply_env(&env);
        Ok(config)
    }

    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(issue(
                ConfigSeverity::Error,
                "server.port",
                "port must be greater than 0",
            ));
        }
        if self.server.host.is_empty() {
            issues.push(issue(
                ConfigSeverity::Error,
                "server.host",
                "host must not be empty",
            ));
        }

        if self.auth.jwt_secret.len() < MIN_SECRET_BYTES {
            issues.push(issue(
                ConfigSeverity::Error,
                "auth.jwt_secret",
                format!(
                    "HOPGATE_JWT_SECRET must carry at least {MIN_SECRET_BYTES} bytes"
                ),
            ));
        }
        if self.auth.access_ttl_secs == 0 {
            issues.push(issue(
                ConfigSeverity::Error,
                "auth.access_ttl_secs",
                "access-token TTL must be greater than 0",
            ));
        }
        if self.auth.refresh_token_bytes < 16 {
            issues.push(issue(
                ConfigSeverity::Error,
                "auth.refresh_token_bytes",
                "refresh tokens must carry at least 16 bytes",
            ));
        }

        if self.vault.master_key.len() < MIN_SECRET_BYTES {
            issues.push(issue(
                ConfigSeverity::Error,
                "vault.master_key",
                format!(
                    "HOPGATE_VAULT_MASTER_KEY must carry at least {MIN_SECRET_BYTES} bytes"
                ),
            ));
        }

        if self.cache.addr.is_empty() {
            issues.push(issue(
                ConfigSeverity::Error,
                "cache.addr",
                "cache address must not be empty",
            ));
        }
        if self.cache.key_prefix.is_empty() {
            issues.push(issue(
                ConfigSeverity::Warning,
                "cache.key_prefix",
                "empty key prefix shares the keyspace with other tenants",
            ));
        }

        for (field, spec) in [
            ("maintenance.sessions_spec", &self.maintenance.sessions_spec),
            ("maintenance.audit_spec", &self.maintenance.audit_spec),
            ("maintenance.tokens_spec", &self.maintenance.tokens_spec),
            ("maintenance.vault_spec", &self.maintenance.vault_spec),
            (
                "maintenance.recordings_spec",
                &self.maintenance.recordings_spec,
            ),
        ] {
            let expanded = expand_cron_shorthand(spec);
            if expanded.split_whitespace().count() != 5 {
                issues.push(issue(
                    ConfigSeverity::Error,
                    field,
                    format!("\"{spec}\" is not a 5-field cron spec"),
                ));
            }
        }

        if self.maintenance.audit_retention_days == 0 {
            issues.push(issue(
                ConfigSeverity::Warning,
                "maintenance.audit_retention_days",
                "retention of 0 days purges audit logs on every sweep",
            ));
        }

        if self.recording.enabled && self.recording.root.as_os_str().is_empty() {
            issues.push(issue(
                ConfigSeverity::Error,
                "recording.root",
                "recording root must be set when recording is enabled",
            ));
        }

        issues
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8443
}
fn d_issuer() -> String {
    "hopgate".into()
}
fn d_access_ttl() -> u64 {
    15 * 60
}
fn d_refresh_ttl() -> u64 {
    30 * 24 * 60 * 60
}
fn d_refresh_bytes() -> usize {
    32
}
fn d_redis_addr() -> String {
    "127.0.0.1:6379".into()
}
fn d_key_prefix() -> String {
    "hopgate".into()
}
fn d_cache_timeout() -> u64 {
    2_000
}
fn d_recording_root() -> PathBuf {
    PathBuf::from("./data/recordings")
}
fn d_sessions_spec() -> String {
    "@hourly".into()
}
fn d_audit_spec() -> String {
    "@daily".into()
}
fn d_tokens_spec() -> String {
    "@daily".into()
}
fn d_vault_spec() -> String {
    "@weekly".into()
}
fn d_recordings_spec() -> String {
    "@daily".into()
}
fn d_audit_retention() -> u32 {
    90
}
fn d_timezone() -> String {
    "UTC".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn master_key_accepts_hex() {
        let hex_key = "ab".repeat(32);
        let decoded = decode_secret(&hex_key).expect("hex key decodes");
        assert_eq!(decoded.len(), 32);
        assert_eq!(decoded[0], 0xab);
    }

    #[test]
    fn master_key_accepts_base64() {
        let key = BASE64.encode([7u8; 32]);
        let decoded = decode_secret(&key).expect("base64 key decodes");
        assert_eq!(decoded, vec![7u8; 32]);
    }

    #[test]
    fn master_key_accepts_raw_with_whitespace() {
        let raw = format!("  {}\n", "x".repeat(40));
        let decoded = decode_secret(&raw).expect("raw key accepted");
        assert_eq!(decoded.len(), 40);
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(decode_secret("tooshort").is_none());
        assert!(decode_secret("").is_none());
    }

    #[test]
    fn cron_shorthands_expand() {
        assert_eq!(expand_cron_shorthand("@hourly"), "0 * * * *");
        assert_eq!(expand_cron_shorthand("@daily"), "0 3 * * *");
        assert_eq!(expand_cron_shorthand("@weekly"), "0 4 * * 0");
        assert_eq!(expand_cron_shorthand("*/5 * * * *"), "*/5 * * * *");
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        // The JWT secret contains '!' so neither hex nor base64 claims it.
        config.apply_env(&env(&[
            ("HOPGATE_VAULT_MASTER_KEY", &"ef".repeat(32)),
            ("HOPGATE_JWT_SECRET", &"s!".repeat(24)),
            ("HOPGATE_PORT", "9000"),
            ("HOPGATE_REDIS_ADDR", "cache.internal:6380"),
        ]));
        assert_eq!(config.vault.master_key.len(), 32);
        assert_eq!(config.auth.jwt_secret.len(), 48);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.cache.addr, "cache.internal:6380");
        // Shorthands expanded during apply_env.
        assert_eq!(config.maintenance.sessions_spec, "0 * * * *");
    }

    #[test]
    fn redis_tls_env_toggle() {
        let mut config = Config::default();
        assert!(!config.cache.tls.enabled);

        config.apply_env(&env(&[("HOPGATE_REDIS_TLS", "true")]));
        assert!(config.cache.tls.enabled);

        config.apply_env(&env(&[("HOPGATE_REDIS_TLS", "0")]));
        assert!(!config.cache.tls.enabled);
    }

    #[test]
    fn validate_flags_missing_secrets() {
        let config = Config::default();
        let issues = config.validate();
        let errors: Vec<&str> = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .map(|i| i.field.as_str())
            .collect();
        assert!(errors.contains(&"auth.jwt_secret"));
        assert!(errors.contains(&"vault.master_key"));
    }

    #[test]
    fn validate_accepts_complete_config() {
        let mut config = Config::default();
        config.apply_env(&env(&[
            ("HOPGATE_VAULT_MASTER_KEY", &"ab".repeat(32)),
            ("HOPGATE_JWT_SECRET", &"s".repeat(32)),
        ]));
        let errors = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .count();
        assert_eq!(errors, 0);
    }

    #[test]
    fn toml_round_trip_preserves_sections() {
        let toml_src = r#"
            [server]
            host = "0.0.0.0"
            port = 8080

            [maintenance]
            audit_retention_days = 30
            tokens_spec = "@hourly"
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.maintenance.audit_retention_days, 30);
        assert_eq!(config.maintenance.tokens_spec, "@hourly");
        // Untouched sections keep defaults.
        assert_eq!(config.auth.access_ttl_secs, 15 * 60);
    }
}
