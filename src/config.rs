use figment::{Figment, providers::{Env, Format, Yaml}};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grace period injected by the mutating webhook when no override is
/// configured: one Julian year, in seconds.
pub const DEFAULT_GRACE_PERIOD_SECONDS: i64 = 31_556_952;

/// Unprefixed environment variable overriding `grace_period_seconds`.
pub const GRACE_PERIOD_ENV: &str = "GRACE_PERIOD_SECONDS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid {GRACE_PERIOD_ENV} value '{value}': {source}")]
    InvalidGracePeriod {
        value: String,
        source: std::num::ParseIntError,
    },
}

fn default_listen_addr() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_tls_cert_path() -> String {
    "/certs/tls.crt".to_string()
}

fn default_tls_key_path() -> String {
    "/certs/tls.key".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_grace_period_seconds() -> i64 {
    DEFAULT_GRACE_PERIOD_SECONDS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_tls_cert_path")]
    pub tls_cert_path: String,
    #[serde(default = "default_tls_key_path")]
    pub tls_key_path: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Value written into `terminationGracePeriodSeconds` by the mutating
    /// webhook, regardless of what the object carried.
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: i64,
}

impl GuardConfig {
    /// Loads the YAML config file (if present), then `GRACEGUARD_`-prefixed
    /// environment variables, then the bare `GRACE_PERIOD_SECONDS` override.
    /// An unparseable override is fatal; it never falls back silently.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut config: GuardConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("GRACEGUARD_").split("__"))
            .extract()
            .map_err(Box::new)?;

        if let Ok(raw) = std::env::var(GRACE_PERIOD_ENV) {
            config.grace_period_seconds = parse_grace_period(&raw)?;
        }

        Ok(config)
    }
}

fn parse_grace_period(raw: &str) -> Result<i64, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|source| ConfigError::InvalidGracePeriod {
            value: raw.to_string(),
            source,
        })
}
