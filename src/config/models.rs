// src/config/models.rs
use serde::Deserialize;
use std::time::Duration;

fn default_listen_port() -> u16 {
    8080
}

fn default_probe_timeout_secs() -> u64 {
    2
}

fn default_probe_path() -> String {
    "/healthcheck".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    pub backends: Vec<BackendConfig>,
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// One backend descriptor. The URL stays a raw string here so that a bad
/// address surfaces as a `ConfigError` from the registry, not a serde error.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub url: String,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_path")]
    pub path: String,
    /// Health flag every backend starts with, before its first probe lands.
    #[serde(default = "default_true")]
    pub assume_healthy_on_start: bool,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            timeout_secs: default_probe_timeout_secs(),
            path: default_probe_path(),
            assume_healthy_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ProxyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no backends configured")]
    NoBackends,

    #[error("duplicate backend name: {0}")]
    DuplicateName(String),

    #[error("backend name must not be empty")]
    EmptyName,

    #[error("invalid address for backend {name}: {reason}")]
    InvalidAddress { name: String, reason: String },

    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),

    #[error("health check path must start with '/': {0}")]
    InvalidProbePath(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        if self.health_check.interval_secs == 0 {
            return Err(ConfigError::NonPositive("health_check.interval_secs"));
        }
        if self.health_check.timeout_secs == 0 {
            return Err(ConfigError::NonPositive("health_check.timeout_secs"));
        }
        if !self.health_check.path.starts_with('/') {
            return Err(ConfigError::InvalidProbePath(self.health_check.path.clone()));
        }
        if self.proxy.request_timeout_secs == 0 {
            return Err(ConfigError::NonPositive("proxy.request_timeout_secs"));
        }
        Ok(())
    }
}
