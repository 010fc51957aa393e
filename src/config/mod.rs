//! Configuration management for ghmigrate
//!
//! Configuration comes from a TOML file or from environment variables.
//! Every section has defaults, so a file only needs the keys it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::discovery::github::{DEFAULT_ADO_URL, DEFAULT_GITHUB_API_URL};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP API server
    pub server: ServerConfig,

    /// Persistence
    pub database: DatabaseConfig,

    /// Job supervision
    pub jobs: JobsConfig,

    /// Source platform access
    pub source: SourceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Enable CORS for the API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path; `:memory:` keeps everything in process
    pub sqlite_path: PathBuf,
}

/// Job supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// In-progress records untouched for this long, with no local job,
    /// are marked failed. 0 disables the sweep.
    pub stale_job_timeout_secs: u64,

    /// How often the sweep runs
    pub reconcile_interval_secs: u64,

    /// How long shutdown waits for cancelled jobs to finalize
    pub shutdown_grace_secs: u64,
}

/// Source platform configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// GitHub REST/GraphQL base URL (GHES: `https://host/api/v3`)
    pub github_api_url: String,

    /// GitHub token
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Azure DevOps base URL
    pub ado_url: String,

    /// Azure DevOps personal access token
    #[serde(skip_serializing)]
    pub ado_token: Option<String>,

    /// Rate limit (requests per second)
    pub requests_per_second: u32,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Retries for 429 and 5xx responses
    pub max_retries: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or an EnvFilter directive
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_address = env_or("GHMIGRATE_BIND_ADDRESS", defaults.server.bind_address)?;
        let sqlite_path = std::env::var("GHMIGRATE_SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database.sqlite_path);

        let stale_job_timeout_secs = env_or(
            "GHMIGRATE_STALE_JOB_TIMEOUT",
            defaults.jobs.stale_job_timeout_secs,
        )?;
        let reconcile_interval_secs = env_or(
            "GHMIGRATE_RECONCILE_INTERVAL",
            defaults.jobs.reconcile_interval_secs,
        )?;

        let github_api_url = std::env::var("GHMIGRATE_GITHUB_API_URL")
            .unwrap_or(defaults.source.github_api_url);
        let token = std::env::var("GHMIGRATE_GITHUB_TOKEN")
            .or_else(|_| std::env::var("GITHUB_TOKEN"))
            .ok();
        let ado_url = std::env::var("GHMIGRATE_ADO_URL").unwrap_or(defaults.source.ado_url);
        let ado_token = std::env::var("GHMIGRATE_ADO_TOKEN")
            .or_else(|_| std::env::var("ADO_PAT"))
            .ok();
        let requests_per_second = env_or(
            "GHMIGRATE_REQUESTS_PER_SECOND",
            defaults.source.requests_per_second,
        )?;

        let level = std::env::var("GHMIGRATE_LOG_LEVEL").unwrap_or(defaults.logging.level);
        let format = std::env::var("GHMIGRATE_LOG_FORMAT").unwrap_or(defaults.logging.format);

        Ok(Self {
            server: ServerConfig {
                bind_address,
                ..defaults.server
            },
            database: DatabaseConfig { sqlite_path },
            jobs: JobsConfig {
                stale_job_timeout_secs,
                reconcile_interval_secs,
                ..defaults.jobs
            },
            source: SourceConfig {
                github_api_url,
                token,
                ado_url,
                ado_token,
                requests_per_second,
                ..defaults.source
            },
            logging: LoggingConfig { level, format },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise from the environment.
    /// A token in the environment fills a file that has none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        if config.source.token.is_none() {
            config.source.token = std::env::var("GITHUB_TOKEN").ok();
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.requests_per_second == 0 {
            return Err(ConfigError::invalid(
                "source.requests_per_second",
                "must be greater than 0",
            ));
        }

        if self.source.timeout_secs == 0 {
            return Err(ConfigError::invalid("source.timeout_secs", "must be greater than 0"));
        }

        for (field, value) in [
            ("source.github_api_url", &self.source.github_api_url),
            ("source.ado_url", &self.source.ado_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| ConfigError::invalid(field, format!("{value}: {e}")))?;
        }

        if self.jobs.stale_job_timeout_secs > 0 && self.jobs.reconcile_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "jobs.reconcile_interval_secs",
                "must be greater than 0 when the stale job sweep is enabled",
            ));
        }

        if self.database.sqlite_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "database.sqlite_path".to_string(),
            });
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(ConfigError::invalid(
                "logging.format",
                format!("expected 'text' or 'json', got '{}'", self.logging.format),
            ));
        }

        Ok(())
    }

    /// Stale job timeout, `None` when the sweep is disabled
    #[must_use]
    pub fn stale_job_timeout(&self) -> Option<Duration> {
        (self.jobs.stale_job_timeout_secs > 0)
            .then(|| Duration::from_secs(self.jobs.stale_job_timeout_secs))
    }

    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.jobs.reconcile_interval_secs)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.jobs.shutdown_grace_secs)
    }

    /// Whether the database lives only in memory
    pub fn in_memory_database(&self) -> bool {
        self.database.sqlite_path.as_os_str() == ":memory:"
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl ServerConfig {
    /// Create a new config builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for ServerConfig
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    bind_address: Option<SocketAddr>,
    enable_cors: Option<bool>,
    enable_request_logging: Option<bool>,
}

impl ServerConfigBuilder {
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from string
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(
            addr.parse()
                .map_err(|_| ConfigError::invalid("bind_address", format!("Invalid address: {addr}")))?,
        );
        Ok(self)
    }

    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = Some(enable);
        self
    }

    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    pub fn build(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            enable_cors: self.enable_cors.unwrap_or(defaults.enable_cors),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/ghmigrate.db"),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            stale_job_timeout_secs: 0,
            reconcile_interval_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            token: None,
            ado_url: DEFAULT_ADO_URL.to_string(),
            ado_token: None,
            requests_per_second: 10,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |t: &Option<String>| t.as_ref().map(|_| "[redacted]");
        f.debug_struct("SourceConfig")
            .field("github_api_url", &self.github_api_url)
            .field("token", &redact(&self.token))
            .field("ado_url", &self.ado_url)
            .field("ado_token", &redact(&self.ado_token))
            .field("requests_per_second", &self.requests_per_second)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}
