//! Configuration loading for speculumd.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.speculum/config.toml` (user)
//! 3. `/etc/speculum/config.toml` (system)
//!
//! Without any file the built-in defaults apply. Command-line flags and
//! `SPECULUM_*` environment variables override file values (see the
//! daemon's `--help`).

use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use super::ServerOptions;
use crate::cache::DiscoveryConfig;
use crate::upstream::{RetryConfig, UpstreamConfig};
use crate::{Result, SpeculumError};

/// Daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Listener and public URL.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0:8080).
    #[serde(default = "default_address")]
    pub address: String,
    /// Public URL of the `/terraform/providers` root. Archive URLs in
    /// served version documents are built on it.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Deadline for answering one request, in seconds (default: 120).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// How long connections may drain on shutdown, in seconds (default: 30).
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8080/terraform/providers".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Which [`Storage`](crate::storage::Storage) backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Filesystem,
    Memory,
}

/// Cache backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,
    /// Cache root for the filesystem backend (default: /var/cache/speculum).
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::default(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/cache/speculum")
}

/// Upstream request behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    /// Per-request timeout in seconds (default: 60).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Retries after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Service discovery cache TTL in seconds (default: 3600).
    #[serde(default = "default_discovery_ttl")]
    pub discovery_ttl_secs: u64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            discovery_ttl_secs: default_discovery_ttl(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_discovery_ttl() -> u64 {
    3600
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default level: debug, info, warn or error (default: info).
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Prometheus export.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Install a recorder and serve `/metrics` (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

const LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided, must exist)
    /// 2. `~/.speculum/config.toml`
    /// 3. `/etc/speculum/config.toml`
    /// 4. Built-in defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => {
                let content = fs::read_to_string(&path).map_err(|e| {
                    SpeculumError::Configuration(format!(
                        "Failed to read config file {path:?}: {e}"
                    ))
                })?;
                Self::parse(&content).map_err(|e| {
                    SpeculumError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
                })
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse a TOML document. Missing sections and fields take defaults.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SpeculumError::Configuration(e.to_string()))
    }

    /// Resolve the config file path; `None` when no file exists.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(SpeculumError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".speculum").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/speculum/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Check every setting, reporting all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.server.address.parse::<SocketAddr>().is_err() {
            problems.push(format!(
                "server.address {:?} is not a socket address",
                self.server.address
            ));
        }
        match Url::parse(&self.server.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
            _ => problems.push(format!(
                "server.base_url {:?} must be an absolute http(s) URL",
                self.server.base_url
            )),
        }
        if self.storage.kind == StorageKind::Filesystem
            && self.storage.cache_dir.as_os_str().is_empty()
        {
            problems.push("storage.cache_dir is required for filesystem storage".to_string());
        }
        if self.server.request_timeout_secs == 0 {
            problems.push("server.request_timeout_secs must be positive".to_string());
        }
        if self.server.shutdown_timeout_secs == 0 {
            problems.push("server.shutdown_timeout_secs must be positive".to_string());
        }
        if self.upstream.timeout_secs == 0 {
            problems.push("upstream.timeout_secs must be positive".to_string());
        }
        if self.upstream.discovery_ttl_secs == 0 {
            problems.push("upstream.discovery_ttl_secs must be positive".to_string());
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            problems.push(format!(
                "logging.level {:?} must be one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SpeculumError::Configuration(format!(
                "invalid configuration: {}",
                problems.join("; ")
            )))
        }
    }

    /// Serving options from the `[server]` section. The metrics handle is
    /// attached by the caller once a recorder is installed.
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions::new()
            .request_timeout(Duration::from_secs(self.server.request_timeout_secs))
            .shutdown_timeout(Duration::from_secs(self.server.shutdown_timeout_secs))
    }

    /// Upstream client settings derived from the `[upstream]` section.
    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig::new()
            .timeout(Duration::from_secs(self.upstream.timeout_secs))
            .retry(RetryConfig::new().max_retries(self.upstream.max_retries))
            .discovery(
                DiscoveryConfig::new().ttl(Duration::from_secs(self.upstream.discovery_ttl_secs)),
            )
    }
}
