//! speculumd: caching mirror daemon for Terraform provider registries.
//!
//! Serves the provider network mirror protocol, fetching from upstream
//! registries on demand and keeping everything it fetched.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use speculum::server::config::{Config, LogFormat, LoggingConfig, StorageKind};
use speculum::server::observability;
use speculum::storage::{FilesystemStorage, MemoryStorage, Storage};
use speculum::{Mirror, SpeculumError, UpstreamClient};

/// Caching provider registry mirror.
#[derive(Parser)]
#[command(name = "speculumd")]
#[command(version = speculum::PKG_VERSION)]
#[command(about = "Caching mirror for Terraform provider registries")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "SPECULUM_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "SPECULUM_ADDRESS")]
    address: Option<String>,

    /// Seconds allowed for answering one request.
    #[arg(long, env = "SPECULUM_REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: Option<u64>,

    /// Seconds open connections may drain on shutdown.
    #[arg(long, env = "SPECULUM_SHUTDOWN_TIMEOUT_SECS")]
    shutdown_timeout_secs: Option<u64>,

    /// Public URL of the /terraform/providers root.
    #[arg(long, env = "SPECULUM_BASE_URL")]
    base_url: Option<String>,

    /// Storage backend.
    #[arg(long, env = "SPECULUM_STORAGE", value_enum)]
    storage: Option<StorageKind>,

    /// Cache directory for filesystem storage.
    #[arg(long, env = "SPECULUM_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Log level (debug, info, warn, error).
    #[arg(long, env = "SPECULUM_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format.
    #[arg(long, env = "SPECULUM_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    /// Retries after the first upstream attempt.
    #[arg(long, env = "SPECULUM_UPSTREAM_MAX_RETRIES")]
    upstream_max_retries: Option<u32>,

    /// Upstream request timeout in seconds.
    #[arg(long, env = "SPECULUM_UPSTREAM_TIMEOUT_SECS")]
    upstream_timeout_secs: Option<u64>,

    /// Service discovery cache TTL in seconds.
    #[arg(long, env = "SPECULUM_DISCOVERY_TTL_SECS")]
    discovery_ttl_secs: Option<u64>,

    /// Serve Prometheus metrics at /metrics.
    #[arg(long, env = "SPECULUM_METRICS_ENABLED")]
    metrics_enabled: Option<bool>,
}

impl Args {
    /// Apply command-line and environment overrides on top of `config`.
    fn apply(self, config: &mut Config) {
        if let Some(address) = self.address {
            config.server.address = address;
        }
        if let Some(timeout) = self.request_timeout_secs {
            config.server.request_timeout_secs = timeout;
        }
        if let Some(timeout) = self.shutdown_timeout_secs {
            config.server.shutdown_timeout_secs = timeout;
        }
        if let Some(base_url) = self.base_url {
            config.server.base_url = base_url;
        }
        if let Some(kind) = self.storage {
            config.storage.kind = kind;
        }
        if let Some(dir) = self.cache_dir {
            config.storage.cache_dir = dir;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(retries) = self.upstream_max_retries {
            config.upstream.max_retries = retries;
        }
        if let Some(timeout) = self.upstream_timeout_secs {
            config.upstream.timeout_secs = timeout;
        }
        if let Some(ttl) = self.discovery_ttl_secs {
            config.upstream.discovery_ttl_secs = ttl;
        }
        if let Some(enabled) = self.metrics_enabled {
            config.metrics.enabled = enabled;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging)?;

    let addr: SocketAddr = config
        .server
        .address
        .parse()
        .map_err(|e| SpeculumError::Configuration(format!("Invalid address: {e}")))?;

    let storage = build_storage(&config).await?;
    let upstream = Arc::new(UpstreamClient::new(config.upstream_config())?);
    let mirror = Arc::new(Mirror::new(
        storage,
        upstream,
        config.server.base_url.as_str(),
    ));

    let mut options = config.server_options();
    if config.metrics.enabled {
        let handle = observability::install_prometheus_recorder()?;
        observability::spawn_upkeep(handle.clone());
        options = options.metrics(handle);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        version = %speculum::version_string(),
        %addr,
        base_url = %config.server.base_url,
        storage = ?config.storage.kind,
        metrics = config.metrics.enabled,
        "speculumd starting"
    );

    speculum::server::serve(listener, mirror, options, shutdown_signal()).await?;
    info!("speculumd stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

async fn build_storage(config: &Config) -> speculum::Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.storage.kind {
        StorageKind::Filesystem => {
            Arc::new(FilesystemStorage::new(config.storage.cache_dir.clone()).await?)
        }
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
    };
    Ok(storage)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining connections");
}
