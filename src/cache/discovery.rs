//! Service discovery cache.
//!
//! Resolves, per upstream hostname, where that host serves its native
//! provider registry API (`providers.v1` in
//! `https://{hostname}/.well-known/terraform.json`) and remembers the
//! answer for a configurable TTL.
//!
//! # Architecture
//!
//! - Resolved records live in a moka cache with `time_to_live`, keyed on
//!   hostname. Failures are never cached; the next lookup fetches afresh.
//! - Lookups that miss attach to a per-hostname shared future. The fetch
//!   itself runs on its own task, so N concurrent callers produce exactly
//!   one upstream request, and a caller that stops waiting (its future is
//!   dropped or times out) affects neither the fetch nor the other waiters.
//! - The in-flight map and the record table are only touched together
//!   under the in-flight lock, so a waiter never observes a finished fetch
//!   whose record has not been published yet.
//! - No retries here; retry policy belongs to [`UpstreamClient`](crate::upstream::UpstreamClient).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use moka::sync::Cache;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::telemetry;
use crate::types::validate_path_component;
use crate::{Result, SpeculumError};

/// Path of the discovery document on every registry host.
pub const WELL_KNOWN_PATH: &str = "/.well-known/terraform.json";

/// A resolved discovery document for one host.
#[derive(Debug, Clone)]
pub struct DiscoveryRecord {
    /// Host the document was fetched from.
    pub hostname: String,
    /// The `providers.v1` value exactly as advertised.
    pub providers_v1: String,
    /// Absolute base URL of the providers API, without trailing `/`.
    pub providers_url: String,
    /// When the document was fetched.
    pub cached_at: Instant,
}

/// Configuration for the discovery cache.
///
/// ```rust
/// # use speculum::DiscoveryConfig;
/// # use std::time::Duration;
/// let config = DiscoveryConfig::new()
///     .max_entries(500)
///     .ttl(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Maximum number of cached hosts. Default: 1,000.
    pub max_entries: u64,
    /// How long a discovery record stays valid. Default: 1 hour.
    pub ttl: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl DiscoveryConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached hosts.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the time-to-live for discovery records.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[derive(Deserialize)]
struct ServiceDiscoveryDocument {
    #[serde(rename = "providers.v1", default)]
    providers_v1: String,
}

type FetchOutcome = std::result::Result<DiscoveryRecord, Arc<SpeculumError>>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct DiscoveryTable {
    records: Cache<String, DiscoveryRecord>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

impl DiscoveryTable {
    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, SharedFetch>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// TTL cache of service discovery records with single-flight lookups.
///
/// Cheap to share behind an `Arc`; one instance per process.
pub struct DiscoveryCache {
    table: Arc<DiscoveryTable>,
    client: reqwest::Client,
    scheme: String,
}

impl DiscoveryCache {
    /// Create a cache that fetches over `https` with the given client.
    pub fn new(config: &DiscoveryConfig, client: reqwest::Client) -> Self {
        Self::with_scheme(config, client, "https")
    }

    /// Create a cache that fetches discovery documents over `scheme`.
    pub fn with_scheme(
        config: &DiscoveryConfig,
        client: reqwest::Client,
        scheme: impl Into<String>,
    ) -> Self {
        let records = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();
        Self {
            table: Arc::new(DiscoveryTable {
                records,
                in_flight: Mutex::new(HashMap::new()),
            }),
            client,
            scheme: scheme.into(),
        }
    }

    /// Resolve the providers API for `hostname`.
    ///
    /// Served from cache while the record is younger than the TTL. Otherwise
    /// joins the in-flight fetch for the host, or starts one.
    /// A hostname that is not a safe URL component is rejected before any
    /// request is made.
    pub async fn discover(&self, hostname: &str) -> Result<DiscoveryRecord> {
        validate_path_component("hostname", hostname)?;
        let fetch = {
            let mut in_flight = self.table.lock_in_flight();
            if let Some(record) = self.table.records.get(hostname) {
                debug!(
                    hostname,
                    providers_v1 = %record.providers_v1,
                    "using cached service discovery"
                );
                return Ok(record);
            }
            match in_flight.get(hostname) {
                Some(fetch) => {
                    metrics::counter!(telemetry::DISCOVERY_COALESCED_TOTAL).increment(1);
                    debug!(hostname, "joining in-flight service discovery");
                    fetch.clone()
                }
                None => {
                    let fetch = self.spawn_fetch(hostname);
                    in_flight.insert(hostname.to_owned(), fetch.clone());
                    fetch
                }
            }
        };

        fetch.await.map_err(|reason| SpeculumError::Discovery {
            hostname: hostname.to_owned(),
            reason,
        })
    }

    /// The cached record for `hostname`, if present and unexpired.
    pub fn cached(&self, hostname: &str) -> Option<DiscoveryRecord> {
        self.table.records.get(hostname)
    }

    /// Evict every record.
    pub fn clear(&self) {
        self.table.records.invalidate_all();
    }

    /// Evict the record for one host, forcing rediscovery.
    pub fn clear_host(&self, hostname: &str) {
        self.table.records.invalidate(hostname);
    }

    /// Start the upstream fetch for `hostname` on its own task.
    ///
    /// Must be called with the in-flight lock held; the task takes the same
    /// lock to publish its result, which orders it after the insertion.
    fn spawn_fetch(&self, hostname: &str) -> SharedFetch {
        let table = Arc::clone(&self.table);
        let client = self.client.clone();
        let scheme = self.scheme.clone();
        let host = hostname.to_owned();

        let handle = tokio::spawn(async move {
            let outcome = fetch_record(&client, &scheme, &host).await;
            let label = match &outcome {
                Ok(_) => "ok",
                Err(SpeculumError::InvalidDiscovery(_)) => "invalid",
                Err(_) => "error",
            };
            metrics::counter!(telemetry::DISCOVERY_FETCHES_TOTAL, "outcome" => label).increment(1);

            let mut in_flight = table.lock_in_flight();
            if let Ok(record) = &outcome {
                table.records.insert(host.clone(), record.clone());
            }
            in_flight.remove(&host);
            outcome.map_err(Arc::new)
        });

        let table = Arc::clone(&self.table);
        let host = hostname.to_owned();
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    table.lock_in_flight().remove(&host);
                    Err(Arc::new(SpeculumError::Http(format!(
                        "discovery task failed: {e}"
                    ))))
                }
            }
        }
        .boxed()
        .shared()
    }
}

async fn fetch_record(
    client: &reqwest::Client,
    scheme: &str,
    hostname: &str,
) -> Result<DiscoveryRecord> {
    let url = format!("{scheme}://{hostname}{WELL_KNOWN_PATH}");
    debug!(hostname, %url, "discovering services from .well-known");

    let response = client.get(&url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SpeculumError::UpstreamStatus {
            status: status.as_u16(),
            url,
        });
    }
    let body = response.bytes().await?;
    let document: ServiceDiscoveryDocument =
        serde_json::from_slice(&body).map_err(|source| SpeculumError::Decode {
            what: "service discovery",
            source,
        })?;

    validate_providers_endpoint(&document.providers_v1)?;
    let providers_url = resolve_providers_url(scheme, hostname, &document.providers_v1);
    debug!(hostname, %providers_url, "discovered service endpoints");

    Ok(DiscoveryRecord {
        hostname: hostname.to_owned(),
        providers_v1: document.providers_v1,
        providers_url,
        cached_at: Instant::now(),
    })
}

/// Check an advertised `providers.v1` value.
///
/// Must be non-empty and free of control characters and spaces. An absolute
/// URL must use `http`/`https` and name a host; anything else must be a path.
pub fn validate_providers_endpoint(endpoint: &str) -> Result<()> {
    if endpoint.is_empty() {
        return Err(SpeculumError::InvalidDiscovery(
            "providers.v1 is empty".to_string(),
        ));
    }
    if endpoint.chars().any(|c| c.is_control() || c == ' ') {
        return Err(SpeculumError::InvalidDiscovery(format!(
            "providers.v1 contains control characters or spaces: {endpoint:?}"
        )));
    }
    match Url::parse(endpoint) {
        Ok(url) => {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(SpeculumError::InvalidDiscovery(format!(
                    "providers.v1 must use http or https, got {:?}",
                    url.scheme()
                )));
            }
            if url.host_str().is_none_or(str::is_empty) {
                return Err(SpeculumError::InvalidDiscovery(format!(
                    "providers.v1 has no host: {endpoint:?}"
                )));
            }
            Ok(())
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(()),
        Err(e) => Err(SpeculumError::InvalidDiscovery(format!(
            "providers.v1 is not a valid URL ({e}): {endpoint:?}"
        ))),
    }
}

/// Turn a validated `providers.v1` value into an absolute base URL.
fn resolve_providers_url(scheme: &str, hostname: &str, endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_owned()
    } else if endpoint.is_empty() || endpoint.starts_with('/') {
        format!("{scheme}://{hostname}{endpoint}")
    } else {
        format!("{scheme}://{hostname}/{endpoint}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_relative_paths() {
        assert!(validate_providers_endpoint("/v1/providers/").is_ok());
        assert!(validate_providers_endpoint("v1/providers").is_ok());
    }

    #[test]
    fn accepts_absolute_http_urls() {
        assert!(validate_providers_endpoint("https://registry.example.com/v1/providers/").is_ok());
        assert!(validate_providers_endpoint("http://127.0.0.1:8080/providers").is_ok());
    }

    #[test]
    fn rejects_empty_endpoint() {
        assert!(matches!(
            validate_providers_endpoint(""),
            Err(SpeculumError::InvalidDiscovery(_))
        ));
    }

    #[test]
    fn rejects_spaces_and_control_characters() {
        for endpoint in ["/v1/pro viders/", "/v1/providers/\n", "/v1/\u{7f}providers"] {
            assert!(
                validate_providers_endpoint(endpoint).is_err(),
                "{endpoint:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_non_http_schemes() {
        for endpoint in ["ftp://registry.example.com/v1/providers", "file:///etc/passwd"] {
            assert!(
                validate_providers_endpoint(endpoint).is_err(),
                "{endpoint:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_absolute_url_without_host() {
        assert!(validate_providers_endpoint("http://").is_err());
    }

    #[test]
    fn resolves_relative_path_against_host() {
        assert_eq!(
            resolve_providers_url("https", "registry.terraform.io", "/v1/providers/"),
            "https://registry.terraform.io/v1/providers"
        );
        assert_eq!(
            resolve_providers_url("https", "registry.terraform.io", "v1/providers"),
            "https://registry.terraform.io/v1/providers"
        );
    }

    #[test]
    fn keeps_absolute_url() {
        assert_eq!(
            resolve_providers_url("https", "registry.example.com", "https://api.example.com/v1/providers/"),
            "https://api.example.com/v1/providers"
        );
    }

    #[test]
    fn root_path_resolves_to_host() {
        assert_eq!(
            resolve_providers_url("http", "localhost:8080", "/"),
            "http://localhost:8080"
        );
    }

    #[test]
    fn config_builder_pattern() {
        let config = DiscoveryConfig::new()
            .max_entries(500)
            .ttl(Duration::from_secs(60));
        assert_eq!(config.max_entries, 500);
        assert_eq!(config.ttl, Duration::from_secs(60));
    }
}
