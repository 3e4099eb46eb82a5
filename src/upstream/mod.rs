//! Outbound calls to upstream provider registries.
//!
//! Two protocols cooperate:
//!
//! - the **native registry API**, located through service discovery, lists
//!   every version with its platforms in one call and resolves per-platform
//!   download URLs;
//! - the **network mirror protocol**, used when discovery fails for a host,
//!   where the host serves `index.json` and `{version}.json` directly.
//!
//! Which one applies to a host is expressed as [`ProviderApi`]. Metadata
//! calls retry transport failures and 5xx responses through
//! [`with_retry()`](retry::with_retry); archive downloads retry only the
//! initial response.

pub mod retry;

pub use retry::RetryConfig;

use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::TryStreamExt;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::cache::{DiscoveryCache, DiscoveryConfig};
use crate::storage::ByteStream;
use crate::telemetry;
use crate::types::{
    BulkListing, DownloadInfo, IndexResponse, Platform, ProviderCoordinate, VersionResponse,
    validate_path_component,
};
use crate::{Result, SpeculumError};
use retry::with_retry;

/// Configuration for [`UpstreamClient`].
///
/// ```rust
/// # use speculum::{RetryConfig, UpstreamConfig};
/// # use std::time::Duration;
/// let config = UpstreamConfig::new()
///     .timeout(Duration::from_secs(30))
///     .retry(RetryConfig::disabled());
/// ```
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Whole-request timeout, body included. Default: 60s.
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub discovery: DiscoveryConfig,
    /// Scheme used to reach registry hosts. Default: `https`.
    pub scheme: String,
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
            discovery: DiscoveryConfig::default(),
            scheme: "https".to_string(),
            user_agent: crate::version::user_agent(),
        }
    }
}

impl UpstreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    /// Reach registry hosts over `scheme` instead of `https`.
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// How a host serves provider metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderApi {
    /// Service discovery succeeded; the native API lives at `base_url`.
    Discovered { base_url: String },
    /// No usable discovery document; fall back to the mirror protocol.
    Unsupported,
}

/// Outcome of [`UpstreamClient::fetch_version`].
#[derive(Debug, Clone, PartialEq)]
pub enum VersionFetch {
    /// A mirror-protocol version document, exactly as upstream served it.
    Document(VersionResponse),
    /// The host speaks the native API. Version documents for it are built
    /// from the cached bulk listing instead of one call per version.
    FromListing,
}

/// Client for upstream registries. One per process, shared behind an `Arc`.
pub struct UpstreamClient {
    http: reqwest::Client,
    discovery: DiscoveryCache,
    retry: RetryConfig,
    scheme: String,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        if !matches!(config.scheme.as_str(), "http" | "https") {
            return Err(SpeculumError::Configuration(format!(
                "upstream scheme must be http or https, got {:?}",
                config.scheme
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| {
                SpeculumError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;
        let discovery =
            DiscoveryCache::with_scheme(&config.discovery, http.clone(), config.scheme.as_str());
        Ok(Self {
            http,
            discovery,
            retry: config.retry,
            scheme: config.scheme,
        })
    }

    /// The discovery cache backing [`provider_api`](Self::provider_api).
    pub fn discovery(&self) -> &DiscoveryCache {
        &self.discovery
    }

    /// Decide which protocol `hostname` speaks.
    ///
    /// Any discovery failure, including an invalid document, selects the
    /// mirror-protocol fallback.
    pub async fn provider_api(&self, hostname: &str) -> ProviderApi {
        match self.discovery.discover(hostname).await {
            Ok(record) => ProviderApi::Discovered {
                base_url: record.providers_url,
            },
            Err(e) => {
                debug!(hostname, error = %e, "service discovery failed, using mirror protocol");
                ProviderApi::Unsupported
            }
        }
    }

    /// Fetch the version index for a provider.
    ///
    /// With the native API the bulk listing comes back too, for the caller
    /// to cache. A 404 on either path is [`SpeculumError::NotFound`]; an
    /// empty listing is a valid empty index.
    pub async fn fetch_index(
        &self,
        coord: &ProviderCoordinate,
    ) -> Result<(IndexResponse, Option<BulkListing>)> {
        match self.provider_api(coord.hostname()).await {
            ProviderApi::Discovered { base_url } => {
                let url = format!(
                    "{base_url}/{}/{}/versions",
                    coord.namespace(),
                    coord.provider_type()
                );
                let listing: BulkListing = self
                    .get_json("fetch_index", &url, "versions listing")
                    .await?;
                debug!(
                    provider = %coord,
                    versions = listing.versions.len(),
                    "fetched versions listing"
                );
                Ok((listing.to_index(), Some(listing)))
            }
            ProviderApi::Unsupported => {
                let url = self.mirror_url(coord, "index.json");
                let index: IndexResponse = self.get_json("fetch_index", &url, "index").await?;
                Ok((index, None))
            }
        }
    }

    /// Fetch version metadata.
    ///
    /// Hosts with the native API are never asked per version; the answer
    /// for them is [`VersionFetch::FromListing`]. Other hosts serve
    /// `{version}.json` directly.
    pub async fn fetch_version(
        &self,
        coord: &ProviderCoordinate,
        version: &str,
    ) -> Result<VersionFetch> {
        validate_path_component("version", version)?;
        match self.provider_api(coord.hostname()).await {
            ProviderApi::Discovered { .. } => Ok(VersionFetch::FromListing),
            ProviderApi::Unsupported => {
                let url = self.mirror_url(coord, &format!("{version}.json"));
                let document: VersionResponse =
                    self.get_json("fetch_version", &url, "version").await?;
                Ok(VersionFetch::Document(document))
            }
        }
    }

    /// Resolve the signed download URL and checksum for one platform build.
    ///
    /// Only the native API offers this, so discovery has to succeed; its
    /// error is returned otherwise.
    pub async fn fetch_download_url(
        &self,
        coord: &ProviderCoordinate,
        version: &str,
        platform: &Platform,
    ) -> Result<DownloadInfo> {
        validate_path_component("version", version)?;
        validate_path_component("os", &platform.os)?;
        validate_path_component("arch", &platform.arch)?;
        let record = self.discovery.discover(coord.hostname()).await?;
        let url = format!(
            "{}/{}/{}/{version}/download/{}/{}",
            record.providers_url,
            coord.namespace(),
            coord.provider_type(),
            platform.os,
            platform.arch
        );
        self.get_json("fetch_download_url", &url, "download").await
    }

    /// Stream an archive from `url` without buffering it.
    ///
    /// The URL must be `http`/`https` with a host. Only the initial response
    /// is retried; a failure mid-body surfaces as a stream error.
    pub async fn fetch_archive(&self, url: &str) -> Result<ByteStream> {
        let parsed = Url::parse(url)
            .map_err(|e| SpeculumError::InvalidUrl(format!("archive URL does not parse: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SpeculumError::InvalidUrl(format!(
                "archive URL must use http or https, got {:?}",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(SpeculumError::InvalidUrl(
                "archive URL has no host".to_string(),
            ));
        }
        let redacted = redact(&parsed);

        let start = Instant::now();
        let result = with_retry(&self.retry, "fetch_archive", || {
            self.open_archive(&parsed, &redacted)
        })
        .await;
        record_request("fetch_archive", start, result.is_ok());

        let response = result?;
        debug!(url = %redacted, "streaming archive from upstream");
        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::other(e.without_url()));
        Ok(Box::pin(stream))
    }

    fn mirror_url(&self, coord: &ProviderCoordinate, file: &str) -> String {
        format!(
            "{}://{}/{}/{}/{file}",
            self.scheme,
            coord.hostname(),
            coord.namespace(),
            coord.provider_type()
        )
    }

    /// GET `url` with retry and decode a JSON body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        url: &str,
        what: &'static str,
    ) -> Result<T> {
        let start = Instant::now();
        let result = async {
            let body = with_retry(&self.retry, operation, || self.get_once(url)).await?;
            serde_json::from_slice(&body).map_err(|source| SpeculumError::Decode { what, source })
        }
        .await;
        record_request(operation, start, result.is_ok());
        result
    }

    /// One GET attempt. 5xx and transport failures come back as transient
    /// errors; 404 is `NotFound`; other non-2xx statuses are permanent.
    async fn get_once(&self, url: &str) -> Result<Bytes> {
        debug!(%url, "upstream request");
        let response = self.http.get(url).send().await?;
        let status = response.status();
        check_status(status, url)?;
        Ok(response.bytes().await?)
    }

    async fn open_archive(&self, url: &Url, redacted: &str) -> Result<reqwest::Response> {
        let response = self.http.get(url.clone()).send().await?;
        check_status(response.status(), redacted)?;
        Ok(response)
    }
}

fn check_status(status: StatusCode, url: &str) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(SpeculumError::NotFound(url.to_owned()))
    } else {
        Err(SpeculumError::UpstreamStatus {
            status: status.as_u16(),
            url: url.to_owned(),
        })
    }
}

/// `url` without query or fragment, where download signatures live.
fn redact(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}

fn record_request(operation: &'static str, start: Instant, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(
        telemetry::UPSTREAM_REQUESTS_TOTAL,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(telemetry::UPSTREAM_DURATION_SECONDS, "operation" => operation)
        .record(start.elapsed().as_secs_f64());
}
