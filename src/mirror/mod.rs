//! Cache-or-fetch orchestration behind the mirror routes.
//!
//! Every operation looks in [`Storage`] first and only goes upstream on a
//! miss. Metadata documents are persisted best-effort through
//! [`Mirror::try_cache`]; archive bytes are persisted strictly, because the
//! response is served from the stored copy.
//!
//! Version documents for hosts with the native registry API are built from
//! the bulk listing cached by [`Mirror::get_index`]. They carry no hashes:
//! authentic hashes would mean downloading every platform's archive up
//! front, and the protocol makes them optional.

pub mod urls;

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::storage::{ByteStream, Storage};
use crate::telemetry;
use crate::types::{
    Archive, BulkListing, Platform, ProviderCoordinate, VersionResponse, validate_path_component,
};
use crate::upstream::{UpstreamClient, VersionFetch};
use crate::{Result, SpeculumError};
use urls::{archive_filename, download_url, rewrite_archive_urls};

/// The mirror service. Holds no per-request state; share it behind an `Arc`.
pub struct Mirror {
    storage: Arc<dyn Storage>,
    upstream: Arc<UpstreamClient>,
    base_url: String,
}

impl Mirror {
    /// `base_url` is the public URL of the providers root; archive URLs in
    /// served version documents are built on it.
    pub fn new(
        storage: Arc<dyn Storage>,
        upstream: Arc<UpstreamClient>,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            storage,
            upstream,
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `index.json` for a provider.
    ///
    /// On a miss the bulk listing, when upstream provides one, is cached
    /// next to the index.
    pub async fn get_index(&self, coord: &ProviderCoordinate) -> Result<Bytes> {
        if let Some(cached) = self.storage.get_index(coord).await? {
            record_hit("index");
            debug!(provider = %coord, "index served from cache");
            return Ok(cached);
        }
        record_miss("index");

        let (index, listing) = self.upstream.fetch_index(coord).await?;
        let data = Bytes::from(serde_json::to_vec(&index)?);

        self.try_cache("index", coord, self.storage.put_index(coord, data.clone()))
            .await;
        if let Some(listing) = listing {
            self.try_cache("bulk_listing", coord, async {
                let raw = Bytes::from(serde_json::to_vec(&listing)?);
                self.storage.put_bulk_listing(coord, raw).await
            })
            .await;
        }

        info!(
            provider = %coord,
            versions = index.versions.len(),
            "index fetched from upstream"
        );
        Ok(data)
    }

    /// `{version}.json` for one provider version.
    ///
    /// Cached documents are final and served verbatim.
    pub async fn get_version(&self, coord: &ProviderCoordinate, version: &str) -> Result<Bytes> {
        validate_path_component("version", version)?;
        if let Some(cached) = self.storage.get_version(coord, version).await? {
            record_hit("version");
            debug!(provider = %coord, version, "version served from cache");
            return Ok(cached);
        }
        record_miss("version");

        match self.upstream.fetch_version(coord, version).await? {
            VersionFetch::FromListing => self.build_version_from_listing(coord, version).await,
            VersionFetch::Document(document) => {
                let rewritten = rewrite_archive_urls(&self.base_url, coord, version, document);
                let data = Bytes::from(serde_json::to_vec(&rewritten)?);
                self.try_cache(
                    "version",
                    coord,
                    self.storage.put_version(coord, version, data.clone()),
                )
                .await;
                info!(
                    provider = %coord,
                    version,
                    archives = rewritten.archives.len(),
                    "version fetched from upstream"
                );
                Ok(data)
            }
        }
    }

    /// Build a version document from the cached bulk listing.
    ///
    /// Fails with [`SpeculumError::ListingUnavailable`] when no listing is
    /// cached (the index has to be requested first) and with
    /// [`SpeculumError::NotFound`] when the version is not listed or lists
    /// no platforms.
    pub async fn build_version_from_listing(
        &self,
        coord: &ProviderCoordinate,
        version: &str,
    ) -> Result<Bytes> {
        let Some(raw) = self.storage.get_bulk_listing(coord).await? else {
            return Err(SpeculumError::ListingUnavailable(coord.to_string()));
        };
        let listing: BulkListing = serde_json::from_slice(&raw).map_err(|e| {
            SpeculumError::Storage(format!("corrupt cached versions listing for {coord}: {e}"))
        })?;
        let entry = listing
            .find(version)
            .ok_or_else(|| SpeculumError::NotFound(format!("{coord} {version}")))?;

        let mut document = VersionResponse::default();
        for listed in &entry.platforms {
            let platform = Platform::from(listed);
            if validate_path_component("os", &platform.os).is_err()
                || validate_path_component("arch", &platform.arch).is_err()
            {
                warn!(provider = %coord, version, %platform, "skipping unusable listed platform");
                continue;
            }
            let filename = archive_filename(coord.provider_type(), version, &platform);
            let archive = Archive {
                url: download_url(&self.base_url, coord, version, &platform, &filename),
                hashes: None,
            };
            document.archives.insert(platform.key(), archive);
        }
        if document.archives.is_empty() {
            return Err(SpeculumError::NotFound(format!(
                "{coord} {version} has no platforms"
            )));
        }

        let data = Bytes::from(serde_json::to_vec(&document)?);
        self.try_cache(
            "version",
            coord,
            self.storage.put_version(coord, version, data.clone()),
        )
        .await;
        debug!(
            provider = %coord,
            version,
            archives = document.archives.len(),
            "version built from cached listing"
        );
        Ok(data)
    }

    /// Archive bytes for one platform build, stored under `storage_path`.
    ///
    /// On a miss the archive is downloaded once, written to storage, and
    /// the stored copy is returned. Any failure along the way, including
    /// persisting, fails the request.
    pub async fn get_archive(
        &self,
        coord: &ProviderCoordinate,
        version: &str,
        platform: &Platform,
        storage_path: &str,
    ) -> Result<ByteStream> {
        if let Some(stream) = self.storage.get_archive(storage_path).await? {
            record_hit("archive");
            debug!(path = storage_path, "archive served from cache");
            return Ok(stream);
        }
        record_miss("archive");

        let info = self
            .upstream
            .fetch_download_url(coord, version, platform)
            .await?;
        let body = self.upstream.fetch_archive(&info.download_url).await?;
        self.storage.put_archive(storage_path, body).await?;
        info!(
            provider = %coord,
            version,
            %platform,
            path = storage_path,
            "archive cached"
        );

        self.storage.get_archive(storage_path).await?.ok_or_else(|| {
            SpeculumError::Storage(format!("archive {storage_path} missing after write"))
        })
    }

    /// Run a metadata cache write, logging and counting a failure instead
    /// of returning it.
    async fn try_cache<F>(&self, resource: &'static str, coord: &ProviderCoordinate, write: F)
    where
        F: Future<Output = Result<()>>,
    {
        if let Err(e) = write.await {
            metrics::counter!(telemetry::CACHE_WRITE_FAILURES_TOTAL, "resource" => resource)
                .increment(1);
            warn!(
                provider = %coord,
                resource,
                storage = self.storage.name(),
                error = %e,
                "failed to cache document"
            );
        }
    }
}

fn record_hit(resource: &'static str) {
    metrics::counter!(telemetry::CACHE_HITS_TOTAL, "resource" => resource).increment(1);
}

fn record_miss(resource: &'static str) {
    metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "resource" => resource).increment(1);
}
