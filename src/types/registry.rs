//! Documents of the native provider registry API (`providers.v1`).

use serde::{Deserialize, Serialize};

use super::{IndexResponse, Platform};

/// Response of `GET {providers.v1}/{namespace}/{type}/versions`.
///
/// Cached verbatim as the provider's bulk listing: it answers version
/// metadata requests for every listed version without further upstream
/// calls. Carries platforms only; no URLs and no hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkListing {
    #[serde(default)]
    pub versions: Vec<ListedVersion>,
}

impl BulkListing {
    /// Version-presence index derived from the listing.
    pub fn to_index(&self) -> IndexResponse {
        IndexResponse::from_versions(self.versions.iter().map(|v| v.version.as_str()))
    }

    /// Look up one version's entry.
    pub fn find(&self, version: &str) -> Option<&ListedVersion> {
        self.versions.iter().find(|v| v.version == version)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedVersion {
    pub version: String,
    #[serde(default)]
    pub platforms: Vec<ListedPlatform>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedPlatform {
    pub os: String,
    pub arch: String,
}

impl From<&ListedPlatform> for Platform {
    fn from(p: &ListedPlatform) -> Self {
        Platform::new(&p.os, &p.arch)
    }
}

/// Response of `GET {providers.v1}/{namespace}/{type}/{version}/download/{os}/{arch}`.
///
/// The registry returns many more fields; only these two are used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub download_url: String,
    #[serde(default)]
    pub shasum: String,
}
