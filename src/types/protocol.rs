//! Documents of the provider network mirror protocol.
//!
//! These are both consumed (from mirror-protocol upstreams) and produced
//! (for clients). Maps are ordered so that serialising the same document
//! twice yields identical bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `index.json`: the versions that exist for a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexResponse {
    pub versions: BTreeMap<String, VersionMarker>,
}

impl IndexResponse {
    /// Build an index from version strings.
    pub fn from_versions<I, S>(versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            versions: versions
                .into_iter()
                .map(|v| (v.into(), VersionMarker::default()))
                .collect(),
        }
    }
}

/// Presence marker for a version in an index. Serialises as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMarker {}

/// `{version}.json`: archives of one version, keyed by `os_arch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub archives: BTreeMap<String, Archive>,
}

/// A downloadable provider package.
///
/// `hashes` is optional in the protocol. Documents built by the mirror
/// itself never carry it; upstream-provided hashes pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Vec<String>>,
}
